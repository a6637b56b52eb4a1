use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed scalar carried in a record's attribute bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Number(f64),
    Text(String),
    Flag(bool),
    Time(DateTime<Utc>),
}

/// Tri-state attribute value.
///
/// - `Present`: an actual upstream value
/// - `Absent`: upstream sent nothing (`""`, `null`, `NA`); never read as zero
/// - `Invalid`: upstream sent something that failed coercion; the raw text is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Present(Scalar),
    Absent,
    Invalid(String),
}

/// Spellings upstream feeds use for "no value".
const MISSING_MARKERS: [&str; 5] = ["", "na", "n/a", "null", "nan"];

fn is_missing(raw: &str) -> bool {
    let lowered = raw.trim().to_lowercase();
    MISSING_MARKERS.contains(&lowered.as_str())
}

impl Value {
    pub fn number(n: f64) -> Self {
        if n.is_finite() {
            Value::Present(Scalar::Number(n))
        } else {
            Value::Invalid(n.to_string())
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.trim().is_empty() {
            Value::Absent
        } else {
            Value::Present(Scalar::Text(s))
        }
    }

    pub fn flag(b: bool) -> Self {
        Value::Present(Scalar::Flag(b))
    }

    pub fn time(t: DateTime<Utc>) -> Self {
        Value::Present(Scalar::Time(t))
    }

    /// Coerce a cell that is expected to hold a number.
    pub fn number_from_str(raw: &str) -> Self {
        if is_missing(raw) {
            return Value::Absent;
        }
        match raw.trim().parse::<f64>() {
            Ok(n) => Value::number(n),
            Err(_) => Value::Invalid(raw.trim().to_string()),
        }
    }

    /// Coerce a cell that is expected to hold a timestamp.
    pub fn time_from_str(raw: &str) -> Self {
        if is_missing(raw) {
            return Value::Absent;
        }
        match aqm_utils::dates::parse_instant(raw) {
            Some(t) => Value::time(t),
            None => Value::Invalid(raw.trim().to_string()),
        }
    }

    /// Coerce a cell that is expected to hold a flag. `"1"` and `"true"`
    /// (any case) are true, `"0"` and `"false"` are false.
    pub fn flag_from_str(raw: &str) -> Self {
        if is_missing(raw) {
            return Value::Absent;
        }
        match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Value::flag(true),
            "0" | "false" | "no" => Value::flag(false),
            other => Value::Invalid(other.to_string()),
        }
    }

    /// Header-driven coercion for untyped cells: numeric-looking text
    /// becomes a number, missing markers become `Absent`, anything else
    /// stays text.
    pub fn infer_from_str(raw: &str) -> Self {
        if is_missing(raw) {
            return Value::Absent;
        }
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Value::Present(Scalar::Number(n)),
            _ => Value::Present(Scalar::Text(trimmed.to_string())),
        }
    }

    /// Coerce an arbitrary JSON value. Objects and arrays are kept as their
    /// JSON text.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Absent,
            serde_json::Value::Bool(b) => Value::flag(*b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => Value::number(f),
                None => Value::Invalid(n.to_string()),
            },
            serde_json::Value::String(s) => Value::infer_from_str(s),
            other => Value::Present(Scalar::Text(other.to_string())),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Value::Present(_))
    }

    /// Finite numeric value, if present.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Present(Scalar::Number(n)) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Present(Scalar::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Value::Present(Scalar::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Present(Scalar::Time(t)) => Some(*t),
            _ => None,
        }
    }

    /// Present value rendered as a JSON value, `None` otherwise.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::Present(Scalar::Number(n)) => {
                serde_json::Number::from_f64(*n).map(serde_json::Value::Number)
            }
            Value::Present(Scalar::Text(s)) => Some(serde_json::Value::String(s.clone())),
            Value::Present(Scalar::Flag(b)) => Some(serde_json::Value::Bool(*b)),
            Value::Present(Scalar::Time(t)) => Some(serde_json::Value::String(t.to_rfc3339())),
            Value::Absent | Value::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_markers_are_absent_not_zero() {
        assert_eq!(Value::number_from_str(""), Value::Absent);
        assert_eq!(Value::number_from_str("NA"), Value::Absent);
        assert_eq!(Value::number_from_str(" null "), Value::Absent);
        assert_eq!(Value::from_json(&serde_json::Value::Null), Value::Absent);
        assert_eq!(Value::number_from_str("").as_number(), None);
    }

    #[test]
    fn test_number_coercion() {
        assert_eq!(Value::number_from_str("12.5").as_number(), Some(12.5));
        assert_eq!(Value::number_from_str("0").as_number(), Some(0.0));
        assert_eq!(
            Value::number_from_str("ART"),
            Value::Invalid("ART".to_string())
        );
        assert!(!Value::number(f64::NAN).is_present());
    }

    #[test]
    fn test_infer_from_str() {
        assert_eq!(Value::infer_from_str("7.7").as_number(), Some(7.7));
        assert_eq!(
            Value::infer_from_str("America/Denver").as_text(),
            Some("America/Denver")
        );
        assert_eq!(Value::infer_from_str("NA"), Value::Absent);
    }

    #[test]
    fn test_flag_and_json() {
        assert_eq!(Value::flag_from_str("1").as_flag(), Some(true));
        assert_eq!(Value::flag_from_str("FALSE").as_flag(), Some(false));
        assert_eq!(Value::from_json(&serde_json::json!(true)).as_flag(), Some(true));
        assert_eq!(Value::from_json(&serde_json::json!("42")).as_number(), Some(42.0));
        assert_eq!(Value::flag(true).to_json(), Some(serde_json::json!(true)));
        assert_eq!(Value::Absent.to_json(), None);
    }
}
