//! Shared utility functions for AQM crates.

/// Date and instant utility functions
pub mod dates {
    use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

    /// Format a NaiveDate as "YYYY-MM-DD"
    pub fn format_date(date: &NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    /// Parse a date string in "YYYY-MM-DD" format
    pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
        Ok(NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?)
    }

    /// Parse an upstream timestamp into a UTC instant.
    ///
    /// Accepts RFC 3339 (`2024-07-18T12:00:00Z`), the AirFire CSV style
    /// `2023-07-11 21:00:00+0000`, a bare `2023-07-11 21:00:00` (read as UTC)
    /// and unix epoch seconds.
    pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%dT%H:%M:%S%z"] {
            if let Ok(dt) = DateTime::parse_from_str(s, format) {
                return Some(dt.with_timezone(&Utc));
            }
        }
        for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
        if s.len() >= 9 && s.chars().all(|c| c.is_ascii_digit()) {
            return s
                .parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0));
        }
        None
    }

    /// 00:00:00 UTC of the given date.
    pub fn start_of_day(date: &NaiveDate) -> DateTime<Utc> {
        Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
    }

    /// 23:59:59 UTC of the given date.
    pub fn end_of_day(date: &NaiveDate) -> DateTime<Utc> {
        start_of_day(date) + Duration::seconds(86_399)
    }

    /// Round to one decimal place, used for load timings.
    pub fn round_tenths(value: f64) -> f64 {
        (value * 10.0).round() / 10.0
    }

    /// Human "time since" text: `"2 days 3 hours ago"`, `"1 minute ago"`,
    /// `"just now"`.
    ///
    /// Each unit is rounded down and only non-zero units are listed, largest
    /// first. Instants in the future read as "just now".
    pub fn format_ago(then: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
        let total_minutes = (*now - *then).num_minutes().max(0);
        let days = total_minutes / (24 * 60);
        let hours = (total_minutes / 60) % 24;
        let minutes = total_minutes % 60;

        let mut parts = Vec::new();
        for (amount, unit) in [(days, "day"), (hours, "hour"), (minutes, "minute")] {
            match amount {
                0 => {}
                1 => parts.push(format!("1 {unit}")),
                n => parts.push(format!("{n} {unit}s")),
            }
        }
        if parts.is_empty() {
            return "just now".to_string();
        }
        format!("{} ago", parts.join(" "))
    }

    /// Whole hours elapsed between two instants, never negative.
    pub fn hours_between(then: &DateTime<Utc>, now: &DateTime<Utc>) -> i64 {
        (*now - *then).num_hours().max(0)
    }

}

/// Text helpers for status lines and property names
pub mod text {
    /// Format items as a human list using the Oxford comma:
    /// `["A"]` → `"A"`, `["A","B"]` → `"A and B"`, `["A","B","C"]` → `"A, B, and C"`.
    pub fn format_list<S: AsRef<str>>(items: &[S]) -> String {
        match items {
            [] => String::new(),
            [only] => only.as_ref().to_string(),
            [first, second] => format!("{} and {}", first.as_ref(), second.as_ref()),
            [head @ .., last] => {
                let head = head.iter().map(|s| s.as_ref()).collect::<Vec<_>>();
                format!("{}, and {}", head.join(", "), last.as_ref())
            }
        }
    }

    /// Convert an upstream property name to snake_case.
    ///
    /// `deviceDeploymentID` → `device_deployment_id`, `AcresBurned` →
    /// `acres_burned`, `OBS DATE` → `obs_date`.
    pub fn snake_case(key: &str) -> String {
        let chars: Vec<char> = key.trim().chars().collect();
        let mut out = String::with_capacity(chars.len() + 4);
        for (i, &c) in chars.iter().enumerate() {
            if c == ' ' || c == '-' {
                out.push('_');
                continue;
            }
            if c.is_uppercase() && i > 0 {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next_is_lower)
                {
                    out.push('_');
                }
            }
            out.extend(c.to_lowercase());
        }
        while out.contains("__") {
            out = out.replace("__", "_");
        }
        out.trim_matches('_').to_string()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_format_list() {
            let empty: [&str; 0] = [];
            assert_eq!(format_list(&empty), "");
            assert_eq!(format_list(&["A"]), "A");
            assert_eq!(format_list(&["A", "B"]), "A and B");
            assert_eq!(format_list(&["A", "B", "C"]), "A, B, and C");
            assert_eq!(format_list(&["A", "B", "C", "D"]), "A, B, C, and D");
        }

        #[test]
        fn test_snake_case() {
            assert_eq!(snake_case("deviceDeploymentID"), "device_deployment_id");
            assert_eq!(snake_case("AcresBurned"), "acres_burned");
            assert_eq!(snake_case("PercentContained"), "percent_contained");
            assert_eq!(snake_case("lat_deg"), "lat_deg");
            assert_eq!(snake_case("OBS DATE"), "obs_date");
            assert_eq!(snake_case("urlPath"), "url_path");
            assert_eq!(snake_case("epa_pm25"), "epa_pm25");
        }
    }
}

/// Coordinate helpers
pub mod geo {
    /// Convert degrees-minutes-seconds strings into decimal degrees.
    ///
    /// The sign is taken from the degrees field; empty minutes or seconds
    /// count as zero. Returns `None` when degrees are missing or any part
    /// is not a number.
    pub fn dms_to_decimal(deg: &str, min: &str, sec: &str) -> Option<f64> {
        let deg = deg.trim();
        if deg.is_empty() {
            return None;
        }
        let parse_part = |s: &str| -> Option<f64> {
            let s = s.trim();
            if s.is_empty() {
                Some(0.0)
            } else {
                s.parse::<f64>().ok()
            }
        };
        let d = deg.parse::<f64>().ok()?;
        let m = parse_part(min)?;
        let s = parse_part(sec)?;
        let sign = if deg.starts_with('-') { -1.0 } else { 1.0 };
        let value = sign * (d.abs() + m / 60.0 + s / 3600.0);
        value.is_finite().then_some(value)
    }

    /// True when the pair is a finite WGS84 coordinate.
    pub fn is_valid_lon_lat(lon: f64, lat: f64) -> bool {
        lon.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(&lon)
            && (-90.0..=90.0).contains(&lat)
    }

}
