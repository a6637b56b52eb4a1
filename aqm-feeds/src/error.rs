/// Error types for loading and decoding upstream feeds
use std::fmt;
use thiserror::Error;

/// A single malformed row reported by the tabular decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    /// 1-based line number in the payload (the header is line 1).
    pub line: u64,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Main error type for feed operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    /// Network, HTTP or file access failed
    #[error("transport failure for {address}: {message}")]
    Transport { address: String, message: String },

    /// The loader did not finish within its configured timeout
    #[error("timed out after {seconds}s loading {address}")]
    Timeout { address: String, seconds: u64 },

    /// Payload is malformed. Row problems are listed in `rows`.
    #[error("failed to decode {feed}: {message}")]
    Decode {
        feed: String,
        message: String,
        rows: Vec<RowError>,
    },

    /// A well-formed record that is semantically unusable. Decoders recover
    /// from this locally by dropping the record.
    #[error("invalid record: {0}")]
    Validation(String),
}

impl FeedError {
    /// Decode error without row detail.
    pub fn decode(feed: &str, message: impl Into<String>) -> Self {
        FeedError::Decode {
            feed: feed.to_string(),
            message: message.into(),
            rows: Vec::new(),
        }
    }

    /// Decode error aggregating every malformed row.
    pub fn malformed_rows(feed: &str, rows: Vec<RowError>) -> Self {
        let message = match rows.first() {
            Some(first) => format!("{} malformed row(s), first at {}", rows.len(), first),
            None => "malformed rows".to_string(),
        };
        FeedError::Decode {
            feed: feed.to_string(),
            message,
            rows,
        }
    }

    /// True for network/file failures, including timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(self, FeedError::Transport { .. } | FeedError::Timeout { .. })
    }
}

/// Type alias for Results using FeedError
pub type Result<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_rows_message_names_first_row() {
        let err = FeedError::malformed_rows(
            "purpleair",
            vec![
                RowError {
                    line: 3,
                    message: "expected 8 fields, found 2".to_string(),
                },
                RowError {
                    line: 9,
                    message: "bad timestamp".to_string(),
                },
            ],
        );
        assert_eq!(
            err.to_string(),
            "failed to decode purpleair: 2 malformed row(s), first at line 3: expected 8 fields, found 2"
        );
        assert!(!err.is_transport());
    }
}
