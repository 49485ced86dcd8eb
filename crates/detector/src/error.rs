use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the detection subsystem.
///
/// Only `UnknownFormat`, `UnparsablePayload`, `Timeout`, `PayloadTooLarge`,
/// `Io` and `Config` ever reach a caller. `AdapterEvaluation` is produced when
/// an adapter panics mid-evaluation and is always folded back into a
/// zero-confidence score by the registry.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Adapter '{adapter}' failed: {message}")]
    AdapterEvaluation { adapter: String, message: String },

    #[error("Unknown format: no adapter matched ({evaluated} evaluated)")]
    UnknownFormat { evaluated: usize },

    #[error("Unparsable payload for '{adapter}': {reason}")]
    UnparsablePayload { adapter: String, reason: String },

    #[error(transparent)]
    Timeout(#[from] DetectionTimeout),

    #[error("Payload too large: {size} bytes (max: {limit} bytes)")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DetectError {
    pub fn unparsable(adapter: &str, reason: impl Into<String>) -> Self {
        DetectError::UnparsablePayload {
            adapter: adapter.to_string(),
            reason: reason.into(),
        }
    }
}

pub type DetectResult<T> = Result<T, DetectError>;

/// Soft failure: `max_detection_time` elapsed before every adapter resolved.
///
/// Returned next to a usable partial result rather than in place of one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Detection timed out after {elapsed:?} (limit {limit:?}); pending: {pending:?}")]
pub struct DetectionTimeout {
    pub limit: Duration,
    pub elapsed: Duration,
    /// Adapters that had not resolved when the deadline passed
    pub pending: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unparsable_message() {
        let err = DetectError::unparsable("csv", "row 3 has 2 columns, expected 3");
        assert_eq!(
            err.to_string(),
            "Unparsable payload for 'csv': row 3 has 2 columns, expected 3"
        );
    }

    #[test]
    fn test_timeout_converts_into_detect_error() {
        let timeout = DetectionTimeout {
            limit: Duration::from_millis(10),
            elapsed: Duration::from_millis(12),
            pending: vec!["xml".to_string()],
        };
        let err: DetectError = timeout.clone().into();
        assert!(matches!(err, DetectError::Timeout(ref t) if *t == timeout));
        assert!(err.to_string().contains("xml"));
    }
}
