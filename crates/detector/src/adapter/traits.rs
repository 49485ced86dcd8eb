pub use super::model::{ConfidenceScore, DetectionResult, Measurement, NormalizedRecord};
pub use crate::error::{DetectError, DetectResult};

/// Detection and parsing logic for exactly one payload format.
///
/// Implementations must be stateless once constructed: the registry shares a
/// single instance across concurrent detections.
pub trait FormatAdapter: Send + Sync {
    /// Registry key for this adapter
    fn name(&self) -> &str;

    /// cheap yes/no check used by older string-based call sites
    fn legacy_detect(&self, raw: &str) -> bool;

    /// Score how strongly `payload` matches this format.
    ///
    /// Never fails: malformed input yields a 0.0 score with evidence.
    fn score(&self, payload: &[u8]) -> ConfidenceScore;

    /// Parse `raw` into this format's normalized shape
    fn ingest(&self, raw: &[u8]) -> DetectResult<NormalizedRecord>;
}
