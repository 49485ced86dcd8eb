/// Format adapters and the data they produce
///
/// # Architecture
///
/// - `traits.rs`: the `FormatAdapter` contract every format implements
/// - `model.rs`: confidence scores, detection results, normalized records
/// - `fields.rs`: canonical field vocabularies shared by text adapters
/// - `formats/`: concrete adapters, one per format
///
/// # Safety Guarantees
///
/// All adapters implement:
/// - Pure scoring (no I/O, no interior mutability)
/// - Binary safety (non-UTF8 input scores 0.0 instead of failing)
/// - Bounded detection work (large payloads are sampled, not fully parsed)

pub mod traits;
pub mod model;
pub mod fields;
pub mod sniff;
pub mod formats;
mod serde_utils;

pub use traits::FormatAdapter;
pub use model::{ConfidenceScore, DetectionResult, Measurement, NormalizedRecord};

// Constants
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.80;
pub const DEFAULT_EARLY_EXIT_THRESHOLD: f64 = 0.95;
/// Payloads up to this size are parsed in full during scoring
pub const FULL_PARSE_LIMIT: usize = 1_048_576; // 1MB
/// Prefix inspected by byte-level heuristics on larger payloads
pub const DETECTION_SAMPLE_SIZE: usize = 64 * 1024;

pub const EVIDENCE_EARLY_EXIT: &str = "skipped due to early exit";
pub const EVIDENCE_TIMEOUT: &str = "skipped due to timeout";
