// Payload format detection: pluggable adapters, concurrent confidence
// scoring, signature caching.

// Core infrastructure
pub mod error;
pub mod conf;
pub mod metrics;
pub mod telemetry;

// Detection domain
pub mod adapter;
pub mod cache;
pub mod registry;

pub use adapter::{ConfidenceScore, DetectionResult, FormatAdapter, Measurement, NormalizedRecord};
pub use cache::{CacheStats, Fingerprint, SignatureCache};
pub use conf::{CacheConfig, DetectorConfig};
pub use error::{DetectError, DetectResult, DetectionTimeout};
pub use metrics::{DetectionMetrics, MetricsSnapshot};
pub use registry::{AdapterRegistry, DetectionReport};
