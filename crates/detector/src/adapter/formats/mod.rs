//! Concrete format adapters.
//!
//! Registration order in `AdapterRegistry::with_default_adapters` matches
//! the declaration order below and decides ties.

pub mod json;
pub mod carbon_telemetry;
pub mod ndjson;
pub mod csv;
pub mod xml;
pub mod binary_record;

pub use binary_record::BinaryRecordAdapter;
pub use carbon_telemetry::CarbonTelemetryAdapter;
pub use csv::CsvAdapter;
pub use json::{JsonAdapter, JsonAdapterConfig};
pub use ndjson::NdjsonAdapter;
pub use xml::XmlAdapter;
