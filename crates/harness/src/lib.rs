//! Benchmark harness for the format detector: synthetic payload tiers,
//! heap tracking, and timing reports.

pub mod alloc;
pub mod config;
pub mod generator;
pub mod report;
pub mod runner;

pub use config::HarnessConfig;
pub use generator::{PayloadGenerator, PayloadKind, Tier};
pub use report::{BenchmarkReport, TierSummary};
pub use runner::{BenchmarkRunner, RunSample};
