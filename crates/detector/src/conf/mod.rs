//! Conf module: detector and cache configuration, file/env loading.

pub mod model;
pub mod load;

pub use model::{CacheConfig, DetectorConfig};
