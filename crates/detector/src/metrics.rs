use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use serde::Serialize;

/// A wrapper that forces the wrapped data onto its own cache line(s).
///
/// Detection tasks on different worker threads update different groups;
/// `#[repr(align(64))]` keeps each group on a separate 64-byte line so
/// those updates do not contend.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct CacheAligned<T>(pub T);

/// Detection outcomes
#[derive(Debug, Default)]
pub struct OutcomeCounters {
    pub detections: AtomicU64,
    pub matched: AtomicU64,
    pub unmatched: AtomicU64,
    pub early_exits: AtomicU64,
    pub timeouts: AtomicU64,
}

/// Signature cache lookups made by the registry
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

/// Per-adapter evaluation outcomes
#[derive(Debug, Default)]
pub struct AdapterCounters {
    pub evaluated: AtomicU64,
    pub errors: AtomicU64,
    pub skipped: AtomicU64,
}

#[derive(Debug, Default)]
pub struct IngestCounters {
    pub ingests: AtomicU64,
    pub failures: AtomicU64,
    pub legacy: AtomicU64,
}

/// Aggregate timing of detections that ran adapters (cache hits excluded)
#[derive(Debug, Default)]
pub struct TotalMetrics {
    pub time_nanos: AtomicU64,
    pub count: AtomicU64,
}

/// Counters for the detection pipeline.
///
/// All operations use `Ordering::Relaxed`; `snapshot()` reads each counter
/// atomically but not the set as a whole, so derived rates can be off by
/// an in-flight detection.
#[derive(Debug, Default)]
pub struct DetectionMetrics {
    pub outcomes: CacheAligned<OutcomeCounters>,
    pub cache: CacheAligned<CacheCounters>,
    pub adapters: CacheAligned<AdapterCounters>,
    pub ingest: CacheAligned<IngestCounters>,
    pub totals: CacheAligned<TotalMetrics>,
}

impl DetectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished detection (fresh or cached)
    #[inline]
    pub fn record_detection(&self, matched: bool) {
        let outcomes = &self.outcomes.0;
        outcomes.detections.fetch_add(1, Ordering::Relaxed);
        if matched {
            outcomes.matched.fetch_add(1, Ordering::Relaxed);
        } else {
            outcomes.unmatched.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record wall-clock time of an adapter fan-out
    #[inline]
    pub fn record_fan_out(&self, elapsed: Duration, evaluated: u64) {
        self.totals.0.count.fetch_add(1, Ordering::Relaxed);
        self.totals
            .0
            .time_nanos
            .fetch_add(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::Relaxed);
        self.adapters.0.evaluated.fetch_add(evaluated, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache.0.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache.0.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_early_exit(&self, skipped: u64) {
        self.outcomes.0.early_exits.fetch_add(1, Ordering::Relaxed);
        self.adapters.0.skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_timeout(&self, skipped: u64) {
        self.outcomes.0.timeouts.fetch_add(1, Ordering::Relaxed);
        self.adapters.0.skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Adapter panicked during scoring (caught)
    #[inline]
    pub fn record_adapter_error(&self) {
        self.adapters.0.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ingest(&self, success: bool) {
        self.ingest.0.ingests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.ingest.0.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_legacy(&self) {
        self.ingest.0.legacy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let fan_outs = self.totals.0.count.load(Ordering::Relaxed);
        let total_time_ns = self.totals.0.time_nanos.load(Ordering::Relaxed);
        let cache_hits = self.cache.0.hits.load(Ordering::Relaxed);
        let cache_misses = self.cache.0.misses.load(Ordering::Relaxed);
        let ingests = self.ingest.0.ingests.load(Ordering::Relaxed);
        let ingest_failures = self.ingest.0.failures.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;

        MetricsSnapshot {
            detections: self.outcomes.0.detections.load(Ordering::Relaxed),
            matched: self.outcomes.0.matched.load(Ordering::Relaxed),
            unmatched: self.outcomes.0.unmatched.load(Ordering::Relaxed),
            early_exits: self.outcomes.0.early_exits.load(Ordering::Relaxed),
            timeouts: self.outcomes.0.timeouts.load(Ordering::Relaxed),

            cache_hits,
            cache_misses,
            cache_hit_rate: if lookups > 0 {
                cache_hits as f64 / lookups as f64
            } else {
                0.0
            },

            adapters_evaluated: self.adapters.0.evaluated.load(Ordering::Relaxed),
            adapter_errors: self.adapters.0.errors.load(Ordering::Relaxed),
            adapters_skipped: self.adapters.0.skipped.load(Ordering::Relaxed),

            ingests,
            ingest_failures,
            legacy_lookups: self.ingest.0.legacy.load(Ordering::Relaxed),
            ingest_success_rate: if ingests > 0 {
                (ingests - ingest_failures) as f64 / ingests as f64
            } else {
                1.0
            },

            fan_outs,
            avg_detection_time_us: if fan_outs > 0 {
                (total_time_ns as f64 / fan_outs as f64) / 1000.0
            } else {
                0.0
            },
        }
    }
}

/// A read-only, serializable snapshot of detection metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    // Outcomes
    pub detections: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub early_exits: u64,
    pub timeouts: u64,

    // Cache
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,

    // Adapters
    pub adapters_evaluated: u64,
    pub adapter_errors: u64,
    pub adapters_skipped: u64,

    // Ingest
    pub ingests: u64,
    pub ingest_failures: u64,
    pub legacy_lookups: u64,
    pub ingest_success_rate: f64,

    // Performance
    pub fan_outs: u64,
    pub avg_detection_time_us: f64,
}

impl MetricsSnapshot {
    /// Flatten the headline numbers into string pairs for log fields or
    /// report headers.
    pub fn to_metadata_map(&self) -> std::collections::HashMap<String, String> {
        let mut map = std::collections::HashMap::new();

        map.insert("detections".to_string(), self.detections.to_string());
        map.insert("matched".to_string(), self.matched.to_string());
        map.insert("early_exits".to_string(), self.early_exits.to_string());
        map.insert("timeouts".to_string(), self.timeouts.to_string());

        map.insert("cache_hit_rate".to_string(), format!("{:.2}", self.cache_hit_rate));
        map.insert("avg_detection_time_us".to_string(), format!("{:.2}", self.avg_detection_time_us));

        map.insert("adapter_errors".to_string(), self.adapter_errors.to_string());
        map.insert("ingest_success_rate".to_string(), format!("{:.2}", self.ingest_success_rate));

        map
    }
}
