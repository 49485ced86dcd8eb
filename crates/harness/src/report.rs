use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use detector::{CacheStats, MetricsSnapshot};
use serde::Serialize;

use crate::generator::Tier;
use crate::runner::RunSample;

const NO_MATCH: &str = "none";

/// Aggregates for one size tier
#[derive(Debug, Clone, Serialize)]
pub struct TierSummary {
    pub tier: Tier,
    pub runs: usize,
    pub avg_payload_bytes: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub early_exit_rate: f64,
    pub cache_hit_rate: f64,
    pub timeout_rate: f64,
    pub avg_peak_bytes: u64,
    pub max_peak_bytes: u64,
    /// Winning adapter name -> runs it won
    pub best_matches: BTreeMap<String, usize>,
}

impl TierSummary {
    fn from_runs(tier: Tier, runs: &[&RunSample]) -> Self {
        let count = runs.len();
        let n = count as f64;
        let millis: Vec<f64> = runs
            .iter()
            .map(|s| s.elapsed.as_secs_f64() * 1000.0)
            .collect();
        let rate = |pred: fn(&RunSample) -> bool| {
            runs.iter().filter(|s| pred(s)).count() as f64 / n
        };

        let mut best_matches = BTreeMap::new();
        for sample in runs {
            let name = sample.best_match.as_deref().unwrap_or(NO_MATCH);
            *best_matches.entry(name.to_string()).or_insert(0) += 1;
        }

        Self {
            tier,
            runs: count,
            avg_payload_bytes: runs.iter().map(|s| s.payload_bytes as u64).sum::<u64>() / count as u64,
            avg_ms: millis.iter().sum::<f64>() / n,
            min_ms: millis.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: millis.iter().copied().fold(0.0, f64::max),
            early_exit_rate: rate(|s| s.early_exit),
            cache_hit_rate: rate(|s| s.cache_hit),
            timeout_rate: rate(|s| s.timed_out),
            avg_peak_bytes: runs.iter().map(|s| s.peak_bytes).sum::<u64>() / count as u64,
            max_peak_bytes: runs.iter().map(|s| s.peak_bytes).max().unwrap_or(0),
            best_matches,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub generated_at: DateTime<Utc>,
    pub total_runs: usize,
    pub tiers: Vec<TierSummary>,
    pub cache: CacheStats,
    pub metrics: MetricsSnapshot,
}

impl BenchmarkReport {
    /// Summarize samples per tier. Tiers without samples are left out.
    pub fn from_samples(samples: &[RunSample], cache: CacheStats, metrics: MetricsSnapshot) -> Self {
        let tiers = Tier::ALL
            .iter()
            .filter_map(|&tier| {
                let runs: Vec<&RunSample> = samples.iter().filter(|s| s.tier == tier).collect();
                (!runs.is_empty()).then(|| TierSummary::from_runs(tier, &runs))
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            total_runs: samples.len(),
            tiers,
            cache,
            metrics,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = writeln!(
            out,
            "Detection benchmark: {} runs ({})",
            self.total_runs,
            self.generated_at.to_rfc3339()
        );
        let _ = writeln!(
            out,
            "{:<8} {:>6} {:>12} {:>10} {:>10} {:>10} {:>11} {:>10} {:>12}",
            "tier", "runs", "avg bytes", "avg ms", "min ms", "max ms", "early exit", "cache hit", "avg peak"
        );
        for t in &self.tiers {
            let _ = writeln!(
                out,
                "{:<8} {:>6} {:>12} {:>10.3} {:>10.3} {:>10.3} {:>10.1}% {:>9.1}% {:>12}",
                t.tier.to_string(),
                t.runs,
                t.avg_payload_bytes,
                t.avg_ms,
                t.min_ms,
                t.max_ms,
                t.early_exit_rate * 100.0,
                t.cache_hit_rate * 100.0,
                format_bytes(t.avg_peak_bytes),
            );
        }

        let _ = writeln!(out);
        for t in &self.tiers {
            let winners: Vec<String> = t
                .best_matches
                .iter()
                .map(|(name, runs)| format!("{}={}", name, runs))
                .collect();
            let _ = writeln!(out, "{} winners: {}", t.tier, winners.join(", "));
        }

        let _ = writeln!(
            out,
            "cache: {} entries, {} hits, {} misses, {} evictions, {:.1}% hit rate, {}",
            self.cache.entries,
            self.cache.hits,
            self.cache.misses,
            self.cache.evictions,
            self.cache.hit_rate * 100.0,
            format_bytes(self.cache.memory_bytes as u64),
        );
        let _ = writeln!(
            out,
            "detector: {} detections, {} early exits, {} timeouts, {} adapter errors, avg {:.1} us",
            self.metrics.detections,
            self.metrics.early_exits,
            self.metrics.timeouts,
            self.metrics.adapter_errors,
            self.metrics.avg_detection_time_us,
        );
        out
    }
}

fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB {
        format!("{:.1} MiB", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}
