use std::time::Duration;

use bytes::Bytes;
use detector::AdapterRegistry;
use tracing::{debug, info};

use crate::alloc::PeakScope;
use crate::config::HarnessConfig;
use crate::generator::{PayloadGenerator, PayloadKind, Tier};
use crate::report::BenchmarkReport;

/// Measurements for one `detect_report` call
#[derive(Debug, Clone)]
pub struct RunSample {
    pub tier: Tier,
    pub kind: PayloadKind,
    pub payload_bytes: usize,
    pub elapsed: Duration,
    /// Heap high-water mark above the pre-run level
    pub peak_bytes: u64,
    pub allocations: u64,
    pub early_exit: bool,
    pub cache_hit: bool,
    pub timed_out: bool,
    pub best_match: Option<String>,
}

/// Drives the detector over every tier and payload kind.
pub struct BenchmarkRunner {
    config: HarnessConfig,
    registry: AdapterRegistry,
}

impl BenchmarkRunner {
    pub fn new(config: HarnessConfig) -> Self {
        let registry = AdapterRegistry::with_default_adapters(config.detector.clone());
        Self { config, registry }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Run `iterations` detections per tier and kind.
    ///
    /// With `reuse_payloads` every iteration sees the same bytes, so all
    /// but the first are expected to be served from the signature cache.
    pub async fn run(&self) -> Vec<RunSample> {
        let run = &self.config.run;
        let mut generator = PayloadGenerator::new(run.seed);
        let mut samples =
            Vec::with_capacity(Tier::ALL.len() * PayloadKind::ALL.len() * run.iterations);

        for tier in Tier::ALL {
            info!(%tier, records = tier.records(&self.config.tiers), "Running tier");
            for kind in PayloadKind::ALL {
                let mut payload = generator.generate_tier(kind, tier, &self.config.tiers);
                for iteration in 0..run.iterations {
                    if iteration > 0 && !run.reuse_payloads {
                        payload = generator.generate_tier(kind, tier, &self.config.tiers);
                    }
                    samples.push(self.measure(tier, kind, payload.clone()).await);
                }
            }
        }

        samples
    }

    async fn measure(&self, tier: Tier, kind: PayloadKind, payload: Bytes) -> RunSample {
        let payload_bytes = payload.len();

        let scope = PeakScope::start();
        let report = self.registry.detect_report(payload).await;
        let (peak_bytes, allocations) = scope.finish();

        debug!(
            %tier,
            %kind,
            payload_bytes,
            elapsed_us = report.elapsed.as_micros() as u64,
            peak_bytes,
            cache_hit = report.cache_hit,
            best_match = ?report.result.best_match,
            "Run complete"
        );

        RunSample {
            tier,
            kind,
            payload_bytes,
            elapsed: report.elapsed,
            peak_bytes,
            allocations,
            early_exit: report.early_exit,
            cache_hit: report.cache_hit,
            timed_out: report.timeout.is_some(),
            best_match: report.result.best_match,
        }
    }

    /// Aggregate `samples` together with the registry's cache and metrics.
    pub fn report(&self, samples: &[RunSample]) -> BenchmarkReport {
        BenchmarkReport::from_samples(
            samples,
            self.registry.cache_stats(),
            self.registry.metrics().snapshot(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;

    fn quick_config(reuse_payloads: bool) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.run.iterations = 2;
        config.run.reuse_payloads = reuse_payloads;
        config.tiers = TierConfig {
            small: 1,
            medium: 5,
            large: 10,
        };
        config
    }

    #[tokio::test]
    async fn test_runs_every_tier_and_kind() {
        let runner = BenchmarkRunner::new(quick_config(true));
        let samples = runner.run().await;

        assert_eq!(samples.len(), Tier::ALL.len() * PayloadKind::ALL.len() * 2);
        for tier in Tier::ALL {
            for kind in PayloadKind::ALL {
                let count = samples
                    .iter()
                    .filter(|s| s.tier == tier && s.kind == kind)
                    .count();
                assert_eq!(count, 2);
            }
        }
        assert!(samples.iter().all(|s| s.best_match.is_some()));
    }

    #[tokio::test]
    async fn test_reused_payloads_hit_the_cache() {
        let runner = BenchmarkRunner::new(quick_config(true));
        let samples = runner.run().await;

        // Iterations alternate 0, 1 for each tier/kind pair
        let (first, repeat): (Vec<_>, Vec<_>) =
            samples.iter().enumerate().partition(|(i, _)| i % 2 == 0);
        assert!(first.iter().all(|(_, s)| !s.cache_hit));
        assert!(repeat.iter().any(|(_, s)| s.cache_hit));
        assert!(runner.registry().cache_stats().hits > 0);
    }

    #[tokio::test]
    async fn test_fresh_payloads_miss_the_cache() {
        let runner = BenchmarkRunner::new(quick_config(false));
        let samples = runner.run().await;
        assert!(samples.iter().all(|s| !s.cache_hit));
    }

    #[tokio::test]
    async fn test_report_covers_all_tiers() {
        let runner = BenchmarkRunner::new(quick_config(true));
        let samples = runner.run().await;
        let report = runner.report(&samples);

        assert_eq!(report.tiers.len(), Tier::ALL.len());
        assert_eq!(report.metrics.detections, samples.len() as u64);
        assert!(report.tiers.iter().all(|t| t.runs == PayloadKind::ALL.len() * 2));
    }
}
