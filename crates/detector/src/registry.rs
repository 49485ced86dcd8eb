//! Detection orchestrator.
//!
//! Every registered adapter scores the payload concurrently on tokio's
//! blocking pool. Results are collected until all adapters resolve, one
//! reaches `early_exit_threshold`, or `max_detection_time` elapses.
//! Unresolved adapters are reported as 0.0 with a "skipped" evidence
//! string, so the score list always has one row per adapter.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::adapter::formats::*;
use crate::adapter::{
    ConfidenceScore, DetectionResult, FormatAdapter, NormalizedRecord, EVIDENCE_EARLY_EXIT,
    EVIDENCE_TIMEOUT,
};
use crate::cache::{CacheStats, Fingerprint, SignatureCache};
use crate::conf::DetectorConfig;
use crate::error::{DetectError, DetectResult, DetectionTimeout};
use crate::metrics::DetectionMetrics;

/// Detection result plus the signals behind it
#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub result: DetectionResult,
    /// An adapter reached the early-exit threshold before the rest resolved
    pub early_exit: bool,
    pub cache_hit: bool,
    /// Set when the deadline passed with adapters still pending
    pub timeout: Option<DetectionTimeout>,
    pub elapsed: Duration,
}

struct FanOut {
    scores: Vec<ConfidenceScore>,
    early_exit: bool,
    timeout: Option<DetectionTimeout>,
}

type ScoreOutcome = (usize, Result<ConfidenceScore, String>);

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct AdapterRegistry {
    /// Registration order is kept; it breaks score ties and drives the legacy path
    adapters: Vec<(String, Arc<dyn FormatAdapter>)>,
    config: DetectorConfig,
    cache: SignatureCache,
    metrics: DetectionMetrics,
}

impl AdapterRegistry {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            adapters: Vec::new(),
            cache: SignatureCache::new(config.cache.clone()),
            config,
            metrics: DetectionMetrics::new(),
        }
    }

    /// Registry with the built-in adapters, in tie-breaking order
    pub fn with_default_adapters(config: DetectorConfig) -> Self {
        let mut registry = Self::new(config);
        registry.register(json::NAME, JsonAdapter::default());
        registry.register(carbon_telemetry::NAME, CarbonTelemetryAdapter);
        registry.register(ndjson::NAME, NdjsonAdapter);
        registry.register(csv::NAME, CsvAdapter);
        registry.register(xml::NAME, XmlAdapter);
        registry.register(binary_record::NAME, BinaryRecordAdapter);
        registry
    }

    /// Insert or replace the adapter registered under `name`.
    ///
    /// A replaced adapter keeps its original slot. Cached results are
    /// dropped because they were computed against the old adapter set.
    pub fn register<A>(&mut self, name: impl Into<String>, adapter: A)
    where
        A: FormatAdapter + 'static,
    {
        let name = name.into();
        let adapter: Arc<dyn FormatAdapter> = Arc::new(adapter);

        match self.adapters.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => {
                info!(adapter = %name, "Replacing format adapter");
                slot.1 = adapter;
            }
            None => {
                info!(adapter = %name, slot = self.adapters.len(), "Registered format adapter");
                self.adapters.push((name, adapter));
            }
        }
        self.cache.invalidate_all();
    }

    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FormatAdapter>> {
        self.adapters
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, adapter)| Arc::clone(adapter))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn cache(&self) -> &SignatureCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn metrics(&self) -> &DetectionMetrics {
        &self.metrics
    }

    /// Rank every adapter's confidence for `payload`.
    pub async fn detect(&self, payload: impl Into<Bytes>) -> DetectionResult {
        self.detect_report(payload).await.result
    }

    /// Same as [`detect`](Self::detect); named for call sites that want to
    /// make the confidence path explicit next to [`ingest_legacy`](Self::ingest_legacy).
    pub async fn detect_with_confidence(&self, payload: impl Into<Bytes>) -> DetectionResult {
        self.detect_report(payload).await.result
    }

    pub async fn detect_report(&self, payload: impl Into<Bytes>) -> DetectionReport {
        let payload: Bytes = payload.into();
        let started = Instant::now();

        let fingerprint = self.cache.is_enabled().then(|| self.cache.fingerprint(&payload));
        if let Some(fingerprint) = &fingerprint {
            let cached = self.cache.get(fingerprint);
            self.metrics.record_cache_lookup(cached.is_some());
            if let Some(result) = cached {
                self.metrics.record_detection(result.best_match.is_some());
                return DetectionReport {
                    result,
                    early_exit: false,
                    cache_hit: true,
                    timeout: None,
                    elapsed: started.elapsed(),
                };
            }
        }

        let fan_out = self.fan_out(payload).await;
        self.metrics
            .record_fan_out(started.elapsed(), self.adapters.len() as u64);

        let result = DetectionResult::from_scores(fan_out.scores);
        self.metrics.record_detection(result.best_match.is_some());
        debug!(
            best_match = ?result.best_match,
            best_score = result.best_score(),
            early_exit = fan_out.early_exit,
            "Detection finished"
        );

        // Partial results depend on scheduling, not only on the payload
        if let (Some(fingerprint), None) = (fingerprint, &fan_out.timeout) {
            self.cache
                .put(fingerprint, result.clone(), std::mem::size_of::<Fingerprint>());
        }

        DetectionReport {
            result,
            early_exit: fan_out.early_exit,
            cache_hit: false,
            timeout: fan_out.timeout,
            elapsed: started.elapsed(),
        }
    }

    /// Buffer `reader` (up to `max_stream_bytes`) and detect.
    pub async fn detect_reader<R>(&self, reader: R) -> DetectResult<DetectionReport>
    where
        R: AsyncRead + Unpin,
    {
        let limit = self.config.max_stream_bytes;
        let mut buf = Vec::new();
        reader
            .take(limit as u64 + 1)
            .read_to_end(&mut buf)
            .await?;

        if buf.len() > limit {
            return Err(DetectError::PayloadTooLarge {
                size: buf.len(),
                limit,
            });
        }
        Ok(self.detect_report(buf).await)
    }

    /// Detect, then parse with the winning adapter.
    pub async fn ingest(&self, payload: impl Into<Bytes>) -> DetectResult<NormalizedRecord> {
        let payload: Bytes = payload.into();
        let report = self.detect_report(payload.clone()).await;

        let outcome = match (report.result.best_match.as_deref(), report.timeout) {
            (Some(best), _) => self.ingest_with(best, payload).await,
            (None, Some(timeout)) => Err(DetectError::Timeout(timeout)),
            (None, None) => Err(DetectError::UnknownFormat {
                evaluated: report.result.scores.len(),
            }),
        };
        self.metrics.record_ingest(outcome.is_ok());
        outcome
    }

    async fn ingest_with(&self, name: &str, payload: Bytes) -> DetectResult<NormalizedRecord> {
        let adapter = self
            .get(name)
            .ok_or_else(|| DetectError::UnknownFormat { evaluated: self.len() })?;
        let adapter_name = name.to_string();

        let joined = tokio::task::spawn_blocking(move || {
            panic::catch_unwind(AssertUnwindSafe(|| adapter.ingest(&payload)))
        })
        .await;

        match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => {
                let message = panic_message(panic);
                warn!(adapter = %adapter_name, %message, "Adapter panicked during ingest");
                Err(DetectError::unparsable(&adapter_name, format!("adapter panicked: {}", message)))
            }
            Err(join_err) => Err(DetectError::unparsable(&adapter_name, join_err.to_string())),
        }
    }

    /// Name of the first adapter, in registration order, whose boolean
    /// check accepts `raw`. This may differ from the confidence winner.
    pub fn detect_legacy(&self, raw: &str) -> Option<&str> {
        self.adapters.iter().find_map(|(name, adapter)| {
            let accepted = panic::catch_unwind(AssertUnwindSafe(|| adapter.legacy_detect(raw)))
                .unwrap_or_else(|panic| {
                    warn!(adapter = %name, message = %panic_message(panic), "Adapter panicked in legacy check");
                    false
                });
            accepted.then_some(name.as_str())
        })
    }

    /// Synchronous string path: parse with the first adapter whose
    /// `legacy_detect` accepts `raw`.
    pub fn ingest_legacy(&self, raw: &str) -> DetectResult<NormalizedRecord> {
        self.metrics.record_legacy();
        let name = self
            .detect_legacy(raw)
            .ok_or(DetectError::UnknownFormat { evaluated: self.len() })?;
        let adapter = self
            .get(name)
            .ok_or(DetectError::UnknownFormat { evaluated: self.len() })?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| adapter.ingest(raw.as_bytes())))
            .unwrap_or_else(|panic| {
                let message = panic_message(panic);
                warn!(adapter = %name, %message, "Adapter panicked during legacy ingest");
                Err(DetectError::unparsable(name, format!("adapter panicked: {}", message)))
            });
        self.metrics.record_ingest(outcome.is_ok());
        outcome
    }

    async fn fan_out(&self, payload: Bytes) -> FanOut {
        let mut slots: Vec<Option<ConfidenceScore>> = vec![None; self.adapters.len()];
        let mut tasks: JoinSet<ScoreOutcome> = JoinSet::new();

        for (idx, (_, adapter)) in self.adapters.iter().enumerate() {
            let adapter = Arc::clone(adapter);
            let payload = payload.clone();
            tasks.spawn_blocking(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| adapter.score(&payload)));
                (idx, outcome.map_err(panic_message))
            });
        }

        let limit = self.config.max_detection_time();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + limit;
        let mut early_exit = false;
        let mut timed_out = false;

        loop {
            let joined = match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            };

            let (idx, outcome) = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    // Only reachable if the runtime is shutting down
                    warn!(error = %join_err, "Adapter task did not complete");
                    continue;
                }
            };

            let name = &self.adapters[idx].0;
            let score = match outcome {
                Ok(score) => ConfidenceScore {
                    adapter_name: name.clone(),
                    ..score
                },
                Err(message) => {
                    let err = DetectError::AdapterEvaluation {
                        adapter: name.clone(),
                        message: message.clone(),
                    };
                    warn!(error = %err, "Adapter panicked during scoring");
                    self.metrics.record_adapter_error();
                    ConfidenceScore::no_match(name.clone(), format!("error during detection: {}", message))
                }
            };
            debug!(adapter = %name, score = score.score, evidence = %score.evidence, "Adapter scored");

            let reached_threshold =
                score.score > 0.0 && score.score >= self.config.early_exit_threshold;
            slots[idx] = Some(score);
            if reached_threshold && slots.iter().any(Option::is_none) {
                early_exit = true;
                break;
            }
        }
        // Queued tasks are cancelled; ones already running finish and are discarded
        tasks.abort_all();

        let pending: Vec<String> = slots
            .iter()
            .zip(&self.adapters)
            .filter(|(slot, _)| slot.is_none())
            .map(|(_, (name, _))| name.clone())
            .collect();

        let timeout = if timed_out && !pending.is_empty() {
            let timeout = DetectionTimeout {
                limit,
                elapsed: started.elapsed(),
                pending: pending.clone(),
            };
            warn!(%timeout, "Detection deadline passed");
            self.metrics.record_timeout(pending.len() as u64);
            Some(timeout)
        } else {
            None
        };
        if early_exit {
            self.metrics.record_early_exit(pending.len() as u64);
        }

        let skipped_evidence = if early_exit { EVIDENCE_EARLY_EXIT } else { EVIDENCE_TIMEOUT };
        let scores = slots
            .into_iter()
            .zip(&self.adapters)
            .map(|(slot, (name, _))| {
                slot.unwrap_or_else(|| ConfidenceScore::no_match(name.clone(), skipped_evidence))
            })
            .collect();

        FanOut {
            scores,
            early_exit,
            timeout,
        }
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapter_names())
            .field("config", &self.config)
            .finish()
    }
}
