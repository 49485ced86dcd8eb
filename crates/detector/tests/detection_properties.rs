use detector::adapter::formats::binary_record;
use detector::adapter::EVIDENCE_EARLY_EXIT;
use detector::{
    AdapterRegistry, ConfidenceScore, DetectError, DetectResult, DetectionResult, DetectorConfig,
    FormatAdapter, NormalizedRecord,
};

const GENERIC_JSON: &[u8] = br#"{"timestamp":"2023-01-01T00:00:00Z","emissions":0.5,"model":"gpt-4"}"#;
const CSV: &[u8] = b"timestamp,model,emissions\n2023-01-01,gpt-4,0.5";
const TRUNCATED_CSV: &[u8] = b"timestamp,model,emissions\n2023-01-01,gpt-4";
const NDJSON: &[u8] = b"{\"ts\":1672531200,\"energy_kwh\":0.2}\n{\"ts\":1672531260,\"energy_kwh\":0.3}\n";
const XML: &[u8] = br#"<emissions><record><timestamp>2023-01-01T00:00:00Z</timestamp><co2e>0.5</co2e></record></emissions>"#;
const CARBON: &[u8] = br#"{"timestamp":"2023-01-01T00:00:00Z","model":"gpt-4","provider":"openai","emissions":0.5,"tokens":1200}"#;

fn cold_config() -> DetectorConfig {
    let mut config = DetectorConfig::default();
    config.cache.enabled = false;
    config
}

fn default_registry() -> AdapterRegistry {
    AdapterRegistry::with_default_adapters(DetectorConfig::default())
}

/// Deterministic xorshift byte noise
fn noise(seed: u64) -> Vec<u8> {
    let mut x = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (0..100)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            (x >> 24) as u8
        })
        .collect()
}

/// Payloads where no adapter reaches the early-exit threshold, so every
/// score row is computed regardless of scheduling
fn deterministic_corpus() -> Vec<Vec<u8>> {
    let mut corpus: Vec<Vec<u8>> = vec![
        GENERIC_JSON.to_vec(),
        CSV.to_vec(),
        TRUNCATED_CSV.to_vec(),
        NDJSON.to_vec(),
        XML.to_vec(),
        b"<!DOCTYPE html><html><body>hi</body></html>".to_vec(),
        b"{\"timestamp\":".to_vec(),
        b"".to_vec(),
    ];
    corpus.extend((1..=4).map(noise));
    corpus
}

fn assert_well_formed(result: &DetectionResult, adapters: usize) {
    assert_eq!(result.scores.len(), adapters);
    for pair in result.scores.windows(2) {
        assert!(pair[0].score >= pair[1].score, "unsorted: {:?}", result.scores);
    }
    for score in &result.scores {
        assert!((0.0..=1.0).contains(&score.score));
        assert!(!score.evidence.is_empty());
    }

    let all_zero = result.scores.iter().all(|s| s.score == 0.0);
    assert_eq!(result.best_match.is_none(), all_zero);
    if let Some(best) = &result.best_match {
        assert_eq!(best, &result.scores[0].adapter_name);
    }
}

#[tokio::test]
async fn generic_json_scenario() {
    let result = default_registry().detect(GENERIC_JSON).await;
    assert_eq!(result.best_match.as_deref(), Some("json"));

    let best = &result.scores[0];
    assert!(best.score >= 0.8, "got {}", best.score);
    assert!(best.is_high_confidence());
    assert!(best.evidence.contains("valid JSON syntax"));
    assert!(best.evidence.contains("recognized fields"));
}

#[tokio::test]
async fn csv_scenario() {
    let result = default_registry().detect(CSV).await;
    assert_eq!(result.best_match.as_deref(), Some("csv"));
    assert!(result.scores[0].score >= 0.7);
}

#[tokio::test]
async fn truncated_csv_scenario() {
    let result = default_registry().detect(TRUNCATED_CSV).await;
    let csv = result.score_for("csv").unwrap();
    assert!(csv.score > 0.3 && csv.score < 0.8, "got {}", csv.score);
    assert!(csv.evidence.contains("truncated row"));
}

#[tokio::test]
async fn empty_payload_matches_nothing() {
    let registry = default_registry();
    let result = registry.detect(&b""[..]).await;
    assert!(result.best_match.is_none());
    assert_eq!(result.scores.len(), registry.len());
    assert!(result.scores.iter().all(|s| s.score == 0.0));
}

#[tokio::test]
async fn random_noise_scores_low() {
    let registry = default_registry();
    for seed in 1..=8 {
        let result = registry.detect(noise(seed)).await;
        for score in &result.scores {
            assert!(
                score.score <= 0.1,
                "seed {}: {} scored {} ({})",
                seed,
                score.adapter_name,
                score.score,
                score.evidence
            );
        }
    }
}

#[tokio::test]
async fn each_format_has_a_winner() {
    let registry = default_registry();
    let frame = binary_record::encode(&[(1_672_531_200, 0.5)]).unwrap();

    let cases: Vec<(&str, Vec<u8>)> = vec![
        ("json", GENERIC_JSON.to_vec()),
        ("carbon_telemetry", CARBON.to_vec()),
        ("ndjson", NDJSON.to_vec()),
        ("csv", CSV.to_vec()),
        ("xml", XML.to_vec()),
        ("binary_record", frame.to_vec()),
    ];
    for (expected, payload) in cases {
        let result = registry.detect(payload).await;
        assert_eq!(result.best_match.as_deref(), Some(expected), "{:?}", result.scores);
    }
}

#[tokio::test]
async fn sort_and_best_match_invariants_hold() {
    let registry = default_registry();
    for payload in deterministic_corpus() {
        let result = registry.detect(payload).await;
        assert_well_formed(&result, registry.len());
    }
}

#[tokio::test]
async fn detection_is_idempotent() {
    for registry in [default_registry(), AdapterRegistry::with_default_adapters(cold_config())] {
        for payload in deterministic_corpus() {
            let first = registry.detect(payload.clone()).await;
            let second = registry.detect(payload).await;
            assert_eq!(first, second);
        }
    }
}

#[tokio::test]
async fn cache_is_transparent() {
    let cached = default_registry();
    let cold = AdapterRegistry::with_default_adapters(cold_config());

    for payload in deterministic_corpus() {
        let fresh = cold.detect(payload.clone()).await;
        cached.detect(payload.clone()).await;
        let report = cached.detect_report(payload).await;
        assert_eq!(report.result, fresh);
    }
    assert!(cached.cache_stats().hits > 0);
    assert_eq!(cold.cache_stats().entries, 0);
}

#[tokio::test]
async fn cache_transparency_modulo_early_exit() {
    let cached = default_registry();
    let cold = AdapterRegistry::with_default_adapters(cold_config());

    let fresh = cold.detect(CARBON).await;
    cached.detect(CARBON).await;
    let report = cached.detect_report(CARBON).await;
    assert!(report.cache_hit);
    assert_eq!(report.result.best_match, fresh.best_match);

    for score in &report.result.scores {
        if score.evidence == EVIDENCE_EARLY_EXIT {
            continue;
        }
        let other = fresh.score_for(&score.adapter_name).unwrap();
        if other.evidence != EVIDENCE_EARLY_EXIT {
            assert_eq!(score, other);
        }
    }
}

struct AlwaysPanics;

impl FormatAdapter for AlwaysPanics {
    fn name(&self) -> &str {
        "always_panics"
    }

    fn legacy_detect(&self, _raw: &str) -> bool {
        false
    }

    fn score(&self, _payload: &[u8]) -> ConfidenceScore {
        panic!("adapter bug")
    }

    fn ingest(&self, _raw: &[u8]) -> DetectResult<NormalizedRecord> {
        panic!("adapter bug")
    }
}

#[tokio::test]
async fn failing_adapter_does_not_change_other_scores() {
    let baseline = AdapterRegistry::with_default_adapters(cold_config());
    let mut with_failure = AdapterRegistry::with_default_adapters(cold_config());
    with_failure.register("always_panics", AlwaysPanics);

    for payload in deterministic_corpus() {
        let expected = baseline.detect(payload.clone()).await;
        let actual = with_failure.detect(payload).await;

        assert_well_formed(&actual, with_failure.len());
        let failed = actual.score_for("always_panics").unwrap();
        assert_eq!(failed.score, 0.0);
        assert_eq!(failed.evidence, "error during detection: adapter bug");

        for score in &expected.scores {
            assert_eq!(actual.score_for(&score.adapter_name), Some(score));
        }
    }
}

#[tokio::test]
async fn ingest_uses_the_winner() {
    let registry = default_registry();

    let record = registry.ingest(GENERIC_JSON).await.unwrap();
    assert_eq!(record.format, "json");
    assert_eq!(record.quantity, 0.5);
    assert_eq!(record.timestamp.to_rfc3339(), "2023-01-01T00:00:00+00:00");

    let record = registry.ingest(CSV).await.unwrap();
    assert_eq!(record.format, "csv");
    assert_eq!(record.measurements[0].field("model"), Some("gpt-4"));

    let record = registry.ingest(CARBON).await.unwrap();
    assert_eq!(record.format, "carbon_telemetry");
}

#[tokio::test]
async fn ingest_failures_are_typed() {
    let registry = default_registry();

    let err = registry.ingest(&b""[..]).await.unwrap_err();
    assert!(matches!(err, DetectError::UnknownFormat { evaluated: 6 }));

    let err = registry.ingest(TRUNCATED_CSV).await.unwrap_err();
    assert!(matches!(err, DetectError::UnparsablePayload { ref adapter, .. } if adapter == "csv"));

    let snapshot = registry.metrics().snapshot();
    assert_eq!(snapshot.ingests, 2);
    assert_eq!(snapshot.ingest_failures, 2);
}

#[tokio::test]
async fn legacy_and_confidence_paths_can_disagree() {
    let registry = default_registry();
    let raw = std::str::from_utf8(CARBON).unwrap();

    // Registration order: the generic JSON check accepts first
    assert_eq!(registry.detect_legacy(raw), Some("json"));
    assert_eq!(registry.ingest_legacy(raw).unwrap().format, "json");

    let result = registry.detect_with_confidence(CARBON).await;
    assert_eq!(result.best_match.as_deref(), Some("carbon_telemetry"));

    let err = registry.ingest_legacy("plain words").unwrap_err();
    assert!(matches!(err, DetectError::UnknownFormat { .. }));
}

#[tokio::test]
async fn detect_reader_streams_input() {
    let registry = default_registry();
    let report = registry.detect_reader(NDJSON).await.unwrap();
    assert_eq!(report.result.best_match.as_deref(), Some("ndjson"));
    assert!(!report.cache_hit);
}
