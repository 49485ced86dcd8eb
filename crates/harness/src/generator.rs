//! Deterministic synthetic telemetry payloads.
//!
//! The same seed always yields the same bytes, so runs are comparable
//! across commits.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use detector::adapter::formats::binary_record;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;

use crate::config::TierConfig;

const MODELS: &[&str] = &["gpt-4", "gpt-4o-mini", "claude-3-haiku", "llama-3-70b", "mistral-large"];
const PROVIDERS: &[&str] = &["openai", "anthropic", "meta", "mistral"];
const REGIONS: &[&str] = &["us-east-1", "eu-west-1", "ap-southeast-2"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Small,
    Medium,
    Large,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Small, Tier::Medium, Tier::Large];

    pub fn records(self, tiers: &TierConfig) -> usize {
        match self {
            Tier::Small => tiers.small,
            Tier::Medium => tiers.medium,
            Tier::Large => tiers.large,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Small => "small",
            Tier::Medium => "medium",
            Tier::Large => "large",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Json,
    CarbonTelemetry,
    Ndjson,
    Csv,
    Xml,
    BinaryRecord,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 6] = [
        PayloadKind::Json,
        PayloadKind::CarbonTelemetry,
        PayloadKind::Ndjson,
        PayloadKind::Csv,
        PayloadKind::Xml,
        PayloadKind::BinaryRecord,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PayloadKind::Json => "json",
            PayloadKind::CarbonTelemetry => "carbon_telemetry",
            PayloadKind::Ndjson => "ndjson",
            PayloadKind::Csv => "csv",
            PayloadKind::Xml => "xml",
            PayloadKind::BinaryRecord => "binary_record",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One synthetic emission record
#[derive(Debug, Clone)]
struct Sample {
    timestamp: DateTime<Utc>,
    model: &'static str,
    provider: &'static str,
    region: &'static str,
    tokens: u64,
    emissions: f64,
}

pub struct PayloadGenerator {
    rng: StdRng,
    clock: DateTime<Utc>,
}

impl PayloadGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            // 2023-01-01T00:00:00Z
            clock: Utc.timestamp_opt(1_672_531_200, 0).single().unwrap_or_default(),
        }
    }

    fn sample(&mut self) -> Sample {
        self.clock += Duration::seconds(self.rng.gen_range(1..=60));
        let tokens = self.rng.gen_range(50..=8_000u64);
        Sample {
            timestamp: self.clock,
            model: MODELS[self.rng.gen_range(0..MODELS.len())],
            provider: PROVIDERS[self.rng.gen_range(0..PROVIDERS.len())],
            region: REGIONS[self.rng.gen_range(0..REGIONS.len())],
            tokens,
            // Rounded so text formats stay short
            emissions: (tokens as f64 * self.rng.gen_range(0.0001..0.0005) * 1e6).round() / 1e6,
        }
    }

    fn samples(&mut self, records: usize) -> Vec<Sample> {
        (0..records).map(|_| self.sample()).collect()
    }

    /// Generate a payload of `kind` holding `records` records.
    pub fn generate(&mut self, kind: PayloadKind, records: usize) -> Bytes {
        let samples = self.samples(records.max(1));
        match kind {
            PayloadKind::Json => json_batch(&samples),
            PayloadKind::CarbonTelemetry => carbon_batch(&samples),
            PayloadKind::Ndjson => ndjson_stream(&samples),
            PayloadKind::Csv => csv_table(&samples),
            PayloadKind::Xml => xml_document(&samples),
            PayloadKind::BinaryRecord => binary_frame(&samples),
        }
    }

    pub fn generate_tier(&mut self, kind: PayloadKind, tier: Tier, tiers: &TierConfig) -> Bytes {
        self.generate(kind, tier.records(tiers))
    }
}

fn generic_value(s: &Sample) -> serde_json::Value {
    json!({
        "timestamp": s.timestamp.to_rfc3339(),
        "model": s.model,
        "region": s.region,
        "co2e_kg": s.emissions,
    })
}

fn carbon_value(s: &Sample) -> serde_json::Value {
    json!({
        "timestamp": s.timestamp.to_rfc3339(),
        "model": s.model,
        "provider": s.provider,
        "emissions": s.emissions,
        "tokens": s.tokens,
    })
}

/// Single object for one record, array otherwise
fn json_batch(samples: &[Sample]) -> Bytes {
    let value = match samples {
        [only] => generic_value(only),
        _ => serde_json::Value::Array(samples.iter().map(generic_value).collect()),
    };
    Bytes::from(value.to_string())
}

/// Single record, or a `records` envelope
fn carbon_batch(samples: &[Sample]) -> Bytes {
    let value = match samples {
        [only] => carbon_value(only),
        _ => json!({ "records": samples.iter().map(carbon_value).collect::<Vec<_>>() }),
    };
    Bytes::from(value.to_string())
}

fn ndjson_stream(samples: &[Sample]) -> Bytes {
    let mut out = String::new();
    for s in samples {
        let line = json!({
            "ts": s.timestamp.timestamp(),
            "energy_kwh": s.emissions * 2.5,
            "service": s.model,
        });
        out.push_str(&line.to_string());
        out.push('\n');
    }
    Bytes::from(out)
}

fn csv_table(samples: &[Sample]) -> Bytes {
    let mut out = String::from("timestamp,model,provider,emissions\n");
    for s in samples {
        out.push_str(&format!(
            "{},{},{},{}\n",
            s.timestamp.format("%Y-%m-%d %H:%M:%S"),
            s.model,
            s.provider,
            s.emissions
        ));
    }
    Bytes::from(out)
}

fn xml_document(samples: &[Sample]) -> Bytes {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<emissions>\n");
    for s in samples {
        out.push_str(&format!(
            "  <record><timestamp>{}</timestamp><model>{}</model><co2e>{}</co2e></record>\n",
            s.timestamp.to_rfc3339(),
            s.model,
            s.emissions
        ));
    }
    out.push_str("</emissions>\n");
    Bytes::from(out)
}

fn binary_frame(samples: &[Sample]) -> Bytes {
    let records: Vec<(i64, f64)> = samples
        .iter()
        .take(binary_record::MAX_RECORDS)
        .map(|s| (s.timestamp.timestamp(), s.emissions))
        .collect();
    // Cannot fail after take(MAX_RECORDS); tier sizes are validated against it
    binary_record::encode(&records).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> TierConfig {
        TierConfig {
            small: 1,
            medium: 300,
            large: 20_000,
        }
    }

    #[test]
    fn test_same_seed_same_bytes() {
        let a = PayloadGenerator::new(7).generate(PayloadKind::Csv, 50);
        let b = PayloadGenerator::new(7).generate(PayloadKind::Csv, 50);
        let c = PayloadGenerator::new(8).generate(PayloadKind::Csv, 50);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_tier_sizes() {
        let tiers = tiers();
        for kind in PayloadKind::ALL {
            let mut generator = PayloadGenerator::new(1);
            let small = generator.generate_tier(kind, Tier::Small, &tiers);
            let medium = generator.generate_tier(kind, Tier::Medium, &tiers);
            assert!(small.len() < 1024, "{} small is {} bytes", kind, small.len());
            assert!(
                (1024..100 * 1024).contains(&medium.len()),
                "{} medium is {} bytes",
                kind,
                medium.len()
            );
        }
    }

    #[test]
    fn test_large_tier_size() {
        let mut generator = PayloadGenerator::new(1);
        let large = generator.generate_tier(PayloadKind::Json, Tier::Large, &tiers());
        assert!((100 * 1024..10 * 1024 * 1024).contains(&large.len()));
    }

    #[test]
    fn test_binary_frame_layout() {
        let frame = PayloadGenerator::new(3).generate(PayloadKind::BinaryRecord, 4);
        assert_eq!(&frame[..4], binary_record::MAGIC);
        assert_eq!(frame.len(), binary_record::HEADER_LEN + 4 * binary_record::RECORD_LEN);
    }

    #[test]
    fn test_zero_records_still_yields_one() {
        let payload = PayloadGenerator::new(3).generate(PayloadKind::Json, 0);
        assert!(payload.starts_with(b"{"));
    }
}
