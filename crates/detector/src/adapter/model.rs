use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::serde_utils::{deserialize_fields_from_map, serialize_fields_as_map};

/// How strongly one adapter believes a payload is in its format.
///
/// - 0.0: no structural match
/// - 0.0-0.8: partial, truncated or corrupted structure
/// - 0.8-1.0: high confidence, safe to ingest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub adapter_name: String,
    pub score: f64,
    /// Human-readable justification, never empty
    pub evidence: String,
}

impl ConfidenceScore {
    pub fn new(adapter_name: impl Into<String>, score: f64, evidence: impl Into<String>) -> Self {
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        let mut evidence = evidence.into();
        if evidence.trim().is_empty() {
            evidence = if score > 0.0 {
                "partial structural match".to_string()
            } else {
                "no structural match".to_string()
            };
        }

        Self {
            adapter_name: adapter_name.into(),
            score,
            evidence,
        }
    }

    pub fn no_match(adapter_name: impl Into<String>, evidence: impl Into<String>) -> Self {
        Self::new(adapter_name, 0.0, evidence)
    }

    pub fn is_match(&self) -> bool {
        self.score > 0.0
    }

    pub fn is_high_confidence(&self) -> bool {
        self.score >= super::HIGH_CONFIDENCE_THRESHOLD
    }
}

/// Ranked outcome of running every registered adapter against one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Name of `scores[0]` when it scored above zero
    pub best_match: Option<String>,
    /// Sorted descending by score
    pub scores: Vec<ConfidenceScore>,
}

impl DetectionResult {
    /// Rank `scores`. The sort is stable, so callers that pass scores in
    /// registration order get ties broken by registration order.
    pub fn from_scores(mut scores: Vec<ConfidenceScore>) -> Self {
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));

        let best_match = scores
            .first()
            .filter(|s| s.score > 0.0)
            .map(|s| s.adapter_name.clone());

        Self { best_match, scores }
    }

    pub fn empty() -> Self {
        Self {
            best_match: None,
            scores: Vec::new(),
        }
    }

    pub fn best(&self) -> Option<&ConfidenceScore> {
        self.best_match.as_ref().and_then(|_| self.scores.first())
    }

    pub fn best_score(&self) -> f64 {
        self.best().map(|s| s.score).unwrap_or(0.0)
    }

    pub fn score_for(&self, adapter_name: &str) -> Option<&ConfidenceScore> {
        self.scores.iter().find(|s| s.adapter_name == adapter_name)
    }

    /// Rough heap footprint, used for cache memory accounting
    pub fn estimated_size(&self) -> usize {
        let scores: usize = self
            .scores
            .iter()
            .map(|s| std::mem::size_of::<ConfidenceScore>() + s.adapter_name.len() + s.evidence.len())
            .sum();
        std::mem::size_of::<Self>()
            + self.best_match.as_ref().map(|n| n.len()).unwrap_or(0)
            + scores
    }
}

/// One timestamped quantity extracted from a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: DateTime<Utc>,
    pub quantity: f64,
    /// Remaining scalar attributes (model, provider, region, ...)
    #[serde(
        serialize_with = "serialize_fields_as_map",
        deserialize_with = "deserialize_fields_from_map"
    )]
    pub fields: Vec<(String, String)>,
}

impl Measurement {
    pub fn new(timestamp: DateTime<Utc>, quantity: f64) -> Self {
        Self {
            timestamp,
            quantity,
            fields: Vec::new(),
        }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Adapter output: every payload normalizes to at least a timestamp and a
/// numeric quantity, with per-record detail in `measurements`.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedRecord {
    /// Adapter that produced this record
    pub format: String,
    /// Earliest measurement timestamp
    pub timestamp: DateTime<Utc>,
    /// Sum of all measurement quantities
    pub quantity: f64,
    pub measurements: Vec<Measurement>,
    /// Original payload (always preserved, never serialized)
    #[serde(skip)]
    pub raw_content: Bytes,
}

impl NormalizedRecord {
    /// Build a record from at least one measurement; `None` when empty.
    pub fn from_measurements(
        format: impl Into<String>,
        measurements: Vec<Measurement>,
        raw: &[u8],
    ) -> Option<Self> {
        let timestamp = measurements.iter().map(|m| m.timestamp).min()?;
        let quantity = measurements.iter().map(|m| m.quantity).sum();

        Some(Self {
            format: format.into(),
            timestamp,
            quantity,
            measurements,
            raw_content: Bytes::copy_from_slice(raw),
        })
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}
