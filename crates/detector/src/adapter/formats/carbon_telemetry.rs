use crate::adapter::fields::{json_quantity, json_timestamp};
use crate::adapter::sniff::{as_text, prefix, strip_bom, trim_ascii};
use crate::adapter::traits::*;
use crate::adapter::{DETECTION_SAMPLE_SIZE, FULL_PARSE_LIMIT};
use serde_json::{Map, Value};

use super::json::has_json_field;

pub const NAME: &str = "carbon_telemetry";

/// Field weight: five canonical fields make a full match
const FIELD_WEIGHT: f64 = 0.2;
const WRONG_TYPE_PENALTY: f64 = 0.1;
/// Sampled payloads skip type checks, so they never reach early-exit confidence
const SAMPLED_MAX_SCORE: f64 = 0.9;

/// Canonical schema of one emission record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaField {
    Timestamp,
    Model,
    Provider,
    Emissions,
    /// `tokens` or `energy_kwh`
    Usage,
}

impl SchemaField {
    const ALL: [SchemaField; 5] = [
        SchemaField::Timestamp,
        SchemaField::Model,
        SchemaField::Provider,
        SchemaField::Emissions,
        SchemaField::Usage,
    ];

    fn keys(&self) -> &'static [&'static str] {
        match self {
            SchemaField::Timestamp => &["timestamp"],
            SchemaField::Model => &["model"],
            SchemaField::Provider => &["provider"],
            SchemaField::Emissions => &["emissions"],
            SchemaField::Usage => &["tokens", "energy_kwh"],
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SchemaField::Timestamp => "timestamp",
            SchemaField::Model => "model",
            SchemaField::Provider => "provider",
            SchemaField::Emissions => "emissions",
            SchemaField::Usage => "tokens|energy_kwh",
        }
    }

    fn type_checks(&self, value: &Value) -> bool {
        match self {
            SchemaField::Timestamp => json_timestamp(value).is_some(),
            SchemaField::Model | SchemaField::Provider => {
                value.as_str().map(|s| !s.trim().is_empty()).unwrap_or(false)
            }
            SchemaField::Emissions => value.as_f64().map(|q| q.is_finite() && q >= 0.0).unwrap_or(false),
            SchemaField::Usage => value.as_f64().map(|q| q.is_finite() && q >= 0.0).unwrap_or(false),
        }
    }
}

#[derive(Debug, Default)]
struct SchemaCheck {
    valid: Vec<SchemaField>,
    wrong_type: Vec<SchemaField>,
    missing: Vec<SchemaField>,
}

impl SchemaCheck {
    fn of(obj: &Map<String, Value>) -> Self {
        let mut check = SchemaCheck::default();
        for field in SchemaField::ALL {
            let values: Vec<&Value> = field.keys().iter().filter_map(|k| obj.get(*k)).collect();
            if values.is_empty() {
                check.missing.push(field);
            } else if values.iter().any(|v| field.type_checks(v)) {
                check.valid.push(field);
            } else {
                check.wrong_type.push(field);
            }
        }
        check
    }

    fn score(&self) -> f64 {
        self.valid.len() as f64 * FIELD_WEIGHT - self.wrong_type.len() as f64 * WRONG_TYPE_PENALTY
    }

    fn is_valid(&self) -> bool {
        self.valid.len() == SchemaField::ALL.len()
    }

    fn describe(&self) -> String {
        let mut evidence = format!(
            "schema fields {}/{} valid",
            self.valid.len(),
            SchemaField::ALL.len()
        );
        if !self.wrong_type.is_empty() {
            evidence.push_str(&format!("; wrong type: {}", labels(&self.wrong_type)));
        }
        if !self.missing.is_empty() {
            evidence.push_str(&format!("; missing: {}", labels(&self.missing)));
        }
        evidence
    }
}

fn labels(fields: &[SchemaField]) -> String {
    fields.iter().map(SchemaField::label).collect::<Vec<_>>().join(", ")
}

/// Strict emission-record schema: `timestamp`, `model`, `provider`,
/// numeric `emissions` and numeric `tokens` or `energy_kwh`.
///
/// Accepts a single record or a `{"records": [...]}` envelope.
pub struct CarbonTelemetryAdapter;

impl CarbonTelemetryAdapter {
    fn score_sampled(&self, trimmed: &[u8]) -> ConfidenceScore {
        let sample = prefix(trimmed, DETECTION_SAMPLE_SIZE);
        if as_text(sample, true).is_none() {
            return ConfidenceScore::no_match(NAME, "not JSON: invalid UTF-8");
        }

        let present = SchemaField::ALL
            .iter()
            .filter(|field| field.keys().iter().any(|k| has_json_field(sample, k)))
            .count();
        if present == 0 {
            return ConfidenceScore::no_match(NAME, "no schema fields in sampled prefix");
        }

        let mut score = present as f64 * FIELD_WEIGHT;
        if trimmed.last() != Some(&b'}') {
            score -= 0.3;
        }

        ConfidenceScore::new(
            NAME,
            score.min(SAMPLED_MAX_SCORE),
            format!(
                "schema fields {}/{} present in sampled prefix; type checks skipped",
                present,
                SchemaField::ALL.len()
            ),
        )
    }
}

impl FormatAdapter for CarbonTelemetryAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn legacy_detect(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        trimmed.starts_with('{')
            && trimmed.ends_with('}')
            && trimmed.contains("\"emissions\"")
            && trimmed.contains("\"provider\"")
    }

    fn score(&self, payload: &[u8]) -> ConfidenceScore {
        let trimmed = trim_ascii(strip_bom(payload));
        if trimmed.first() != Some(&b'{') {
            return ConfidenceScore::no_match(NAME, "not a JSON object");
        }

        if trimmed.len() > FULL_PARSE_LIMIT {
            return self.score_sampled(trimmed);
        }

        let obj = match serde_json::from_slice::<Value>(trimmed) {
            Ok(Value::Object(obj)) => obj,
            Ok(_) => return ConfidenceScore::no_match(NAME, "not a JSON object"),
            Err(e) => return ConfidenceScore::no_match(NAME, format!("invalid JSON: {}", e)),
        };

        match envelope(&obj) {
            Some(records) => {
                let first = match records.first().and_then(Value::as_object) {
                    Some(first) => first,
                    None => return ConfidenceScore::no_match(NAME, "empty or non-object records envelope"),
                };
                let check = SchemaCheck::of(first);
                ConfidenceScore::new(
                    NAME,
                    check.score(),
                    format!("records envelope ({} records); {}", records.len(), check.describe()),
                )
            }
            None => {
                let check = SchemaCheck::of(&obj);
                ConfidenceScore::new(NAME, check.score(), check.describe())
            }
        }
    }

    fn ingest(&self, raw: &[u8]) -> DetectResult<NormalizedRecord> {
        let value: Value = serde_json::from_slice(trim_ascii(strip_bom(raw)))
            .map_err(|e| DetectError::unparsable(NAME, format!("invalid JSON: {}", e)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| DetectError::unparsable(NAME, "not a JSON object"))?;

        let records: Vec<&Map<String, Value>> = match envelope(obj) {
            Some(items) => items
                .iter()
                .map(Value::as_object)
                .collect::<Option<_>>()
                .ok_or_else(|| DetectError::unparsable(NAME, "records envelope contains non-objects"))?,
            None => vec![obj],
        };

        let mut measurements = Vec::with_capacity(records.len());
        for (idx, record) in records.into_iter().enumerate() {
            let check = SchemaCheck::of(record);
            if !check.is_valid() {
                return Err(DetectError::unparsable(
                    NAME,
                    format!("record {}: {}", idx, check.describe()),
                ));
            }
            measurements.push(to_measurement(record)?);
        }

        NormalizedRecord::from_measurements(NAME, measurements, raw)
            .ok_or_else(|| DetectError::unparsable(NAME, "records envelope is empty"))
    }
}

fn envelope(obj: &Map<String, Value>) -> Option<&Vec<Value>> {
    obj.get("records").and_then(Value::as_array)
}

fn to_measurement(record: &Map<String, Value>) -> DetectResult<Measurement> {
    let timestamp = record
        .get("timestamp")
        .and_then(json_timestamp)
        .ok_or_else(|| DetectError::unparsable(NAME, "invalid timestamp"))?;
    let quantity = record
        .get("emissions")
        .and_then(json_quantity)
        .ok_or_else(|| DetectError::unparsable(NAME, "invalid emissions"))?;

    let mut measurement = Measurement::new(timestamp, quantity);
    for key in ["model", "provider", "tokens", "energy_kwh", "region"] {
        let value = match record.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        measurement.fields.push((key.to_string(), value));
    }
    Ok(measurement)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_RECORD: &[u8] = br#"{"timestamp":"2023-01-01T00:00:00Z","model":"gpt-4","provider":"openai","emissions":0.5,"tokens":1200}"#;

    #[test]
    fn test_full_schema_scores_one() {
        let score = CarbonTelemetryAdapter.score(FULL_RECORD);
        assert_eq!(score.score, 1.0);
        assert_eq!(score.evidence, "schema fields 5/5 valid");
    }

    #[test]
    fn test_partial_schema_is_below_generic_json() {
        let score = CarbonTelemetryAdapter
            .score(br#"{"timestamp":"2023-01-01T00:00:00Z","emissions":0.5,"model":"gpt-4"}"#);
        assert!(score.score > 0.5 && score.score < 0.7, "got {}", score.score);
        assert!(score.evidence.contains("missing: provider, tokens|energy_kwh"));
    }

    #[test]
    fn test_wrong_type_is_penalized() {
        let score = CarbonTelemetryAdapter.score(
            br#"{"timestamp":"2023-01-01T00:00:00Z","model":"gpt-4","provider":"openai","emissions":"lots","tokens":10}"#,
        );
        assert!(score.score > 0.6 && score.score < 0.8, "got {}", score.score);
        assert!(score.evidence.contains("wrong type: emissions"));
    }

    #[test]
    fn test_energy_kwh_satisfies_usage() {
        let score = CarbonTelemetryAdapter.score(
            br#"{"timestamp":1672531200,"model":"m","provider":"p","emissions":1.0,"energy_kwh":0.25}"#,
        );
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn test_envelope() {
        let payload = br#"{"records":[
            {"timestamp":"2023-01-01T00:00:00Z","model":"gpt-4","provider":"openai","emissions":0.5,"tokens":100},
            {"timestamp":"2023-01-01T01:00:00Z","model":"gpt-4","provider":"openai","emissions":0.25,"tokens":50}
        ]}"#;
        let score = CarbonTelemetryAdapter.score(payload);
        assert_eq!(score.score, 1.0);
        assert!(score.evidence.contains("2 records"));

        let record = CarbonTelemetryAdapter.ingest(payload).unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record.quantity, 0.75);
        assert_eq!(record.measurements[1].field("tokens"), Some("50"));
    }

    #[test]
    fn test_non_objects_score_zero() {
        assert_eq!(CarbonTelemetryAdapter.score(b"").score, 0.0);
        assert_eq!(CarbonTelemetryAdapter.score(b"[1,2]").score, 0.0);
        assert_eq!(CarbonTelemetryAdapter.score(b"{\"timestamp\":").score, 0.0);
        assert_eq!(CarbonTelemetryAdapter.score(b"a,b\n1,2").score, 0.0);
    }

    #[test]
    fn test_ingest_full_record() {
        let record = CarbonTelemetryAdapter.ingest(FULL_RECORD).unwrap();
        assert_eq!(record.format, NAME);
        assert_eq!(record.quantity, 0.5);
        let m = &record.measurements[0];
        assert_eq!(m.field("provider"), Some("openai"));
        assert_eq!(m.field("model"), Some("gpt-4"));
    }

    #[test]
    fn test_ingest_rejects_partial_schema() {
        let err = CarbonTelemetryAdapter
            .ingest(br#"{"timestamp":"2023-01-01T00:00:00Z","emissions":0.5,"model":"gpt-4"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("missing: provider"));
    }

    #[test]
    fn test_legacy_detect() {
        assert!(CarbonTelemetryAdapter.legacy_detect(std::str::from_utf8(FULL_RECORD).unwrap()));
        assert!(!CarbonTelemetryAdapter.legacy_detect(r#"{"emissions":1}"#));
    }
}
