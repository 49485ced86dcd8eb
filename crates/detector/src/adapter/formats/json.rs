use crate::adapter::fields::{self, FieldCoverage, CONTEXT_FIELDS, QUANTITY_FIELDS, TIME_FIELDS};
use crate::adapter::sniff::{as_text, prefix, strip_bom, trim_ascii};
use crate::adapter::traits::*;
use crate::adapter::{DETECTION_SAMPLE_SIZE, FULL_PARSE_LIMIT};
use serde_json::{Map, Value};

pub const NAME: &str = "json";

/// Score ceiling: generic JSON never outranks a schema-validating adapter
const MAX_SCORE: f64 = 0.9;

/// Envelope keys whose array value holds the actual records
const ENVELOPE_KEYS: &[&str] = &["records", "data", "items", "entries", "results"];

/// Configuration for the generic JSON adapter
#[derive(Debug, Clone)]
pub struct JsonAdapterConfig {
    /// Payloads up to this size are parsed in full during scoring (default: 1MB)
    pub full_parse_limit: usize,
    /// Prefix scanned by the field heuristic on larger payloads (default: 64KB)
    pub sample_size: usize,
}

impl Default for JsonAdapterConfig {
    fn default() -> Self {
        Self {
            full_parse_limit: FULL_PARSE_LIMIT,
            sample_size: DETECTION_SAMPLE_SIZE,
        }
    }
}

/// Generic structured-data adapter: any JSON object or array of objects
/// carrying a timestamp and a numeric quantity.
pub struct JsonAdapter {
    config: JsonAdapterConfig,
}

impl JsonAdapter {
    pub fn new() -> Self {
        Self {
            config: JsonAdapterConfig::default(),
        }
    }

    pub fn with_config(config: JsonAdapterConfig) -> Self {
        Self { config }
    }

    fn score_parsed(&self, value: &Value) -> ConfidenceScore {
        match value {
            Value::Object(obj) => {
                let coverage = coverage_with_envelope(obj);
                ConfidenceScore::new(
                    NAME,
                    structured_score(coverage),
                    format!("valid JSON syntax; {}", coverage.describe()),
                )
            }
            Value::Array(items) => match items.first() {
                Some(Value::Object(first)) => {
                    let coverage = FieldCoverage::of_json_object(first);
                    ConfidenceScore::new(
                        NAME,
                        structured_score(coverage),
                        format!(
                            "valid JSON syntax (array of {} records); {}",
                            items.len(),
                            coverage.describe()
                        ),
                    )
                }
                _ => ConfidenceScore::new(
                    NAME,
                    0.2,
                    "valid JSON syntax, but not an object or array of objects",
                ),
            },
            _ => ConfidenceScore::new(NAME, 0.2, "valid JSON syntax, but a bare scalar"),
        }
    }

    /// Large payload: byte-level field scan over a prefix, no full parse
    fn score_sampled(&self, trimmed: &[u8]) -> ConfidenceScore {
        let sample = prefix(trimmed, self.config.sample_size);
        if as_text(sample, true).is_none() {
            return ConfidenceScore::no_match(NAME, "not JSON: invalid UTF-8");
        }

        let closed = matches!(
            (trimmed.first(), trimmed.last()),
            (Some(b'{'), Some(b'}')) | (Some(b'['), Some(b']'))
        );
        if !closed {
            return ConfidenceScore::new(
                NAME,
                0.25,
                format!("truncated JSON: no closing bracket after {} bytes", trimmed.len()),
            );
        }

        let coverage = FieldCoverage {
            time: TIME_FIELDS.iter().any(|f| has_json_field(sample, f)),
            quantity: QUANTITY_FIELDS.iter().any(|f| has_json_field(sample, f)),
            context: CONTEXT_FIELDS.iter().any(|f| has_json_field(sample, f)),
        };

        ConfidenceScore::new(
            NAME,
            structured_score(coverage),
            format!(
                "balanced JSON structure (sampled {} of {} bytes); {}",
                sample.len(),
                trimmed.len(),
                coverage.describe()
            ),
        )
    }
}

impl Default for JsonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatAdapter for JsonAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn legacy_detect(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        (trimmed.starts_with('{') && trimmed.ends_with('}'))
            || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    }

    fn score(&self, payload: &[u8]) -> ConfidenceScore {
        let trimmed = trim_ascii(strip_bom(payload));
        if trimmed.is_empty() {
            return ConfidenceScore::no_match(NAME, "empty payload");
        }

        // Quick reject: must open an object or array
        if !matches!(trimmed[0], b'{' | b'[') {
            return ConfidenceScore::no_match(NAME, "not JSON: does not start with '{' or '['");
        }

        if trimmed.len() > self.config.full_parse_limit {
            return self.score_sampled(trimmed);
        }

        if as_text(trimmed, false).is_none() {
            return ConfidenceScore::no_match(NAME, "not JSON: invalid UTF-8");
        }

        match serde_json::from_slice::<Value>(trimmed) {
            Ok(value) => self.score_parsed(&value),
            Err(e) if e.is_eof() => {
                ConfidenceScore::new(NAME, 0.25, format!("truncated JSON: {}", e))
            }
            Err(e) => ConfidenceScore::new(NAME, 0.15, format!("malformed JSON: {}", e)),
        }
    }

    fn ingest(&self, raw: &[u8]) -> DetectResult<NormalizedRecord> {
        let value: Value = serde_json::from_slice(trim_ascii(strip_bom(raw)))
            .map_err(|e| DetectError::unparsable(NAME, format!("invalid JSON: {}", e)))?;

        let objects = record_objects(&value).ok_or_else(|| {
            DetectError::unparsable(NAME, "expected an object or an array of objects")
        })?;

        let mut measurements = Vec::with_capacity(objects.len());
        for (idx, obj) in objects.into_iter().enumerate() {
            let m = fields::measurement_from_json(obj)
                .map_err(|reason| DetectError::unparsable(NAME, format!("record {}: {}", idx, reason)))?;
            measurements.push(m);
        }

        NormalizedRecord::from_measurements(NAME, measurements, raw)
            .ok_or_else(|| DetectError::unparsable(NAME, "no records found"))
    }
}

fn structured_score(coverage: FieldCoverage) -> f64 {
    let mut score = 0.5; // Base score for valid JSON structure
    if coverage.time {
        score += 0.15;
    }
    if coverage.quantity {
        score += 0.15;
    }
    if coverage.context {
        score += 0.1;
    }
    f64::min(score, MAX_SCORE)
}

/// Coverage of the object itself, or of the first record inside an envelope
fn coverage_with_envelope(obj: &Map<String, Value>) -> FieldCoverage {
    let own = FieldCoverage::of_json_object(obj);
    if own.is_complete() {
        return own;
    }
    envelope_records(obj)
        .and_then(|records| records.first())
        .and_then(Value::as_object)
        .map(FieldCoverage::of_json_object)
        .unwrap_or(own)
}

fn envelope_records(obj: &Map<String, Value>) -> Option<&Vec<Value>> {
    ENVELOPE_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_array))
}

/// Objects to normalize: the value itself, its array items, or an envelope's items
fn record_objects(value: &Value) -> Option<Vec<&Map<String, Value>>> {
    match value {
        Value::Object(obj) => {
            if FieldCoverage::of_json_object(obj).is_complete() {
                return Some(vec![obj]);
            }
            match envelope_records(obj) {
                Some(items) => items.iter().map(Value::as_object).collect(),
                None => Some(vec![obj]),
            }
        }
        Value::Array(items) => items.iter().map(Value::as_object).collect(),
        _ => None,
    }
}

/// Fast byte-level search for JSON field pattern: "key": or "key" :
/// This is a heuristic for detection and much faster than parsing
/// Handles both compact and pretty-printed JSON
/// Example: {"note": "has \"emissions\": inside"} won't match "emissions" as a field
pub(crate) fn has_json_field(chunk: &[u8], key: &str) -> bool {
    let key_bytes = key.as_bytes();
    if chunk.len() < key_bytes.len() + 3 {
        return false;
    }

    let mut in_string = false;
    let mut escape_next = false;
    let mut expecting_key = false;

    let mut i = 0;
    while i < chunk.len() {
        let byte = chunk[i];

        if escape_next {
            escape_next = false;
            i += 1;
            continue;
        }

        if in_string {
            match byte {
                b'\\' => escape_next = true,
                b'"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }

        match byte {
            b'{' | b',' => expecting_key = true,
            b'"' if expecting_key => {
                let end = i + 1 + key_bytes.len();
                if end < chunk.len() && &chunk[i + 1..end] == key_bytes && chunk[end] == b'"' {
                    let mut pos = end + 1;
                    while pos < chunk.len() && chunk[pos].is_ascii_whitespace() {
                        pos += 1;
                    }
                    if pos < chunk.len() && chunk[pos] == b':' {
                        return true;
                    }
                }
                expecting_key = false;
                in_string = true;
            }
            b'"' => in_string = true,
            b':' | b'[' => expecting_key = false,
            _ => {}
        }

        i += 1;
    }

    false
}
