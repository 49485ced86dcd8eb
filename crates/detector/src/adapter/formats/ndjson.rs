use crate::adapter::fields::{self, FieldCoverage};
use crate::adapter::sniff::{as_text, prefix, strip_bom};
use crate::adapter::traits::*;
use crate::adapter::DETECTION_SAMPLE_SIZE;
use serde_json::Value;

pub const NAME: &str = "ndjson";

const MAX_SCORE: f64 = 0.9;
const TRUNCATION_PENALTY: f64 = 0.3;
const CORRUPTION_PENALTY: f64 = 0.4;
/// Lines fully parsed during scoring; the rest are only shape-checked
const MAX_SCORED_LINES: usize = 256;

/// Newline-delimited JSON: one telemetry object per line.
pub struct NdjsonAdapter;

fn non_empty_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}

fn looks_like_object(line: &str) -> bool {
    line.starts_with('{') && line.ends_with('}')
}

impl FormatAdapter for NdjsonAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn legacy_detect(&self, raw: &str) -> bool {
        let mut lines = raw.lines().map(str::trim).filter(|l| !l.is_empty());
        matches!(
            (lines.next(), lines.next()),
            (Some(first), Some(second)) if looks_like_object(first) && second.starts_with('{')
        )
    }

    fn score(&self, payload: &[u8]) -> ConfidenceScore {
        let payload = strip_bom(payload);
        let sampled = payload.len() > DETECTION_SAMPLE_SIZE;
        let text = match as_text(prefix(payload, DETECTION_SAMPLE_SIZE), sampled) {
            Some(text) => text,
            None => return ConfidenceScore::no_match(NAME, "not NDJSON: invalid UTF-8"),
        };

        // A sampled prefix almost always ends mid-line; drop that partial line
        let text = if sampled {
            text.rfind('\n').map(|pos| &text[..pos]).unwrap_or(text)
        } else {
            text
        };

        let lines: Vec<(usize, &str)> = non_empty_lines(text).collect();
        if lines.is_empty() {
            return ConfidenceScore::no_match(NAME, "empty payload");
        }
        if lines.len() < 2 {
            return ConfidenceScore::no_match(NAME, "single line; not line-delimited");
        }

        let first: Value = match serde_json::from_str(lines[0].1) {
            Ok(value @ Value::Object(_)) => value,
            _ => return ConfidenceScore::no_match(NAME, "first line is not a JSON object"),
        };

        let last_idx = lines.len() - 1;
        let mut corrupted_line = None;
        let mut truncated = false;
        for (pos, (line_no, line)) in lines.iter().enumerate().skip(1) {
            let ok = if pos < MAX_SCORED_LINES || pos == last_idx {
                matches!(serde_json::from_str::<Value>(line), Ok(Value::Object(_)))
            } else {
                looks_like_object(line)
            };
            if ok {
                continue;
            }
            if pos == last_idx && !sampled {
                truncated = true;
            } else {
                corrupted_line = Some(*line_no);
                break;
            }
        }

        let coverage = first
            .as_object()
            .map(FieldCoverage::of_json_object)
            .unwrap_or_default();

        let mut score: f64 = 0.6; // Base score for two or more JSON object lines
        if coverage.time {
            score += 0.15;
        }
        if coverage.quantity {
            score += 0.15;
        }
        score = score.min(MAX_SCORE);

        let mut evidence = format!("{} JSON object lines; {}", lines.len(), coverage.describe());
        if let Some(line_no) = corrupted_line {
            score -= CORRUPTION_PENALTY;
            evidence.push_str(&format!("; corrupted line {}", line_no));
        } else if truncated {
            score -= TRUNCATION_PENALTY;
            evidence.push_str("; truncated final line");
        }

        ConfidenceScore::new(NAME, score, evidence)
    }

    fn ingest(&self, raw: &[u8]) -> DetectResult<NormalizedRecord> {
        let text = std::str::from_utf8(strip_bom(raw))
            .map_err(|_| DetectError::unparsable(NAME, "non-UTF8 content"))?;

        let mut measurements = Vec::new();
        for (line_no, line) in non_empty_lines(text) {
            let value: Value = serde_json::from_str(line)
                .map_err(|e| DetectError::unparsable(NAME, format!("line {}: {}", line_no, e)))?;
            let obj = value
                .as_object()
                .ok_or_else(|| DetectError::unparsable(NAME, format!("line {}: not an object", line_no)))?;
            let m = fields::measurement_from_json(obj)
                .map_err(|reason| DetectError::unparsable(NAME, format!("line {}: {}", line_no, reason)))?;
            measurements.push(m);
        }

        NormalizedRecord::from_measurements(NAME, measurements, raw)
            .ok_or_else(|| DetectError::unparsable(NAME, "no lines"))
    }
}
