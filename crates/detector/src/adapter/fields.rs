//! Canonical field vocabularies and value extraction shared by the text adapters.
//!
//! Every emission record needs a time field and a numeric quantity field;
//! context fields only add confidence.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use super::model::Measurement;

pub const TIME_FIELDS: &[&str] = &["timestamp", "time", "ts", "@timestamp", "date", "datetime"];

pub const QUANTITY_FIELDS: &[&str] = &[
    "emissions", "emissions_kg", "co2e", "co2e_kg", "co2", "carbon",
    "energy_kwh", "energy", "quantity", "value",
];

pub const CONTEXT_FIELDS: &[&str] = &["model", "provider", "region", "service", "source"];

/// Epoch values above this are milliseconds
const EPOCH_MILLIS_CUTOFF: i64 = 1_000_000_000_000;

fn in_vocabulary(vocabulary: &[&str], name: &str) -> bool {
    let name = name.trim();
    vocabulary.iter().any(|f| f.eq_ignore_ascii_case(name))
}

pub fn is_time_field(name: &str) -> bool {
    in_vocabulary(TIME_FIELDS, name)
}

pub fn is_quantity_field(name: &str) -> bool {
    in_vocabulary(QUANTITY_FIELDS, name)
}

pub fn is_context_field(name: &str) -> bool {
    in_vocabulary(CONTEXT_FIELDS, name)
}

pub fn timestamp_from_epoch(ts: i64) -> Option<DateTime<Utc>> {
    if ts > EPOCH_MILLIS_CUTOFF {
        DateTime::from_timestamp_millis(ts)
    } else {
        DateTime::from_timestamp(ts, 0)
    }
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` (midnight UTC) or epoch
/// seconds/milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    s.parse::<i64>().ok().and_then(timestamp_from_epoch)
}

pub fn parse_quantity(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|q| q.is_finite())
}

pub fn json_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(timestamp_from_epoch),
        Value::String(s) => parse_timestamp(s),
        _ => None,
    }
}

pub fn json_quantity(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|q| q.is_finite()),
        Value::String(s) => parse_quantity(s),
        _ => None,
    }
}

/// Which canonical groups an object's keys cover
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldCoverage {
    pub time: bool,
    pub quantity: bool,
    pub context: bool,
}

impl FieldCoverage {
    pub fn of_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut coverage = Self::default();
        for name in names {
            coverage.time |= is_time_field(name);
            coverage.quantity |= is_quantity_field(name);
            coverage.context |= is_context_field(name);
        }
        coverage
    }

    /// Like `of_names`, but a time or quantity key only counts when its value
    /// actually parses.
    pub fn of_json_object(obj: &Map<String, Value>) -> Self {
        let mut coverage = Self::default();
        for (key, value) in obj {
            coverage.time |= is_time_field(key) && json_timestamp(value).is_some();
            coverage.quantity |= is_quantity_field(key) && json_quantity(value).is_some();
            coverage.context |= is_context_field(key);
        }
        coverage
    }

    pub fn is_complete(&self) -> bool {
        self.time && self.quantity
    }

    /// Evidence fragment naming the recognized groups
    pub fn describe(&self) -> String {
        let mut found = Vec::new();
        if self.time {
            found.push("timestamp");
        }
        if self.quantity {
            found.push("quantity");
        }
        if self.context {
            found.push("context");
        }
        if found.is_empty() {
            "no recognized fields".to_string()
        } else {
            format!("recognized fields: {}", found.join(", "))
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Build a measurement from a JSON object, keeping other scalars as fields.
pub fn measurement_from_json(obj: &Map<String, Value>) -> Result<Measurement, String> {
    let mut timestamp = None;
    let mut quantity = None;
    let mut fields = Vec::new();

    for (key, value) in obj {
        if timestamp.is_none() && is_time_field(key) {
            if let Some(ts) = json_timestamp(value) {
                timestamp = Some(ts);
                continue;
            }
        }
        if quantity.is_none() && is_quantity_field(key) {
            if let Some(q) = json_quantity(value) {
                quantity = Some(q);
                continue;
            }
        }
        if let Some(s) = scalar_to_string(value) {
            fields.push((key.clone(), s));
        }
    }

    finish_measurement(timestamp, quantity, fields)
}

/// Build a measurement from ordered name/value pairs (CSV rows, XML leaves).
pub fn measurement_from_pairs<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<Measurement, String> {
    let mut timestamp = None;
    let mut quantity = None;
    let mut fields = Vec::new();

    for (key, value) in pairs {
        if timestamp.is_none() && is_time_field(key) {
            if let Some(ts) = parse_timestamp(value) {
                timestamp = Some(ts);
                continue;
            }
        }
        if quantity.is_none() && is_quantity_field(key) {
            if let Some(q) = parse_quantity(value) {
                quantity = Some(q);
                continue;
            }
        }
        fields.push((key.trim().to_string(), value.trim().to_string()));
    }

    finish_measurement(timestamp, quantity, fields)
}

fn finish_measurement(
    timestamp: Option<DateTime<Utc>>,
    quantity: Option<f64>,
    fields: Vec<(String, String)>,
) -> Result<Measurement, String> {
    let timestamp = timestamp.ok_or_else(|| "missing or invalid timestamp field".to_string())?;
    let quantity = quantity.ok_or_else(|| "missing or non-numeric quantity field".to_string())?;
    Ok(Measurement {
        timestamp,
        quantity,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timestamp_variants() {
        let midnight = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2023-01-01T00:00:00Z"), Some(midnight));
        assert_eq!(parse_timestamp("2023-01-01 00:00:00"), Some(midnight));
        assert_eq!(parse_timestamp("2023-01-01"), Some(midnight));
        assert_eq!(parse_timestamp("1672531200"), Some(midnight));
        assert_eq!(parse_timestamp("1672531200000"), Some(midnight));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_parse_quantity_rejects_non_finite() {
        assert_eq!(parse_quantity(" 0.5 "), Some(0.5));
        assert_eq!(parse_quantity("NaN"), None);
        assert_eq!(parse_quantity("inf"), None);
        assert_eq!(parse_quantity("gpt-4"), None);
    }

    #[test]
    fn test_vocabulary_is_case_insensitive() {
        assert!(is_time_field("Timestamp"));
        assert!(is_quantity_field(" CO2e "));
        assert!(is_context_field("MODEL"));
        assert!(!is_quantity_field("tokens"));
    }

    #[test]
    fn test_coverage_of_json_object_requires_valid_values() {
        let value: Value = serde_json::from_str(
            r#"{"timestamp":"not a date","emissions":0.5,"model":"gpt-4"}"#,
        )
        .unwrap();
        let coverage = FieldCoverage::of_json_object(value.as_object().unwrap());
        assert!(!coverage.time);
        assert!(coverage.quantity);
        assert!(coverage.context);
        assert!(!coverage.is_complete());
    }

    #[test]
    fn test_measurement_from_json_keeps_extra_fields() {
        let value: Value = serde_json::from_str(
            r#"{"timestamp":"2023-01-01T00:00:00Z","emissions":0.5,"model":"gpt-4","tokens":100}"#,
        )
        .unwrap();
        let m = measurement_from_json(value.as_object().unwrap()).unwrap();
        assert_eq!(m.quantity, 0.5);
        assert_eq!(m.field("model"), Some("gpt-4"));
        assert_eq!(m.field("tokens"), Some("100"));
        assert_eq!(m.field("emissions"), None);
    }

    #[test]
    fn test_measurement_from_pairs_requires_quantity() {
        let err = measurement_from_pairs([("timestamp", "2023-01-01"), ("model", "gpt-4")]).unwrap_err();
        assert!(err.contains("quantity"));
    }

    #[test]
    fn test_describe_lists_groups() {
        let coverage = FieldCoverage::of_names(["ts", "co2e"]);
        assert_eq!(coverage.describe(), "recognized fields: timestamp, quantity");
        assert_eq!(FieldCoverage::default().describe(), "no recognized fields");
    }
}
