use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::adapter::fields::timestamp_from_epoch;
use crate::adapter::traits::*;

pub const NAME: &str = "binary_record";

/// `CTLM` framed telemetry batch:
///
/// ```text
/// magic[4] = "CTLM" | version u8 | flags u8 | count u32 LE
/// count x { timestamp i64 LE (unix seconds) | quantity f64 LE }
/// ```
pub const MAGIC: &[u8; 4] = b"CTLM";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 10;
pub const RECORD_LEN: usize = 16;
/// The header's count field is a u32
pub const MAX_RECORDS: usize = u32::MAX as usize;

const NON_FINITE_PENALTY: f64 = 0.2;

pub struct BinaryRecordAdapter;

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    version: u8,
    flags: u8,
    count: u32,
}

fn read_header(payload: &[u8]) -> Option<FrameHeader> {
    if payload.len() < HEADER_LEN || &payload[..4] != MAGIC {
        return None;
    }
    let mut buf = &payload[4..HEADER_LEN];
    Some(FrameHeader {
        version: buf.get_u8(),
        flags: buf.get_u8(),
        count: buf.get_u32_le(),
    })
}

/// Iterate the complete records following the header
fn records(body: &[u8]) -> impl Iterator<Item = (i64, f64)> + '_ {
    body.chunks_exact(RECORD_LEN).map(|mut chunk| (chunk.get_i64_le(), chunk.get_f64_le()))
}

fn record_count(len: usize) -> DetectResult<u32> {
    u32::try_from(len).map_err(|_| DetectError::PayloadTooLarge {
        size: len,
        limit: MAX_RECORDS,
    })
}

/// Encode `(unix_seconds, quantity)` pairs as a version 1 frame.
///
/// Fails with `PayloadTooLarge` above `MAX_RECORDS` records.
pub fn encode(records: &[(i64, f64)]) -> DetectResult<Bytes> {
    let count = record_count(records.len())?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + records.len() * RECORD_LEN);
    buf.put_slice(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(0);
    buf.put_u32_le(count);
    for (ts, quantity) in records {
        buf.put_i64_le(*ts);
        buf.put_f64_le(*quantity);
    }
    Ok(buf.freeze())
}

impl FormatAdapter for BinaryRecordAdapter {
    fn name(&self) -> &str {
        NAME
    }

    /// Binary frames never reach the text-only legacy path
    fn legacy_detect(&self, _raw: &str) -> bool {
        false
    }

    fn score(&self, payload: &[u8]) -> ConfidenceScore {
        if payload.len() < MAGIC.len() || &payload[..MAGIC.len()] != MAGIC {
            return ConfidenceScore::no_match(NAME, "missing CTLM magic");
        }
        let header = match read_header(payload) {
            Some(header) => header,
            None => return ConfidenceScore::new(NAME, 0.5, "CTLM magic; truncated header"),
        };

        let mut score: f64 = 0.5;
        let mut evidence = vec!["CTLM magic".to_string()];
        if header.version == VERSION {
            score += 0.2;
            evidence.push(format!("version {}", VERSION));
        } else {
            evidence.push(format!("unsupported version {}", header.version));
        }

        let body = &payload[HEADER_LEN..];
        let expected = header.count as usize * RECORD_LEN;
        if body.len() == expected {
            score += 0.3;
            evidence.push(format!("{} records, exact length", header.count));
        } else if body.len() < expected {
            evidence.push(format!(
                "truncated record block ({} of {} records)",
                body.len() / RECORD_LEN,
                header.count
            ));
        } else {
            score += 0.1;
            evidence.push(format!("{} trailing bytes", body.len() - expected));
        }

        let checked = &body[..body.len().min(expected)];
        if let Some(idx) = records(checked).position(|(_, quantity)| !quantity.is_finite()) {
            score -= NON_FINITE_PENALTY;
            evidence.push(format!("non-finite quantity in record {}", idx));
        }

        ConfidenceScore::new(NAME, score, evidence.join("; "))
    }

    fn ingest(&self, raw: &[u8]) -> DetectResult<NormalizedRecord> {
        let header = read_header(raw).ok_or_else(|| DetectError::unparsable(NAME, "missing CTLM header"))?;
        if header.version != VERSION {
            return Err(DetectError::unparsable(
                NAME,
                format!("unsupported version {}", header.version),
            ));
        }

        let body = &raw[HEADER_LEN..];
        let expected = header.count as usize * RECORD_LEN;
        if body.len() != expected {
            return Err(DetectError::unparsable(
                NAME,
                format!(
                    "record block is {} bytes, header declares {} records ({} bytes)",
                    body.len(),
                    header.count,
                    expected
                ),
            ));
        }

        let mut measurements = Vec::with_capacity(header.count as usize);
        for (idx, (ts, quantity)) in records(body).enumerate() {
            let timestamp = timestamp_from_epoch(ts)
                .ok_or_else(|| DetectError::unparsable(NAME, format!("record {}: timestamp out of range", idx)))?;
            if !quantity.is_finite() {
                return Err(DetectError::unparsable(NAME, format!("record {}: non-finite quantity", idx)));
            }
            let mut m = Measurement::new(timestamp, quantity);
            if header.flags != 0 {
                m.fields.push(("flags".to_string(), header.flags.to_string()));
            }
            measurements.push(m);
        }

        NormalizedRecord::from_measurements(NAME, measurements, raw)
            .ok_or_else(|| DetectError::unparsable(NAME, "frame holds no records"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Bytes {
        encode(&[(1_672_531_200, 0.5), (1_672_531_260, 1.25)]).unwrap()
    }

    #[test]
    fn test_exact_frame_scores_full() {
        let score = BinaryRecordAdapter.score(&frame());
        assert_eq!(score.score, 1.0);
        assert_eq!(score.evidence, "CTLM magic; version 1; 2 records, exact length");
    }

    #[test]
    fn test_truncated_frame() {
        let bytes = frame();
        let score = BinaryRecordAdapter.score(&bytes[..bytes.len() - 5]);
        assert!((score.score - 0.7).abs() < 1e-9, "got {}", score.score);
        assert!(score.evidence.contains("truncated record block (1 of 2 records)"));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = frame().to_vec();
        bytes.extend_from_slice(b"xx");
        let score = BinaryRecordAdapter.score(&bytes);
        assert!((score.score - 0.8).abs() < 1e-9, "got {}", score.score);
    }

    #[test]
    fn test_non_finite_quantity_penalised() {
        let score = BinaryRecordAdapter.score(&encode(&[(1_672_531_200, f64::NAN)]).unwrap());
        assert!((score.score - 0.8).abs() < 1e-9, "got {}", score.score);
        assert!(score.evidence.contains("non-finite quantity in record 0"));
    }

    #[test]
    fn test_short_and_foreign_payloads() {
        assert_eq!(BinaryRecordAdapter.score(b"").score, 0.0);
        assert_eq!(BinaryRecordAdapter.score(b"CTL").score, 0.0);
        assert_eq!(BinaryRecordAdapter.score(b"{\"ctlm\":1}").score, 0.0);
        assert_eq!(BinaryRecordAdapter.score(b"CTLM\x01").score, 0.5);
    }

    #[test]
    fn test_ingest_frame() {
        let record = BinaryRecordAdapter.ingest(&frame()).unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record.quantity, 1.75);
        assert_eq!(record.timestamp.timestamp(), 1_672_531_200);
    }

    #[test]
    fn test_ingest_rejects_length_mismatch() {
        let bytes = frame();
        let err = BinaryRecordAdapter.ingest(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(err.to_string().contains("header declares 2 records"));
    }

    #[test]
    fn test_record_count_must_fit_header() {
        assert_eq!(record_count(2).unwrap(), 2);
        assert_eq!(record_count(MAX_RECORDS).unwrap(), u32::MAX);
        let err = record_count(MAX_RECORDS + 1).unwrap_err();
        assert!(matches!(err, DetectError::PayloadTooLarge { limit: MAX_RECORDS, .. }));
    }

    #[test]
    fn test_never_legacy() {
        assert!(!BinaryRecordAdapter.legacy_detect("CTLM"));
    }
}
