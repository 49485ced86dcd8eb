use crate::adapter::fields::{self, FieldCoverage};
use crate::adapter::sniff::{as_text, prefix, strip_bom, trim_ascii_end};
use crate::adapter::traits::*;
use crate::adapter::DETECTION_SAMPLE_SIZE;

pub const NAME: &str = "csv";

const DELIMITERS: [char; 4] = [',', ';', '\t', '|'];
const HEADER_ONLY_PENALTY: f64 = 0.2;
const TRUNCATION_PENALTY: f64 = 0.3;
const CORRUPTION_PENALTY: f64 = 0.4;
/// Data rows column-checked during scoring
const MAX_SCORED_ROWS: usize = 1024;

/// Delimited tabular data with an identifier-like header row.
///
/// Quoted cells may contain delimiters and `""` escapes; quoted cells
/// spanning several lines are not supported.
pub struct CsvAdapter;

#[derive(Debug)]
struct Header {
    delimiter: char,
    columns: Vec<String>,
}

/// Count `delimiter` outside double quotes
fn count_unquoted(line: &str, delimiter: char) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for c in line.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

fn sniff_delimiter(header: &str) -> Option<char> {
    DELIMITERS
        .iter()
        .map(|d| (*d, count_unquoted(header, *d)))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(_, count)| *count)
        .map(|(d, _)| d)
}

/// Split one row, honouring quotes and `""` escapes
fn split_row(line: &str, delimiter: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                cells.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn is_identifier_like(cell: &str) -> bool {
    let mut chars = cell.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '@' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ' ' | '-' | '.' | '@' | '(' | ')'))
}

fn parse_header(line: &str) -> Result<Header, String> {
    let delimiter = sniff_delimiter(line).ok_or_else(|| "no delimiter in first line".to_string())?;
    let columns = split_row(line, delimiter);
    if let Some(bad) = columns.iter().find(|c| !is_identifier_like(c)) {
        return Err(format!("header cell {:?} is not identifier-like", truncate(bad, 24)));
    }
    Ok(Header { delimiter, columns })
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty())
}

/// Column count of the payload's final line, read from the real tail so that
/// sampled payloads still notice truncation.
fn tail_column_count(payload: &[u8], delimiter: char) -> Option<usize> {
    let body = trim_ascii_end(payload);
    let start = body.iter().rposition(|b| *b == b'\n').map(|p| p + 1).unwrap_or(0);
    let tail = as_text(&body[start..], false)?;
    Some(split_row(tail, delimiter).len())
}

impl FormatAdapter for CsvAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn legacy_detect(&self, raw: &str) -> bool {
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
        match (lines.next(), lines.next()) {
            (Some(header), Some(_)) => parse_header(header)
                .map(|h| h.columns.len() >= 2)
                .unwrap_or(false),
            _ => false,
        }
    }

    fn score(&self, payload: &[u8]) -> ConfidenceScore {
        let payload = strip_bom(payload);
        let sampled = payload.len() > DETECTION_SAMPLE_SIZE;
        let text = match as_text(prefix(payload, DETECTION_SAMPLE_SIZE), sampled) {
            Some(text) => text,
            None => return ConfidenceScore::no_match(NAME, "not CSV: invalid UTF-8"),
        };
        let text = if sampled {
            text.rfind('\n').map(|pos| &text[..pos]).unwrap_or(text)
        } else {
            text
        };

        let mut lines = data_lines(text);
        let header = match lines.next() {
            Some((_, line)) => line,
            None => return ConfidenceScore::no_match(NAME, "empty payload"),
        };
        let header = match parse_header(header) {
            Ok(h) => h,
            Err(reason) => return ConfidenceScore::no_match(NAME, format!("not CSV: {}", reason)),
        };
        let width = header.columns.len();

        let coverage = FieldCoverage::of_names(header.columns.iter().map(String::as_str));
        let mut score = 0.4; // Base score for a delimited identifier header
        if coverage.time {
            score += 0.2;
        }
        if coverage.quantity {
            score += 0.2;
        }
        if coverage.context {
            score += 0.1;
        }

        let mut evidence = format!(
            "{} columns delimited by {:?}; {}",
            width,
            header.delimiter,
            coverage.describe()
        );

        let rows: Vec<(usize, usize)> = lines
            .take(MAX_SCORED_ROWS)
            .map(|(line_no, line)| (line_no, split_row(line, header.delimiter).len()))
            .collect();

        if rows.is_empty() {
            score -= HEADER_ONLY_PENALTY;
            evidence.push_str("; header only");
            return ConfidenceScore::new(NAME, score, evidence);
        }

        let last_width = if sampled {
            tail_column_count(payload, header.delimiter)
        } else {
            rows.last().map(|(_, w)| *w)
        };
        let interior = if sampled { &rows[..] } else { &rows[..rows.len() - 1] };

        if let Some((line_no, cells)) = interior.iter().find(|(_, w)| *w != width) {
            score -= CORRUPTION_PENALTY;
            evidence.push_str(&format!(
                "; corrupted row at line {} ({} of {} columns)",
                line_no, cells, width
            ));
        } else {
            match last_width {
                Some(w) if w < width => {
                    score -= TRUNCATION_PENALTY;
                    evidence.push_str(&format!("; truncated row ({} of {} columns)", w, width));
                }
                Some(w) if w > width => {
                    score -= CORRUPTION_PENALTY;
                    evidence.push_str(&format!("; corrupted final row ({} of {} columns)", w, width));
                }
                _ => evidence.push_str(&format!("; {} consistent rows", rows.len())),
            }
        }

        ConfidenceScore::new(NAME, score, evidence)
    }

    fn ingest(&self, raw: &[u8]) -> DetectResult<NormalizedRecord> {
        let text = std::str::from_utf8(strip_bom(raw))
            .map_err(|_| DetectError::unparsable(NAME, "non-UTF8 content"))?;

        let mut lines = data_lines(text);
        let (_, header) = lines
            .next()
            .ok_or_else(|| DetectError::unparsable(NAME, "empty payload"))?;
        let header = parse_header(header).map_err(|reason| DetectError::unparsable(NAME, reason))?;
        let width = header.columns.len();

        let mut measurements = Vec::new();
        for (line_no, line) in lines {
            let cells = split_row(line, header.delimiter);
            if cells.len() != width {
                return Err(DetectError::unparsable(
                    NAME,
                    format!("line {} has {} columns, expected {}", line_no, cells.len(), width),
                ));
            }
            let pairs = header
                .columns
                .iter()
                .map(String::as_str)
                .zip(cells.iter().map(String::as_str));
            let m = fields::measurement_from_pairs(pairs)
                .map_err(|reason| DetectError::unparsable(NAME, format!("line {}: {}", line_no, reason)))?;
            measurements.push(m);
        }

        NormalizedRecord::from_measurements(NAME, measurements, raw)
            .ok_or_else(|| DetectError::unparsable(NAME, "header without data rows"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_table() {
        let score = CsvAdapter.score(b"timestamp,model,emissions\n2023-01-01,gpt-4,0.5");
        assert!(score.score >= 0.7, "got {}", score.score);
        assert!(score.evidence.contains("1 consistent rows"));
    }

    #[test]
    fn test_truncated_row_is_partial() {
        let score = CsvAdapter.score(b"timestamp,model,emissions\n2023-01-01,gpt-4");
        assert!(score.score > 0.3 && score.score < 0.8, "got {}", score.score);
        assert!(score.evidence.contains("truncated row"));
    }

    #[test]
    fn test_corrupted_interior_row() {
        let payload = b"ts;co2e\n2023-01-01;1.0\n2023-01-02\n2023-01-03;2.0\n";
        let score = CsvAdapter.score(payload);
        assert!(score.score > 0.0 && score.score < 0.5, "got {}", score.score);
        assert!(score.evidence.contains("corrupted row at line 3"));
    }

    #[test]
    fn test_header_only() {
        let score = CsvAdapter.score(b"timestamp,emissions\n");
        assert!(score.score > 0.5 && score.score < 0.7, "got {}", score.score);
        assert!(score.evidence.contains("header only"));
    }

    #[test]
    fn test_sniffs_delimiters() {
        assert_eq!(sniff_delimiter("a;b;c"), Some(';'));
        assert_eq!(sniff_delimiter("a\tb"), Some('\t'));
        assert_eq!(sniff_delimiter("a|b,c|d"), Some('|'));
        assert_eq!(sniff_delimiter("abc"), None);
    }

    #[test]
    fn test_split_row_honours_quotes() {
        assert_eq!(
            split_row(r#"2023-01-01,"gpt-4, turbo","say ""hi""""#, ','),
            vec!["2023-01-01", "gpt-4, turbo", r#"say "hi""#]
        );
    }

    #[test]
    fn test_rejects_non_tabular() {
        assert_eq!(CsvAdapter.score(b"").score, 0.0);
        assert_eq!(
            CsvAdapter.score(br#"{"timestamp":"2023-01-01T00:00:00Z","emissions":0.5,"model":"gpt-4"}"#).score,
            0.0
        );
        assert_eq!(CsvAdapter.score(b"<root><a>1</a></root>").score, 0.0);
        assert_eq!(CsvAdapter.score(b"\xFF\x00,\x01").score, 0.0);
    }

    #[test]
    fn test_sampled_payload_checks_real_tail() {
        let mut payload = String::from("timestamp,model,emissions\n");
        while payload.len() <= DETECTION_SAMPLE_SIZE {
            payload.push_str("2023-01-01T00:00:00Z,gpt-4,0.5\n");
        }
        assert!(CsvAdapter.score(payload.as_bytes()).score >= 0.8);

        payload.push_str("2023-01-01T00:00:00Z,gpt-4");
        let score = CsvAdapter.score(payload.as_bytes());
        assert!(score.evidence.contains("truncated row"), "{}", score.evidence);
    }

    #[test]
    fn test_ingest_rows() {
        let record = CsvAdapter
            .ingest(b"timestamp,model,emissions\n2023-01-01,gpt-4,0.5\n2023-01-02,gpt-4,1.5\n")
            .unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record.quantity, 2.0);
        assert_eq!(record.measurements[0].field("model"), Some("gpt-4"));
        assert_eq!(record.timestamp.to_rfc3339(), "2023-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_ingest_rejects_truncated_row() {
        let err = CsvAdapter
            .ingest(b"timestamp,model,emissions\n2023-01-01,gpt-4")
            .unwrap_err();
        assert!(err.to_string().contains("line 2 has 2 columns, expected 3"));
    }

    #[test]
    fn test_legacy_detect() {
        assert!(CsvAdapter.legacy_detect("a,b\n1,2"));
        assert!(!CsvAdapter.legacy_detect("a,b"));
        assert!(!CsvAdapter.legacy_detect("{\"a\":1,\"b\":2}\n{}"));
    }
}
