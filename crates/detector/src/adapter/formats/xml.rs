use crate::adapter::fields::{self, FieldCoverage};
use crate::adapter::sniff::{as_text, prefix, strip_bom, trim_ascii};
use crate::adapter::traits::*;
use crate::adapter::DETECTION_SAMPLE_SIZE;

pub const NAME: &str = "xml";

const MAX_SCORE: f64 = 0.9;
const HTML_SCORE: f64 = 0.1;
const HTML_MARKERS: &[&str] = &["<!doctype html", "<html", "<head", "<body", "<div", "<script"];
/// Element names remembered for field coverage
const MAX_TRACKED_NAMES: usize = 512;

/// XML documents whose record elements carry timestamp and quantity
/// children (or attributes).
pub struct XmlAdapter;

#[derive(Debug, PartialEq)]
enum XmlEvent<'a> {
    Start {
        name: &'a str,
        attrs: Vec<(&'a str, String)>,
        self_closing: bool,
    },
    End(&'a str),
    Text(&'a str),
}

#[derive(Debug, PartialEq)]
enum XmlFault {
    /// Input ended inside a tag, comment or CDATA section
    Unterminated,
    Malformed(String),
}

/// Minimal pull tokenizer: tags, attributes, text. Comments, processing
/// instructions, CDATA and doctype declarations are skipped.
struct Tokenizer<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn skip_past(&mut self, terminator: &str) -> Result<(), XmlFault> {
        match self.text[self.pos..].find(terminator) {
            Some(offset) => {
                self.pos += offset + terminator.len();
                Ok(())
            }
            None => {
                self.pos = self.text.len();
                Err(XmlFault::Unterminated)
            }
        }
    }

    fn next_event(&mut self) -> Option<Result<XmlEvent<'a>, XmlFault>> {
        let text = self.text;
        loop {
            let rest = &text[self.pos..];
            if rest.is_empty() {
                return None;
            }

            if !rest.starts_with('<') {
                let end = rest.find('<').unwrap_or(rest.len());
                self.pos += end;
                let text = rest[..end].trim();
                if text.is_empty() {
                    continue;
                }
                return Some(Ok(XmlEvent::Text(text)));
            }

            let skipped = if rest.starts_with("<?") {
                Some(self.skip_past("?>"))
            } else if rest.starts_with("<!--") {
                Some(self.skip_past("-->"))
            } else if rest.starts_with("<![CDATA[") {
                Some(self.skip_past("]]>"))
            } else if rest.starts_with("<!") {
                Some(self.skip_past(">"))
            } else {
                None
            };
            match skipped {
                Some(Ok(())) => continue,
                Some(Err(fault)) => return Some(Err(fault)),
                None => return Some(self.read_tag()),
            }
        }
    }

    fn read_tag(&mut self) -> Result<XmlEvent<'a>, XmlFault> {
        let text = self.text;
        let start = self.pos;
        let bytes = text.as_bytes();
        let mut quote = None;
        let mut end = None;
        for (offset, b) in bytes[start + 1..].iter().enumerate() {
            match (quote, *b) {
                (Some(q), b) if b == q => quote = None,
                (Some(_), _) => {}
                (None, b'"') | (None, b'\'') => quote = Some(*b),
                (None, b'>') => {
                    end = Some(start + 1 + offset);
                    break;
                }
                (None, b'<') => {
                    return Err(XmlFault::Malformed(format!("'<' inside tag at byte {}", start + 1 + offset)))
                }
                _ => {}
            }
        }
        let end = match end {
            Some(end) => end,
            None => {
                self.pos = self.text.len();
                return Err(XmlFault::Unterminated);
            }
        };
        self.pos = end + 1;

        let inner = &text[start + 1..end];
        if let Some(name) = inner.strip_prefix('/') {
            let name = name.trim();
            if !is_name(name) {
                return Err(XmlFault::Malformed(format!("invalid closing tag </{}>", name)));
            }
            return Ok(XmlEvent::End(name));
        }

        let (inner, self_closing) = match inner.strip_suffix('/') {
            Some(inner) => (inner, true),
            None => (inner, false),
        };
        let name_end = inner
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(inner.len());
        let name = &inner[..name_end];
        if !is_name(name) {
            return Err(XmlFault::Malformed(format!("invalid tag name {:?}", name)));
        }
        let attrs = parse_attributes(&inner[name_end..])?;

        Ok(XmlEvent::Start {
            name,
            attrs,
            self_closing,
        })
    }
}

fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.'))
}

fn parse_attributes(mut rest: &str) -> Result<Vec<(&str, String)>, XmlFault> {
    let mut attrs = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(attrs);
        }
        let eq = rest
            .find('=')
            .ok_or_else(|| XmlFault::Malformed(format!("attribute without value: {:?}", rest)))?;
        let name = rest[..eq].trim();
        if !is_name(name) {
            return Err(XmlFault::Malformed(format!("invalid attribute name {:?}", name)));
        }
        let value_part = rest[eq + 1..].trim_start();
        let quote = value_part
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| XmlFault::Malformed(format!("unquoted value for attribute {}", name)))?;
        let close = value_part[1..]
            .find(quote)
            .ok_or_else(|| XmlFault::Malformed(format!("unterminated value for attribute {}", name)))?;
        attrs.push((name, decode_entities(&value_part[1..1 + close])));
        rest = &value_part[close + 2..];
    }
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn looks_like_html(text: &str) -> bool {
    let head = text.get(..text.len().min(1024)).unwrap_or(text).to_ascii_lowercase();
    HTML_MARKERS.iter().any(|m| head.contains(m))
}

#[derive(Debug)]
enum Balance {
    Balanced,
    /// Open elements left at end of input
    Truncated(usize),
    Corrupted(String),
}

struct ScanSummary<'a> {
    balance: Balance,
    elements: usize,
    root: Option<&'a str>,
    names: Vec<&'a str>,
}

fn remember<'a>(names: &mut Vec<&'a str>, name: &'a str) {
    if names.len() < MAX_TRACKED_NAMES && !names.contains(&name) {
        names.push(name);
    }
}

fn scan(text: &str) -> ScanSummary<'_> {
    let mut tokenizer = Tokenizer::new(text);
    let mut stack: Vec<&str> = Vec::new();
    let mut names: Vec<&str> = Vec::new();
    let mut elements = 0;
    let mut root = None;

    while let Some(event) = tokenizer.next_event() {
        match event {
            Ok(XmlEvent::Start { name, attrs, self_closing }) => {
                elements += 1;
                root.get_or_insert(name);
                remember(&mut names, name);
                for (attr, _) in &attrs {
                    remember(&mut names, attr);
                }
                if !self_closing {
                    stack.push(name);
                }
            }
            Ok(XmlEvent::End(name)) => match stack.pop() {
                Some(open) if open == name => {}
                Some(open) => {
                    return ScanSummary {
                        balance: Balance::Corrupted(format!("mismatched </{}> closing <{}>", name, open)),
                        elements,
                        root,
                        names,
                    }
                }
                None => {
                    return ScanSummary {
                        balance: Balance::Corrupted(format!("unexpected </{}>", name)),
                        elements,
                        root,
                        names,
                    }
                }
            },
            Ok(XmlEvent::Text(_)) => {}
            Err(XmlFault::Unterminated) => {
                return ScanSummary {
                    balance: Balance::Truncated(stack.len() + 1),
                    elements,
                    root,
                    names,
                }
            }
            Err(XmlFault::Malformed(reason)) => {
                return ScanSummary {
                    balance: Balance::Corrupted(reason),
                    elements,
                    root,
                    names,
                }
            }
        }
    }

    let balance = if stack.is_empty() {
        Balance::Balanced
    } else {
        Balance::Truncated(stack.len())
    };
    ScanSummary {
        balance,
        elements,
        root,
        names,
    }
}

/// Closing tag name of the last element in `text`, if it ends with one
fn trailing_close_tag(text: &str) -> Option<&str> {
    let body = text.trim_end().strip_suffix('>')?;
    let open = body.rfind("</")?;
    Some(body[open + 2..].trim())
}

impl FormatAdapter for XmlAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn legacy_detect(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        trimmed.starts_with('<') && trimmed.ends_with('>') && !looks_like_html(trimmed)
    }

    fn score(&self, payload: &[u8]) -> ConfidenceScore {
        let trimmed = trim_ascii(strip_bom(payload));
        if trimmed.is_empty() {
            return ConfidenceScore::no_match(NAME, "empty payload");
        }
        let opens_markup = trimmed.starts_with(b"<?xml")
            || (trimmed.len() > 1
                && trimmed[0] == b'<'
                && (trimmed[1].is_ascii_alphabetic() || matches!(trimmed[1], b'_' | b'!')));
        if !opens_markup {
            return ConfidenceScore::no_match(NAME, "not XML: does not open with a tag or declaration");
        }

        let sampled = trimmed.len() > DETECTION_SAMPLE_SIZE;
        let text = match as_text(prefix(trimmed, DETECTION_SAMPLE_SIZE), sampled) {
            Some(text) => text,
            None => return ConfidenceScore::no_match(NAME, "not XML: invalid UTF-8"),
        };

        if looks_like_html(text) {
            return ConfidenceScore::new(NAME, HTML_SCORE, "HTML-like content detected");
        }

        let summary = scan(text);
        if summary.elements == 0 {
            return ConfidenceScore::no_match(NAME, "no elements found");
        }

        let (base, balance_evidence) = match &summary.balance {
            Balance::Balanced => (0.5, "balanced tags".to_string()),
            Balance::Truncated(_) if sampled => {
                // The sample cuts through the document; judge the real tail instead
                let tail = as_text(&trimmed[trimmed.len().saturating_sub(256)..], true);
                let closes_root = tail
                    .and_then(trailing_close_tag)
                    .zip(summary.root)
                    .map(|(closing, root)| closing == root)
                    .unwrap_or(false);
                if closes_root {
                    (0.5, format!("balanced prefix, document closes <{}>", summary.root.unwrap_or_default()))
                } else {
                    (0.3, "truncated: document does not close its root element".to_string())
                }
            }
            Balance::Truncated(open) => (0.3, format!("truncated: {} unclosed elements", open)),
            Balance::Corrupted(reason) => (0.15, format!("corrupted: {}", reason)),
        };

        let coverage = FieldCoverage::of_names(summary.names.iter().copied());
        let mut score: f64 = base;
        if coverage.time {
            score += 0.15;
        }
        if coverage.quantity {
            score += 0.15;
        }
        if coverage.context {
            score += 0.1;
        }

        ConfidenceScore::new(
            NAME,
            score.min(MAX_SCORE),
            format!(
                "{} ({} elements); {}",
                balance_evidence,
                summary.elements,
                coverage.describe()
            ),
        )
    }

    fn ingest(&self, raw: &[u8]) -> DetectResult<NormalizedRecord> {
        let text = std::str::from_utf8(strip_bom(raw))
            .map_err(|_| DetectError::unparsable(NAME, "non-UTF8 content"))?;

        let records = collect_records(text).map_err(|reason| DetectError::unparsable(NAME, reason))?;

        let mut measurements = Vec::with_capacity(records.len());
        for (idx, pairs) in records.iter().enumerate() {
            let m = fields::measurement_from_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())))
                .map_err(|reason| DetectError::unparsable(NAME, format!("record {}: {}", idx, reason)))?;
            measurements.push(m);
        }

        NormalizedRecord::from_measurements(NAME, measurements, raw)
            .ok_or_else(|| DetectError::unparsable(NAME, "no record elements"))
    }
}

type Pairs<'a> = Vec<(&'a str, String)>;

/// Leaf values per record element. Record elements are the root's
/// children; a root holding only leaves is itself the single record.
fn collect_records(text: &str) -> Result<Vec<Pairs<'_>>, String> {
    let mut tokenizer = Tokenizer::new(text);
    let mut stack: Vec<&str> = Vec::new();
    let mut root_pairs: Pairs = Vec::new();
    let mut records: Vec<Pairs> = Vec::new();
    let mut current: Option<Pairs> = None;
    let mut leaf: Option<(&str, String)> = None;

    while let Some(event) = tokenizer.next_event() {
        let event = event.map_err(|fault| match fault {
            XmlFault::Unterminated => "truncated document".to_string(),
            XmlFault::Malformed(reason) => reason,
        })?;

        match event {
            XmlEvent::Start { name, attrs, self_closing } => {
                let depth = stack.len();
                match depth {
                    0 => root_pairs.extend(attrs),
                    1 => {
                        if self_closing {
                            records.push(attrs);
                        } else {
                            current = Some(attrs);
                        }
                    }
                    _ => {
                        if let Some(pairs) = current.as_mut() {
                            pairs.extend(attrs);
                        }
                    }
                }
                if !self_closing {
                    stack.push(name);
                    leaf = Some((name, String::new()));
                }
            }
            XmlEvent::Text(content) => {
                if let Some((_, value)) = leaf.as_mut() {
                    value.push_str(&decode_entities(content));
                }
            }
            XmlEvent::End(name) => {
                let open = stack.pop().ok_or_else(|| format!("unexpected </{}>", name))?;
                if open != name {
                    return Err(format!("mismatched </{}> closing <{}>", name, open));
                }
                if let Some((leaf_name, value)) = leaf.take() {
                    if leaf_name == name && !value.is_empty() {
                        match stack.len() {
                            1 => root_pairs.push((leaf_name, value)),
                            0 => {}
                            _ => {
                                if let Some(pairs) = current.as_mut() {
                                    pairs.push((leaf_name, value));
                                }
                            }
                        }
                    }
                }
                if stack.len() == 1 {
                    if let Some(pairs) = current.take() {
                        records.push(pairs);
                    }
                }
            }
        }
    }

    if !stack.is_empty() {
        return Err(format!("truncated document: <{}> never closed", stack[stack.len() - 1]));
    }

    let records: Vec<Pairs> = records.into_iter().filter(|r| !r.is_empty()).collect();
    if records.is_empty() && !root_pairs.is_empty() {
        return Ok(vec![root_pairs]);
    }
    Ok(records)
}
