//! Byte-level helpers shared by the text adapters.

pub fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map(|p| p + 1).unwrap_or(0);
    if start < end { &bytes[start..end] } else { &[] }
}

pub fn trim_ascii_end(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &bytes[..end]
}

/// Strip a UTF-8 byte order mark
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

/// Decode `bytes` as UTF-8. With `truncated_ok`, a multi-byte character cut
/// off at the very end (as happens when sampling a prefix) is dropped
/// instead of rejecting the whole sample.
pub fn as_text(bytes: &[u8], truncated_ok: bool) -> Option<&str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) if truncated_ok && e.error_len().is_none() => {
            std::str::from_utf8(&bytes[..e.valid_up_to()]).ok()
        }
        Err(_) => None,
    }
}

/// First `limit` bytes of `payload`
pub fn prefix(payload: &[u8], limit: usize) -> &[u8] {
    &payload[..payload.len().min(limit)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_ascii() {
        assert_eq!(trim_ascii(b"  {}\r\n"), b"{}");
        assert_eq!(trim_ascii(b" \t\n"), b"");
        assert_eq!(trim_ascii(b""), b"");
    }

    #[test]
    fn test_as_text_tolerates_cut_character_only_when_asked() {
        // "é" is 0xC3 0xA9; cut after the first byte
        let cut = b"caf\xC3";
        assert_eq!(as_text(cut, true), Some("caf"));
        assert_eq!(as_text(cut, false), None);
        // an invalid byte in the middle is never tolerated
        assert_eq!(as_text(b"a\xFFb", true), None);
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom(b"\xEF\xBB\xBF{}"), b"{}");
        assert_eq!(strip_bom(b"{}"), b"{}");
    }
}
