use std::borrow::Cow;
use std::sync::LazyLock;

use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;

const PROLOGUE_SCAN_LEN: usize = 200;

static ENCODING_DECL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"<\?xml[^>]+encoding=["']([^"']+)["']"#).ok());

/// Encoding declared in the XML prologue, UTF-8 when absent or unknown.
pub fn detect_encoding(raw: &[u8]) -> &'static Encoding {
    let head = &raw[..raw.len().min(PROLOGUE_SCAN_LEN)];
    ENCODING_DECL
        .as_ref()
        .and_then(|re| re.captures(head))
        .and_then(|caps| caps.get(1))
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8)
}

/// Decodes a page body and strips characters that break downstream parsing.
pub fn decode_page(raw: &[u8]) -> String {
    let encoding = detect_encoding(raw);
    let (text, _, had_errors) = encoding.decode(raw);
    if had_errors {
        tracing::debug!(encoding = encoding.name(), "page contained undecodable bytes");
    }
    sanitize(&text).into_owned()
}

pub fn sanitize(text: &str) -> Cow<'_, str> {
    if !text.contains(['\u{00A0}', '\u{202F}', '\u{200B}', '\u{FEFF}']) {
        return Cow::Borrowed(text);
    }
    let cleaned = text
        .chars()
        .filter_map(|c| match c {
            '\u{00A0}' | '\u{202F}' => Some(' '),
            '\u{200B}' | '\u{FEFF}' => None,
            other => Some(other),
        })
        .collect();
    Cow::Owned(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_windows_1250() {
        let raw = br#"<?xml version="1.0" encoding="windows-1250"?><PAGE/>"#;
        assert_eq!(detect_encoding(raw).name(), "windows-1250");
    }

    #[test]
    fn defaults_to_utf8() {
        assert_eq!(detect_encoding(b"<PAGE/>"), UTF_8);
        let bogus = br#"<?xml version="1.0" encoding="klingon"?><PAGE/>"#;
        assert_eq!(detect_encoding(bogus), UTF_8);
    }

    #[test]
    fn decodes_czech_text() {
        let mut raw = br#"<?xml version="1.0" encoding="windows-1250"?><R T=""#.to_vec();
        // "Radiátory" in windows-1250
        raw.extend_from_slice(&[b'R', b'a', b'd', b'i', 0xE1, b't', b'o', b'r', b'y']);
        raw.extend_from_slice(br#""/>"#);
        let text = decode_page(&raw);
        assert!(text.contains("Radiátory"));
    }

    #[test]
    fn strips_bom_and_odd_spaces() {
        let text = "\u{FEFF}<A T=\"a\u{00A0}b\u{202F}c\u{200B}d\"/>";
        assert_eq!(sanitize(text), "<A T=\"a b cd\"/>");
    }

    #[test]
    fn sanitize_borrows_clean_text() {
        assert!(matches!(sanitize("<A/>"), Cow::Borrowed(_)));
    }
}
