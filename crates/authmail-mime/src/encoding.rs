//! Header and body encoding utilities.
//!
//! Non-ASCII header text is written as RFC 2047 `B` encoded-words. Display
//! names that are plain ASCII are kept readable, quoted when RFC 5322
//! requires it. Bodies that cannot go out as 8bit are quoted-printable.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

const WORD_PREFIX: &str = "=?UTF-8?B?";
const WORD_SUFFIX: &str = "?=";

/// Raw bytes carried by one encoded-word.
///
/// 36 bytes become 48 Base64 characters, so a word is 60 characters long
/// and still fits on the first line of any header this crate encodes.
const MAX_WORD_BYTES: usize = 36;

/// Returns true if `text` cannot be written verbatim in a header.
#[must_use]
pub fn needs_encoding(text: &str) -> bool {
    text.chars().any(|c| !c.is_ascii() || c.is_ascii_control()) || text.contains("=?")
}

/// Encodes unstructured header text (e.g. `Subject`).
///
/// Returns the text unchanged when it is safe ASCII. Otherwise returns one
/// or more encoded-words separated by single spaces. A word never splits a
/// UTF-8 sequence, and is at most 75 characters long.
#[must_use]
pub fn encode_rfc2047(text: &str) -> String {
    if !needs_encoding(text) {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;

    for (idx, ch) in text.char_indices() {
        let next = idx + ch.len_utf8();
        if next - start > MAX_WORD_BYTES {
            words.push(encoded_word(&text[start..end]));
            start = idx;
        }
        end = next;
    }
    if start < end {
        words.push(encoded_word(&text[start..end]));
    }

    words.join(" ")
}

fn encoded_word(chunk: &str) -> String {
    format!("{WORD_PREFIX}{}{WORD_SUFFIX}", encode_base64(chunk.as_bytes()))
}

/// Encodes a display name for use in an address header.
///
/// Atoms are written as-is, other ASCII names as a quoted string, and
/// anything else as encoded-words.
#[must_use]
pub fn encode_phrase(name: &str) -> String {
    if needs_encoding(name) {
        return encode_rfc2047(name);
    }

    if name.split(' ').all(|atom| !atom.is_empty() && atom.chars().all(is_atext)) {
        return name.to_string();
    }

    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for c in name.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Longest quoted-printable line, excluding CRLF (RFC 2045 section 6.7).
const QP_LINE_LENGTH: usize = 76;

/// Encodes a body as quoted-printable (RFC 2045).
///
/// Line breaks stay hard CRLF breaks. Longer lines get soft breaks so no
/// encoded line exceeds 76 characters, and whitespace before a break is
/// escaped.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    let mut lines = text.split('\n').peekable();
    while let Some(line) = lines.next() {
        encode_qp_line(line.strip_suffix('\r').unwrap_or(line).as_bytes(), &mut out);
        if lines.peek().is_some() {
            out.push_str("\r\n");
        }
    }
    out
}

fn encode_qp_line(line: &[u8], out: &mut String) {
    let mut width = 0;
    for (i, &byte) in line.iter().enumerate() {
        let last = i + 1 == line.len();
        let literal = matches!(byte, b'!'..=b'<' | b'>'..=b'~')
            || (matches!(byte, b' ' | b'\t') && !last);
        let len = if literal { 1 } else { 3 };
        // Room for the soft break's "=" unless nothing follows.
        let limit = if last { QP_LINE_LENGTH } else { QP_LINE_LENGTH - 1 };

        if width + len > limit {
            out.push_str("=\r\n");
            width = 0;
        }
        if literal {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "={byte:02X}");
        }
        width += len;
    }
}

/// RFC 5322 `atext`.
const fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '=' | '?' | '^' | '_'
                | '`' | '{' | '|' | '}' | '~'
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// Decodes a header value made of encoded-words and plain text.
    pub(crate) fn decode_header(value: &str) -> String {
        let mut out = Vec::new();
        let mut previous_was_word = false;
        for (i, token) in value.split(' ').enumerate() {
            if let Some(inner) = token
                .strip_prefix(WORD_PREFIX)
                .and_then(|t| t.strip_suffix(WORD_SUFFIX))
            {
                out.extend(STANDARD.decode(inner).unwrap());
                previous_was_word = true;
            } else {
                if i > 0 && !previous_was_word {
                    out.push(b' ');
                }
                out.extend_from_slice(token.as_bytes());
                previous_was_word = false;
            }
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn ascii_passes_through() {
        assert_eq!(encode_rfc2047("Signup verification code"), "Signup verification code");
        assert!(!needs_encoding("Hello, world"));
    }

    #[test]
    fn non_ascii_is_encoded() {
        let encoded = encode_rfc2047("Héllo");
        assert_eq!(encoded, "=?UTF-8?B?SMOpbGxv?=");
        assert_eq!(decode_header(&encoded), "Héllo");
    }

    #[test]
    fn control_characters_are_encoded() {
        let encoded = encode_rfc2047("line\r\nBcc: victim@example.com");
        assert!(!encoded.contains('\r'));
        assert!(!encoded.contains('\n'));
        assert_eq!(decode_header(&encoded), "line\r\nBcc: victim@example.com");
    }

    #[test]
    fn long_text_splits_on_char_boundaries() {
        let text = "€".repeat(40);
        let encoded = encode_rfc2047(&text);
        let words: Vec<&str> = encoded.split(' ').collect();
        assert!(words.len() > 1);
        for word in &words {
            assert!(word.len() <= 75, "{word} is too long");
            let inner = &word[WORD_PREFIX.len()..word.len() - WORD_SUFFIX.len()];
            assert!(String::from_utf8(STANDARD.decode(inner).unwrap()).is_ok());
        }
        assert_eq!(decode_header(&encoded), text);
    }

    #[test]
    fn quoted_printable_escapes() {
        assert_eq!(encode_quoted_printable("a=b \r\nc\td"), "a=3Db=20\r\nc\td");
        assert_eq!(encode_quoted_printable("Zoë"), "Zo=C3=AB");
        assert_eq!(encode_quoted_printable("one\ntwo"), "one\r\ntwo");
    }

    #[test]
    fn quoted_printable_soft_breaks_long_lines() {
        let line = "x".repeat(200);
        let encoded = encode_quoted_printable(&line);
        let lines: Vec<&str> = encoded.split("\r\n").collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], format!("{}=", "x".repeat(75)));
        assert_eq!(lines[2], "x".repeat(50));
        assert_eq!(encoded.replace("=\r\n", ""), line);
    }

    #[test]
    fn quoted_printable_never_splits_an_escape() {
        let encoded = encode_quoted_printable(&"é".repeat(60));
        for line in encoded.split("\r\n") {
            assert!(line.len() <= 76, "{line} is too long");
            let body = line.strip_suffix('=').unwrap_or(line);
            assert_eq!(body.len() % 3, 0, "{line}");
        }
    }

    #[test]
    fn phrase_forms() {
        assert_eq!(encode_phrase("Jane Doe"), "Jane Doe");
        assert_eq!(encode_phrase("Doe, Jane"), "\"Doe, Jane\"");
        assert_eq!(encode_phrase("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(encode_phrase("Zoë"), "=?UTF-8?B?Wm/Dqw==?=");
    }
}
