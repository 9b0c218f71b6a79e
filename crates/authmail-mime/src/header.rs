//! Ordered header block with RFC 5322 folding.

use crate::error::{Error, Result};
use std::fmt;

/// Preferred maximum line length, excluding CRLF.
pub const MAX_LINE_LENGTH: usize = 78;

/// Collection of message headers, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header.
    ///
    /// The value must already be encoded for the wire; see
    /// [`crate::encoding`].
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid field name or the value
    /// contains a line break.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let value = value.into();

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_graphic() && c != ':') {
            return Err(Error::InvalidHeader(format!("bad field name {name:?}")));
        }
        if value.contains(['\r', '\n']) {
            return Err(Error::InvalidHeader(format!("{name} value contains a line break")));
        }

        self.headers.push((name, value));
        Ok(())
    }

    /// Gets the first value for a header (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Counts the occurrences of a header (case-insensitive).
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .count()
    }

    /// Returns an iterator over all headers in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of header fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Writes `name: value` folded at whitespace so lines stay within
/// [`MAX_LINE_LENGTH`] where possible.
///
/// Folding replaces a single space with CRLF + space, so unfolding restores
/// the original value exactly. A run of non-whitespace longer than the
/// limit is left on one line.
#[must_use]
pub fn fold(name: &str, value: &str) -> String {
    let mut out = String::with_capacity(name.len() + value.len() + 8);
    out.push_str(name);
    out.push(':');
    let mut line_len = out.len();

    for (i, word) in value.split(' ').enumerate() {
        let width = word.chars().count();
        if i > 0 && !word.is_empty() && line_len + 1 + width > MAX_LINE_LENGTH {
            out.push_str("\r\n ");
            line_len = 1;
        } else {
            out.push(' ');
            line_len += 1;
        }
        out.push_str(word);
        line_len += width;
    }

    out
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            write!(f, "{}\r\n", fold(name, value))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::encoding::encode_rfc2047;
    use crate::encoding::tests::decode_header;
    use proptest::prelude::*;

    fn unfold(folded: &str, name: &str) -> String {
        folded
            .replace("\r\n", "")
            .strip_prefix(&format!("{name}: "))
            .unwrap()
            .to_string()
    }

    #[test]
    fn keeps_insertion_order() {
        let mut headers = Headers::new();
        headers.add("To", "a@example.com").unwrap();
        headers.add("From", "b@example.com").unwrap();
        headers.add("Subject", "Hi").unwrap();

        assert_eq!(
            headers.to_string(),
            "To: a@example.com\r\nFrom: b@example.com\r\nSubject: Hi\r\n"
        );
        assert_eq!(headers.get("subject"), Some("Hi"));
        assert_eq!(headers.count("FROM"), 1);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn rejects_injection() {
        let mut headers = Headers::new();
        assert!(headers.add("Subject", "hi\r\nBcc: x@y").is_err());
        assert!(headers.add("Bad Name", "v").is_err());
        assert!(headers.add("Bad:Name", "v").is_err());
        assert!(headers.add("", "v").is_err());
        assert!(headers.is_empty());
    }

    #[test]
    fn short_value_is_not_folded() {
        assert_eq!(fold("Subject", "Password updated"), "Subject: Password updated");
        assert_eq!(fold("X-Empty", ""), "X-Empty: ");
    }

    #[test]
    fn long_value_folds_at_spaces() {
        let value = "word ".repeat(30);
        let value = value.trim_end();
        let folded = fold("Subject", value);

        assert!(folded.contains("\r\n "));
        for line in folded.split("\r\n") {
            assert!(line.len() <= MAX_LINE_LENGTH);
        }
        assert_eq!(unfold(&folded, "Subject"), value);
    }

    #[test]
    fn overlong_token_stays_whole() {
        let token = "x".repeat(100);
        assert_eq!(fold("Subject", &token), format!("Subject: {token}"));
    }

    proptest! {
        #[test]
        fn folded_lines_fit_and_unfold(words in prop::collection::vec("[a-zA-Z0-9éø€]{1,16}", 0..40)) {
            let text = words.join(" ");
            let encoded = encode_rfc2047(&text);
            let folded = fold("Subject", &encoded);

            for line in folded.split("\r\n") {
                prop_assert!(line.chars().count() <= MAX_LINE_LENGTH, "line too long: {}", line);
                prop_assert!(!line.trim().is_empty() || folded == "Subject: ");
            }
            prop_assert_eq!(decode_header(&unfold(&folded, "Subject")), text);
        }
    }
}
