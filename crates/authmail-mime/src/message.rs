//! Outbound message composition.

use crate::content_type::ContentType;
use crate::encoding::{encode_phrase, encode_quoted_printable, encode_rfc2047};
use crate::error::{Error, Result};
use crate::header::Headers;
use chrono::{DateTime, FixedOffset, Utc};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write as _};

/// `Date` header layout (RFC 5322 section 3.3, two-digit day).
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Hex digits of the digest kept in a Message-ID.
const MESSAGE_ID_HASH_LEN: usize = 32;

/// Longest body line SMTP accepts, excluding CRLF (RFC 5322 section 2.1.1).
const MAX_BODY_LINE_OCTETS: usize = 998;

/// Mailbox: an address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name.
    pub name: Option<String>,
    /// Email address.
    pub email: String,
}

impl Mailbox {
    /// Creates a mailbox with a display name. An empty name is dropped.
    #[must_use]
    pub fn new(name: Option<&str>, email: impl Into<String>) -> Self {
        Self {
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
            email: email.into(),
        }
    }

    /// Creates a mailbox from just an email address.
    #[must_use]
    pub fn address(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", encode_phrase(name), self.email),
            None => f.write_str(&self.email),
        }
    }
}

/// Derives a Message-ID from the message content and its date.
///
/// `sha256("sender|recipient|body|date")`, truncated to 32 hex digits and
/// qualified with `domain`. Uniqueness only; it has no security purpose.
#[must_use]
pub fn message_id(sender: &str, recipient: &str, body: &str, date: &str, domain: &str) -> String {
    let digest = Sha256::digest(format!("{sender}|{recipient}|{body}|{date}").as_bytes());

    let mut hash = String::with_capacity(MESSAGE_ID_HASH_LEN);
    for byte in digest.iter().take(MESSAGE_ID_HASH_LEN / 2) {
        let _ = write!(hash, "{byte:02x}");
    }

    format!("<{hash}@{domain}>")
}

/// Generates a random multipart boundary: `boundary_` and 16 random bytes
/// in hex.
#[must_use]
pub fn generate_boundary() -> String {
    let bytes: [u8; 16] = rand::random();
    let mut boundary = String::from("boundary_");
    for byte in bytes {
        let _ = write!(boundary, "{byte:02x}");
    }
    boundary
}

/// Normalizes line endings to CRLF.
fn crlf(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 32);
    let mut lines = text.split('\n').peekable();
    while let Some(line) = lines.next() {
        out.push_str(line.strip_suffix('\r').unwrap_or(line));
        if lines.peek().is_some() {
            out.push_str("\r\n");
        }
    }
    out
}

/// `Content-Transfer-Encoding` of a body part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// UTF-8 as written; every line fits the SMTP limit.
    EightBit,
    /// Quoted-printable, for bodies with overlong lines.
    QuotedPrintable,
}

impl TransferEncoding {
    /// Picks 8bit unless some line is longer than 998 octets.
    #[must_use]
    pub fn for_body(body: &str) -> Self {
        let overlong = body
            .split('\n')
            .any(|line| line.strip_suffix('\r').unwrap_or(line).len() > MAX_BODY_LINE_OCTETS);
        if overlong {
            Self::QuotedPrintable
        } else {
            Self::EightBit
        }
    }

    /// Header value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EightBit => "8bit",
            Self::QuotedPrintable => "quoted-printable",
        }
    }

    /// Encodes `body` with CRLF line endings.
    #[must_use]
    pub fn encode(self, body: &str) -> String {
        match self {
            Self::EightBit => crlf(body),
            Self::QuotedPrintable => encode_quoted_printable(body),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Single `text/plain` part.
    Text(String),
    /// `multipart/alternative` with plain text and HTML.
    Alternative {
        /// Boundary delimiter.
        boundary: String,
        /// Plain text alternative.
        text: String,
        /// HTML alternative.
        html: String,
    },
}

/// A composed message ready for the DATA phase.
#[derive(Debug, Clone)]
pub struct Message {
    headers: Headers,
    body: Body,
}

impl Message {
    /// Message headers, in the order they are written.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Message body.
    #[must_use]
    pub const fn body(&self) -> &Body {
        &self.body
    }

    /// Serializes the message with CRLF line endings.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

fn write_part(f: &mut fmt::Formatter<'_>, boundary: &str, ct: &ContentType, body: &str) -> fmt::Result {
    let encoding = TransferEncoding::for_body(body);
    write!(
        f,
        "--{boundary}\r\nContent-Type: {ct}\r\nContent-Transfer-Encoding: {encoding}\r\n\r\n{}\r\n",
        encoding.encode(body)
    )
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n", self.headers)?;
        match &self.body {
            Body::Text(text) => f.write_str(&TransferEncoding::for_body(text).encode(text)),
            Body::Alternative {
                boundary,
                text,
                html,
            } => {
                write_part(f, boundary, &ContentType::text_plain(), text)?;
                write_part(f, boundary, &ContentType::text_html(), html)?;
                write!(f, "--{boundary}--\r\n")
            }
        }
    }
}

/// Builder for outbound messages.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<Mailbox>,
    to: Option<Mailbox>,
    subject: String,
    text: String,
    html: Option<String>,
    date: Option<DateTime<FixedOffset>>,
    domain: Option<String>,
    boundary: Option<String>,
}

impl MessageBuilder {
    /// Creates a new message builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender.
    #[must_use]
    pub fn from(mut self, from: Mailbox) -> Self {
        self.from = Some(from);
        self
    }

    /// Sets the recipient.
    #[must_use]
    pub fn to(mut self, to: Mailbox) -> Self {
        self.to = Some(to);
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Sets the HTML body. An empty string means no HTML alternative.
    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into()).filter(|h: &String| !h.is_empty());
        self
    }

    /// Sets the message date. Defaults to now.
    #[must_use]
    pub fn date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the domain used to qualify the Message-ID.
    #[must_use]
    pub fn message_id_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Overrides the random multipart boundary.
    #[must_use]
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Builds the message.
    ///
    /// # Errors
    ///
    /// Returns an error if the sender, recipient or Message-ID domain is
    /// missing, or a header cannot be written.
    pub fn build(self) -> Result<Message> {
        let from = self
            .from
            .ok_or_else(|| Error::MissingHeader("From".into()))?;
        let to = self.to.ok_or_else(|| Error::MissingHeader("To".into()))?;
        let domain = self
            .domain
            .ok_or_else(|| Error::MissingHeader("Message-ID".into()))?;

        let date = self
            .date
            .unwrap_or_else(|| Utc::now().fixed_offset())
            .format(DATE_FORMAT)
            .to_string();
        let id = message_id(&from.email, &to.email, &self.text, &date, &domain);

        let body = match self.html {
            Some(html) => Body::Alternative {
                boundary: self.boundary.unwrap_or_else(generate_boundary),
                text: self.text,
                html,
            },
            None => Body::Text(self.text),
        };
        let content_type = match &body {
            Body::Text(_) => ContentType::text_plain(),
            Body::Alternative { boundary, .. } => ContentType::multipart_alternative(boundary),
        };

        let mut headers = Headers::new();
        headers.add("From", from.to_string())?;
        headers.add("To", to.to_string())?;
        headers.add("Subject", encode_rfc2047(&self.subject))?;
        headers.add("Date", date)?;
        headers.add("Message-ID", id)?;
        headers.add("MIME-Version", "1.0")?;
        headers.add("Content-Type", content_type.to_string())?;
        if let Body::Text(text) = &body {
            headers.add(
                "Content-Transfer-Encoding",
                TransferEncoding::for_body(text).as_str(),
            )?;
        }

        Ok(Message { headers, body })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_date() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-03-05T09:07:03+00:00").unwrap()
    }

    fn builder() -> MessageBuilder {
        MessageBuilder::new()
            .from(Mailbox::new(Some("Example"), "noreply@example.com"))
            .to(Mailbox::new(Some("Jane Doe"), "jane@example.org"))
            .subject("Signup verification code")
            .text_body("Your email address verification code is 482913.")
            .date(fixed_date())
            .message_id_domain("example.com")
    }

    #[test]
    fn mailbox_display() {
        assert_eq!(Mailbox::address("a@b.c").to_string(), "a@b.c");
        assert_eq!(Mailbox::new(Some(""), "a@b.c").to_string(), "a@b.c");
        assert_eq!(
            Mailbox::new(Some("Doe, Jane"), "a@b.c").to_string(),
            "\"Doe, Jane\" <a@b.c>"
        );
    }

    #[test]
    fn plain_message_layout() {
        let message = builder().build().unwrap();
        let text = message.to_string();

        assert!(text.starts_with(
            "From: Example <noreply@example.com>\r\n\
             To: Jane Doe <jane@example.org>\r\n\
             Subject: Signup verification code\r\n\
             Date: Tue, 05 Mar 2024 09:07:03 +0000\r\n\
             Message-ID: <"
        ));
        assert!(text.contains("MIME-Version: 1.0\r\nContent-Type: text/plain; charset=UTF-8\r\n"));
        assert!(text.ends_with("\r\n\r\nYour email address verification code is 482913."));
        assert_eq!(message.body(), &Body::Text("Your email address verification code is 482913.".into()));
    }

    #[test]
    fn required_headers_appear_once() {
        let message = builder().html_body("<p>482913</p>").build().unwrap();
        for name in ["From", "To", "Subject", "Date", "Message-ID", "MIME-Version", "Content-Type"] {
            assert_eq!(message.headers().count(name), 1, "{name}");
        }
    }

    #[test]
    fn html_makes_multipart_alternative() {
        let message = builder()
            .html_body("<p>Code: 482913</p>")
            .boundary("boundary_test")
            .build()
            .unwrap();
        let text = message.to_string();

        assert_eq!(
            message.headers().get("content-type"),
            Some("multipart/alternative; boundary=\"boundary_test\"")
        );
        assert!(text.contains(
            "--boundary_test\r\nContent-Type: text/plain; charset=UTF-8\r\n\
             Content-Transfer-Encoding: 8bit\r\n\r\nYour email"
        ));
        assert!(text.contains("--boundary_test\r\nContent-Type: text/html; charset=UTF-8\r\n"));
        assert!(text.ends_with("<p>Code: 482913</p>\r\n--boundary_test--\r\n"));
    }

    #[test]
    fn empty_html_is_single_part() {
        let message = builder().html_body("").build().unwrap();
        assert!(matches!(message.body(), Body::Text(_)));
    }

    #[test]
    fn missing_recipient_is_an_error() {
        let err = MessageBuilder::new()
            .from(Mailbox::address("a@b.c"))
            .message_id_domain("b.c")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MissingHeader(h) if h == "To"));
    }

    #[test]
    fn body_line_endings_are_normalized() {
        let message = builder().text_body("Hello,\n\nline\r\nend").build().unwrap();
        assert!(message.to_string().ends_with("\r\n\r\nHello,\r\n\r\nline\r\nend"));
    }

    #[test]
    fn overlong_lines_switch_to_quoted_printable() {
        let html = format!("<table>{}</table>", "<td>482913</td>".repeat(100));
        let message = builder()
            .html_body(html.as_str())
            .boundary("boundary_test")
            .build()
            .unwrap();
        let text = message.to_string();

        assert!(text.contains(
            "--boundary_test\r\nContent-Type: text/plain; charset=UTF-8\r\n\
             Content-Transfer-Encoding: 8bit\r\n"
        ));
        assert!(text.contains(
            "--boundary_test\r\nContent-Type: text/html; charset=UTF-8\r\n\
             Content-Transfer-Encoding: quoted-printable\r\n\r\n<table><td>482913</td>"
        ));
        assert!(text.split("\r\n").all(|line| line.len() <= 998));

        let plain = builder().text_body("y".repeat(1200)).build().unwrap();
        assert_eq!(
            plain.headers().get("Content-Transfer-Encoding"),
            Some("quoted-printable")
        );
        let body = plain.to_string();
        let body = body.split("\r\n\r\n").nth(1).unwrap();
        assert!(body.split("\r\n").all(|line| line.len() <= 76));
        assert_eq!(body.replace("=\r\n", ""), "y".repeat(1200));
    }

    #[test]
    fn non_ascii_names_and_subject_are_encoded() {
        let message = builder()
            .to(Mailbox::new(Some("Zoë Ångström"), "zoe@example.org"))
            .subject("Vérification")
            .build()
            .unwrap();
        let text = message.to_string();

        assert!(text.split("\r\n\r\n").next().unwrap().is_ascii());
        assert!(message.headers().get("To").unwrap().ends_with(" <zoe@example.org>"));
        assert!(message.headers().get("Subject").unwrap().starts_with("=?UTF-8?B?"));
    }

    #[test]
    fn message_id_format() {
        let id = message_id("a@b.c", "d@e.f", "body", "date", "b.c");
        assert!(id.starts_with('<') && id.ends_with("@b.c>"));
        let hash = &id[1..id.len() - "@b.c>".len()];
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn boundaries_are_random() {
        let a = generate_boundary();
        assert!(a.starts_with("boundary_"));
        assert_eq!(a.len(), "boundary_".len() + 32);
        assert_ne!(a, generate_boundary());
    }

    proptest! {
        #[test]
        fn message_id_is_deterministic(
            sender in "[a-z]{1,8}@[a-z]{1,8}\\.com",
            recipient in "[a-z]{1,8}@[a-z]{1,8}\\.org",
            body in ".{0,64}",
            date in "[A-Za-z0-9 ,:+]{1,31}",
        ) {
            let id = message_id(&sender, &recipient, &body, &date, "example.com");
            prop_assert_eq!(&id, &message_id(&sender, &recipient, &body, &date, "example.com"));

            let changed = format!("{body}!");
            prop_assert_ne!(id, message_id(&sender, &recipient, &changed, &date, "example.com"));
        }
    }
}
