//! SMTP connection management with type-state pattern.

mod client;
mod stream;

pub use client::{Client, Data, Greeted, MailTransaction, Ready, RecipientAdded, SmtpConnection};
pub use stream::{IpFamily, SmtpStream, connect};

use crate::types::{AuthMechanism, Extension};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

/// Server capabilities from EHLO response.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Checks if 8-bit message bodies are accepted.
    #[must_use]
    pub fn supports_8bitmime(&self) -> bool {
        self.supports(&Extension::EightBitMime)
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => Some(*size),
            _ => None,
        })?
    }

    /// Returns true if the server advertised the SIZE extension at all.
    #[must_use]
    pub fn advertises_size(&self) -> bool {
        self.extensions
            .iter()
            .any(|ext| matches!(ext, Extension::Size(_)))
    }

    /// Returns supported authentication mechanisms.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Auth(mechanisms) => Some(mechanisms.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Replaces the extension set from the lines of an EHLO reply.
    ///
    /// The first line is the server greeting and carries no extension.
    pub(crate) fn update_extensions(&mut self, lines: &[String]) {
        self.extensions = lines.iter().skip(1).map(|l| Extension::parse(l)).collect();
    }
}

/// Formats a local socket address as an EHLO domain argument.
///
/// RFC 5321 requires address literals to be bracketed, with IPv6 literals
/// tagged `IPv6:`.
#[must_use]
pub fn helo_name(local: &SocketAddr) -> String {
    match local.ip() {
        IpAddr::V4(ip) => format!("[{ip}]"),
        IpAddr::V6(ip) => format!("[IPv6:{ip}]"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn server_info(lines: &[&str]) -> ServerInfo {
        let mut info = ServerInfo::default();
        let lines: Vec<String> = lines.iter().map(|l| (*l).to_string()).collect();
        info.update_extensions(&lines);
        info
    }

    #[test]
    fn extensions_skip_greeting_line() {
        let info = server_info(&["smtp.example.com greets you", "STARTTLS", "8BITMIME"]);
        assert_eq!(info.extensions.len(), 2);
        assert!(info.supports_starttls());
        assert!(info.supports_8bitmime());
    }

    #[test]
    fn size_limit() {
        let info = server_info(&["hello", "SIZE 1024"]);
        assert!(info.advertises_size());
        assert_eq!(info.max_message_size(), Some(1024));

        let info = server_info(&["hello", "SIZE"]);
        assert!(info.advertises_size());
        assert_eq!(info.max_message_size(), None);
    }

    #[test]
    fn auth_mechanisms_default_empty() {
        assert!(server_info(&["hello"]).auth_mechanisms().is_empty());
        assert_eq!(
            server_info(&["hello", "AUTH LOGIN PLAIN"]).auth_mechanisms(),
            vec![AuthMechanism::Login, AuthMechanism::Plain]
        );
    }

    #[test]
    fn helo_name_uses_address_literals() {
        let v4: SocketAddr = "192.0.2.10:41000".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::1]:41000".parse().unwrap();
        assert_eq!(helo_name(&v4), "[192.0.2.10]");
        assert_eq!(helo_name(&v6), "[IPv6:2001:db8::1]");
    }
}
