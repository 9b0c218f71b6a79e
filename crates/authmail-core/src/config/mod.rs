//! Sender configuration.

mod env;

pub use env::{EnvSource, read_env_file};

use crate::error::ConfigError;
use authmail_smtp::IpFamily;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default keep-alive probe interval.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default read/write timeout for SMTP I/O.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport security for the SMTP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Upgrade the connection with STARTTLS before authenticating.
    #[default]
    StartTls,
    /// Plaintext session. **Only for controlled testing.**
    InsecureDangerous,
}

/// SMTP credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Process-lifetime sender configuration. Never mutated after startup.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Display name used in `From`.
    pub sender_name: Option<String>,
    /// Envelope and `From` address.
    pub sender_email: String,
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Address family used to reach the server.
    pub ip_family: IpFamily,
    /// Transport security.
    pub security: Security,
    /// Domain qualifying generated Message-IDs.
    pub domain: String,
    /// Optional authentication.
    pub credentials: Option<Credentials>,
    /// Whether the keep-alive watchdog runs.
    pub keep_alive: bool,
    /// Keep-alive probe interval.
    pub keep_alive_interval: Duration,
    /// Timeout for each SMTP read or write.
    pub io_timeout: Duration,
    /// Directory holding `<event>.txt` / `<event>.html` overrides.
    pub templates_dir: Option<PathBuf>,
    /// Unix socket path for the token broadcaster.
    pub token_socket: Option<PathBuf>,
    /// When false, mail is never sent; tokens are still broadcast.
    pub smtp_enabled: bool,
}

impl SenderConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> SenderConfigBuilder {
        SenderConfigBuilder::new()
    }

    /// Checks that every field needed to send mail is present.
    ///
    /// # Errors
    ///
    /// Returns the first missing field. Nothing is required when SMTP is
    /// disabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.smtp_enabled {
            return Ok(());
        }

        if self.sender_email.is_empty() {
            return Err(ConfigError::Missing("sender email"));
        }
        if self.host.is_empty() {
            return Err(ConfigError::Missing("server host"));
        }
        if self.port == 0 {
            return Err(ConfigError::Missing("server port"));
        }
        if self.domain.is_empty() {
            return Err(ConfigError::Missing("domain"));
        }
        if self.keep_alive && self.keep_alive_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "keep-alive interval",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(())
    }
}

/// Builder for [`SenderConfig`].
#[derive(Debug, Clone)]
pub struct SenderConfigBuilder {
    sender_name: Option<String>,
    sender_email: String,
    host: String,
    port: u16,
    ip_family: IpFamily,
    security: Security,
    domain: String,
    credentials: Option<Credentials>,
    keep_alive: bool,
    keep_alive_interval: Duration,
    io_timeout: Duration,
    templates_dir: Option<PathBuf>,
    token_socket: Option<PathBuf>,
    smtp_enabled: bool,
}

impl Default for SenderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderConfigBuilder {
    /// Creates a builder with IPv4, STARTTLS and keep-alive enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sender_name: None,
            sender_email: String::new(),
            host: String::new(),
            port: 0,
            ip_family: IpFamily::V4,
            security: Security::StartTls,
            domain: String::new(),
            credentials: None,
            keep_alive: true,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            io_timeout: DEFAULT_IO_TIMEOUT,
            templates_dir: None,
            token_socket: None,
            smtp_enabled: true,
        }
    }

    /// Sets the sender display name. An empty name means none.
    #[must_use]
    pub fn sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into()).filter(|n: &String| !n.is_empty());
        self
    }

    /// Sets the sender address.
    #[must_use]
    pub fn sender_email(mut self, email: impl Into<String>) -> Self {
        self.sender_email = email.into();
        self
    }

    /// Sets the server host and port.
    #[must_use]
    pub fn server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Sets the IP family.
    #[must_use]
    pub const fn ip_family(mut self, family: IpFamily) -> Self {
        self.ip_family = family;
        self
    }

    /// Sets the transport security.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the Message-ID domain.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Enables or disables the keep-alive watchdog.
    #[must_use]
    pub const fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Sets the keep-alive probe interval.
    #[must_use]
    pub const fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Sets the template directory.
    #[must_use]
    pub fn templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = Some(dir.into());
        self
    }

    /// Sets the token broadcaster socket path.
    #[must_use]
    pub fn token_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_socket = Some(path.into());
        self
    }

    /// Enables or disables sending mail.
    #[must_use]
    pub const fn smtp_enabled(mut self, enabled: bool) -> Self {
        self.smtp_enabled = enabled;
        self
    }

    /// Applies `FAROE_*` settings from an environment source.
    ///
    /// Keys that are absent leave the builder unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the port or IP version cannot be parsed.
    pub fn apply_env(mut self, env: &EnvSource) -> Result<Self, ConfigError> {
        if let Some(name) = env.get("FAROE_SMTP_SENDER_NAME") {
            self = self.sender_name(name);
        }
        if let Some(email) = env.get("FAROE_SMTP_SENDER_EMAIL") {
            self.sender_email = email;
        }
        if let Some(host) = env.get("FAROE_SMTP_SERVER_HOST") {
            self.host = host;
        }
        if let Some(port) = env.get("FAROE_SMTP_SERVER_PORT") {
            self.port = port.parse().map_err(|e| ConfigError::Invalid {
                field: "FAROE_SMTP_SERVER_PORT",
                reason: format!("{port:?}: {e}"),
            })?;
        }
        if let Some(domain) = env.get("FAROE_SMTP_DOMAIN") {
            self.domain = domain;
        }
        if let Some(version) = env.get("FAROE_SMTP_IP_VERSION") {
            self.ip_family = match version.to_ascii_lowercase().as_str() {
                "4" | "ipv4" => IpFamily::V4,
                "6" | "ipv6" => IpFamily::V6,
                "any" | "ip" => IpFamily::Any,
                _ => {
                    return Err(ConfigError::Invalid {
                        field: "FAROE_SMTP_IP_VERSION",
                        reason: format!("{version:?} is not one of 4, 6, any"),
                    });
                }
            };
        }
        if let Some(username) = env.get("FAROE_SMTP_USERNAME") {
            let password = env.get("FAROE_SMTP_PASSWORD").unwrap_or_default();
            self.credentials = Some(Credentials::new(username, password));
        }
        if let Some(path) = env.get("FAROE_TOKEN_SOCKET_PATH") {
            self.token_socket = Some(PathBuf::from(path));
        }

        Ok(self)
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a field required for sending is missing.
    pub fn build(self) -> Result<SenderConfig, ConfigError> {
        let config = SenderConfig {
            sender_name: self.sender_name,
            sender_email: self.sender_email,
            host: self.host,
            port: self.port,
            ip_family: self.ip_family,
            security: self.security,
            domain: self.domain,
            credentials: self.credentials,
            keep_alive: self.keep_alive,
            keep_alive_interval: self.keep_alive_interval,
            io_timeout: self.io_timeout,
            templates_dir: self.templates_dir,
            token_socket: self.token_socket,
            smtp_enabled: self.smtp_enabled,
        };
        config.validate()?;
        Ok(config)
    }
}
