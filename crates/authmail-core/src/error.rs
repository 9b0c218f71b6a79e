//! Error types for the delivery subsystem.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid or incomplete sender configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is missing or empty.
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// A field has a value that cannot be used.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field or environment key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The environment file exists but could not be read or parsed.
    #[error("failed to read {path}: {source}")]
    EnvFile {
        /// Path of the file.
        path: PathBuf,
        /// Underlying read or parse error.
        source: dotenv::Error,
    },
}

/// Template loading or rendering failure.
///
/// A template that does not exist is never an error; see
/// [`crate::TemplateTable::render`].
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template directory or a template file could not be read.
    #[error("failed to read template {path}: {source}")]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A template is malformed.
    #[error("template {name} is malformed: {reason}")]
    Parse {
        /// Template name.
        name: String,
        /// Parser message.
        reason: String,
    },

    /// A template could not be executed against its data.
    #[error("failed to render template {name}: {reason}")]
    Render {
        /// Template name.
        name: String,
        /// Renderer message.
        reason: String,
    },
}

/// Step of session establishment that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    /// Resolving and dialing the server.
    Dial,
    /// Reading the server greeting.
    Greeting,
    /// EHLO exchange.
    Ehlo,
    /// STARTTLS upgrade.
    StartTls,
    /// SASL authentication.
    Authenticate,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dial => "connect",
            Self::Greeting => "read greeting",
            Self::Ehlo => "send EHLO",
            Self::StartTls => "start TLS",
            Self::Authenticate => "authenticate",
        })
    }
}

/// Failure to establish a session.
#[derive(Debug, Error)]
#[error("failed to {stage}: {source}")]
pub struct ConnectError {
    /// Where establishment stopped.
    pub stage: ConnectStage,
    /// Protocol or transport error.
    #[source]
    pub source: authmail_smtp::Error,
}

impl ConnectError {
    pub(crate) const fn new(stage: ConnectStage, source: authmail_smtp::Error) -> Self {
        Self { stage, source }
    }
}

/// Outcome of a failed send, reported once all internal retries are done.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No session could be established. Not retried.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Every attempt failed; carries the last failure.
    #[error("delivery failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last observed error.
        #[source]
        source: authmail_smtp::Error,
    },

    /// Sender or recipient address is unusable.
    #[error("invalid address: {0}")]
    InvalidAddress(#[source] authmail_smtp::Error),

    /// The message could not be composed.
    #[error("failed to compose message: {0}")]
    Compose(#[from] authmail_mime::Error),
}

/// Errors that leave the process without a working delivery path.
#[derive(Debug, Error)]
pub enum FatalError {
    /// The keep-alive watchdog could not replace a dead session.
    #[error("keep-alive could not re-establish the SMTP session: {0}")]
    WatchdogRecovery(#[source] ConnectError),
}

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Template error.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Delivery error.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// Fatal background failure.
    #[error(transparent)]
    Fatal(#[from] FatalError),

    /// A transactional event is missing data its kind requires.
    #[error("invalid {kind} event: {reason}")]
    InvalidEvent {
        /// Event kind name.
        kind: &'static str,
        /// What is missing.
        reason: &'static str,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
