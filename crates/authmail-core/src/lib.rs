//! # authmail-core
//!
//! Transactional email delivery for authentication flows.
//!
//! One SMTP session is opened at startup and shared by every send. Sends
//! are serialized over it and retried on a fresh session when the current
//! one fails. A keep-alive watchdog probes the session with NOOP on an
//! interval and replaces it when the server has dropped it.
//!
//! Verification codes and temporary passwords are also published to a Unix
//! socket, so test harnesses can read them without a mailbox.
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use authmail_core::{MailService, SenderConfig};
//!
//! let config = SenderConfig::builder()
//!     .sender_email("noreply@example.com")
//!     .server("smtp.example.com", 587)
//!     .domain("example.com")
//!     .build()?;
//!
//! let mut service = MailService::new(config).await?;
//! service.start(Duration::from_secs(300)).await?;
//!
//! service
//!     .mailer()
//!     .send_signup_verification("user@example.org", "482913")
//!     .await?;
//!
//! service.close().await;
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod broadcast;
pub mod config;
pub mod delivery;
mod error;
pub mod event;
mod mailer;
mod service;
pub mod templates;

pub use authmail_smtp::IpFamily;
pub use broadcast::Broadcaster;
pub use config::{Credentials, EnvSource, Security, SenderConfig, SenderConfigBuilder};
pub use error::{
    ConfigError, ConnectError, ConnectStage, DeliveryError, Error, FatalError, Result,
    TemplateError,
};
pub use event::{EventKind, TransactionalEvent};
pub use mailer::Mailer;
pub use service::MailService;
pub use templates::{TemplateContext, TemplateTable, Variant};
