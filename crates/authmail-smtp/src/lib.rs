//! # authmail-smtp
//!
//! Asynchronous SMTP submission client (RFC 5321) used by the authmail
//! delivery pipeline.
//!
//! ## Features
//!
//! - **Type-state sessions**: a session that failed mid-command is consumed
//!   by the failing call and can never be reused
//! - **STARTTLS in place**: the TCP connection is upgraded without
//!   reconnecting, then EHLO is repeated
//! - **IP family selection**: resolve and dial IPv4 only, IPv6 only, or any
//! - **Authentication**: PLAIN and LOGIN
//! - **Extensions**: 8BITMIME, SIZE
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use authmail_smtp::{Address, Client, IpFamily, connect, helo_name};
//!
//! #[tokio::main]
//! async fn main() -> authmail_smtp::Result<()> {
//!     let stream = connect("smtp.example.com", 587, IpFamily::V4, Duration::from_secs(60)).await?;
//!     let name = helo_name(&stream.local_addr()?);
//!
//!     let client = Client::from_stream(stream).await?;
//!     let client = client.ehlo(&name).await?;
//!     let client = client.starttls("smtp.example.com").await?;
//!     let client = client.auth_plain("user@example.com", "password").await?;
//!
//!     let message = b"Subject: Test\r\n\r\nHello, World!\r\n";
//!     let client = client
//!         .mail_from(Address::new("sender@example.com")?, Some(message.len()))
//!         .await?;
//!     let client = client.rcpt_to(Address::new("recipient@example.com")?).await?;
//!     let client = client.data().await?;
//!     let client = client.send_message(message).await?;
//!
//!     client.quit().await
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Greeted ── auth_*() / into_ready() ──→ Ready ──→ MailTransaction
//!                                          ↑              │
//!                                          │          rcpt_to()
//!                                          │              ↓
//!                                   send_message() ← Data ← RecipientAdded
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Client, Data, Greeted, IpFamily, MailTransaction, Ready, RecipientAdded, ServerInfo,
    SmtpConnection, SmtpStream, connect, helo_name,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
