//! # authmail-mime
//!
//! Composition of outbound transactional messages.
//!
//! ## Features
//!
//! - **Headers**: ordered, with RFC 5322 folding and RFC 2047 encoded-words
//!   for non-ASCII display names and subjects
//! - **Bodies**: `text/plain`, or `multipart/alternative` when an HTML
//!   version is present; 8bit, or quoted-printable when a line would
//!   exceed the SMTP line limit
//! - **Message-ID**: derived from sender, recipient, body and date
//!
//! ## Quick Start
//!
//! ```ignore
//! use authmail_mime::{Mailbox, MessageBuilder};
//!
//! let message = MessageBuilder::new()
//!     .from(Mailbox::new(Some("Accounts"), "noreply@example.com"))
//!     .to(Mailbox::address("user@example.org"))
//!     .subject("Signup verification code")
//!     .text_body("Your email address verification code is 482913.")
//!     .html_body("<p>Your code is <b>482913</b>.</p>")
//!     .message_id_domain("example.com")
//!     .build()?;
//!
//! let wire = message.to_bytes();
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::{Headers, MAX_LINE_LENGTH, fold};
pub use message::{
    Body, Mailbox, Message, MessageBuilder, TransferEncoding, generate_boundary, message_id,
};
