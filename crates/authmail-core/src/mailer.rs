//! Event-level mail API.

use crate::broadcast::Broadcaster;
use crate::config::SenderConfig;
use crate::delivery::Pipeline;
use crate::error::{DeliveryError, Result};
use crate::event::{EventKind, TransactionalEvent};
use crate::templates::{TemplateTable, Variant};
use authmail_mime::{Mailbox, MessageBuilder};
use authmail_smtp::Address;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Composes transactional mail and hands it to the delivery pipeline.
///
/// Cheap to share behind an `Arc`; every method takes `&self` and may be
/// called concurrently.
#[derive(Debug)]
pub struct Mailer {
    config: Arc<SenderConfig>,
    templates: Arc<TemplateTable>,
    pipeline: Pipeline,
    broadcaster: Option<Arc<Broadcaster>>,
}

impl Mailer {
    /// Creates a mailer.
    #[must_use]
    pub const fn new(
        config: Arc<SenderConfig>,
        templates: Arc<TemplateTable>,
        pipeline: Pipeline,
        broadcaster: Option<Arc<Broadcaster>>,
    ) -> Self {
        Self {
            config,
            templates,
            pipeline,
            broadcaster,
        }
    }

    /// Sends the signup address verification code.
    ///
    /// # Errors
    ///
    /// See [`Mailer::send_event`].
    pub async fn send_signup_verification(&self, address: &str, code: &str) -> Result<()> {
        self.send_event(&TransactionalEvent::new(EventKind::SignupVerification, address).code(code))
            .await
    }

    /// Sends the verification code for an address change.
    ///
    /// # Errors
    ///
    /// See [`Mailer::send_event`].
    pub async fn send_email_update_verification(
        &self,
        address: &str,
        name: &str,
        code: &str,
    ) -> Result<()> {
        self.send_event(
            &TransactionalEvent::new(EventKind::EmailUpdateVerification, address)
                .display_name(name)
                .code(code),
        )
        .await
    }

    /// Sends a temporary password after a reset request.
    ///
    /// # Errors
    ///
    /// See [`Mailer::send_event`].
    pub async fn send_password_reset_temporary_password(
        &self,
        address: &str,
        name: &str,
        temporary_password: &str,
    ) -> Result<()> {
        self.send_event(
            &TransactionalEvent::new(EventKind::PasswordReset, address)
                .display_name(name)
                .code(temporary_password),
        )
        .await
    }

    /// Notifies the user of a sign-in.
    ///
    /// # Errors
    ///
    /// See [`Mailer::send_event`].
    pub async fn send_signin_notification(
        &self,
        address: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.send_event(
            &TransactionalEvent::new(EventKind::SigninNotification, address)
                .display_name(name)
                .timestamp(at),
        )
        .await
    }

    /// Notifies the user that their password changed.
    ///
    /// # Errors
    ///
    /// See [`Mailer::send_event`].
    pub async fn send_password_updated_notification(
        &self,
        address: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.send_event(
            &TransactionalEvent::new(EventKind::PasswordUpdatedNotification, address)
                .display_name(name)
                .timestamp(at),
        )
        .await
    }

    /// Notifies the user that their address changed.
    ///
    /// # Errors
    ///
    /// See [`Mailer::send_event`].
    pub async fn send_email_updated_notification(
        &self,
        address: &str,
        name: &str,
        new_address: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.send_event(
            &TransactionalEvent::new(EventKind::EmailUpdatedNotification, address)
                .display_name(name)
                .new_address(new_address)
                .timestamp(at),
        )
        .await
    }

    /// Publishes the event's code, renders its body and delivers it.
    ///
    /// Each body variant comes from its template when one exists and renders
    /// to something. The text body otherwise falls back to the built-in
    /// message; the HTML body is simply left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is incomplete, a template fails to
    /// render, or delivery fails.
    pub async fn send_event(&self, event: &TransactionalEvent) -> Result<()> {
        event.validate()?;

        if event.kind.carries_code()
            && let Some(broadcaster) = &self.broadcaster
        {
            broadcaster.publish(
                event.kind,
                &event.recipient_address,
                event.code.as_deref().unwrap_or_default(),
            );
        }

        if !self.config.smtp_enabled {
            tracing::info!(kind = %event.kind, to = %event.recipient_address, "SMTP disabled, mail suppressed");
            return Ok(());
        }

        let now = Utc::now();
        let context = event.template_context(now);
        let name = event.kind.name();

        let text = self
            .templates
            .render(name, Variant::Text, &context)?
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| event.fallback_text(now));
        let html = self
            .templates
            .render(name, Variant::Html, &context)?
            .filter(|html| !html.is_empty());

        self.send(
            event.recipient_name(),
            &event.recipient_address,
            event.kind.subject(),
            &text,
            html.as_deref(),
        )
        .await?;

        tracing::info!(kind = %event.kind, to = %event.recipient_address, "Mail sent");
        Ok(())
    }

    /// Composes and delivers one message to one recipient.
    ///
    /// Composition happens before the session is locked. With SMTP disabled
    /// the addresses are still checked but nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if an address is invalid, the message cannot be
    /// composed, or delivery fails after all retries.
    pub async fn send(
        &self,
        recipient_name: Option<&str>,
        recipient_address: &str,
        subject: &str,
        text: &str,
        html: Option<&str>,
    ) -> std::result::Result<(), DeliveryError> {
        let from = Address::new(self.config.sender_email.as_str())
            .map_err(DeliveryError::InvalidAddress)?;
        let to = Address::new(recipient_address).map_err(DeliveryError::InvalidAddress)?;

        if !self.config.smtp_enabled {
            tracing::info!(to = %to, "SMTP disabled, mail suppressed");
            return Ok(());
        }

        let mut builder = MessageBuilder::new()
            .from(Mailbox::new(
                self.config.sender_name.as_deref(),
                from.as_str(),
            ))
            .to(Mailbox::new(recipient_name, to.as_str()))
            .subject(subject)
            .text_body(text)
            .message_id_domain(self.config.domain.as_str());
        if let Some(html) = html {
            builder = builder.html_body(html);
        }
        let message = builder.build()?;

        self.pipeline.send(&from, &to, &message.to_bytes()).await
    }
}
