//! Transactional events and their built-in messages.

use crate::error::{Error, Result};
use crate::templates::TemplateContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Layout of times shown to users, always in UTC.
pub const TIME_FORMAT: &str = "%B %-d, %Y %H:%M:%S";

/// Kind of transactional email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Code confirming a new account's address.
    SignupVerification,
    /// Code confirming a requested address change.
    EmailUpdateVerification,
    /// Temporary password after a reset request.
    PasswordReset,
    /// Notice of a sign-in.
    SigninNotification,
    /// Notice of a password change.
    PasswordUpdatedNotification,
    /// Notice of an address change.
    EmailUpdatedNotification,
}

impl EventKind {
    /// All event kinds.
    pub const ALL: [Self; 6] = [
        Self::SignupVerification,
        Self::EmailUpdateVerification,
        Self::PasswordReset,
        Self::SigninNotification,
        Self::PasswordUpdatedNotification,
        Self::EmailUpdatedNotification,
    ];

    /// Name used for template files and broadcast `type`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SignupVerification => "signup_verification",
            Self::EmailUpdateVerification => "email_update_verification",
            Self::PasswordReset => "password_reset",
            Self::SigninNotification => "signin_notification",
            Self::PasswordUpdatedNotification => "password_updated_notification",
            Self::EmailUpdatedNotification => "email_updated_notification",
        }
    }

    /// Subject line.
    #[must_use]
    pub const fn subject(self) -> &'static str {
        match self {
            Self::SignupVerification => "Signup verification code",
            Self::EmailUpdateVerification => "Email update verification code",
            Self::PasswordReset => "Password reset temporary password",
            Self::SigninNotification => "Sign-in detected",
            Self::PasswordUpdatedNotification => "Password updated",
            Self::EmailUpdatedNotification => "Email updated",
        }
    }

    /// Whether the event carries a one-time code that is broadcast.
    #[must_use]
    pub const fn carries_code(self) -> bool {
        matches!(
            self,
            Self::SignupVerification | Self::EmailUpdateVerification | Self::PasswordReset
        )
    }

    /// Whether the event reports a time.
    #[must_use]
    pub const fn carries_time(self) -> bool {
        matches!(
            self,
            Self::SigninNotification
                | Self::PasswordUpdatedNotification
                | Self::EmailUpdatedNotification
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Request to email one recipient about one event.
///
/// This is also the newline-delimited JSON record read by the service
/// binary, e.g.
/// `{"kind":"signup_verification","recipientAddress":"a@b.c","code":"482913"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionalEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Recipient address.
    pub recipient_address: String,
    /// Recipient display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Verification code or temporary password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// New address for address change notices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_address: Option<String>,
    /// When the notified action happened. Defaults to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TransactionalEvent {
    /// Creates an event with only a recipient.
    #[must_use]
    pub fn new(kind: EventKind, recipient_address: impl Into<String>) -> Self {
        Self {
            kind,
            recipient_address: recipient_address.into(),
            display_name: None,
            code: None,
            new_address: None,
            timestamp: None,
        }
    }

    /// Sets the display name. An empty name means none.
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into()).filter(|n: &String| !n.is_empty());
        self
    }

    /// Sets the code.
    #[must_use]
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Sets the new address.
    #[must_use]
    pub fn new_address(mut self, address: impl Into<String>) -> Self {
        self.new_address = Some(address.into());
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub const fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    /// Checks that the fields the kind needs are present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] naming the missing field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason| Error::InvalidEvent {
            kind: self.kind.name(),
            reason,
        };

        if self.recipient_address.is_empty() {
            return Err(invalid("recipientAddress is empty"));
        }
        if self.kind.carries_code() && self.code.as_deref().is_none_or(str::is_empty) {
            return Err(invalid("code is required"));
        }
        if self.kind == EventKind::EmailUpdatedNotification
            && self.new_address.as_deref().is_none_or(str::is_empty)
        {
            return Err(invalid("newAddress is required"));
        }
        Ok(())
    }

    /// `"Dear <name>,"`, or `"Hello,"` without a display name.
    #[must_use]
    pub fn greeting(&self) -> String {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .map_or_else(|| "Hello,".to_string(), |name| format!("Dear {name},"))
    }

    /// The event time formatted for display.
    #[must_use]
    pub fn formatted_time(&self, now: DateTime<Utc>) -> String {
        self.timestamp.unwrap_or(now).format(TIME_FORMAT).to_string()
    }

    /// Values exposed to templates.
    #[must_use]
    pub fn template_context(&self, now: DateTime<Utc>) -> TemplateContext {
        let mut context = TemplateContext::new();
        let mut insert = |key: &str, value: String| {
            context.insert(key.to_string(), Value::String(value));
        };

        insert("EmailAddress", self.recipient_address.clone());
        if self.kind != EventKind::SignupVerification {
            insert("DisplayName", self.display_name.clone().unwrap_or_default());
            insert("Greeting", self.greeting());
        }
        let code = self.code.clone().unwrap_or_default();
        match self.kind {
            EventKind::SignupVerification | EventKind::EmailUpdateVerification => {
                insert("VerificationCode", code);
            }
            EventKind::PasswordReset => insert("TemporaryPassword", code),
            EventKind::EmailUpdatedNotification => {
                insert("NewEmailAddress", self.new_address.clone().unwrap_or_default());
            }
            EventKind::SigninNotification | EventKind::PasswordUpdatedNotification => {}
        }
        if self.kind.carries_time() {
            insert("Time", self.formatted_time(now));
        }

        context
    }

    /// Built-in plain text body used when no template exists.
    #[must_use]
    pub fn fallback_text(&self, now: DateTime<Utc>) -> String {
        let code = self.code.as_deref().unwrap_or_default();
        let greeting = self.greeting();
        let time = self.formatted_time(now);

        match self.kind {
            EventKind::SignupVerification => {
                format!("Your email address verification code is {code}.")
            }
            EventKind::EmailUpdateVerification => format!(
                "{greeting}\n\nYou have made a request to update your email. Your verification code is {code}."
            ),
            EventKind::PasswordReset => {
                format!("{greeting}\n\nYour password reset temporary password is {code}.")
            }
            EventKind::SigninNotification => {
                format!("{greeting}\n\nWe detected a sign-in to your account at {time} (UTC).")
            }
            EventKind::PasswordUpdatedNotification => {
                format!("{greeting}\n\nYour account password was updated at {time} (UTC).")
            }
            EventKind::EmailUpdatedNotification => format!(
                "{greeting}\n\nYour account email address was updated to {} at {time} (UTC).",
                self.new_address.as_deref().unwrap_or_default()
            ),
        }
    }

    /// Display name used in `To`. Signup mail is addressed without one.
    #[must_use]
    pub fn recipient_name(&self) -> Option<&str> {
        match self.kind {
            EventKind::SignupVerification => None,
            _ => self.display_name.as_deref(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap()
    }

    #[test]
    fn names_match_serde() {
        for kind in EventKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
    }

    #[test]
    fn time_layout() {
        let event = TransactionalEvent::new(EventKind::SigninNotification, "a@b.c").timestamp(at());
        assert_eq!(event.formatted_time(Utc::now()), "January 2, 2006 15:04:05");
    }

    #[test]
    fn greeting() {
        let event = TransactionalEvent::new(EventKind::PasswordReset, "a@b.c");
        assert_eq!(event.greeting(), "Hello,");
        assert_eq!(event.display_name("Jane").greeting(), "Dear Jane,");
    }

    #[test]
    fn fallback_texts() {
        let signup = TransactionalEvent::new(EventKind::SignupVerification, "a@b.c").code("482913");
        assert_eq!(
            signup.fallback_text(at()),
            "Your email address verification code is 482913."
        );

        let updated = TransactionalEvent::new(EventKind::EmailUpdatedNotification, "a@b.c")
            .display_name("Jane")
            .new_address("new@b.c");
        assert_eq!(
            updated.fallback_text(at()),
            "Dear Jane,\n\nYour account email address was updated to new@b.c at January 2, 2006 15:04:05 (UTC)."
        );

        let reset = TransactionalEvent::new(EventKind::PasswordReset, "a@b.c").code("tmp-pass");
        assert_eq!(
            reset.fallback_text(at()),
            "Hello,\n\nYour password reset temporary password is tmp-pass."
        );
    }

    #[test]
    fn template_context_keys() {
        let reset = TransactionalEvent::new(EventKind::PasswordReset, "a@b.c")
            .display_name("Jane")
            .code("tmp");
        let context = reset.template_context(at());
        assert_eq!(context["TemporaryPassword"], "tmp");
        assert_eq!(context["Greeting"], "Dear Jane,");
        assert!(!context.contains_key("VerificationCode"));
        assert!(!context.contains_key("Time"));

        let signin = TransactionalEvent::new(EventKind::SigninNotification, "a@b.c").timestamp(at());
        assert_eq!(signin.template_context(at())["Time"], "January 2, 2006 15:04:05");
    }

    #[test]
    fn validation() {
        assert!(TransactionalEvent::new(EventKind::SignupVerification, "a@b.c").validate().is_err());
        assert!(
            TransactionalEvent::new(EventKind::EmailUpdatedNotification, "a@b.c")
                .validate()
                .is_err()
        );
        assert!(TransactionalEvent::new(EventKind::SigninNotification, "").validate().is_err());
        assert!(TransactionalEvent::new(EventKind::SigninNotification, "a@b.c").validate().is_ok());
    }

    #[test]
    fn parses_json_record() {
        let event: TransactionalEvent = serde_json::from_str(
            r#"{"kind":"email_update_verification","recipientAddress":"a@b.c","displayName":"Jane","code":"1234","timestamp":"2006-01-02T15:04:05Z"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::EmailUpdateVerification);
        assert_eq!(event.code.as_deref(), Some("1234"));
        assert_eq!(event.timestamp, Some(at()));
        assert_eq!(event.recipient_name(), Some("Jane"));
    }
}
