//! Serialized delivery over the shared session with bounded reconnects.

use super::{Session, SessionSlot, open_session};
use crate::config::SenderConfig;
use crate::error::DeliveryError;
use authmail_smtp::Address;
use std::sync::Arc;

/// Total attempts per message: one initial attempt and two after
/// reconnecting.
pub const MAX_ATTEMPTS: u32 = 3;

/// Sends composed messages over the shared session.
#[derive(Debug, Clone)]
pub struct Pipeline {
    slot: SessionSlot,
    config: Arc<SenderConfig>,
}

impl Pipeline {
    /// Creates a pipeline over `slot`.
    #[must_use]
    pub const fn new(slot: SessionSlot, config: Arc<SenderConfig>) -> Self {
        Self { slot, config }
    }

    /// Transmits `message` from `from` to `to`.
    ///
    /// Holds exclusive access to the session for the whole call, including
    /// reconnects. A missing session is opened first. After a failed
    /// attempt the session is discarded and a new one opened before the
    /// next attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Connect`] as soon as a session cannot be
    /// opened, or [`DeliveryError::Exhausted`] with the last error once
    /// [`MAX_ATTEMPTS`] attempts have failed.
    pub async fn send(&self, from: &Address, to: &Address, message: &[u8]) -> Result<(), DeliveryError> {
        let mut guard = self.slot.lock().await;
        let mut attempt = 1;

        loop {
            let session = match guard.take() {
                Some(session) => session,
                None => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Reconnecting before retry");
                    }
                    open_session(&self.config).await?
                }
            };

            match transmit(session, from, to, message).await {
                Ok(session) => {
                    *guard = Some(session);
                    tracing::debug!(%to, attempt, "Message delivered");
                    return Ok(());
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(%to, attempt, error = %e, permanent = e.is_permanent(), "Delivery attempt failed");
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(%to, attempt, error = %e, "Delivery attempt failed, giving up");
                    return Err(DeliveryError::Exhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}

/// Runs one mail transaction. Any failure consumes the session.
async fn transmit(
    session: Session,
    from: &Address,
    to: &Address,
    message: &[u8],
) -> authmail_smtp::Result<Session> {
    session
        .mail_from(from.clone(), Some(message.len()))
        .await?
        .rcpt_to(to.clone())
        .await?
        .data()
        .await?
        .send_message(message)
        .await
}
