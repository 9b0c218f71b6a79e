//! The shared session handle and the keep-alive probe.

use authmail_smtp::{Client, Ready};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// An authenticated session able to start mail transactions.
pub type Session = Client<Ready>;

/// Exclusive access to the current session, if any.
pub type SessionGuard = OwnedMutexGuard<Option<Session>>;

/// Holder of the single current session.
///
/// The pipeline and the watchdog are the only users, and both hold the
/// guard for the whole of a send, probe or reconnect. tokio's mutex
/// queues waiters in order, so neither side can starve the other.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    inner: Arc<Mutex<Option<Session>>>,
}

impl SessionSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to the session.
    pub async fn lock(&self) -> SessionGuard {
        Arc::clone(&self.inner).lock_owned().await
    }
}

/// Why a keep-alive probe failed.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// There was no session to probe.
    #[error("no session")]
    NoSession,
    /// The NOOP exchange failed.
    #[error(transparent)]
    Failed(#[from] authmail_smtp::Error),
}

/// Sends NOOP over the current session.
///
/// On success the guard is dropped here, releasing the lock. On failure the
/// dead session has already been discarded and the guard is handed back
/// still locked, so the caller can install a replacement before anyone
/// else sees the empty slot.
///
/// # Errors
///
/// Returns the still-held guard with the reason the probe failed.
pub async fn probe(mut guard: SessionGuard) -> Result<(), (SessionGuard, ProbeError)> {
    let Some(session) = guard.as_mut() else {
        return Err((guard, ProbeError::NoSession));
    };

    match session.noop().await {
        Ok(()) => Ok(()),
        Err(e) => {
            guard.take();
            Err((guard, ProbeError::Failed(e)))
        }
    }
}
