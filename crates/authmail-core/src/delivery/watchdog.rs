//! Keep-alive watchdog.

use super::{SessionSlot, open_session, probe};
use crate::config::SenderConfig;
use crate::error::FatalError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Background task probing the session every interval and replacing it
/// when the probe fails.
#[derive(Debug)]
pub struct Watchdog {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Watchdog {
    /// Spawns the watchdog.
    ///
    /// If a dead session cannot be replaced the error is sent on `fatal`
    /// and the task ends.
    #[must_use]
    pub fn spawn(
        slot: SessionSlot,
        config: Arc<SenderConfig>,
        interval: Duration,
        fatal: mpsc::Sender<FatalError>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(slot, config, interval, stop_rx, fatal));
        Self { stop, task }
    }

    /// Stops the watchdog and waits for it to end.
    ///
    /// A probe or reconnect in progress completes first.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Keep-alive task panicked");
        }
    }
}

async fn run(
    slot: SessionSlot,
    config: Arc<SenderConfig>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    fatal: mpsc::Sender<FatalError>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                if let Err(e) = keep_alive(&slot, &config).await {
                    tracing::error!(error = %e, "Keep-alive failed");
                    let _ = fatal.send(e).await;
                    return;
                }
            }
        }
    }

    tracing::info!("Keep-alive stopped");
}

/// One probe, plus a reconnect under the same lock if it fails.
async fn keep_alive(slot: &SessionSlot, config: &SenderConfig) -> Result<(), FatalError> {
    match probe(slot.lock().await).await {
        Ok(()) => {
            tracing::debug!("Keep-alive probe succeeded");
            Ok(())
        }
        Err((mut guard, e)) => {
            tracing::warn!(error = %e, "Keep-alive probe failed, reconnecting");
            let session = open_session(config)
                .await
                .map_err(FatalError::WatchdogRecovery)?;
            *guard = Some(session);
            tracing::info!("Session re-established by keep-alive");
            Ok(())
        }
    }
}
