//! Newline-delimited JSON event intake.

use authmail_core::{Mailer, TransactionalEvent};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Sends allowed in flight before intake stops reading input.
pub const MAX_IN_FLIGHT: usize = 32;

/// Reads one [`TransactionalEvent`] per line and sends each concurrently,
/// with at most `max_in_flight` sends pending.
///
/// Malformed lines and failed sends are logged and skipped. Returns once
/// the input ends and every send started from it has finished.
pub async fn run<R>(input: R, mailer: Arc<Mailer>, max_in_flight: usize) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut sends = JoinSet::new();
    let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: TransactionalEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed event");
                continue;
            }
        };

        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        while sends.try_join_next().is_some() {}

        let mailer = Arc::clone(&mailer);
        sends.spawn(async move {
            if let Err(e) = mailer.send_event(&event).await {
                tracing::error!(kind = %event.kind, to = %event.recipient_address, error = %e, "Failed to send mail");
            }
            drop(permit);
        });
    }

    while sends.join_next().await.is_some() {}
    tracing::info!("Event input closed");
    Ok(())
}
