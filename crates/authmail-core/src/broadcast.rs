//! Best-effort token side channel over a Unix domain socket.
//!
//! Every connected subscriber receives one JSON line per published code:
//!
//! ```text
//! {"type":"signup_verification","email":"a@b.c","code":"482913","timestamp":"2024-03-05T09:07:03Z"}
//! ```
//!
//! Publishing never blocks and never fails. A subscriber that cannot keep
//! up or whose connection fails is dropped.

use crate::event::EventKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Bound on a single write to a subscriber.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lines queued per subscriber before it is considered stuck.
const QUEUE_DEPTH: usize = 64;

/// Broadcast record.
#[derive(Debug, Clone, Serialize)]
pub struct TokenEvent<'a> {
    /// Event kind name.
    #[serde(rename = "type")]
    pub kind: &'a str,
    /// Recipient address.
    pub email: &'a str,
    /// Code or temporary password.
    pub code: &'a str,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
}

type Subscribers = Mutex<HashMap<u64, mpsc::Sender<Arc<str>>>>;

#[derive(Debug, Default)]
struct Shared {
    subscribers: Subscribers,
    next_id: AtomicU64,
}

impl Shared {
    fn subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<Arc<str>>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Token broadcaster bound to a socket path.
#[derive(Debug)]
pub struct Broadcaster {
    path: PathBuf,
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Broadcaster {
    /// Binds `path` and starts accepting subscribers.
    ///
    /// A stale socket file left by a previous process is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if another process is listening on `path` or the
    /// socket cannot be created.
    pub async fn bind(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();

        if tokio::fs::symlink_metadata(&path).await.is_ok() {
            if UnixStream::connect(&path).await.is_ok() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("token socket already in use: {}", path.display()),
                ));
            }
            tracing::info!(path = %path.display(), "Removing stale token socket");
            tokio::fs::remove_file(&path).await?;
        }

        let listener = UnixListener::bind(&path)?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        tracing::info!(path = %path.display(), "Token broadcaster listening");

        let shared = Arc::new(Shared::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared), shutdown_rx));

        Ok(Self {
            path,
            shared,
            shutdown,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Socket path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers().len()
    }

    /// Queues a token for every subscriber. Never blocks.
    pub fn publish(&self, kind: EventKind, email: &str, code: &str) {
        let event = TokenEvent {
            kind: kind.name(),
            email,
            code,
            timestamp: Utc::now(),
        };
        let line: Arc<str> = match serde_json::to_string(&event) {
            Ok(json) => format!("{json}\n").into(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode token event");
                return;
            }
        };

        let mut subscribers = self.shared.subscribers();
        subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&line)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(subscriber = id, error = %e, "Dropping token subscriber");
                false
            }
        });
        tracing::debug!(kind = %kind, subscribers = subscribers.len(), "Published token");
    }

    /// Stops accepting, disconnects subscribers and removes the socket.
    ///
    /// Later calls do nothing.
    pub async fn close(&self) {
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else { return };

        let _ = self.shutdown.send(true);
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Token accept task panicked");
        }
        self.shared.subscribers().clear();

        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::debug!(path = %self.path.display(), error = %e, "Failed to remove token socket");
        }
        tracing::info!("Token broadcaster closed");
    }
}

async fn accept_loop(listener: UnixListener, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, _)) => {
                    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
                    let count = {
                        let mut subscribers = shared.subscribers();
                        subscribers.insert(id, tx);
                        subscribers.len()
                    };
                    tracing::info!(subscriber = id, subscribers = count, "Token subscriber connected");
                    tokio::spawn(serve_subscriber(id, stream, rx, Arc::clone(&shared), shutdown.clone()));
                }
                Err(e) => tracing::warn!(error = %e, "Failed to accept token subscriber"),
            },
            _ = shutdown.changed() => break,
        }
    }
}

/// Writes queued lines to one subscriber until it disconnects, a write
/// fails, or the broadcaster closes.
async fn serve_subscriber(
    id: u64,
    stream: UnixStream,
    mut lines: mpsc::Receiver<Arc<str>>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut read, mut write) = stream.into_split();
    let mut buf = [0u8; 256];

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match tokio::time::timeout(WRITE_TIMEOUT, write.write_all(line.as_bytes())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(subscriber = id, error = %e, "Token write failed");
                        break;
                    }
                    Err(_) => {
                        tracing::debug!(subscriber = id, "Token write timed out");
                        break;
                    }
                }
            }
            n = read.read(&mut buf) => {
                // Subscribers only listen; anything they send is discarded.
                if matches!(n, Ok(0) | Err(_)) {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    let count = {
        let mut subscribers = shared.subscribers();
        subscribers.remove(&id);
        subscribers.len()
    };
    tracing::info!(subscriber = id, subscribers = count, "Token subscriber disconnected");
}
