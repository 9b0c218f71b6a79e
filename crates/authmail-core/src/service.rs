//! Service lifecycle: startup, background keep-alive and shutdown.

use crate::broadcast::Broadcaster;
use crate::config::SenderConfig;
use crate::delivery::{Pipeline, SessionSlot, Watchdog, open_session};
use crate::error::{ConfigError, DeliveryError, FatalError, Result};
use crate::mailer::Mailer;
use crate::templates::TemplateTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Owns the shared session, the keep-alive watchdog and the token
/// broadcaster.
#[derive(Debug)]
pub struct MailService {
    config: Arc<SenderConfig>,
    slot: SessionSlot,
    mailer: Arc<Mailer>,
    broadcaster: Option<Arc<Broadcaster>>,
    watchdog: Option<Watchdog>,
    fatal_tx: mpsc::Sender<FatalError>,
    fatal_rx: mpsc::Receiver<FatalError>,
}

impl MailService {
    /// Validates `config`, loads templates and binds the token socket.
    ///
    /// No SMTP connection is made until [`MailService::start`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete, a template is
    /// malformed, or the token socket cannot be bound.
    pub async fn new(config: SenderConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let templates = match &config.templates_dir {
            Some(dir) => TemplateTable::load(dir)?,
            None => TemplateTable::empty(),
        };
        tracing::info!(templates = templates.len(), "Templates loaded");

        let broadcaster = match &config.token_socket {
            Some(path) => Some(Arc::new(Broadcaster::bind(path).await?)),
            None => None,
        };

        let slot = SessionSlot::new();
        let pipeline = Pipeline::new(slot.clone(), Arc::clone(&config));
        let mailer = Arc::new(Mailer::new(
            Arc::clone(&config),
            Arc::new(templates),
            pipeline,
            broadcaster.clone(),
        ));
        let (fatal_tx, fatal_rx) = mpsc::channel(1);

        Ok(Self {
            config,
            slot,
            mailer,
            broadcaster,
            watchdog: None,
            fatal_tx,
            fatal_rx,
        })
    }

    /// Opens the initial session and starts the keep-alive watchdog, which
    /// probes every `probe_interval`.
    ///
    /// Does nothing when SMTP is disabled. The watchdog is not started when
    /// keep-alive is disabled in the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial session cannot be opened, or
    /// keep-alive is enabled with a zero interval.
    pub async fn start(&mut self, probe_interval: Duration) -> Result<()> {
        if !self.config.smtp_enabled {
            tracing::warn!("SMTP disabled, mail will not be delivered");
            return Ok(());
        }
        if self.config.keep_alive && probe_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "keep-alive interval",
                reason: "must be greater than zero".into(),
            }
            .into());
        }

        {
            let mut guard = self.slot.lock().await;
            let session = open_session(&self.config)
                .await
                .map_err(DeliveryError::Connect)?;
            *guard = Some(session);
        }

        if self.config.keep_alive && self.watchdog.is_none() {
            tracing::info!(interval = ?probe_interval, "Starting keep-alive");
            self.watchdog = Some(Watchdog::spawn(
                self.slot.clone(),
                Arc::clone(&self.config),
                probe_interval,
                self.fatal_tx.clone(),
            ));
        }

        Ok(())
    }

    /// Shared handle for sending mail.
    #[must_use]
    pub fn mailer(&self) -> Arc<Mailer> {
        Arc::clone(&self.mailer)
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Token broadcaster, when a socket path is configured.
    #[must_use]
    pub fn broadcaster(&self) -> Option<&Broadcaster> {
        self.broadcaster.as_deref()
    }

    /// Waits for an unrecoverable background failure.
    ///
    /// Pending forever while the service is healthy.
    pub async fn next_fatal(&mut self) -> Option<FatalError> {
        self.fatal_rx.recv().await
    }

    /// Stops the watchdog, closes the session and the token socket.
    ///
    /// Sends already holding the session finish first.
    pub async fn close(self) {
        if let Some(watchdog) = self.watchdog {
            watchdog.stop().await;
        }

        let session = self.slot.lock().await.take();
        if let Some(session) = session
            && let Err(e) = session.quit().await
        {
            tracing::debug!(error = %e, "QUIT failed");
        }

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.close().await;
        }

        tracing::info!("Mail service closed");
    }
}
