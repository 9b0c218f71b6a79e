//! `authmail` - transactional email service
//!
//! Reads authentication events as JSON lines on stdin and mails them over
//! one long-lived SMTP session.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod intake;

use anyhow::Context;
use authmail_core::MailService;
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authmail=info,authmail_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.config().context("invalid configuration")?;
    info!(
        host = %config.host,
        port = config.port,
        smtp = config.smtp_enabled,
        keep_alive = config.keep_alive,
        "Starting authmail"
    );

    let probe_interval = config.keep_alive_interval;
    let mut service = MailService::new(config)
        .await
        .context("failed to initialise mail service")?;
    if let Err(e) = service.start(probe_interval).await {
        service.close().await;
        return Err(e).context("failed to open SMTP session");
    }

    let mut intake = tokio::spawn(intake::run(
        BufReader::new(tokio::io::stdin()),
        service.mailer(),
        intake::MAX_IN_FLIGHT,
    ));

    let outcome = tokio::select! {
        fatal = service.next_fatal() => match fatal {
            Some(e) => Err(anyhow::Error::new(e)),
            None => Ok(()),
        },
        result = &mut intake => match result {
            Ok(read) => read.context("failed to read events"),
            Err(e) => Err(anyhow::Error::new(e).context("event intake panicked")),
        },
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                info!("Interrupted, shutting down");
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context("failed to listen for ctrl-c")),
        },
    };

    intake.abort();
    service.close().await;
    outcome
}
