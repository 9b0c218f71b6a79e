//! Session establishment.

use super::Session;
use crate::config::{Security, SenderConfig};
use crate::error::{ConnectError, ConnectStage};
use authmail_smtp::{AuthMechanism, Client, SmtpConnection, connect, helo_name};

/// Opens, greets, secures and authenticates a new session.
///
/// Every step is a hard failure point; no step is retried here.
///
/// # Errors
///
/// Returns the stage that failed with its underlying error.
pub async fn open_session(config: &SenderConfig) -> Result<Session, ConnectError> {
    let stage = |stage: ConnectStage| move |e: authmail_smtp::Error| ConnectError::new(stage, e);

    let stream = connect(&config.host, config.port, config.ip_family, config.io_timeout)
        .await
        .map_err(stage(ConnectStage::Dial))?;
    let local = stream.local_addr().map_err(stage(ConnectStage::Dial))?;
    let name = helo_name(&local);

    let client = Client::from_stream(stream)
        .await
        .map_err(stage(ConnectStage::Greeting))?;
    let client = client.ehlo(&name).await.map_err(stage(ConnectStage::Ehlo))?;

    let client = match config.security {
        Security::StartTls => client
            .starttls(&config.host)
            .await
            .map_err(stage(ConnectStage::StartTls))?,
        Security::InsecureDangerous => {
            tracing::warn!(
                host = %config.host,
                "[DANGER] TLS not enabled, messages are not secured and can be read when intercepted!"
            );
            client
        }
    };

    let session = match &config.credentials {
        Some(credentials) => {
            let mechanisms = client.server_info().auth_mechanisms();
            let use_login = mechanisms.contains(&AuthMechanism::Login)
                && !mechanisms.contains(&AuthMechanism::Plain);
            let authenticated = if use_login {
                client
                    .auth_login(&credentials.username, &credentials.password)
                    .await
            } else {
                client
                    .auth_plain(&credentials.username, &credentials.password)
                    .await
            };
            authenticated.map_err(stage(ConnectStage::Authenticate))?
        }
        None => client.into_ready(),
    };

    tracing::info!(
        host = %config.host,
        port = config.port,
        helo = %name,
        tls = session.is_tls(),
        "SMTP session established"
    );
    Ok(session)
}
