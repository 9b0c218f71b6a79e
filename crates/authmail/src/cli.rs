//! Command-line flags.

use authmail_core::config::DEFAULT_KEEP_ALIVE_INTERVAL;
use authmail_core::{EnvSource, Security, SenderConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Transactional email service for authentication flows
#[derive(Parser, Debug)]
#[command(name = "authmail")]
#[command(about = "Send verification codes and security notices over one SMTP session", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Environment file with FAROE_* settings
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,

    /// Skip STARTTLS (testing only; credentials are sent in clear text)
    #[arg(long)]
    pub insecure: bool,

    /// Do not probe the session in the background
    #[arg(long)]
    pub no_keep_alive: bool,

    /// Do not send mail; codes are still broadcast
    #[arg(long)]
    pub no_smtp: bool,

    /// Directory of `<event>.txt` / `<event>.html` templates
    #[arg(long, value_name = "DIR")]
    pub email_templates: Option<PathBuf>,

    /// Unix socket for the token broadcaster (overrides FAROE_TOKEN_SOCKET_PATH)
    #[arg(long, value_name = "PATH")]
    pub token_socket: Option<PathBuf>,

    /// Seconds between keep-alive probes
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_KEEP_ALIVE_INTERVAL.as_secs())]
    pub keep_alive_interval: u64,
}

impl Cli {
    /// Builds the sender configuration from the env file and these flags.
    ///
    /// Flags take precedence over the environment.
    pub fn config(&self) -> anyhow::Result<SenderConfig> {
        let env = EnvSource::load(&self.env_file)?;
        let mut builder = SenderConfig::builder()
            .apply_env(&env)?
            .keep_alive(!self.no_keep_alive)
            .keep_alive_interval(Duration::from_secs(self.keep_alive_interval))
            .smtp_enabled(!self.no_smtp);

        if self.insecure {
            builder = builder.security(Security::InsecureDangerous);
        }
        if let Some(dir) = &self.email_templates {
            builder = builder.templates_dir(dir);
        }
        if let Some(path) = &self.token_socket {
            builder = builder.token_socket(path);
        }

        Ok(builder.build()?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["authmail"]).unwrap();
        assert_eq!(cli.env_file, PathBuf::from(".env"));
        assert!(!cli.insecure);
        assert!(!cli.no_keep_alive);
        assert!(!cli.no_smtp);
        assert_eq!(cli.keep_alive_interval, 300);
    }

    #[test]
    fn flags_override_environment() {
        let cli = Cli::try_parse_from([
            "authmail",
            "--env-file",
            "/nonexistent/authmail.env",
            "--no-smtp",
            "--no-keep-alive",
            "--token-socket",
            "/tmp/tokens.sock",
            "--keep-alive-interval",
            "30",
        ])
        .unwrap();

        let config = cli.config().unwrap();
        assert!(!config.smtp_enabled);
        assert!(!config.keep_alive);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(30));
        assert_eq!(config.token_socket, Some(PathBuf::from("/tmp/tokens.sock")));
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(Cli::try_parse_from(["authmail", "--smtp-off"]).is_err());
    }
}
