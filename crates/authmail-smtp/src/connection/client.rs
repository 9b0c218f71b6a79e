//! Type-state SMTP client.

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Reply, ReplyCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::marker::PhantomData;
use std::net::SocketAddr;

/// Type-state marker for a greeted session that has not yet been
/// authenticated.
#[derive(Debug)]
pub struct Greeted;

/// Type-state marker for a session that can start mail transactions.
#[derive(Debug)]
pub struct Ready;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
///
/// Every transition consumes the client. When a command fails the
/// connection is dropped with it, so a caller can never reuse a session
/// that is in an unknown protocol state.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    helo_name: String,
    _state: PhantomData<State>,
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl Client<Greeted> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(mut stream: SmtpStream) -> Result<Self> {
        let greeting = read_reply(&mut stream).await?;
        check(&greeting)?;

        // Extract hostname from greeting (first word after code)
        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                ..ServerInfo::default()
            },
            helo_name: String::new(),
            _state: PhantomData,
        })
    }

    /// Sends EHLO and discovers server capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        let reply = self
            .send_command(Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;
        check(&reply)?;

        self.server_info.update_extensions(&reply.message);
        self.helo_name = client_hostname.to_string();
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS, then repeats EHLO
    /// with the same client name to refresh the capability list.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not supported or if the upgrade fails.
    pub async fn starttls(mut self, server_hostname: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        let reply = self.send_command(Command::StartTls).await?;
        check(&reply)?;

        self.stream = self.stream.upgrade_to_tls(server_hostname).await?;

        let helo_name = std::mem::take(&mut self.helo_name);
        self.ehlo(&helo_name).await
    }

    /// Authenticates using the PLAIN mechanism with an initial response.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn auth_plain(mut self, username: &str, password: &str) -> Result<Client<Ready>> {
        // PLAIN response: \0username\0password
        let credentials = format!("\0{username}\0{password}");
        let encoded = STANDARD.encode(credentials.as_bytes());

        let reply = self
            .send_command(Command::Auth {
                mechanism: AuthMechanism::Plain,
                initial_response: Some(encoded),
            })
            .await?;
        check(&reply)?;

        Ok(self.transition())
    }

    /// Authenticates using the legacy LOGIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects either challenge response.
    pub async fn auth_login(mut self, username: &str, password: &str) -> Result<Client<Ready>> {
        let reply = self
            .send_command(Command::Auth {
                mechanism: AuthMechanism::Login,
                initial_response: None,
            })
            .await?;
        expect(&reply, ReplyCode::AUTH_CONTINUE)?;

        let reply = self
            .send_command(Command::AuthResponse(STANDARD.encode(username)))
            .await?;
        expect(&reply, ReplyCode::AUTH_CONTINUE)?;

        let reply = self
            .send_command(Command::AuthResponse(STANDARD.encode(password)))
            .await?;
        check(&reply)?;

        Ok(self.transition())
    }

    /// Uses the session without authenticating (if the server allows).
    #[must_use]
    pub fn into_ready(self) -> Client<Ready> {
        self.transition()
    }
}

impl Client<Ready> {
    /// Starts a mail transaction.
    ///
    /// `size` is the size of the message about to be sent. It is announced
    /// with the SIZE parameter when the server supports it and checked
    /// against the advertised limit before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is too large or the MAIL FROM command fails.
    pub async fn mail_from(
        mut self,
        from: Address,
        size: Option<usize>,
    ) -> Result<Client<MailTransaction>> {
        if let Some(size) = size
            && let Some(limit) = self.server_info.max_message_size()
            && limit > 0
            && size > limit
        {
            return Err(Error::MessageTooLarge { size, limit });
        }

        let cmd = Command::MailFrom {
            from,
            body: self
                .server_info
                .supports_8bitmime()
                .then(|| "8BITMIME".to_string()),
            size: size.filter(|_| self.server_info.advertises_size()),
        };
        let reply = self.send_command(cmd).await?;
        check(&reply)?;

        Ok(self.transition())
    }

    /// Sends NOOP, proving the session is still alive.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails. The session must then be
    /// considered dead.
    pub async fn noop(&mut self) -> Result<()> {
        let reply = self.send_command(Command::Noop).await?;
        check(&reply)
    }
}

impl Client<MailTransaction> {
    /// Adds a recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        let reply = self.send_command(Command::RcptTo { to }).await?;
        check(&reply)?;

        Ok(self.transition())
    }
}

impl Client<RecipientAdded> {
    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the DATA command fails.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let reply = self.send_command(Command::Data).await?;
        expect(&reply, ReplyCode::START_DATA)?;

        Ok(self.transition())
    }
}

impl Client<Data> {
    /// Sends the message content and completes the transaction.
    ///
    /// Message should be RFC 5322 formatted. Line endings are normalized to
    /// CRLF, leading dots are stuffed and the terminating "." line is added.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Ready>> {
        self.stream.write_all(&encode_data(message)).await?;

        let reply = read_reply(&mut self.stream).await?;
        check(&reply)?;

        Ok(self.transition())
    }
}

// Common implementation for all states
impl<S> Client<S> {
    /// Returns the local address of the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is no longer connected.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Returns true once the connection has been upgraded to TLS.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.stream.is_tls()
    }

    /// Returns the name this client announced with EHLO.
    #[must_use]
    pub fn helo_name(&self) -> &str {
        &self.helo_name
    }

    fn transition<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            helo_name: self.helo_name,
            _state: PhantomData,
        }
    }

    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        let data = cmd.serialize();
        self.stream.write_all(&data).await?;
        read_reply(&mut self.stream).await
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;

        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(())
    }
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(&line);
        lines.push(line);

        if is_last {
            break;
        }
    }

    parse_reply(&lines)
}

fn check(reply: &Reply) -> Result<()> {
    if reply.is_success() {
        Ok(())
    } else {
        Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()))
    }
}

fn expect(reply: &Reply, code: ReplyCode) -> Result<()> {
    if reply.code == code {
        Ok(())
    } else {
        Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()))
    }
}

/// Encodes a message for the DATA phase.
fn encode_data(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 32 + 5);

    let message = match message {
        [rest @ .., b'\r', b'\n'] | [rest @ .., b'\n'] => rest,
        _ => message,
    };

    for line in message.split(|&b| b == b'\n') {
        let line = match line {
            [rest @ .., b'\r'] => rest,
            _ => line,
        };

        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::connection::{IpFamily, connect};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn data_normalizes_line_endings() {
        assert_eq!(encode_data(b"a\nb\r\nc"), b"a\r\nb\r\nc\r\n.\r\n");
        assert_eq!(encode_data(b"a\r\n"), b"a\r\n.\r\n");
    }

    #[test]
    fn data_stuffs_leading_dots() {
        assert_eq!(
            encode_data(b".hidden\r\n..\r\nok"),
            b"..hidden\r\n...\r\nok\r\n.\r\n"
        );
    }

    /// Runs a scripted server: for every line received, the next canned
    /// reply is written. Returns the lines received.
    async fn scripted(
        greeting: &'static str,
        replies: Vec<&'static str>,
    ) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut reader = BufReader::new(read);
            write.write_all(greeting.as_bytes()).await.unwrap();

            let mut received = Vec::new();
            for reply in replies {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                received.push(line.trim_end().to_string());
                write.write_all(reply.as_bytes()).await.unwrap();
            }
            received
        });
        (port, handle)
    }

    async fn open(port: u16) -> Client<Greeted> {
        let stream = connect("127.0.0.1", port, IpFamily::V4, Duration::from_secs(5))
            .await
            .unwrap();
        Client::from_stream(stream).await.unwrap()
    }

    #[tokio::test]
    async fn ehlo_and_login_auth() {
        let (port, server) = scripted(
            "220 mx.test ESMTP\r\n",
            vec![
                "250-mx.test\r\n250-AUTH LOGIN\r\n250 SIZE 100\r\n",
                "334 VXNlcm5hbWU6\r\n",
                "334 UGFzc3dvcmQ6\r\n",
                "235 ok\r\n",
                "250 ok\r\n",
            ],
        )
        .await;

        let client = open(port).await.ehlo("[127.0.0.1]").await.unwrap();
        assert_eq!(client.server_info().hostname, "mx.test");
        assert_eq!(client.helo_name(), "[127.0.0.1]");

        let mut ready = client.auth_login("user", "secret").await.unwrap();
        ready.noop().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received[0], "EHLO [127.0.0.1]");
        assert_eq!(received[1], "AUTH LOGIN");
        assert_eq!(received[2], STANDARD.encode("user"));
        assert_eq!(received[3], STANDARD.encode("secret"));
        assert_eq!(received[4], "NOOP");
    }

    #[tokio::test]
    async fn mail_from_rejects_oversized_message_locally() {
        let (port, server) =
            scripted("220 mx.test\r\n", vec!["250-mx.test\r\n250 SIZE 100\r\n"]).await;

        let ready = open(port).await.ehlo("client").await.unwrap().into_ready();
        let from = Address::new("sender@example.com").unwrap();
        let result = ready.mail_from(from, Some(500)).await;
        assert!(matches!(
            result,
            Err(Error::MessageTooLarge { size: 500, limit: 100 })
        ));

        assert_eq!(server.await.unwrap(), vec!["EHLO client"]);
    }

    #[tokio::test]
    async fn starttls_requires_advertisement() {
        let (port, _server) = scripted("220 mx.test\r\n", vec!["250 mx.test\r\n"]).await;

        let client = open(port).await.ehlo("client").await.unwrap();
        assert!(matches!(
            client.starttls("mx.test").await,
            Err(Error::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn failed_greeting_is_an_error() {
        let (port, _server) = scripted("554 go away\r\n", vec![]).await;
        let stream = connect("127.0.0.1", port, IpFamily::V4, Duration::from_secs(5))
            .await
            .unwrap();

        let result = Client::from_stream(stream).await;
        assert!(matches!(result, Err(Error::SmtpError { code: 554, .. })));
    }
}
