//! Low-level SMTP stream handling.

use crate::error::{Error, Result};
use rustls::pki_types::ServerName;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};

/// Address family used when dialing the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpFamily {
    /// Only dial IPv4 addresses.
    V4,
    /// Only dial IPv6 addresses.
    V6,
    /// Dial whatever the resolver returns first.
    #[default]
    Any,
}

impl IpFamily {
    /// Returns true if `addr` may be dialed under this family.
    #[must_use]
    pub const fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "IPv4"),
            Self::V6 => write!(f, "IPv6"),
            Self::Any => write!(f, "IP"),
        }
    }
}

/// Underlying transport (TCP or TLS).
#[derive(Debug)]
enum Transport {
    /// Plain TCP connection.
    Tcp(BufReader<TcpStream>),
    /// TLS-encrypted connection.
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
}

/// SMTP stream with a per-operation I/O timeout.
#[derive(Debug)]
pub struct SmtpStream {
    transport: Transport,
    io_timeout: Duration,
}

impl SmtpStream {
    /// Wraps an already connected TCP stream.
    #[must_use]
    pub fn from_tcp(stream: TcpStream, io_timeout: Duration) -> Self {
        Self {
            transport: Transport::Tcp(BufReader::new(stream)),
            io_timeout,
        }
    }

    /// Returns true once the stream has been upgraded to TLS.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.transport, Transport::Tls(_))
    }

    /// Returns the local address of the underlying socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is no longer connected.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let addr = match &self.transport {
            Transport::Tcp(reader) => reader.get_ref().local_addr()?,
            Transport::Tls(reader) => reader.get_ref().get_ref().0.local_addr()?,
        };
        Ok(addr)
    }

    /// Reads a line from the stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] on end of stream, [`Error::Timeout`]
    /// if nothing arrives in time, or an I/O error.
    pub async fn read_line(&mut self) -> Result<String> {
        let limit = self.io_timeout;
        let mut line = String::new();
        let read = match &mut self.transport {
            Transport::Tcp(reader) => timeout(limit, reader.read_line(&mut line)).await,
            Transport::Tls(reader) => timeout(limit, reader.read_line(&mut line)).await,
        };

        let n = read.map_err(|_| Error::Timeout(limit))??;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        Ok(line.trim_end().to_string())
    }

    /// Writes data to the stream and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or times out.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let limit = self.io_timeout;
        let written = match &mut self.transport {
            Transport::Tcp(reader) => {
                let stream = reader.get_mut();
                timeout(limit, async {
                    stream.write_all(data).await?;
                    stream.flush().await
                })
                .await
            }
            Transport::Tls(reader) => {
                let stream = reader.get_mut();
                timeout(limit, async {
                    stream.write_all(data).await?;
                    stream.flush().await
                })
                .await
            }
        };

        written.map_err(|_| Error::Timeout(limit))??;
        Ok(())
    }

    /// Upgrades a TCP stream to TLS in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already encrypted or the TLS
    /// handshake fails.
    pub async fn upgrade_to_tls(self, hostname: &str) -> Result<Self> {
        let tcp_stream = match self.transport {
            Transport::Tcp(reader) => reader.into_inner(),
            Transport::Tls(_) => return Err(Error::Protocol("Already using TLS".into())),
        };

        let connector = create_tls_connector();
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|_| Error::Protocol(format!("Invalid hostname: {hostname}")))?;

        let tls_stream = timeout(self.io_timeout, connector.connect(server_name, tcp_stream))
            .await
            .map_err(|_| Error::Timeout(self.io_timeout))??;

        Ok(Self {
            transport: Transport::Tls(Box::new(BufReader::new(tls_stream))),
            io_timeout: self.io_timeout,
        })
    }
}

/// Connects to an SMTP server over plain TCP.
///
/// Every resolved address matching `family` is tried in resolver order until
/// one accepts the connection.
///
/// # Errors
///
/// Returns the last connection error, or a not-found error if the host has
/// no address of the requested family.
pub async fn connect(
    hostname: &str,
    port: u16,
    family: IpFamily,
    io_timeout: Duration,
) -> Result<SmtpStream> {
    let addrs = timeout(io_timeout, lookup_host((hostname, port)))
        .await
        .map_err(|_| Error::Timeout(io_timeout))??;

    let mut last_error = None;
    for addr in addrs.filter(|addr| family.accepts(addr)) {
        match timeout(io_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(SmtpStream::from_tcp(stream, io_timeout)),
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "Connection attempt failed");
                last_error = Some(Error::Io(e));
            }
            Err(_) => {
                tracing::debug!(%addr, "Connection attempt timed out");
                last_error = Some(Error::Timeout(io_timeout));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no {family} address found for {hostname}"),
        ))
    }))
}

/// Creates a TLS connector with the bundled web PKI roots.
fn create_tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    #[test]
    fn ip_family_filters_addresses() {
        let v4: SocketAddr = "127.0.0.1:25".parse().unwrap();
        let v6: SocketAddr = "[::1]:25".parse().unwrap();

        assert!(IpFamily::V4.accepts(&v4));
        assert!(!IpFamily::V4.accepts(&v6));
        assert!(IpFamily::V6.accepts(&v6));
        assert!(!IpFamily::V6.accepts(&v4));
        assert!(IpFamily::Any.accepts(&v4) && IpFamily::Any.accepts(&v6));
    }

    #[tokio::test]
    async fn connect_reports_local_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect("127.0.0.1", port, IpFamily::V4, Duration::from_secs(5))
            .await
            .unwrap();
        let local = stream.local_addr().unwrap();
        assert!(local.is_ipv4());
        assert!(!stream.is_tls());
    }

    #[tokio::test]
    async fn connect_without_matching_family_fails() {
        let result = connect("127.0.0.1", 25, IpFamily::V6, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn read_line_detects_closed_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"220 ready\r\n").await.unwrap();
        });

        let mut stream = connect("127.0.0.1", port, IpFamily::V4, Duration::from_secs(5))
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(stream.read_line().await.unwrap(), "220 ready");
        assert!(matches!(
            stream.read_line().await,
            Err(Error::ConnectionClosed)
        ));
    }
}
