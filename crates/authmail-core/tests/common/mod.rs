//! Scriptable in-process SMTP server for integration tests.

#![allow(dead_code, clippy::unwrap_used, missing_docs)]

use authmail_core::{Credentials, Security, SenderConfig, SenderConfigBuilder};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const EHLO_REPLY: &str = "250-fake.test\r\n250-8BITMIME\r\n250-SIZE 1000000\r\n250 AUTH PLAIN LOGIN\r\n";

#[derive(Debug, Default)]
pub struct State {
    pub connections: AtomicUsize,
    pub noops: AtomicUsize,
    pub messages: Mutex<Vec<String>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    /// MAIL commands left to answer with 421 before closing.
    pub fail_mail: AtomicUsize,
    /// Accept connections and close them before the greeting.
    pub refuse: AtomicBool,
    /// Milliseconds to hold each NOOP reply.
    pub noop_delay_ms: AtomicU64,
    /// Session events in the order the server saw them.
    pub log: Mutex<Vec<&'static str>>,
}

pub struct FakeSmtp {
    pub port: u16,
    pub state: Arc<State>,
    drop_all: Arc<watch::Sender<u64>>,
}

impl FakeSmtp {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State::default());
        let drop_all = Arc::new(watch::Sender::new(0u64));

        let accept_state = Arc::clone(&state);
        let accept_drop = Arc::clone(&drop_all);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                if accept_state.refuse.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }
                tokio::spawn(serve(
                    stream,
                    Arc::clone(&accept_state),
                    accept_drop.subscribe(),
                ));
            }
        });

        Self {
            port,
            state,
            drop_all,
        }
    }

    /// Closes every open connection without a reply.
    pub fn drop_connections(&self) {
        self.drop_all.send_modify(|generation| *generation += 1);
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<String> {
        self.state.messages.lock().unwrap().clone()
    }

    pub fn log(&self) -> Vec<&'static str> {
        self.state.log.lock().unwrap().clone()
    }

    /// Plaintext config pointed at this server, keep-alive off.
    pub fn config(&self) -> SenderConfigBuilder {
        SenderConfig::builder()
            .sender_name("Example")
            .sender_email("noreply@example.com")
            .server("127.0.0.1", self.port)
            .domain("example.com")
            .security(Security::InsecureDangerous)
            .credentials(Credentials::new("noreply@example.com", "secret"))
            .keep_alive(false)
            .io_timeout(Duration::from_secs(5))
    }
}

async fn serve(stream: TcpStream, state: Arc<State>, mut drop_all: watch::Receiver<u64>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    if write.write_all(b"220 fake.test ESMTP\r\n").await.is_err() {
        return;
    }

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => return,
            },
            _ = drop_all.changed() => return,
        };
        let verb = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        let reply = match verb.as_str() {
            "EHLO" | "HELO" => EHLO_REPLY,
            "AUTH" => "235 2.7.0 authenticated\r\n",
            "MAIL" => {
                let fail = state
                    .fail_mail
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if fail {
                    let _ = write.write_all(b"421 4.3.0 try again later\r\n").await;
                    return;
                }
                let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
                state.max_active.fetch_max(active, Ordering::SeqCst);
                "250 2.1.0 ok\r\n"
            }
            "RCPT" => "250 2.1.5 ok\r\n",
            "NOOP" => {
                state.noops.fetch_add(1, Ordering::SeqCst);
                state.log.lock().unwrap().push("noop received");
                let delay = state.noop_delay_ms.load(Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                "250 2.0.0 ok\r\n"
            }
            "DATA" => {
                if write.write_all(b"354 go ahead\r\n").await.is_err() {
                    return;
                }
                let mut body = Vec::new();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) if line == "." => break,
                        Ok(Some(line)) => {
                            body.push(line.strip_prefix('.').unwrap_or(&line).to_string());
                        }
                        _ => return,
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                state.active.fetch_sub(1, Ordering::SeqCst);
                state.messages.lock().unwrap().push(body.join("\r\n"));
                "250 2.0.0 queued\r\n"
            }
            "QUIT" => {
                state.log.lock().unwrap().push("quit");
                let _ = write.write_all(b"221 2.0.0 bye\r\n").await;
                return;
            }
            _ => "502 5.5.2 unknown command\r\n",
        };

        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
        if verb == "NOOP" {
            state.log.lock().unwrap().push("noop answered");
        }
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
