// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP + WebSocket front end.
//
// One TCP listener serves both the push endpoint and the print API.  Each
// connection is peeked: a `GET /ws` carrying `Upgrade: websocket` goes to
// the WebSocket handshake untouched, everything else is read as a single
// HTTP request and answered with `Connection: close`.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use weighbridge_core::error::{Result, WeighbridgeError};

use crate::api;
use crate::http::{self, RequestError, Response, find_subsequence};
use crate::services::app_services::AppServices;
use crate::ws;

/// Bytes peeked to classify a connection.
const PEEK_BYTES: usize = 1024;

/// How long to wait for a complete request head before classifying anyway.
const PEEK_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval while a partial request head is waiting for more bytes.
const PEEK_RETRY: Duration = Duration::from_millis(10);

pub struct FrontEnd {
    listener: TcpListener,
    services: AppServices,
}

impl FrontEnd {
    /// Bind `0.0.0.0:{port}`.  Port 0 picks a free port.
    pub async fn bind(port: u16, services: AppServices) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WeighbridgeError::Server(format!("bind {addr}: {e}")))?;
        Ok(Self { listener, services })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per connection.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "listening for websocket and print requests");
        }
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let services = self.services.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, services).await {
                            warn!(peer = %peer, error = %e, "connection handler error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, services: AppServices) -> Result<()> {
    let mut buf = [0u8; PEEK_BYTES];
    let n = peek_head(&stream, &mut buf).await?;
    if n == 0 {
        return Ok(());
    }

    if is_push_upgrade(&buf[..n]) {
        return ws::serve(stream, peer, services.hub().clone()).await;
    }
    serve_http(stream, peer, &services).await
}

/// Peek until the header block is complete, `buf` is full, the peer stops
/// sending or [`PEEK_TIMEOUT`] passes.  `peek` leaves the bytes in place for
/// the handshake or the HTTP reader.
async fn peek_head(stream: &TcpStream, buf: &mut [u8]) -> Result<usize> {
    let deadline = Instant::now() + PEEK_TIMEOUT;
    let mut seen = 0;
    loop {
        let n = match tokio::time::timeout_at(deadline, stream.peek(buf)).await {
            Ok(peeked) => peeked?,
            Err(_) => return Ok(seen),
        };
        if n == 0 || n == buf.len() || find_subsequence(&buf[..n], b"\r\n\r\n").is_some() {
            return Ok(n);
        }
        if n == seen {
            // Nothing new yet; `peek` would return the same bytes at once.
            tokio::time::sleep_until((Instant::now() + PEEK_RETRY).min(deadline)).await;
            if Instant::now() >= deadline {
                return Ok(n);
            }
        }
        seen = n;
    }
}

/// `GET /ws` with an `Upgrade: websocket` header.
fn is_push_upgrade(head: &[u8]) -> bool {
    let head = String::from_utf8_lossy(head);
    let mut lines = head.lines();
    let targets_ws = lines.next().is_some_and(|line| {
        let mut parts = line.split_whitespace();
        parts.next() == Some("GET")
            && parts
                .next()
                .is_some_and(|target| target.split('?').next() == Some("/ws"))
    });
    targets_ws
        && lines.any(|line| {
            let line = line.to_ascii_lowercase();
            line.starts_with("upgrade:") && line.contains("websocket")
        })
}

async fn serve_http(mut stream: TcpStream, peer: SocketAddr, services: &AppServices) -> Result<()> {
    let response = match http::read_request(&mut stream).await {
        Ok(Some(request)) => api::route(&request, services),
        Ok(None) => return Ok(()),
        Err(RequestError::TooLarge(size)) => {
            warn!(peer = %peer, size, "request body too large");
            Response::text(413, "request body too large")
        }
        Err(RequestError::Malformed(reason)) => {
            debug!(peer = %peer, reason = %reason, "malformed request");
            Response::text(400, &reason)
        }
        Err(RequestError::Io(e)) => return Err(e.into()),
    };
    response.write_to(&mut stream).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use async_trait::async_trait;
    use futures_util::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;
    use weighbridge_core::AppConfig;
    use weighbridge_print::PrintRunner;

    struct NoopRunner;

    #[async_trait]
    impl PrintRunner for NoopRunner {
        async fn print(&self, _document: &Path, _printer: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn start_server() -> (tempfile::TempDir, AppServices, SocketAddr) {
        let root = tempfile::tempdir().expect("tempdir");
        let config = AppConfig {
            simulate: true,
            history_dir: root.path().join("history"),
            temp_dir: root.path().join("tmp"),
            ..AppConfig::default()
        };
        let services = AppServices::with_runner(config, NoopRunner);
        let front = FrontEnd::bind(0, services.clone()).await.expect("bind");
        let port = front.local_addr().expect("addr").port();
        tokio::spawn(front.run());
        (root, services, SocketAddr::from(([127, 0, 0, 1], port)))
    }

    async fn roundtrip(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream.write_all(raw).await.expect("write");
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.expect("read");
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn upgrade_detection() {
        assert!(is_push_upgrade(
            b"GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n"
        ));
        assert!(is_push_upgrade(b"GET /ws?token=1 HTTP/1.1\r\nupgrade: WebSocket\r\n\r\n"));
        assert!(!is_push_upgrade(b"GET /ws HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(!is_push_upgrade(b"GET /other HTTP/1.1\r\nUpgrade: websocket\r\n\r\n"));
        assert!(!is_push_upgrade(b"POST /print HTTP/1.1\r\n\r\n"));
    }

    #[tokio::test]
    async fn queue_endpoint_over_tcp() {
        let (_root, _services, addr) = start_server().await;
        let response = roundtrip(addr, b"GET /print/queue HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("\"worker_running\":true"));
    }

    #[tokio::test]
    async fn handshake_split_across_segments_still_upgrades() {
        let (_root, services, addr) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream.set_nodelay(true).expect("nodelay");
        stream.write_all(b"GET /ws HTTP/1.1\r\n").await.expect("write");
        tokio::time::sleep(Duration::from_millis(100)).await;
        stream
            .write_all(
                b"Host: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
            )
            .await
            .expect("write");

        let mut head = [0u8; 12];
        stream.read_exact(&mut head).await.expect("response");
        assert_eq!(&head, b"HTTP/1.1 101");

        for _ in 0..200 {
            if services.hub().subscriber_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(services.hub().subscriber_count(), 1);
    }

    #[tokio::test]
    async fn oversized_upload_gets_413() {
        let (_root, _services, addr) = start_server().await;
        let raw = format!(
            "POST /print HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b\r\nContent-Length: {}\r\n\r\n",
            http::MAX_BODY_BYTES + 1
        );
        let response = roundtrip(addr, raw.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 413 "), "{response}");
    }

    #[tokio::test]
    async fn websocket_client_receives_broadcasts() {
        let (_root, services, addr) = start_server().await;
        let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.expect("connect");

        for _ in 0..200 {
            if services.hub().subscriber_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(services.hub().subscriber_count(), 1);

        let reading = r#"{"status":"stable","weight":12.50,"unit":"kg"}"#;
        services.hub().broadcast(reading);
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("message in time")
            .expect("stream open")
            .expect("valid frame");
        assert_eq!(message, Message::text(reading));

        socket.close(None).await.expect("close");
        for _ in 0..200 {
            if services.hub().subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(services.hub().subscriber_count(), 0);
    }
}
