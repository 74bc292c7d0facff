// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// WebSocket push subscribers.
//
// The write half of each socket becomes a hub subscriber; the read half is
// drained here until the client leaves or the hub lets go of the
// subscriber, whichever comes first.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, info};

use weighbridge_core::error::{Result, WeighbridgeError};
use weighbridge_hub::{Hub, MessageSink};

type WsWriter = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Hub-facing half of a WebSocket connection.
pub struct WsSink {
    peer: SocketAddr,
    writer: WsWriter,
    /// Fired when the hub closes this subscriber.
    released: Option<oneshot::Sender<()>>,
}

#[async_trait]
impl MessageSink for WsSink {
    fn describe(&self) -> String {
        self.peer.to_string()
    }

    async fn send_text(&mut self, message: &str) -> Result<()> {
        self.writer
            .send(Message::text(message.to_owned()))
            .await
            .map_err(|e| WeighbridgeError::Subscriber(format!("{}: {e}", self.peer)))
    }

    async fn close(&mut self) {
        if let Err(e) = self.writer.close().await {
            debug!(peer = %self.peer, error = %e, "websocket close failed");
        }
        if let Some(released) = self.released.take() {
            let _ = released.send(());
        }
    }
}

/// Complete the upgrade handshake and serve the socket until it closes.
pub async fn serve(stream: TcpStream, peer: SocketAddr, hub: Hub) -> Result<()> {
    let socket = accept_async(stream)
        .await
        .map_err(|e| WeighbridgeError::BadRequest(format!("websocket handshake from {peer}: {e}")))?;
    let (writer, mut reader) = socket.split();
    let (released_tx, mut released_rx) = oneshot::channel();

    let id = hub.subscribe(WsSink {
        peer,
        writer,
        released: Some(released_tx),
    });
    info!(peer = %peer, subscriber = %id, "websocket client connected");

    // Clients have nothing to say; only watch for them leaving.
    loop {
        tokio::select! {
            _ = &mut released_rx => break,
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(peer = %peer, error = %e, "websocket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    hub.unsubscribe(id);
    info!(peer = %peer, subscriber = %id, "websocket client disconnected");
    Ok(())
}
