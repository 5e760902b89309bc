//! Per-connection transport task.

use super::event_loop::TransportEvent;
use crate::connection::ConnectionId;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, warn};

/// Runs the WebSocket handshake and pumps frames between the socket and the
/// dispatch loop until the peer goes away.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    events: UnboundedSender<TransportEvent>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut ws_sink, mut ws_receiver) = ws_stream.split();
    let connection_id = ConnectionId::new();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();

    if events
        .send(TransportEvent::Connected {
            connection_id,
            remote_addr: addr,
            sender: frame_tx,
        })
        .is_err()
    {
        warn!("Dispatch loop is gone, dropping connection from {}", addr);
        return;
    }

    // Ends once the dispatch loop drops the sender after `Disconnected`.
    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = ws_sink.send(Message::Text(frame.into())).await {
                debug!("Write to {} failed: {}", connection_id, e);
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Dropping non UTF-8 binary frame from {}", connection_id);
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                debug!("Connection {} requested close", connection_id);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error for connection {}: {}", connection_id, e);
                break;
            }
        };

        if events
            .send(TransportEvent::Message { connection_id, text })
            .is_err()
        {
            break;
        }
    }

    let _ = events.send(TransportEvent::Disconnected { connection_id });
}
