//! Outbound side of the transport.
//!
//! Each open connection owns a writer task fed by an unbounded channel. The
//! manager keeps the sending halves keyed by [`ConnectionId`]; sends are
//! fire-and-forget into that channel.

use super::ConnectionId;
use crate::error::ServerError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Sending half of a connection's outbound frame queue.
pub type FrameSender = UnboundedSender<String>;

/// Bookkeeping for one open connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    sender: FrameSender,
    /// The remote network address of the peer
    pub remote_addr: SocketAddr,
    /// When this connection was established
    pub connected_at: SystemTime,
}

/// Tracks every open connection and its outbound queue.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        connection_id: ConnectionId,
        remote_addr: SocketAddr,
        sender: FrameSender,
    ) {
        self.connections.insert(
            connection_id,
            ConnectionHandle {
                sender,
                remote_addr,
                connected_at: SystemTime::now(),
            },
        );
    }

    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.remove(connection_id)
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&ConnectionHandle> {
        self.connections.get(connection_id)
    }

    /// Queues a frame for one connection.
    ///
    /// Fails with [`ServerError::Transport`] when the connection is unknown
    /// or its writer has already gone away.
    pub fn send_to_connection(
        &self,
        connection_id: &ConnectionId,
        frame: &str,
    ) -> Result<(), ServerError> {
        let handle = self.connections.get(connection_id).ok_or_else(|| {
            ServerError::Transport(format!("connection {connection_id} is not open"))
        })?;

        handle
            .sender
            .send(frame.to_string())
            .map_err(|_| ServerError::Transport(format!("connection {connection_id} is closed")))
    }

    /// Queues a frame on every connection accepted by `predicate`.
    ///
    /// Returns the number of connections the frame was queued on. Closed
    /// writers are skipped.
    pub fn broadcast_if<P>(&self, frame: &str, predicate: P) -> usize
    where
        P: Fn(&ConnectionId) -> bool,
    {
        let mut delivered = 0;
        for (connection_id, handle) in &self.connections {
            if !predicate(connection_id) {
                continue;
            }
            if handle.sender.send(frame.to_string()).is_ok() {
                delivered += 1;
            } else {
                debug!("Skipping closed connection {} during broadcast", connection_id);
            }
        }
        delivered
    }

    pub fn ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.connections.keys()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
