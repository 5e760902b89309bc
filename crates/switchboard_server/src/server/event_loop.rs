//! The single dispatch loop.
//!
//! Connection tasks only move bytes. Every connect, message and disconnect is
//! forwarded as a [`TransportEvent`] to one task that owns the client
//! registry, the outbound connection table and the dispatcher, so handler
//! invocations never overlap and the registry needs no lock.

use crate::connection::manager::FrameSender;
use crate::connection::{ClientRegistry, ConnectionId, ConnectionManager};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::envelope::Envelope;
use crate::error::ServerError;
use crate::facade::ServerHandle;
use crate::identification::IdentificationAdapter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Event emitted by a connection task.
#[derive(Debug)]
pub enum TransportEvent {
    Connected {
        connection_id: ConnectionId,
        remote_addr: SocketAddr,
        sender: FrameSender,
    },
    Message {
        connection_id: ConnectionId,
        text: String,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
}

/// Owner of all mutable server state.
pub struct DispatchLoop {
    registry: ClientRegistry,
    connections: ConnectionManager,
    dispatcher: Dispatcher,
    identification: Option<Arc<dyn IdentificationAdapter>>,
}

impl DispatchLoop {
    pub fn new(
        dispatcher: Dispatcher,
        identification: Option<Arc<dyn IdentificationAdapter>>,
    ) -> Self {
        Self {
            registry: ClientRegistry::new(),
            connections: ConnectionManager::new(),
            dispatcher,
            identification,
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Processes events until every sender has been dropped.
    pub async fn run(mut self, mut events: UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(event) {
                match e {
                    ServerError::MalformedMessage(_) => warn!("{}", e),
                    _ => debug!("{}", e),
                }
            }
        }
        debug!("Dispatch loop finished");
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> Result<(), ServerError> {
        match event {
            TransportEvent::Connected {
                connection_id,
                remote_addr,
                sender,
            } => {
                self.on_connected(connection_id, remote_addr, sender);
                Ok(())
            }
            TransportEvent::Message { connection_id, text } => {
                self.on_message(connection_id, &text).map(|_| ())
            }
            TransportEvent::Disconnected { connection_id } => self.on_disconnected(connection_id),
        }
    }

    pub fn on_connected(
        &mut self,
        connection_id: ConnectionId,
        remote_addr: SocketAddr,
        sender: FrameSender,
    ) {
        self.connections.insert(connection_id, remote_addr, sender);
        self.registry.connect(connection_id);
        info!("New incoming connection {} from {}", connection_id, remote_addr);
    }

    /// Parses and dispatches one raw frame from `connection_id`.
    ///
    /// A malformed frame is rejected before any listener runs and nothing is
    /// sent back.
    pub fn on_message(
        &mut self,
        connection_id: ConnectionId,
        text: &str,
    ) -> Result<DispatchOutcome, ServerError> {
        if !self.registry.is_registered(&connection_id) {
            return Err(ServerError::NotFound(format!(
                "message from unregistered connection {connection_id}"
            )));
        }

        let envelope = Envelope::parse(text).map_err(|e| match e {
            ServerError::MalformedMessage(reason) => {
                ServerError::MalformedMessage(format!("from {connection_id}: {reason}"))
            }
            other => other,
        })?;

        let mut server = ServerHandle::new(
            &mut self.registry,
            &self.connections,
            self.identification.as_deref(),
            connection_id,
        );
        Ok(self.dispatcher.dispatch(&envelope, &mut server))
    }

    pub fn on_disconnected(&mut self, connection_id: ConnectionId) -> Result<(), ServerError> {
        let remote = self.connections.remove(&connection_id).map(|handle| handle.remote_addr);
        let removed_client = self.registry.disconnect(&connection_id)?;
        match remote {
            Some(addr) => info!("Connection {} from {} stopped", connection_id, addr),
            None => info!("Connection {} stopped", connection_id),
        }
        if removed_client {
            debug!("Last connection of a client closed; client removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FnListener;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    #[test]
    fn test_malformed_message_runs_no_listener() {
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Box::new(FnListener::new("count").on("x", move |_, _| {
            *counter.lock().unwrap() += 1;
            Ok(())
        })));

        let mut event_loop = DispatchLoop::new(dispatcher, None);
        let id = ConnectionId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        event_loop.on_connected(id, addr(), tx);

        for raw in [r#"{"event":"x"}"#, "[]", "garbage"] {
            let err = event_loop.on_message(id, raw).unwrap_err();
            assert!(matches!(err, ServerError::MalformedMessage(_)));
        }
        assert_eq!(*hits.lock().unwrap(), 0);
        assert!(drain(&mut rx).is_empty());

        let outcome = event_loop.on_message(id, r#"{"event":"x","data":{}}"#).unwrap();
        assert_eq!(outcome.invoked, 1);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_identify_and_disconnect_lifecycle() {
        let mut event_loop = DispatchLoop::new(Dispatcher::new(), None);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        event_loop.on_connected(a, addr(), tx_a);
        event_loop.on_connected(b, addr(), tx_b);

        event_loop
            .on_message(a, r#"{"event":"identify","data":{"identifier":"bob"}}"#)
            .unwrap();
        event_loop
            .on_message(b, r#"{"event":"identify","data":{"identifier":"Bob"}}"#)
            .unwrap();

        let identified = json!({"event": "identified", "data": {"identity": "bob"}});
        assert_eq!(drain(&mut rx_a), vec![identified.clone()]);
        assert_eq!(drain(&mut rx_b), vec![identified]);
        assert_eq!(event_loop.registry().get_client("bob").unwrap().connections(), &[a, b]);

        event_loop.on_message(b, r#"{"event":"current","data":{}}"#).unwrap();
        assert_eq!(event_loop.registry().get_client("bob").unwrap().active_connection(), Some(b));

        event_loop.on_disconnected(a).unwrap();
        assert!(event_loop.registry().has_client("bob"));
        event_loop.on_disconnected(b).unwrap();
        assert!(!event_loop.registry().has_client("bob"));
        assert!(event_loop.connections().is_empty());
    }

    #[test]
    fn test_message_from_unknown_connection() {
        let mut event_loop = DispatchLoop::new(Dispatcher::new(), None);
        let err = event_loop
            .on_message(ConnectionId::new(), r#"{"event":"x","data":{}}"#)
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[test]
    fn test_adapter_rejection_keeps_connection_anonymous() {
        let deny: Arc<dyn IdentificationAdapter> = Arc::new(|_: &str, _: &Value| false);
        let mut event_loop = DispatchLoop::new(Dispatcher::new(), Some(deny));
        let id = ConnectionId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        event_loop.on_connected(id, addr(), tx);

        event_loop
            .on_message(id, r#"{"event":"identify","data":{"identifier":"root"}}"#)
            .unwrap();

        assert!(!event_loop.registry().has_client("root"));
        assert!(event_loop.registry().has_client(&id.to_string()));
        assert_eq!(drain(&mut rx)[0]["event"], "identification_failed");
    }
}
