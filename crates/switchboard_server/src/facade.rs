//! The handle listeners receive while an event is being dispatched.
//!
//! A [`ServerHandle`] is scoped to one incoming message: it knows which
//! connection sent it, can reply to that connection, broadcast to others,
//! target a named client, and mutate the client registry.

use crate::connection::{Client, ClientRegistry, ConnectionId, ConnectionManager};
use crate::envelope::encode;
use crate::error::ServerError;
use crate::identification::IdentificationAdapter;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Gate evaluated before a broadcast.
pub type BroadcastFilter<'f> = &'f dyn Fn(&ServerHandle<'_>) -> bool;

/// Result of an identification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyOutcome {
    /// Connection is now bound to the client with this identifier.
    Identified(String),
    /// The identification adapter refused the claim.
    Rejected,
}

pub struct ServerHandle<'a> {
    registry: &'a mut ClientRegistry,
    connections: &'a ConnectionManager,
    identification: Option<&'a dyn IdentificationAdapter>,
    source: ConnectionId,
}

impl<'a> ServerHandle<'a> {
    pub fn new(
        registry: &'a mut ClientRegistry,
        connections: &'a ConnectionManager,
        identification: Option<&'a dyn IdentificationAdapter>,
        source: ConnectionId,
    ) -> Self {
        Self {
            registry,
            connections,
            identification,
            source,
        }
    }

    /// Connection that sent the message being dispatched.
    pub fn source(&self) -> ConnectionId {
        self.source
    }

    /// Sends `{event, data}` back to the source connection.
    ///
    /// # Errors
    ///
    /// [`ServerError::Serialization`] if `data` cannot be encoded, or
    /// [`ServerError::Transport`] if the source connection has gone away.
    pub fn reply<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<(), ServerError> {
        let frame = encode(event, data)?;
        self.connections.send_to_connection(&self.source, &frame)
    }

    /// Sends to every open connection, provided all `filters` pass.
    ///
    /// Every filter is evaluated, in order; the broadcast proceeds only if
    /// all of them returned `true`.
    ///
    /// # Arguments
    ///
    /// * `event` - Event name of the outgoing envelope
    /// * `data` - Payload, serialized once for all recipients
    /// * `filters` - Predicates over this handle, all of which must pass
    ///
    /// # Returns
    ///
    /// `false` when a filter rejected the broadcast, `true` otherwise.
    /// Connections whose writer has gone away are skipped.
    pub fn broadcast<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
        filters: &[BroadcastFilter<'_>],
    ) -> Result<bool, ServerError> {
        if !self.filters_pass(filters) {
            return Ok(false);
        }
        let frame = encode(event, data)?;
        let delivered = self.connections.broadcast_if(&frame, |_| true);
        debug!("Broadcast {} to {} connections", event, delivered);
        Ok(true)
    }

    /// Like [`broadcast`](Self::broadcast), but skips the source connection.
    pub fn broadcast_others<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
        filters: &[BroadcastFilter<'_>],
    ) -> Result<bool, ServerError> {
        if !self.filters_pass(filters) {
            return Ok(false);
        }
        let frame = encode(event, data)?;
        let delivered = self
            .connections
            .broadcast_if(&frame, |connection_id| *connection_id != self.source);
        debug!("Broadcast {} to {} other connections", event, delivered);
        Ok(true)
    }

    /// Sends to the connections of the client named `identifier`.
    ///
    /// With `active_only`, only the client's active connection is targeted.
    /// # Arguments
    ///
    /// * `identifier` - Target client, compared case-insensitively
    /// * `event` - Event name of the outgoing envelope
    /// * `data` - Payload to serialize
    /// * `active_only` - Target only the client's active connection
    ///
    /// # Returns
    ///
    /// `false` when there is no such client, or nothing could be queued.
    pub fn send_to<T: Serialize + ?Sized>(
        &self,
        identifier: &str,
        event: &str,
        data: &T,
        active_only: bool,
    ) -> Result<bool, ServerError> {
        let Ok(client) = self.registry.get_client(identifier) else {
            debug!("send_to: no client {}", identifier);
            return Ok(false);
        };

        let targets: Vec<ConnectionId> = if active_only {
            client.active_connection().into_iter().collect()
        } else {
            client.connections().to_vec()
        };

        let frame = encode(event, data)?;
        let mut delivered = 0;
        for connection_id in &targets {
            match self.connections.send_to_connection(connection_id, &frame) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("send_to {} skipped {}: {}", identifier, connection_id, e),
            }
        }
        Ok(delivered > 0)
    }

    /// Runs the identification protocol for the source connection.
    ///
    /// A claim refused by the identification adapter leaves the registry
    /// untouched and answers `identification_failed`. An accepted claim
    /// answers `identified` with the resulting identity.
    ///
    /// # Arguments
    ///
    /// * `claimed` - Requested identifier
    /// * `context` - Free-form data handed to the identification adapter
    ///
    /// # Errors
    ///
    /// Fails when the source connection is unknown to the registry or the
    /// answer cannot be queued.
    pub fn identify(
        &mut self,
        claimed: &str,
        context: &Value,
    ) -> Result<IdentifyOutcome, ServerError> {
        if let Some(adapter) = self.identification {
            if !adapter.identify(claimed, context) {
                info!("Identification as {} rejected for connection {}", claimed, self.source);
                self.reply(
                    "identification_failed",
                    &json!({"identifier": claimed, "reason": "rejected"}),
                )?;
                return Ok(IdentifyOutcome::Rejected);
            }
        }

        let identity = self
            .registry
            .identify(self.source, claimed)?
            .identifier()
            .to_string();
        info!("Connection {} identified as {}", self.source, identity);
        self.reply("identified", &json!({"identity": identity}))?;
        Ok(IdentifyOutcome::Identified(identity))
    }

    /// Marks the source connection as its client's active connection.
    pub fn set_active(&mut self) -> Result<(), ServerError> {
        self.registry.set_active(self.source)?;
        Ok(())
    }

    /// Client owning the source connection.
    pub fn current_client(&self) -> Result<&Client, ServerError> {
        self.registry.client_by_connection(&self.source)
    }

    pub fn current_client_mut(&mut self) -> Result<&mut Client, ServerError> {
        self.registry.client_by_connection_mut(&self.source)
    }

    pub fn client(&self, identifier: &str) -> Result<&Client, ServerError> {
        self.registry.get_client(identifier)
    }

    pub fn has_client(&self, identifier: &str) -> bool {
        self.registry.has_client(identifier)
    }

    pub fn registry(&self) -> &ClientRegistry {
        &*self.registry
    }

    fn filters_pass(&self, filters: &[BroadcastFilter<'_>]) -> bool {
        filters
            .iter()
            .map(|filter| filter(self))
            .fold(true, |all, passed| all && passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Fixture {
        registry: ClientRegistry,
        connections: ConnectionManager,
        ids: Vec<ConnectionId>,
        outbound: Vec<UnboundedReceiver<String>>,
    }

    impl Fixture {
        fn with_connections(count: usize) -> Self {
            let mut fixture = Self {
                registry: ClientRegistry::new(),
                connections: ConnectionManager::new(),
                ids: Vec::new(),
                outbound: Vec::new(),
            };
            for _ in 0..count {
                let id = ConnectionId::new();
                let (tx, rx) = mpsc::unbounded_channel();
                fixture.connections.insert(id, "127.0.0.1:50000".parse().unwrap(), tx);
                fixture.registry.connect(id);
                fixture.ids.push(id);
                fixture.outbound.push(rx);
            }
            fixture
        }

        fn handle(&mut self, source: usize) -> ServerHandle<'_> {
            ServerHandle::new(&mut self.registry, &self.connections, None, self.ids[source])
        }

        fn received(&mut self, index: usize) -> Vec<Value> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.outbound[index].try_recv() {
                frames.push(serde_json::from_str(&frame).unwrap());
            }
            frames
        }
    }

    #[test]
    fn test_reply_goes_to_source_only() {
        let mut fixture = Fixture::with_connections(2);
        fixture.handle(0).reply("pong", &json!({"n": 1})).unwrap();

        assert_eq!(fixture.received(0), vec![json!({"event": "pong", "data": {"n": 1}})]);
        assert!(fixture.received(1).is_empty());
    }

    #[test]
    fn test_broadcast_with_no_filters_reaches_everyone() {
        let mut fixture = Fixture::with_connections(3);
        assert!(fixture.handle(0).broadcast("news", &json!({}), &[]).unwrap());
        for index in 0..3 {
            assert_eq!(fixture.received(index).len(), 1);
        }
    }

    #[test]
    fn test_broadcast_filters_are_anded_and_all_evaluated() {
        let mut fixture = Fixture::with_connections(2);
        let calls = Cell::new(0);
        let yes: BroadcastFilter<'_> = &|_| {
            calls.set(calls.get() + 1);
            true
        };
        let no: BroadcastFilter<'_> = &|_| {
            calls.set(calls.get() + 1);
            false
        };

        let handle = fixture.handle(0);
        assert!(handle.broadcast("a", &json!({}), &[yes, yes]).unwrap());
        assert!(!handle.broadcast("b", &json!({}), &[no, yes]).unwrap());
        assert!(!handle.broadcast("c", &json!({}), &[yes, no]).unwrap());
        assert_eq!(calls.get(), 6);
        drop(handle);

        let frames = fixture.received(1);
        assert_eq!(frames, vec![json!({"event": "a", "data": {}})]);
    }

    #[test]
    fn test_broadcast_others_skips_source() {
        let mut fixture = Fixture::with_connections(3);
        assert!(fixture.handle(1).broadcast_others("hi", &json!({}), &[]).unwrap());

        assert_eq!(fixture.received(0).len(), 1);
        assert!(fixture.received(1).is_empty());
        assert_eq!(fixture.received(2).len(), 1);
    }

    #[test]
    fn test_send_to_all_or_active_connection() {
        let mut fixture = Fixture::with_connections(3);
        let (a, b) = (fixture.ids[0], fixture.ids[1]);
        fixture.registry.identify(a, "bob").unwrap();
        fixture.registry.identify(b, "bob").unwrap();
        fixture.registry.set_active(b).unwrap();

        let handle = fixture.handle(2);
        assert!(handle.send_to("BOB", "all", &json!({}), false).unwrap());
        assert!(handle.send_to("bob", "active", &json!({}), true).unwrap());
        assert!(!handle.send_to("nobody", "lost", &json!({}), false).unwrap());
        drop(handle);

        assert_eq!(fixture.received(0), vec![json!({"event": "all", "data": {}})]);
        assert_eq!(
            fixture.received(1),
            vec![
                json!({"event": "all", "data": {}}),
                json!({"event": "active", "data": {}})
            ]
        );
        assert!(fixture.received(2).is_empty());
    }

    #[test]
    fn test_rejected_identification_leaves_registry_untouched() {
        let mut fixture = Fixture::with_connections(1);
        let source = fixture.ids[0];
        let deny = |_: &str, _: &Value| false;
        let mut handle =
            ServerHandle::new(&mut fixture.registry, &fixture.connections, Some(&deny), source);

        let outcome = handle.identify("mallory", &json!({})).unwrap();
        assert_eq!(outcome, IdentifyOutcome::Rejected);
        assert!(!handle.has_client("mallory"));
        assert!(handle.has_client(&source.to_string()));

        assert_eq!(
            fixture.received(0),
            vec![json!({
                "event": "identification_failed",
                "data": {"identifier": "mallory", "reason": "rejected"}
            })]
        );
    }

    #[test]
    fn test_identification_adapter_sees_context() {
        let mut fixture = Fixture::with_connections(1);
        let source = fixture.ids[0];
        let token_check = |_: &str, context: &Value| context["token"] == "secret";
        let mut handle = ServerHandle::new(
            &mut fixture.registry,
            &fixture.connections,
            Some(&token_check),
            source,
        );

        assert_eq!(
            handle.identify("alice", &json!({"token": "secret"})).unwrap(),
            IdentifyOutcome::Identified("alice".to_string())
        );
        assert_eq!(handle.current_client().unwrap().identifier(), "alice");
    }
}
