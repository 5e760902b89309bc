//! Logical client representation.
//!
//! A [`Client`] is one identity that may hold several simultaneous
//! connections (for example one per browser tab).

use super::ConnectionId;
use crate::error::ServerError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// A logical party bound to one or more physical connections.
#[derive(Debug, Clone)]
pub struct Client {
    identifier: String,
    connections: Vec<ConnectionId>,
    active_connection: Option<ConnectionId>,
    properties: Map<String, Value>,
}

impl Client {
    /// Creates a client owning a single connection, marked active.
    pub fn new(identifier: impl Into<String>, connection_id: ConnectionId) -> Self {
        Self {
            identifier: identifier.into(),
            connections: vec![connection_id],
            active_connection: Some(connection_id),
            properties: Map::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn set_identifier(&mut self, identifier: impl Into<String>) {
        self.identifier = identifier.into();
    }

    /// Bound connections, in the order they joined.
    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }

    pub fn has_connection(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains(connection_id)
    }

    pub fn active_connection(&self) -> Option<ConnectionId> {
        self.active_connection
    }

    pub(crate) fn add_connection(&mut self, connection_id: ConnectionId) {
        if !self.has_connection(&connection_id) {
            self.connections.push(connection_id);
        }
    }

    /// Unbinds a connection. An active connection that is removed leaves the
    /// client with no active connection.
    pub(crate) fn remove_connection(&mut self, connection_id: &ConnectionId) -> bool {
        let before = self.connections.len();
        self.connections.retain(|id| id != connection_id);
        if self.active_connection.as_ref() == Some(connection_id) {
            self.active_connection = None;
        }
        self.connections.len() != before
    }

    pub(crate) fn set_active(&mut self, connection_id: ConnectionId) -> Result<(), ServerError> {
        if !self.has_connection(&connection_id) {
            return Err(ServerError::NotFound(format!(
                "connection {connection_id} is not bound to client {}",
                self.identifier
            )));
        }
        self.active_connection = Some(connection_id);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// Attaches arbitrary metadata. `identifier` is reserved and ignored.
    pub fn set_property(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if name != "identifier" {
            self.properties.insert(name, value);
        }
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }
}

/// Serializes as `{"identifier": ..., <properties>...}`.
impl Serialize for Client {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.properties.len() + 1))?;
        map.serialize_entry("identifier", &self.identifier)?;
        for (name, value) in &self.properties {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
