//! Client registry and the identification state machine.
//!
//! The registry binds every open connection to exactly one [`Client`].
//! Clients are keyed by their lower-cased identifier, so two identifiers
//! differing only in case always refer to the same client. A client whose
//! last connection goes away is dropped immediately.
//!
//! The registry is owned by the dispatch loop and is only mutated from
//! inside transport callbacks and listener dispatch, so it needs no locking.

use super::{Client, ConnectionId};
use crate::error::ServerError;
use std::collections::HashMap;
use tracing::debug;

fn normalize(identifier: &str) -> String {
    identifier.to_lowercase()
}

/// Maps logical clients to the physical connections bound to them.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    /// Clients keyed by normalized identifier
    clients: HashMap<String, Client>,
    /// Normalized identifier of the client owning each connection
    owners: HashMap<ConnectionId, String>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly opened connection under an anonymous client whose
    /// identifier is the connection id.
    pub fn connect(&mut self, connection_id: ConnectionId) -> &Client {
        let identifier = connection_id.to_string();
        let key = normalize(&identifier);

        if let Some(previous) = self.owners.get(&connection_id).cloned() {
            self.detach(&connection_id, &previous);
        }

        self.owners.insert(connection_id, key.clone());
        self.clients
            .entry(key)
            .and_modify(|client| client.add_connection(connection_id))
            .or_insert_with(|| Client::new(identifier, connection_id))
    }

    /// Binds `connection_id` to the client named `claimed`.
    ///
    /// If a client with that identifier already exists the connection is
    /// moved into it, and the client it leaves is dropped once empty. If not,
    /// the connection's current client is renamed in place, or, when that
    /// client still holds other connections, the connection is split off
    /// into a new client carrying the claimed identifier.
    ///
    /// Repeating the call with the same identifier is a no-op.
    ///
    /// # Arguments
    ///
    /// * `connection_id` - A connection previously passed to [`connect`](Self::connect)
    /// * `claimed` - The identifier to bind to, compared case-insensitively
    ///
    /// # Returns
    ///
    /// The client now owning the connection.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotFound`] when the connection is not registered.
    pub fn identify(
        &mut self,
        connection_id: ConnectionId,
        claimed: &str,
    ) -> Result<&Client, ServerError> {
        let key = normalize(claimed);
        let current_key = self.owner_key(&connection_id)?.to_string();

        if current_key != key {
            if let Some(target) = self.clients.get_mut(&key) {
                target.add_connection(connection_id);
                self.detach(&connection_id, &current_key);
                debug!("Connection {} joined client {}", connection_id, claimed);
            } else if self.client_len(&current_key) == 1 {
                if let Some(mut client) = self.clients.remove(&current_key) {
                    client.set_identifier(claimed);
                    self.clients.insert(key.clone(), client);
                }
                debug!("Client {} renamed to {}", current_key, claimed);
            } else {
                self.detach(&connection_id, &current_key);
                self.clients
                    .insert(key.clone(), Client::new(claimed, connection_id));
                debug!("Connection {} split from {} into {}", connection_id, current_key, claimed);
            }
            self.owners.insert(connection_id, key.clone());
        }

        self.get_client(&key)
    }

    /// Marks `connection_id` as the active connection of its client.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotFound`] when the connection is not registered.
    pub fn set_active(&mut self, connection_id: ConnectionId) -> Result<&Client, ServerError> {
        let client = self.client_by_connection_mut(&connection_id)?;
        client.set_active(connection_id)?;
        Ok(client)
    }

    /// Unbinds a closed connection.
    ///
    /// Returns `true` when this removed the owning client altogether. The
    /// active connection is not reassigned.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotFound`] when the connection was never registered
    /// or has already been disconnected.
    pub fn disconnect(&mut self, connection_id: &ConnectionId) -> Result<bool, ServerError> {
        let key = self.owners.remove(connection_id).ok_or_else(|| {
            ServerError::NotFound(format!("connection {connection_id} is not registered"))
        })?;
        Ok(self.detach(connection_id, &key))
    }

    pub fn has_client(&self, identifier: &str) -> bool {
        self.clients.contains_key(&normalize(identifier))
    }

    /// Looks up a client by identifier, ignoring case.
    pub fn get_client(&self, identifier: &str) -> Result<&Client, ServerError> {
        self.clients
            .get(&normalize(identifier))
            .ok_or_else(|| ServerError::NotFound(format!("client {identifier} is not registered")))
    }

    pub fn get_client_mut(&mut self, identifier: &str) -> Result<&mut Client, ServerError> {
        self.clients
            .get_mut(&normalize(identifier))
            .ok_or_else(|| ServerError::NotFound(format!("client {identifier} is not registered")))
    }

    /// Client owning `connection_id`.
    pub fn client_by_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<&Client, ServerError> {
        let key = self.owner_key(connection_id)?;
        self.get_client(key)
    }

    pub fn client_by_connection_mut(
        &mut self,
        connection_id: &ConnectionId,
    ) -> Result<&mut Client, ServerError> {
        let key = self.owner_key(connection_id)?.to_string();
        self.get_client_mut(&key)
    }

    pub fn is_registered(&self, connection_id: &ConnectionId) -> bool {
        self.owners.contains_key(connection_id)
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.owners.len()
    }

    fn owner_key(&self, connection_id: &ConnectionId) -> Result<&str, ServerError> {
        self.owners
            .get(connection_id)
            .map(String::as_str)
            .ok_or_else(|| {
                ServerError::NotFound(format!("connection {connection_id} is not registered"))
            })
    }

    fn client_len(&self, key: &str) -> usize {
        self.clients.get(key).map_or(0, |client| client.connections().len())
    }

    /// Removes `connection_id` from the client stored under `key`, dropping
    /// the client if it ends up empty. Returns whether the client was dropped.
    fn detach(&mut self, connection_id: &ConnectionId, key: &str) -> bool {
        let Some(client) = self.clients.get_mut(key) else {
            return false;
        };
        client.remove_connection(connection_id);
        if client.is_empty() {
            self.clients.remove(key);
            debug!("Client {} removed", key);
            true
        } else {
            false
        }
    }
}
