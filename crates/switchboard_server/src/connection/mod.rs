//! Connection management for client connections.
//!
//! This module holds the physical side of the engine (connection ids and
//! their outbound channels) and the logical side (clients and the registry
//! binding connections to them).

pub mod client;
pub mod manager;
pub mod registry;

pub use client::Client;
pub use manager::ConnectionManager;
pub use registry::ClientRegistry;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of one physical connection.
///
/// The textual form is a lower-case hyphenated UUID, which also serves as
/// the initial identifier of the anonymous client opened for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
