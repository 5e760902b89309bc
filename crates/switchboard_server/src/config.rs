//! Server configuration types and defaults.
//!
//! This module contains the binding configuration consumed by
//! [`SocketServer`](crate::SocketServer). Loading it from disk is the job of
//! the embedding application.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// Protocol scheme the server binds with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindProtocol {
    /// Plain TCP socket carrying WebSocket frames.
    Tcp,
    /// WebSocket over plain TCP.
    Ws,
    /// WebSocket over TLS.
    Wss,
}

impl BindProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindProtocol::Tcp => "tcp",
            BindProtocol::Ws => "ws",
            BindProtocol::Wss => "wss",
        }
    }
}

impl fmt::Display for BindProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindProtocol {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(BindProtocol::Tcp),
            "ws" => Ok(BindProtocol::Ws),
            "wss" => Ok(BindProtocol::Wss),
            other => Err(ServerError::Config(format!(
                "Forbidden protocol value \"{other}\". Allowed values are: tcp, ws and wss"
            ))),
        }
    }
}

/// Configuration structure for the socket server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Scheme used for the listening socket
    pub protocol: BindProtocol,

    /// Host name or IP address to bind to
    pub bind_address: String,

    /// TCP port to bind to (0 lets the OS pick one)
    pub port: u16,

    /// Maximum number of concurrently open connections
    pub max_connections: usize,
}

impl ServerConfig {
    /// Human-readable binding URI, e.g. `ws://127.0.0.1:8889`.
    pub fn binding(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.bind_address, self.port)
    }

    /// Resolves the bind address and port into a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        (self.bind_address.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                ServerError::TransportBind(format!(
                    "cannot resolve {}:{}: {e}",
                    self.bind_address, self.port
                ))
            })?
            .next()
            .ok_or_else(|| {
                ServerError::TransportBind(format!(
                    "no address found for {}:{}",
                    self.bind_address, self.port
                ))
            })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: BindProtocol::Ws,
            bind_address: "127.0.0.1".to_string(),
            port: 8889,
            max_connections: 1000,
        }
    }
}
