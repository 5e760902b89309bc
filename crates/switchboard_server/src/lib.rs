//! # Switchboard Server - Connection Identity and Event Dispatch
//!
//! The engine behind the Switchboard WebSocket event server. It accepts many
//! concurrent WebSocket connections, tracks which logical client owns which
//! physical connection, and routes incoming `{event, data}` envelopes to
//! listeners by naming convention.
//!
//! ## Architecture Overview
//!
//! * **Transport** - [`SocketServer`] binds the socket and spawns one task per
//!   connection. Connection tasks only move frames.
//! * **Dispatch loop** - a single task owns the [`ClientRegistry`], the
//!   outbound [`ConnectionManager`] and the [`Dispatcher`]; every connect,
//!   message and disconnect is processed there, one at a time.
//! * **Dispatcher** - maps `chat.message` to `onChatMessage` and invokes every
//!   [`Listener`] declaring that selector, in registration order.
//! * **Server facade** - listeners receive a [`ServerHandle`] to reply,
//!   broadcast, target a named client, or identify the calling connection.
//!
//! ### Message Flow
//!
//! 1. Client sends `{"event": "chat.message", "data": {...}}`
//! 2. The envelope is validated; malformed frames are logged and dropped
//! 3. The event name is turned into a selector and matching listeners run
//! 4. Listeners answer through the [`ServerHandle`]
//!
//! ## Identification
//!
//! Every connection starts as an anonymous client named after its
//! connection id. The built-in `identify` event binds the connection to a
//! named client, merging it into an existing client of that name (so one
//! client may hold many connections) or renaming the anonymous one. An
//! optional [`IdentificationAdapter`] may refuse the claim.
//!
//! ```rust,no_run
//! use switchboard_server::{Dispatcher, FnListener, ServerConfig, SocketServer};
//!
//! # async fn run() -> Result<(), switchboard_server::ServerError> {
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register(Box::new(FnListener::new("chat").on("chat.message", |data, server| {
//!     server.broadcast_others("chat.message", data, &[])?;
//!     Ok(())
//! })));
//!
//! SocketServer::new(ServerConfig::default(), dispatcher).start().await
//! # }
//! ```

// Re-export core types and functions for easy access
pub use config::{BindProtocol, ServerConfig};
pub use connection::{Client, ClientRegistry, ConnectionId, ConnectionManager};
pub use dispatch::{
    selector_for, CoreListener, DispatchOutcome, Dispatcher, FnListener, Listener, ListenerCatalog,
    ListenerFactory, ListenerProvider,
};
pub use envelope::Envelope;
pub use error::{HandlerError, HandlerResult, ServerError};
pub use facade::{BroadcastFilter, IdentifyOutcome, ServerHandle};
pub use identification::IdentificationAdapter;
pub use server::{DispatchLoop, SocketServer, TransportEvent};

// Public module declarations
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod identification;
pub mod server;
