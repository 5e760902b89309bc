//! Transport glue: listening socket, connection tasks and the dispatch loop.

pub mod core;
pub mod event_loop;
pub mod handlers;

pub use core::SocketServer;
pub use event_loop::{DispatchLoop, TransportEvent};
pub use handlers::handle_connection;
