//! Core socket server implementation.
//!
//! [`SocketServer`] binds the listening socket, accepts connections and
//! feeds them to the dispatch loop until a shutdown signal arrives.

use super::event_loop::DispatchLoop;
use super::handlers::handle_connection;
use crate::config::{BindProtocol, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::identification::IdentificationAdapter;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use std::time::Duration;
use tracing::{error, info, warn};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// The WebSocket event server.
///
/// Owns the configured [`Dispatcher`] until [`serve`](Self::serve) hands it
/// to the dispatch loop. Shutdown is requested through the channel returned
/// by [`shutdown_sender`](Self::shutdown_sender).
pub struct SocketServer {
    /// Server configuration settings
    config: ServerConfig,

    /// Listeners, core listener first
    dispatcher: Dispatcher,

    /// Optional gate for `identify` requests
    identification: Option<Arc<dyn IdentificationAdapter>>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
    shutdown_receiver: broadcast::Receiver<()>,
}

impl SocketServer {
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        let (shutdown_sender, shutdown_receiver) = broadcast::channel(1);
        Self {
            config,
            dispatcher,
            identification: None,
            shutdown_sender,
            shutdown_receiver,
        }
    }

    pub fn with_identification(mut self, adapter: Arc<dyn IdentificationAdapter>) -> Self {
        self.identification = Some(adapter);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Sending half of the shutdown channel. Sending `()` stops the accept
    /// loop; open connections are dropped.
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    /// Creates the listening socket.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        if self.config.protocol == BindProtocol::Wss {
            return Err(ServerError::TransportBind(
                "TLS termination is not built in; bind with tcp or ws behind a TLS proxy"
                    .to_string(),
            ));
        }

        let addr = self.config.socket_addr()?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::TransportBind(format!("Socket creation failed: {e}")))?;
        socket.set_reuse_address(true).ok();

        socket
            .bind(&addr.into())
            .map_err(|e| ServerError::TransportBind(format!("Bind to {addr} failed: {e}")))?;
        socket
            .listen(1024)
            .map_err(|e| ServerError::TransportBind(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::TransportBind(format!("Cannot set non-blocking mode: {e}")))?;

        TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::TransportBind(format!("Tokio listener creation failed: {e}")))
    }

    /// Binds and serves until shutdown.
    pub async fn start(self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accepts connections on `listener` until shutdown is requested.
    ///
    /// Accept failures are logged and retried after a short pause; only the
    /// shutdown channel ends the loop.
    ///
    /// # Arguments
    ///
    /// * `listener` - A socket obtained from [`bind`](Self::bind)
    ///
    /// # Returns
    ///
    /// `Ok(())` after shutdown, or `Err(ServerError::Transport)` when the
    /// listener's local address cannot be read.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("Cannot read local address: {e}")))?;
        info!("Listening on {}://{}", self.config.protocol, local_addr);

        let Self {
            config,
            dispatcher,
            identification,
            shutdown_sender: _,
            mut shutdown_receiver,
        } = self;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatch_loop = DispatchLoop::new(dispatcher, identification);
        let dispatch_task = tokio::spawn(dispatch_loop.run(events_rx));

        let open_connections = Arc::new(AtomicUsize::new(0));
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if open_connections.load(Ordering::Acquire) >= config.max_connections {
                            warn!(
                                "Refusing connection from {}: limit of {} reached",
                                addr, config.max_connections
                            );
                            continue;
                        }
                        open_connections.fetch_add(1, Ordering::AcqRel);

                        let events = events_tx.clone();
                        let open_connections = Arc::clone(&open_connections);
                        tokio::spawn(async move {
                            handle_connection(stream, addr, events).await;
                            open_connections.fetch_sub(1, Ordering::AcqRel);
                        });
                    }
                    Err(e) => {
                        // Errors such as EMFILE leave the pending connection queued;
                        // back off instead of spinning on it.
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        dispatch_task.abort();
        info!("Server stopped");
        Ok(())
    }
}
