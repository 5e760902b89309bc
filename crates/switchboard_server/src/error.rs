//! Error types for the switchboard engine.
//!
//! [`ServerError`] covers every failure the engine surfaces to embedders and
//! to listener code. [`HandlerError`] is what a listener callback returns;
//! the dispatcher logs it and moves on to the next listener.

use thiserror::Error;

/// Errors produced by the registry, dispatcher, facade and transport glue.
#[derive(Error, Debug)]
pub enum ServerError {
    /// An envelope failed structural validation.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A configured listener could not be resolved into an instance.
    #[error("Invalid listener: {0}")]
    InvalidListener(String),

    /// A client or connection lookup found nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The listening socket could not be created or bound.
    #[error("Transport bind failure: {0}")]
    TransportBind(String),

    /// Sending to, or receiving from, a connection failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization of an outgoing envelope failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid server configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error returned by a listener callback.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A server operation invoked by the handler failed.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The handler could not (de)serialize its payload.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Handler-specific failure.
    #[error("Handler execution error: {0}")]
    Execution(String),
}

/// Result type for listener callbacks.
pub type HandlerResult = Result<(), HandlerError>;
