//! Transport layer boundary.
//!
//! The manager does not speak any wire protocol itself. It drives an injected
//! [`Transport`] that opens authenticated duplex connections and surfaces
//! incoming traffic as [`TransportEvent`]s on an mpsc channel. Production
//! hosts supply a Socket.IO/WebSocket-backed implementation; tests supply a
//! scriptable fake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Authentication data passed to the transport on open.
#[derive(Debug, Clone)]
pub struct AuthPayload {
    /// Identity of the connecting user.
    pub user_id: String,
    /// Bearer token presented to the server.
    pub token: String,
}

/// Options for opening a transport connection.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Authentication data.
    pub auth: AuthPayload,
    /// Whether the transport may run its own reconnection loop.
    ///
    /// Always `false` here: reconnection is owned solely by the manager's
    /// controller, so the transport must not race it with a second retry
    /// loop.
    pub reconnection: bool,
    /// Timeout for the open handshake.
    pub timeout: Duration,
}

impl OpenOptions {
    pub fn new(user_id: &str, token: &str, timeout: Duration) -> Self {
        Self {
            auth: AuthPayload {
                user_id: user_id.to_string(),
                token: token.to_string(),
            },
            reconnection: false,
            timeout,
        }
    }
}

/// Why a live connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server ended the connection (treated as transient).
    Server(String),
    /// The transport itself failed (network drop, protocol error).
    Transport(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server(reason) => write!(f, "server closed: {reason}"),
            Self::Transport(reason) => write!(f, "transport closed: {reason}"),
        }
    }
}

/// Events surfaced by a live connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An incoming named event with its payload.
    Message {
        event: String,
        payload: Value,
    },
    /// The connection closed.
    Closed {
        reason: CloseReason,
    },
    /// A non-fatal runtime error (e.g., a malformed incoming frame).
    Error {
        message: String,
    },
}

/// Errors produced by the transport layer.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The server rejected the presented credentials. Terminal for the
    /// current attempt chain; retrying with the same token is pointless.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The server could not be reached. Transient.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// Sending on a live handle failed.
    #[error("send failed: {0}")]
    Send(String),

    /// The handle is already closed.
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether a failed open may be retried with the same credentials.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Auth(_))
    }
}

/// A live duplex connection handle.
///
/// Exactly one handle is live per manager at any time; the manager tears down
/// the previous handle before opening a new one.
pub trait TransportHandle: Send + Sync + std::fmt::Debug {
    /// Send a named event with a payload.
    fn send(&self, event: &str, payload: &Value) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    fn close(&self);

    /// Server-assigned connection identifier, when available.
    fn socket_id(&self) -> Option<String>;
}

/// A freshly opened connection: the handle plus its incoming event stream.
pub struct Connection {
    /// Handle for outbound traffic and teardown.
    pub handle: Arc<dyn TransportHandle>,
    /// Incoming events. The channel closes when the connection dies.
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Factory for opening authenticated duplex connections.
///
/// `open` resolves once the connection is established (the transport's "open"
/// callback) or fails with the handshake error ("connect_error").
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str, options: OpenOptions) -> Result<Connection, TransportError>;
}
