//! PawfectMatch Socket - resilient realtime connection manager.
//!
//! This crate owns the single logical duplex connection between the client
//! and the realtime chat backend:
//! - Connection lifecycle state machine (disconnected/connecting/connected/
//!   reconnecting/failed)
//! - Automatic reconnection with capped exponential backoff
//! - TTL-bounded outbound message queue for outage buffering
//! - Heartbeat liveness probes with latency diagnostics
//! - Named-event dispatch and broadcast status notifications
//!
//! The underlying transport is injected behind the [`Transport`] trait; the
//! transport's own reconnection machinery must be disabled so that retry
//! policy lives in exactly one place.

pub mod events;
pub mod global;
pub mod heartbeat;
pub mod manager;
pub mod queue;
pub mod reconnect;
pub mod transport;

// Re-export key types
pub use events::{
    ConnectionStatus, EventDispatcher, ListenerId, StatusBroadcaster, StatusEvent, StatusKind,
};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use manager::{ConnectionState, SocketManager};
pub use queue::{OutboxQueue, QueueConfig, QueueEntry, QueueStats};
pub use reconnect::ReconnectPolicy;
pub use transport::{
    AuthPayload, CloseReason, Connection, OpenOptions, Transport, TransportError,
    TransportEvent, TransportHandle,
};
