//! Event dispatch and status notifications.
//!
//! Two distinct surfaces live here. The [`EventDispatcher`] routes incoming
//! named transport events to application callbacks (`on`/`once`/`off`). The
//! [`StatusBroadcaster`] fans out the manager's own lifecycle notifications
//! (connected, reconnected, failed, ...) so UI layers can react without
//! holding a reference to the manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Handle for deregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Application callback for a named event.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

struct RegisteredListener {
    id: ListenerId,
    callback: EventCallback,
    once: bool,
}

/// Registry of application listeners keyed by event name.
///
/// Dispatch is synchronous fan-out in registration order. `once` listeners
/// are removed after their first invocation.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    listeners: Arc<Mutex<HashMap<String, Vec<RegisteredListener>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `event`.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(callback), false)
    }

    /// Register a listener that fires at most once.
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(callback), true)
    }

    fn register(&self, event: &str, callback: EventCallback, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners
            .entry(event.to_string())
            .or_default()
            .push(RegisteredListener { id, callback, once });
        id
    }

    /// Deregister a specific listener, or all listeners for `event` when no
    /// id is given.
    pub fn off(&self, event: &str, id: Option<ListenerId>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        match id {
            Some(id) => {
                if let Some(entries) = listeners.get_mut(event) {
                    entries.retain(|l| l.id != id);
                    if entries.is_empty() {
                        listeners.remove(event);
                    }
                }
            }
            None => {
                listeners.remove(event);
            }
        }
    }

    /// Invoke all listeners registered for `event`.
    pub fn dispatch(&self, event: &str, payload: &Value) {
        // Snapshot callbacks outside the lock so a listener may re-enter the
        // registry (e.g. call `off`) without deadlocking.
        let callbacks: Vec<EventCallback> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entries) = listeners.get_mut(event) else {
                debug!("no listeners for event {event}");
                return;
            };
            let callbacks = entries.iter().map(|l| Arc::clone(&l.callback)).collect();
            entries.retain(|l| !l.once);
            if entries.is_empty() {
                listeners.remove(event);
            }
            callbacks
        };

        debug!("dispatching {event} to {} listener(s)", callbacks.len());
        for callback in callbacks {
            callback(payload);
        }
    }

    /// Number of listeners currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.get(event).map_or(0, Vec::len)
    }
}

/// Serializable snapshot of the manager's connection state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether a live connection exists.
    pub connected: bool,
    /// Whether an attempt (initial or retry) is in flight.
    pub connecting: bool,
    /// Consecutive failed attempts in the current chain.
    pub reconnect_attempts: u32,
    /// Identity of the current/last connected user.
    pub user_id: Option<String>,
    /// Server-assigned connection identifier.
    pub socket_id: Option<String>,
    /// Outbound messages buffered for the next flush.
    pub queued_messages: usize,
}

/// Kind of lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// A connection was established.
    Connected,
    /// A connection was re-established after a drop.
    Reconnected,
    /// The live connection was lost or explicitly closed.
    Disconnected,
    /// Reconnection attempts were exhausted; terminal until a new connect.
    Failed,
    /// The server rejected the credentials; terminal until fresh ones arrive.
    AuthError,
    /// A non-fatal runtime error on the live connection.
    SocketError,
    /// A buffered message was dropped (stale past TTL or capacity eviction).
    QueueDropped,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Reconnected => "reconnected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::AuthError => "auth_error",
            Self::SocketError => "socket_error",
            Self::QueueDropped => "queue_dropped",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lifecycle notification with its status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    /// What happened.
    pub kind: StatusKind,
    /// Manager state at the moment of the transition.
    pub status: ConnectionStatus,
    /// Optional human-readable context (error message, dropped event name).
    pub detail: Option<String>,
}

/// Callback sink for projecting status events onto a host-global channel.
pub type StatusSink = Arc<dyn Fn(&StatusEvent) + Send + Sync>;

/// Broadcast fan-out of [`StatusEvent`]s.
///
/// Subscribers get every event in transition order. Slow subscribers that
/// fall behind receive a `Lagged` error and may miss events, which is
/// acceptable for UI-driven consumers. An optional sink callback mirrors
/// every event onto a host-provided global bus.
#[derive(Clone)]
pub struct StatusBroadcaster {
    sender: broadcast::Sender<StatusEvent>,
    sink: Arc<Mutex<Option<StatusSink>>>,
}

impl StatusBroadcaster {
    /// Create a broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribe to receive status events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    /// Install (or remove) the global projection sink.
    pub fn set_sink(&self, sink: Option<StatusSink>) {
        let mut slot = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        *slot = sink;
    }

    /// Publish an event to all subscribers and the sink.
    pub fn publish(&self, event: StatusEvent) {
        if let Some(sink) = self
            .sink
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            sink(&event);
        }

        let kind = event.kind;
        match self.sender.send(event) {
            Ok(count) => debug!("status {kind} delivered to {count} subscriber(s)"),
            Err(_) => debug!("no subscribers for status {kind}"),
        }
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receive status events until `kind` arrives or the timeout elapses.
///
/// Test helper kept public so integration tests and host diagnostics can
/// await a specific transition.
pub async fn wait_for_status(
    rx: &mut broadcast::Receiver<StatusEvent>,
    kind: StatusKind,
    timeout: Duration,
) -> Option<StatusEvent> {
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if event.kind == kind => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
