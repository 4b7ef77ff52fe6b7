//! Connection state machine.
//!
//! Owns the single transport handle and drives the lifecycle:
//! `Disconnected -> Connecting -> Connected`, back through `Reconnecting` on
//! recoverable failure, and into the terminal `Failed` once attempts are
//! exhausted. All other components (queue, heartbeat, reconnection policy,
//! dispatch) are coordinated from here; nothing else mutates the state.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, warn};

use pm_core::constants;
use pm_core::credentials::CredentialStore;
use pm_core::error::{PmError, PmResult};

use crate::events::{
    ConnectionStatus, EventDispatcher, ListenerId, StatusBroadcaster, StatusEvent, StatusKind,
};
use crate::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::queue::{OutboxQueue, QueueConfig};
use crate::reconnect::ReconnectPolicy;
use crate::transport::{
    OpenOptions, Transport, TransportError, TransportEvent, TransportHandle,
};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// An open attempt is in flight.
    Connecting,
    /// Connected and exchanging events.
    Connected,
    /// Connection lost or attempt failed; a retry is scheduled.
    Reconnecting,
    /// Attempts exhausted or credentials rejected. Terminal until a new
    /// explicit connect.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Stored identity for the current connection chain.
#[derive(Debug, Clone)]
struct Identity {
    user_id: String,
    /// Cleared when the server rejects it, so a scheduled reconnection falls
    /// back to the credential store instead of replaying a bad token.
    token: Option<String>,
}

/// Why a connect chain ended without a connection.
#[derive(Debug, Clone)]
enum TerminalFailure {
    Auth(String),
    Exhausted(u32),
    MissingCredentials,
}

impl TerminalFailure {
    fn to_error(&self) -> PmError {
        match self {
            Self::Auth(msg) => PmError::AuthFailed(msg.clone()),
            Self::Exhausted(attempts) => PmError::ReconnectExhausted { attempts: *attempts },
            Self::MissingCredentials => PmError::MissingCredentials,
        }
    }
}

enum ConnectRole {
    /// This caller owns the attempt chain.
    Drive,
    /// Another attempt is in flight; await its outcome.
    Join,
    /// Already connected as the requested user.
    Reuse(Arc<dyn TransportHandle>),
    /// Connected as a different user; tear down and start over.
    Replace,
}

/// Resilient realtime connection manager.
///
/// Cheap to clone; all clones share the same connection. Exactly one
/// transport handle is live at any time, and concurrent `connect` calls
/// coalesce onto the single in-flight attempt.
#[derive(Clone)]
pub struct SocketManager {
    url: String,
    connect_timeout: Duration,
    transport: Arc<dyn Transport>,
    credentials: Option<Arc<dyn CredentialStore>>,
    policy: ReconnectPolicy,
    heartbeat: HeartbeatConfig,
    state: Arc<Mutex<ConnectionState>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    identity: Arc<Mutex<Option<Identity>>>,
    attempts: Arc<Mutex<u32>>,
    /// Session generation. Bumped by every disconnect and every new connect
    /// chain; timers and tasks from an older generation become no-ops.
    generation: Arc<AtomicU64>,
    handle: Arc<Mutex<Option<Arc<dyn TransportHandle>>>>,
    outbox: OutboxQueue,
    dispatcher: EventDispatcher,
    status: StatusBroadcaster,
    last_failure: Arc<Mutex<Option<TerminalFailure>>>,
    disconnect_notify: Arc<Notify>,
    pump_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    retry_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SocketManager {
    /// Create a manager for the given server URL and transport.
    pub fn new(url: &str, transport: Arc<dyn Transport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            url: url.to_string(),
            connect_timeout: Duration::from_millis(constants::DEFAULT_CONNECT_TIMEOUT_MS),
            transport,
            credentials: None,
            policy: ReconnectPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            state_tx: Arc::new(state_tx),
            identity: Arc::new(Mutex::new(None)),
            attempts: Arc::new(Mutex::new(0)),
            generation: Arc::new(AtomicU64::new(0)),
            handle: Arc::new(Mutex::new(None)),
            outbox: OutboxQueue::new(QueueConfig::default()),
            dispatcher: EventDispatcher::new(),
            status: StatusBroadcaster::new(64),
            last_failure: Arc::new(Mutex::new(None)),
            disconnect_notify: Arc::new(Notify::new()),
            pump_task: Arc::new(Mutex::new(None)),
            retry_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Set a custom reconnection policy.
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set a custom heartbeat configuration.
    pub fn with_heartbeat_config(mut self, config: HeartbeatConfig) -> Self {
        self.heartbeat = config;
        self
    }

    /// Set a custom queue policy.
    pub fn with_queue_config(mut self, config: QueueConfig) -> Self {
        self.outbox = OutboxQueue::new(config);
        self
    }

    /// Set the credential store consulted by scheduled reconnections.
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Set the open-handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    // ---- Observation ----

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// Subscribe to lifecycle state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to status notifications.
    pub fn subscribe_status(&self) -> tokio::sync::broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    /// Install (or remove) the host-global status projection sink.
    pub fn set_status_sink(&self, sink: Option<crate::events::StatusSink>) {
        self.status.set_sink(sink);
    }

    /// The event dispatcher (for advanced listener management).
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Snapshot of the connection status.
    pub async fn status(&self) -> ConnectionStatus {
        let state = *self.state.lock().await;
        let user_id = self.identity.lock().await.as_ref().map(|i| i.user_id.clone());
        let socket_id = self
            .handle
            .lock()
            .await
            .as_ref()
            .and_then(|h| h.socket_id());
        ConnectionStatus {
            connected: state == ConnectionState::Connected,
            connecting: matches!(
                state,
                ConnectionState::Connecting | ConnectionState::Reconnecting
            ),
            reconnect_attempts: *self.attempts.lock().await,
            user_id,
            socket_id,
            queued_messages: self.outbox.len().await,
        }
    }

    // ---- Listener registration (delegated to the dispatcher) ----

    /// Register a listener for a named incoming event.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.dispatcher.on(event, callback)
    }

    /// Register a listener that fires at most once.
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.dispatcher.once(event, callback)
    }

    /// Deregister a listener, or all listeners for the event.
    pub fn off(&self, event: &str, id: Option<ListenerId>) {
        self.dispatcher.off(event, id);
    }

    // ---- Public lifecycle ----

    /// Establish the connection for `user_id`.
    ///
    /// Idempotent while connected as the same user. A call made while an
    /// attempt is already in flight joins that attempt instead of opening a
    /// second transport handle. The future stays pending across transient
    /// retries and resolves only on success or a terminal failure
    /// (authentication, exhaustion, cancellation).
    pub async fn connect(
        &self,
        user_id: &str,
        token: &str,
    ) -> PmResult<Arc<dyn TransportHandle>> {
        loop {
            let role = self.claim_connect_role(user_id).await;
            match role {
                ConnectRole::Reuse(handle) => {
                    debug!("already connected as {user_id}, reusing handle");
                    return Ok(handle);
                }
                ConnectRole::Join => {
                    debug!("connect already in flight, joining");
                    return self.join_in_flight().await;
                }
                ConnectRole::Replace => {
                    info!("switching connection identity to {user_id}");
                    self.disconnect(false).await;
                    continue;
                }
                ConnectRole::Drive => break,
            }
        }

        *self.identity.lock().await = Some(Identity {
            user_id: user_id.to_string(),
            token: Some(token.to_string()),
        });
        *self.attempts.lock().await = 0;
        *self.last_failure.lock().await = None;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.drive_attempts(generation, false).await
    }

    /// Send a named event, buffering transparently while not connected.
    pub async fn emit(&self, event: &str, payload: Value) {
        let handle = {
            let state = *self.state.lock().await;
            if state == ConnectionState::Connected {
                self.handle.lock().await.clone()
            } else {
                None
            }
        };

        match handle {
            Some(handle) => {
                if let Err(e) = handle.send(event, &payload) {
                    warn!("send failed for {event}: {e}, buffering for retry");
                    self.publish_status(StatusKind::SocketError, Some(e.to_string()))
                        .await;
                    self.buffer(event, payload).await;
                }
            }
            None => {
                debug!("not connected, buffering {event}");
                self.buffer(event, payload).await;
            }
        }
    }

    /// Close the connection and cancel all pending work.
    ///
    /// Safe to call at any point, including mid-backoff: the pending retry
    /// timer is cancelled and a timer that already fired becomes a no-op.
    /// `clear_identity` additionally discards the stored user identity.
    pub async fn disconnect(&self, clear_identity: bool) {
        // Invalidate timers and tasks before releasing any resource.
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.disconnect_notify.notify_waiters();

        if let Some(task) = self.pump_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.retry_task.lock().await.take() {
            task.abort();
        }

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            handle.close();
        }

        self.outbox.clear().await;
        *self.attempts.lock().await = 0;
        if clear_identity {
            *self.identity.lock().await = None;
        }

        if self.set_state(ConnectionState::Disconnected).await {
            self.publish_status(StatusKind::Disconnected, None).await;
        }
        info!("socket disconnected");
    }

    /// Tear down the connection and discard the stored identity.
    pub async fn destroy(&self) {
        self.disconnect(true).await;
    }

    // ---- Internals ----

    /// Decide what this `connect` call should do, atomically with respect to
    /// other callers.
    async fn claim_connect_role(&self, user_id: &str) -> ConnectRole {
        let mut state = self.state.lock().await;
        match *state {
            ConnectionState::Connected => {
                let same_user = self
                    .identity
                    .lock()
                    .await
                    .as_ref()
                    .map(|i| i.user_id == user_id)
                    .unwrap_or(false);
                if same_user {
                    if let Some(handle) = self.handle.lock().await.clone() {
                        return ConnectRole::Reuse(handle);
                    }
                }
                ConnectRole::Replace
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => ConnectRole::Join,
            ConnectionState::Disconnected | ConnectionState::Failed => {
                // Claim the chain while still holding the state lock so a
                // concurrent caller observes Connecting and joins.
                info!("socket state: {} -> connecting", *state);
                *state = ConnectionState::Connecting;
                let _ = self.state_tx.send(ConnectionState::Connecting);
                ConnectRole::Drive
            }
        }
    }

    /// Await the outcome of the in-flight attempt chain.
    async fn join_in_flight(&self) -> PmResult<Arc<dyn TransportHandle>> {
        let mut rx = self.state_tx.subscribe();
        loop {
            let state = *rx.borrow();
            match state {
                ConnectionState::Connected => {
                    return self
                        .handle
                        .lock()
                        .await
                        .clone()
                        .ok_or(PmError::NotConnected);
                }
                ConnectionState::Failed => {
                    let failure = self.last_failure.lock().await.clone();
                    return Err(failure
                        .map(|f| f.to_error())
                        .unwrap_or(PmError::ConnectionCancelled));
                }
                ConnectionState::Disconnected => return Err(PmError::ConnectionCancelled),
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    if rx.changed().await.is_err() {
                        return Err(PmError::ConnectionCancelled);
                    }
                }
            }
        }
    }

    /// Run the attempt chain for `generation` until success or a terminal
    /// outcome. `resumed` marks chains started by a connection loss rather
    /// than a caller, which delays before the first attempt and reports
    /// success as `reconnected`.
    fn drive_attempts(
        &self,
        generation: u64,
        resumed: bool,
    ) -> Pin<Box<dyn Future<Output = PmResult<Arc<dyn TransportHandle>>> + Send + '_>> {
        Box::pin(async move {
        if resumed {
            let delay = self.policy.delay_for(0);
            debug!("scheduling reconnection in {delay:?}");
            if !self.wait_retry_delay(delay, generation).await {
                return Err(PmError::ConnectionCancelled);
            }
        }

        loop {
            if self.generation.load(Ordering::SeqCst) != generation {
                return Err(PmError::ConnectionCancelled);
            }

            let (user_id, token) = match self.resolve_credentials(resumed).await {
                Ok(creds) => creds,
                Err(e) => {
                    warn!("reconnection skipped: {e}");
                    *self.last_failure.lock().await = Some(TerminalFailure::MissingCredentials);
                    self.set_state(ConnectionState::Failed).await;
                    self.publish_status(StatusKind::Failed, Some(e.to_string()))
                        .await;
                    return Err(e);
                }
            };

            self.set_state(ConnectionState::Connecting).await;
            let options = OpenOptions::new(&user_id, &token, self.connect_timeout);

            match self.transport.open(&self.url, options).await {
                Ok(connection) => {
                    if self.generation.load(Ordering::SeqCst) != generation {
                        // Disconnected while the handshake was in flight.
                        connection.handle.close();
                        return Err(PmError::ConnectionCancelled);
                    }
                    let handle = Arc::clone(&connection.handle);
                    self.on_connected(connection, generation, resumed).await;
                    return Ok(handle);
                }
                Err(TransportError::Auth(message)) => {
                    warn!("authentication rejected: {message}");
                    // The token is invalid; never blindly retry with it.
                    if let Some(identity) = self.identity.lock().await.as_mut() {
                        identity.token = None;
                    }
                    *self.last_failure.lock().await =
                        Some(TerminalFailure::Auth(message.clone()));
                    self.set_state(ConnectionState::Failed).await;
                    self.publish_status(StatusKind::AuthError, Some(message.clone()))
                        .await;
                    return Err(PmError::AuthFailed(message));
                }
                Err(e) => {
                    let failures = {
                        let mut attempts = self.attempts.lock().await;
                        *attempts += 1;
                        *attempts
                    };
                    warn!("connection attempt {failures} failed: {e}");

                    if !self.policy.attempts_remain(failures) {
                        error!("max connection attempts ({failures}) reached");
                        *self.last_failure.lock().await =
                            Some(TerminalFailure::Exhausted(failures));
                        self.set_state(ConnectionState::Failed).await;
                        self.publish_status(StatusKind::Failed, Some(e.to_string()))
                            .await;
                        return Err(PmError::ReconnectExhausted { attempts: failures });
                    }

                    let delay = self.policy.delay_for(failures - 1);
                    self.set_state(ConnectionState::Reconnecting).await;
                    debug!("retrying in {delay:?} (attempt {})", failures + 1);
                    if !self.wait_retry_delay(delay, generation).await {
                        return Err(PmError::ConnectionCancelled);
                    }
                }
            }
        }
        })
    }

    /// Sleep through a backoff delay. Returns false when the delay was
    /// cancelled by a disconnect (or superseded by a newer generation).
    async fn wait_retry_delay(&self, delay: Duration, generation: u64) -> bool {
        tokio::select! {
            _ = sleep(delay) => {}
            _ = self.disconnect_notify.notified() => {
                debug!("retry timer cancelled by disconnect");
                return false;
            }
        }
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// The credentials for the next attempt.
    ///
    /// Caller-driven chains use the token supplied to `connect`. Scheduled
    /// reconnections prefer the credential store (the token may have been
    /// refreshed since the original connect), falling back to the remembered
    /// one. No token at all skips reconnection entirely.
    async fn resolve_credentials(&self, resumed: bool) -> PmResult<(String, String)> {
        let identity = self.identity.lock().await.clone();
        let Some(identity) = identity else {
            return Err(PmError::MissingCredentials);
        };

        let stored = self.credentials.as_ref().and_then(|s| s.stored_token());
        let token = if resumed {
            stored.or(identity.token)
        } else {
            identity.token.or(stored)
        };

        match token {
            Some(token) => Ok((identity.user_id, token)),
            None => Err(PmError::MissingCredentials),
        }
    }

    /// Install a freshly opened connection: reset the attempt counter, flush
    /// the outbox, start the event pump with its heartbeat.
    async fn on_connected(
        &self,
        connection: crate::transport::Connection,
        generation: u64,
        resumed: bool,
    ) {
        let handle = Arc::clone(&connection.handle);
        *self.handle.lock().await = Some(Arc::clone(&handle));
        *self.attempts.lock().await = 0;
        self.set_state(ConnectionState::Connected).await;

        info!(
            "socket connected to {} (socket_id: {})",
            self.url,
            handle.socket_id().unwrap_or_else(|| "unknown".into())
        );
        self.flush_outbox(&handle).await;

        let kind = if resumed {
            StatusKind::Reconnected
        } else {
            StatusKind::Connected
        };
        self.publish_status(kind, None).await;

        let manager = self.clone();
        let events = connection.events;
        let pump_handle = Arc::clone(&handle);
        let task = tokio::spawn(async move {
            manager.run_pump(events, pump_handle, generation).await;
        });
        *self.pump_task.lock().await = Some(task);
    }

    /// Deliver buffered messages in enqueue order, dropping entries past the
    /// TTL with a diagnostic notification.
    async fn flush_outbox(&self, handle: &Arc<dyn TransportHandle>) {
        let outcome = self.outbox.drain().await;

        for entry in &outcome.stale {
            debug!(
                "dropping stale queued message {} (age {:?})",
                entry.event,
                entry.age()
            );
            self.publish_status(StatusKind::QueueDropped, Some(entry.event.clone()))
                .await;
        }

        let total = outcome.fresh.len();
        for (index, entry) in outcome.fresh.iter().enumerate() {
            if let Err(e) = handle.send(&entry.event, &entry.payload) {
                warn!("flush interrupted at {}/{total}: {e}", index + 1);
                self.outbox
                    .requeue_front(outcome.fresh[index..].to_vec())
                    .await;
                self.publish_status(StatusKind::SocketError, Some(e.to_string()))
                    .await;
                return;
            }
        }
        if total > 0 {
            info!("flushed {total} queued message(s)");
        }
    }

    /// Per-connection event pump: routes incoming events, emits heartbeat
    /// probes, and turns a close (or overdue heartbeat) into reconnection.
    async fn run_pump(
        &self,
        mut events: tokio::sync::mpsc::Receiver<TransportEvent>,
        handle: Arc<dyn TransportHandle>,
        generation: u64,
    ) {
        let mut monitor = HeartbeatMonitor::new(self.heartbeat.clone());
        let mut probe = interval_at(Instant::now() + monitor.interval(), monitor.interval());

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Message { event, payload }) => {
                        if event == constants::HEARTBEAT_ACK_EVENT {
                            monitor.on_ack(&payload);
                        } else {
                            self.dispatcher.dispatch(&event, &payload);
                        }
                    }
                    Some(TransportEvent::Error { message }) => {
                        warn!("socket error: {message}");
                        self.publish_status(StatusKind::SocketError, Some(message)).await;
                    }
                    Some(TransportEvent::Closed { reason }) => {
                        info!("connection closed: {reason}");
                        self.on_connection_lost(generation, &handle, reason.to_string()).await;
                        return;
                    }
                    None => {
                        self.on_connection_lost(generation, &handle, "event stream ended".into()).await;
                        return;
                    }
                },
                _ = probe.tick() => {
                    if monitor.is_overdue() {
                        warn!("heartbeat overdue, treating connection as lost");
                        self.on_connection_lost(generation, &handle, "heartbeat timeout".into()).await;
                        return;
                    }
                    match handle.send(constants::HEARTBEAT_EVENT, &monitor.probe_payload()) {
                        Ok(()) => monitor.mark_probe_sent(),
                        Err(e) => {
                            warn!("heartbeat probe failed: {e}");
                            self.on_connection_lost(generation, &handle, format!("heartbeat send failed: {e}")).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// React to a lost connection: release the handle, notify, and schedule
    /// reconnection with the stored credentials.
    async fn on_connection_lost(
        &self,
        generation: u64,
        handle: &Arc<dyn TransportHandle>,
        reason: String,
    ) {
        if self.generation.load(Ordering::SeqCst) != generation {
            // An explicit disconnect (or a newer chain) already took over.
            return;
        }

        handle.close();
        *self.handle.lock().await = None;
        self.set_state(ConnectionState::Reconnecting).await;
        self.publish_status(StatusKind::Disconnected, Some(reason))
            .await;

        let manager = self.clone();
        let task = tokio::spawn(async move {
            match manager.drive_attempts(generation, true).await {
                Ok(_) => {}
                Err(PmError::ConnectionCancelled) => {}
                Err(e) => error!("reconnection abandoned: {e}"),
            }
        });
        *self.retry_task.lock().await = Some(task);
    }

    async fn buffer(&self, event: &str, payload: Value) {
        if let Some(evicted) = self.outbox.enqueue(event, payload).await {
            debug!("queue capacity displaced oldest entry {}", evicted.event);
            self.publish_status(StatusKind::QueueDropped, Some(evicted.event))
                .await;
        }
    }

    /// Update the state, notifying watchers. Returns whether it changed.
    async fn set_state(&self, new_state: ConnectionState) -> bool {
        let mut state = self.state.lock().await;
        if *state == new_state {
            return false;
        }
        info!("socket state: {} -> {}", *state, new_state);
        *state = new_state;
        let _ = self.state_tx.send(new_state);
        true
    }

    async fn publish_status(&self, kind: StatusKind, detail: Option<String>) {
        let status = self.status().await;
        self.status.publish(StatusEvent {
            kind,
            status,
            detail,
        });
    }
}
