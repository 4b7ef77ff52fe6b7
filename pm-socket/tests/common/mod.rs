//! Shared test utilities for integration tests.
//!
//! Provides a scriptable in-memory transport: open outcomes are queued up
//! front, every open is recorded, and each successful open yields a handle
//! whose sends are captured and into whose event stream tests can inject
//! server-side traffic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use pm_socket::{
    CloseReason, Connection, OpenOptions, SocketManager, Transport, TransportError,
    TransportEvent, TransportHandle,
};

/// Scripted outcome for an open call.
pub enum OpenOutcome {
    Success,
    Fail(TransportError),
}

/// A captured live connection.
#[derive(Debug)]
pub struct FakeHandle {
    socket_id: String,
    sent: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
    auto_ack: bool,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl FakeHandle {
    /// Everything sent over this handle, in order.
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }

    /// How many times `event` was sent.
    pub fn sent_count(&self, event: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }

    /// Whether the manager closed this handle.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Inject a server-initiated close.
    pub fn server_close(&self, reason: &str) {
        let _ = self.events_tx.try_send(TransportEvent::Closed {
            reason: CloseReason::Server(reason.into()),
        });
    }

    /// Inject an incoming named event.
    pub fn server_message(&self, event: &str, payload: Value) {
        let _ = self.events_tx.try_send(TransportEvent::Message {
            event: event.into(),
            payload,
        });
    }

    /// Inject a non-fatal runtime error.
    pub fn server_error(&self, message: &str) {
        let _ = self.events_tx.try_send(TransportEvent::Error {
            message: message.into(),
        });
    }
}

impl TransportHandle for FakeHandle {
    fn send(&self, event: &str, payload: &Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent
            .lock()
            .unwrap()
            .push((event.to_string(), payload.clone()));

        if self.auto_ack && event == "heartbeat" {
            let _ = self.events_tx.try_send(TransportEvent::Message {
                event: "heartbeat_ack".into(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn socket_id(&self) -> Option<String> {
        Some(self.socket_id.clone())
    }
}

/// Scriptable transport factory.
pub struct FakeTransport {
    script: Mutex<VecDeque<OpenOutcome>>,
    open_calls: AtomicUsize,
    opened: Mutex<Vec<Arc<FakeHandle>>>,
    last_auth: Mutex<Option<(String, String)>>,
    auto_ack: AtomicBool,
    open_delay: Mutex<Option<std::time::Duration>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            open_calls: AtomicUsize::new(0),
            opened: Mutex::new(Vec::new()),
            last_auth: Mutex::new(None),
            auto_ack: AtomicBool::new(true),
            open_delay: Mutex::new(None),
        })
    }

    /// Make every open handshake take this long before resolving.
    pub fn set_open_delay(&self, delay: Option<std::time::Duration>) {
        *self.open_delay.lock().unwrap() = delay;
    }

    /// Queue an outcome for the next unscripted open. Opens beyond the
    /// script succeed.
    pub fn push(&self, outcome: OpenOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Queue `n` transient failures.
    pub fn fail_next(&self, n: usize) {
        for _ in 0..n {
            self.push(OpenOutcome::Fail(TransportError::Unreachable(
                "connection refused".into(),
            )));
        }
    }

    /// Queue an authentication rejection.
    pub fn reject_auth(&self) {
        self.push(OpenOutcome::Fail(TransportError::Auth(
            "invalid token".into(),
        )));
    }

    /// Disable the automatic heartbeat ack on subsequently opened handles.
    pub fn set_auto_ack(&self, enabled: bool) {
        self.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// Total number of open calls observed.
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// The most recently opened handle.
    pub fn last_handle(&self) -> Option<Arc<FakeHandle>> {
        self.opened.lock().unwrap().last().cloned()
    }

    /// All handles opened so far.
    pub fn handles(&self) -> Vec<Arc<FakeHandle>> {
        self.opened.lock().unwrap().clone()
    }

    /// Auth data presented on the most recent open.
    pub fn last_auth(&self) -> Option<(String, String)> {
        self.last_auth.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _url: &str, options: OpenOptions) -> Result<Connection, TransportError> {
        assert!(
            !options.reconnection,
            "transport-level reconnection must be disabled"
        );
        let call = self.open_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_auth.lock().unwrap() =
            Some((options.auth.user_id.clone(), options.auth.token.clone()));

        let delay = *self.open_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OpenOutcome::Success);

        match outcome {
            OpenOutcome::Fail(e) => Err(e),
            OpenOutcome::Success => {
                let (events_tx, events_rx) = mpsc::channel(64);
                let handle = Arc::new(FakeHandle {
                    socket_id: format!("sock-{call}"),
                    sent: Mutex::new(Vec::new()),
                    closed: AtomicBool::new(false),
                    auto_ack: self.auto_ack.load(Ordering::SeqCst),
                    events_tx,
                });
                self.opened.lock().unwrap().push(Arc::clone(&handle));
                let dyn_handle: Arc<dyn TransportHandle> = handle;
                Ok(Connection {
                    handle: dyn_handle,
                    events: events_rx,
                })
            }
        }
    }
}

/// A manager wired to the given fake transport with default policies.
pub fn manager_with(transport: &Arc<FakeTransport>) -> SocketManager {
    SocketManager::new("https://realtime.test", Arc::clone(transport) as Arc<dyn Transport>)
}

/// A trivial payload for emit tests.
pub fn ping_payload() -> Value {
    json!({})
}

/// Yield until `predicate` holds.
///
/// Spinning keeps the runtime busy, so paused-time timers do NOT auto-advance
/// while waiting; use this to observe state between timer firings.
pub async fn until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if predicate() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached after 10k yields");
}
