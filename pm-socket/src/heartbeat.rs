//! Heartbeat liveness monitor.
//!
//! While connected, the manager emits a probe event on a fixed interval and
//! records the server's acks. Ack latency is diagnostic only; the optional
//! timeout turns a silent half-open connection into a synthesized connection
//! loss so the normal reconnection path can recover it.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;

use pm_core::constants;

/// Heartbeat configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between probes.
    pub interval: Duration,
    /// Maximum time without an ack before the connection is considered dead.
    ///
    /// `None` restores the transport-signals-only behavior: missed acks are
    /// never treated as a failure and liveness loss is detected solely via
    /// the transport's own close/error events.
    pub timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        let interval = Duration::from_secs(constants::HEARTBEAT_INTERVAL_SECS);
        Self {
            interval,
            timeout: Some(interval * 2),
        }
    }
}

/// Per-connection probe state.
///
/// Owned by the connection's event pump; created on connect and discarded on
/// close, so counters never leak across connections.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    started_at: Instant,
    last_probe_sent: Option<Instant>,
    last_ack: Option<Instant>,
    probes_sent: u64,
    acks_received: u64,
    last_latency: Option<Duration>,
}

impl HeartbeatMonitor {
    /// Create a monitor for a connection established now.
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            last_probe_sent: None,
            last_ack: None,
            probes_sent: 0,
            acks_received: 0,
            last_latency: None,
        }
    }

    /// The configured probe interval.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Payload for the next probe. Carries the send wall-clock time so the
    /// server can log one-way skew.
    pub fn probe_payload(&self) -> Value {
        json!({ "sentAt": chrono::Utc::now().timestamp_millis() })
    }

    /// Record that a probe was handed to the transport.
    pub fn mark_probe_sent(&mut self) {
        self.last_probe_sent = Some(Instant::now());
        self.probes_sent += 1;
    }

    /// Consume an ack. Returns the round-trip latency when a probe was
    /// outstanding.
    pub fn on_ack(&mut self, _payload: &Value) -> Option<Duration> {
        self.last_ack = Some(Instant::now());
        self.acks_received += 1;
        self.last_latency = self.last_probe_sent.map(|sent| sent.elapsed());
        if let Some(latency) = self.last_latency {
            debug!("heartbeat ack ({}ms round trip)", latency.as_millis());
        }
        self.last_latency
    }

    /// Whether the connection has gone too long without an ack.
    ///
    /// Always `false` when no timeout is configured or no probe has been
    /// sent yet. The reference point is the last ack, falling back to the
    /// connection start so a server that never acks is still caught.
    pub fn is_overdue(&self) -> bool {
        let Some(timeout) = self.config.timeout else {
            return false;
        };
        if self.probes_sent == 0 {
            return false;
        }
        let reference = self.last_ack.unwrap_or(self.started_at);
        reference.elapsed() > timeout
    }

    /// Round-trip latency of the most recent acked probe.
    pub fn last_latency(&self) -> Option<Duration> {
        self.last_latency
    }

    /// Probes sent over this connection's lifetime.
    pub fn probes_sent(&self) -> u64 {
        self.probes_sent
    }

    /// Acks received over this connection's lifetime.
    pub fn acks_received(&self) -> u64 {
        self.acks_received
    }
}
