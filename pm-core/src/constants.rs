//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "PawfectMatch";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default connect timeout for a single transport open, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Base delay between reconnection attempts, in milliseconds.
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Multiplier applied to the reconnection delay per attempt.
pub const RECONNECT_BACKOFF_FACTOR: f64 = 1.5;

/// Cap on the reconnection delay, in milliseconds.
pub const RECONNECT_MAX_DELAY_MS: u64 = 10_000;

/// Maximum number of consecutive reconnection attempts before giving up.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// Interval between heartbeat probes, in seconds.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 25;

/// Maximum age of a queued outbound message before it is dropped unsent,
/// in seconds.
pub const QUEUE_TTL_SECS: u64 = 30;

/// Event name for the outbound liveness probe.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Event name for the server's reply to a liveness probe.
pub const HEARTBEAT_ACK_EVENT: &str = "heartbeat_ack";

/// Well-known realtime event names exchanged with the chat backend.
pub mod events {
    pub const SEND_MESSAGE: &str = "send_message";
    pub const NEW_MESSAGE: &str = "new_message";
    pub const MESSAGE_SENT: &str = "message_sent";
    pub const MESSAGE_DELIVERED: &str = "message_delivered";
    pub const TYPING_STATUS: &str = "typing_status";
    pub const JOIN_MATCH: &str = "join_match";
    pub const LEAVE_MATCH: &str = "leave_match";
    pub const USER_ONLINE: &str = "user_online";
    pub const USER_OFFLINE: &str = "user_offline";
    pub const NOTIFICATION: &str = "notification";
}
