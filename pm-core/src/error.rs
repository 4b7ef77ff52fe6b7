//! Global error types for the PawfectMatch client runtime.
//!
//! All error categories across the realtime stack are unified into a single
//! `PmError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using PmError.
pub type PmResult<T> = Result<T, PmError>;

/// Unified error type covering all error categories in the client runtime.
#[derive(Error, Debug)]
pub enum PmError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Connection errors --
    /// The transport failed to open a connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// Authentication was rejected by the server. The current token is
    /// invalid; the caller must supply fresh credentials before the next
    /// connect.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// All reconnection attempts were exhausted without a successful open.
    #[error("reconnection exhausted after {attempts} attempt(s)")]
    ReconnectExhausted {
        /// Number of consecutive failed attempts.
        attempts: u32,
    },

    /// A connection attempt was cancelled by an explicit disconnect.
    #[error("connection attempt cancelled")]
    ConnectionCancelled,

    /// A reconnection was scheduled but no credentials were available.
    #[error("no stored credentials for reconnection")]
    MissingCredentials,

    /// The socket is not connected.
    #[error("socket not connected")]
    NotConnected,

    /// Sending a message over a live connection failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for PmError {
    fn from(e: serde_json::Error) -> Self {
        PmError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for PmError {
    fn from(e: toml::de::Error) -> Self {
        PmError::Config(e.to_string())
    }
}

impl PmError {
    /// Whether this error is terminal for a connect attempt chain.
    ///
    /// Terminal errors reject the caller's connect future; transient errors
    /// are retried internally by the reconnection controller.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PmError::AuthFailed(_)
                | PmError::ReconnectExhausted { .. }
                | PmError::ConnectionCancelled
                | PmError::MissingCredentials
        )
    }
}
