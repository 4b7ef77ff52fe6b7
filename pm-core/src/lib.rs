//! PawfectMatch Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other PawfectMatch crates:
//! - Application configuration (server URL, timeouts, logging settings)
//! - Global error types covering all error categories
//! - Structured logging with tracing
//! - Credential storage boundary for reconnection
//! - Common constants and type aliases

pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod logging;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use error::{PmError, PmResult};
pub use logging::init_logging;
