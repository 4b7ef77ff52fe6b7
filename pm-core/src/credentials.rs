//! Credential storage boundary.
//!
//! The connection manager re-authenticates on every reconnection attempt.
//! When a scheduled retry fires without fresh caller-supplied credentials,
//! the manager falls back to a `CredentialStore`. The store itself (keychain,
//! secure storage, etc.) lives outside this workspace; only the boundary is
//! defined here.

use std::sync::Mutex;

/// Source of a stored authentication token for scheduled reconnections.
pub trait CredentialStore: Send + Sync {
    /// The currently stored token, if any.
    fn stored_token(&self) -> Option<String>;
}

/// In-memory credential store.
///
/// Suitable for tests and for hosts without platform secure storage.
#[derive(Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a token, replacing any previous one.
    pub fn set(&self, token: &str) {
        let mut slot = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(token.to_string());
    }

    /// Discard the stored token.
    pub fn clear(&self) {
        let mut slot = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn stored_token(&self) -> Option<String> {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
