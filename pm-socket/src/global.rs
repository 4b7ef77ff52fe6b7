//! Optional process-global manager accessor.
//!
//! The composition root should construct a [`SocketManager`] and pass it by
//! reference. For hosts that want `getInstance()`-style ergonomics, this
//! module holds a single shared instance with injectable construction.
//! [`destroy`] disconnects and releases the slot so a fresh instance can be
//! created afterwards.

use std::sync::Mutex;

use tracing::info;

use crate::manager::SocketManager;

static INSTANCE: Mutex<Option<SocketManager>> = Mutex::new(None);

/// The shared instance, creating it with `ctor` on first access.
pub fn get_or_init<F>(ctor: F) -> SocketManager
where
    F: FnOnce() -> SocketManager,
{
    let mut slot = INSTANCE.lock().unwrap_or_else(|e| e.into_inner());
    slot.get_or_insert_with(|| {
        info!("creating global socket manager");
        ctor()
    })
    .clone()
}

/// The shared instance, if one has been created.
pub fn instance() -> Option<SocketManager> {
    INSTANCE.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Disconnect and release the shared instance.
///
/// Returns whether an instance existed. After this, [`get_or_init`] will
/// construct a new one.
pub async fn destroy() -> bool {
    let manager = INSTANCE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take();
    match manager {
        Some(manager) => {
            manager.destroy().await;
            info!("global socket manager destroyed");
            true
        }
        None => false,
    }
}
