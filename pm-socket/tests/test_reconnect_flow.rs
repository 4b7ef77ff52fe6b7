//! Reconnection controller integration tests.
//!
//! Exercises the retry chain end to end under paused time: transient
//! failures, exhaustion, cancellation mid-backoff, server-initiated close,
//! credential fallback, and terminal authentication failure.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pm_core::credentials::MemoryCredentialStore;
use pm_core::error::PmError;
use pm_socket::events::wait_for_status;
use pm_socket::{ConnectionState, StatusKind};

use common::{manager_with, until, FakeTransport};

const WAIT: Duration = Duration::from_secs(30);

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_success() {
    let transport = FakeTransport::new();
    transport.fail_next(3);
    let manager = manager_with(&transport);

    manager.connect("u1", "t1").await.unwrap();

    assert_eq!(transport.open_calls(), 4, "three failures then one success");
    let status = manager.status().await;
    assert!(status.connected);
    assert_eq!(
        status.reconnect_attempts, 0,
        "attempt counter resets on success"
    );
}

#[tokio::test(start_paused = true)]
async fn exhaustion_transitions_to_failed_and_stops() {
    let transport = FakeTransport::new();
    transport.fail_next(10);
    let manager = manager_with(&transport);
    let mut rx = manager.subscribe_status();

    let err = manager.connect("u1", "t1").await.unwrap_err();
    assert!(matches!(err, PmError::ReconnectExhausted { attempts: 10 }));
    assert_eq!(manager.state().await, ConnectionState::Failed);
    assert_eq!(transport.open_calls(), 10);

    let event = wait_for_status(&mut rx, StatusKind::Failed, WAIT)
        .await
        .expect("failed status");
    assert!(!event.status.connected);

    // No further timer is scheduled.
    tokio::time::advance(Duration::from_secs(300)).await;
    tokio::task::yield_now().await;
    assert_eq!(transport.open_calls(), 10);

    // Emitting afterwards buffers the message but schedules nothing.
    manager.emit("ping", common::ping_payload()).await;
    assert_eq!(manager.status().await.queued_messages, 1);
    tokio::time::advance(Duration::from_secs(300)).await;
    tokio::task::yield_now().await;
    assert_eq!(transport.open_calls(), 10);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_backoff_cancels_the_retry() {
    let transport = FakeTransport::new();
    transport.fail_next(2);
    let manager = manager_with(&transport);

    let m2 = manager.clone();
    let pending = tokio::spawn(async move { m2.connect("u1", "t1").await });

    // Spin (no timer auto-advance) until the first attempt has failed and
    // the chain is parked in its backoff sleep.
    let t2 = Arc::clone(&transport);
    until(move || t2.open_calls() == 1).await;

    manager.disconnect(false).await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(PmError::ConnectionCancelled)));
    assert_eq!(manager.state().await, ConnectionState::Disconnected);

    // The dangling timer must be a no-op.
    tokio::time::advance(Duration::from_secs(300)).await;
    tokio::task::yield_now().await;
    assert_eq!(transport.open_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_close_triggers_automatic_reconnection() {
    let transport = FakeTransport::new();
    let manager = manager_with(&transport);

    manager.connect("u1", "t1").await.unwrap();
    let first = transport.last_handle().unwrap();

    let mut rx = manager.subscribe_status();
    first.server_close("transport close");

    let event = wait_for_status(&mut rx, StatusKind::Disconnected, WAIT)
        .await
        .expect("disconnected status");
    assert!(event.detail.unwrap().contains("transport close"));

    wait_for_status(&mut rx, StatusKind::Reconnected, WAIT)
        .await
        .expect("reconnected status");

    assert_eq!(transport.open_calls(), 2);
    assert!(first.is_closed());
    assert_eq!(manager.state().await, ConnectionState::Connected);
    assert_eq!(
        manager.status().await.socket_id.as_deref(),
        Some("sock-2")
    );
}

#[tokio::test(start_paused = true)]
async fn explicit_disconnect_does_not_reconnect() {
    let transport = FakeTransport::new();
    let manager = manager_with(&transport);

    manager.connect("u1", "t1").await.unwrap();
    manager.disconnect(false).await;

    tokio::time::advance(Duration::from_secs(300)).await;
    tokio::task::yield_now().await;
    assert_eq!(transport.open_calls(), 1);
    assert_eq!(manager.state().await, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn scheduled_reconnection_prefers_the_credential_store() {
    let transport = FakeTransport::new();
    let store = Arc::new(MemoryCredentialStore::new());
    store.set("refreshed-token");
    let manager = manager_with(&transport).with_credential_store(store);

    manager.connect("u1", "original-token").await.unwrap();
    assert_eq!(
        transport.last_auth().unwrap(),
        ("u1".to_string(), "original-token".to_string())
    );

    let mut rx = manager.subscribe_status();
    transport.last_handle().unwrap().server_close("gone");
    wait_for_status(&mut rx, StatusKind::Reconnected, WAIT)
        .await
        .expect("reconnected status");

    assert_eq!(
        transport.last_auth().unwrap(),
        ("u1".to_string(), "refreshed-token".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_is_terminal_for_the_chain() {
    let transport = FakeTransport::new();
    transport.reject_auth();
    let manager = manager_with(&transport);
    let mut rx = manager.subscribe_status();

    let err = manager.connect("u1", "bad-token").await.unwrap_err();
    assert!(matches!(err, PmError::AuthFailed(_)));
    assert_eq!(manager.state().await, ConnectionState::Failed);
    assert_eq!(transport.open_calls(), 1, "invalid token is not retried");

    wait_for_status(&mut rx, StatusKind::AuthError, WAIT)
        .await
        .expect("auth_error status");

    // Fresh credentials recover via a new explicit connect.
    manager.connect("u1", "good-token").await.unwrap();
    assert_eq!(manager.state().await, ConnectionState::Connected);
    assert_eq!(
        transport.last_auth().unwrap(),
        ("u1".to_string(), "good-token".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_during_reconnection_stops_the_loop() {
    let transport = FakeTransport::new();
    let manager = manager_with(&transport);

    manager.connect("u1", "t1").await.unwrap();

    let mut rx = manager.subscribe_status();
    transport.reject_auth();
    transport.last_handle().unwrap().server_close("gone");

    wait_for_status(&mut rx, StatusKind::AuthError, WAIT)
        .await
        .expect("auth_error status");
    assert_eq!(manager.state().await, ConnectionState::Failed);
    assert_eq!(transport.open_calls(), 2);

    tokio::time::advance(Duration::from_secs(300)).await;
    tokio::task::yield_now().await;
    assert_eq!(transport.open_calls(), 2, "no blind retry with a bad token");
}

#[tokio::test(start_paused = true)]
async fn failed_state_requires_a_new_explicit_connect() {
    let transport = FakeTransport::new();
    transport.fail_next(10);
    let manager = manager_with(&transport);

    assert!(manager.connect("u1", "t1").await.is_err());
    assert_eq!(manager.state().await, ConnectionState::Failed);

    // The next explicit connect starts a fresh chain and succeeds.
    manager.connect("u1", "t1").await.unwrap();
    assert_eq!(manager.state().await, ConnectionState::Connected);
    assert_eq!(manager.status().await.reconnect_attempts, 0);
}
