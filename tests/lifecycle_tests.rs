//! # Lifecycle Tests: Lease, ConnectionRegistry, ConnectionGuard
//!
//! Certifies that every checked-out resource is released exactly once on
//! every terminal path: response, abort, deadline and client disconnect.

mod common;

use bridge_core::{
    AbortReason, ConnectionId, ConnectionRegistry, ConnectionState, Delivery, LifecycleEvent,
    RespondToClient,
};
use bridge_pool::Lease;
use bridge_transport::{ConnectionGuard, ResponseOutcome};
use common::{as_pool, CountingPool};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn ok_response(body: &str) -> RespondToClient {
    RespondToClient {
        status_code: 200,
        headers: BTreeMap::new(),
        body: body.to_owned(),
    }
}

/// Dropping a lease releases its client; `release` is the same thing early.
#[tokio::test]
async fn test_lease_releases_once_on_drop() {
    let t = Instant::now();

    let pool = CountingPool::new();
    let lease = Lease::checkout(&as_pool(&pool)).await.unwrap();
    assert_eq!(pool.outstanding(), 1);
    drop(lease);
    assert_eq!(pool.releases(), 1);

    let lease = Lease::checkout(&as_pool(&pool)).await.unwrap();
    lease.release();
    assert_eq!(pool.releases(), 2);
    assert_eq!(pool.outstanding(), 0);

    let overhead = t.elapsed();
    println!("test_lease_releases_once_on_drop: Testing Overhead = {:?}", overhead);
}

/// A response is delivered once, releases the lease, and later responses
/// for the same connection find nothing.
#[tokio::test]
async fn test_registry_respond_releases_and_is_terminal() {
    let t = Instant::now();

    let pool = CountingPool::new();
    let registry = ConnectionRegistry::new();
    let id = ConnectionId::from_parts(1, 0);
    let lease = Lease::checkout(&as_pool(&pool)).await.unwrap();

    let (rx, cancel) = registry.register(id, Some(lease), Instant::now());
    assert!(registry.contains(id));

    assert_eq!(registry.respond(id, ok_response("first")), Delivery::Delivered);
    assert_eq!(rx.await.unwrap().body, "first");
    assert!(cancel.is_cancelled());
    assert_eq!(pool.releases(), 1);

    assert_eq!(registry.respond(id, ok_response("second")), Delivery::UnknownConnection);
    assert!(!registry.abort(id, AbortReason::TimedOut));
    assert_eq!(pool.releases(), 1);
    assert!(registry.is_empty());

    let overhead = t.elapsed();
    println!("test_registry_respond_releases_and_is_terminal: Testing Overhead = {:?}", overhead);
}

/// Responding after the client went away still releases the resource.
#[tokio::test]
async fn test_registry_respond_to_gone_client() {
    let t = Instant::now();

    let pool = CountingPool::new();
    let registry = ConnectionRegistry::new();
    let id = ConnectionId::from_parts(2, 0);
    let lease = Lease::checkout(&as_pool(&pool)).await.unwrap();

    let (rx, _cancel) = registry.register(id, Some(lease), Instant::now());
    drop(rx);

    assert_eq!(registry.respond(id, ok_response("late")), Delivery::ClientGone);
    assert_eq!(pool.outstanding(), 0);

    let overhead = t.elapsed();
    println!("test_registry_respond_to_gone_client: Testing Overhead = {:?}", overhead);
}

/// A lease borrowed for an effect goes back to its connection, and is
/// released on the spot if the connection ended meanwhile.
#[tokio::test]
async fn test_registry_take_and_restore_resource() {
    let t = Instant::now();

    let pool = CountingPool::new();
    let registry = ConnectionRegistry::new();
    let id = ConnectionId::from_parts(3, 0);
    let lease = Lease::checkout(&as_pool(&pool)).await.unwrap();
    let (_rx, _cancel) = registry.register(id, Some(lease), Instant::now());

    let borrowed = registry.take_resource(id).unwrap();
    assert!(registry.take_resource(id).is_none(), "lease must not be lent twice");
    registry.restore_resource(id, borrowed);
    assert_eq!(pool.releases(), 0);

    let borrowed = registry.take_resource(id).unwrap();
    assert!(registry.abort(id, AbortReason::TimedOut));
    assert_eq!(pool.releases(), 0, "borrowed lease is still out");
    registry.restore_resource(id, borrowed);
    assert_eq!(pool.releases(), 1);
    assert_eq!(pool.outstanding(), 0);

    let overhead = t.elapsed();
    println!("test_registry_take_and_restore_resource: Testing Overhead = {:?}", overhead);
}

/// Dispatches are counted on the connection state.
#[tokio::test]
async fn test_registry_tracks_round_trips() {
    let t = Instant::now();

    let registry = ConnectionRegistry::new();
    let id = ConnectionId::from_parts(4, 0);
    let (_rx, _cancel) = registry.register(id, None, Instant::now());

    assert_eq!(registry.state(id), Some(ConnectionState::ResourceAcquired));
    registry.note_dispatch(id);
    registry.note_dispatch(id);
    assert_eq!(registry.state(id), Some(ConnectionState::Dispatched { round_trips: 2 }));
    assert!(registry.cancellation(id).is_some());

    registry.abort(id, AbortReason::BridgeClosed);
    assert_eq!(registry.state(id), None);
    assert!(registry.cancellation(id).is_none());

    let overhead = t.elapsed();
    println!("test_registry_tracks_round_trips: Testing Overhead = {:?}", overhead);
}

/// The state machine accepts the documented path and nothing after a
/// terminal state.
#[test]
fn test_state_machine_transitions() {
    let t = Instant::now();

    let state = ConnectionState::Accepted
        .advance(LifecycleEvent::BodyComplete)
        .and_then(|s| s.advance(LifecycleEvent::ResourceAcquired))
        .and_then(|s| s.advance(LifecycleEvent::EffectDispatched))
        .and_then(|s| s.advance(LifecycleEvent::Responded))
        .unwrap();
    assert_eq!(state, ConnectionState::Responded);
    assert!(state.is_terminal());

    assert!(state.advance(LifecycleEvent::Responded).is_err());
    assert!(state.advance(LifecycleEvent::Aborted(AbortReason::TimedOut)).is_err());
    assert!(ConnectionState::Accepted.advance(LifecycleEvent::Responded).is_err());
    assert!(ConnectionState::Accepted
        .advance(LifecycleEvent::EffectDispatched)
        .is_err());

    for start in [
        ConnectionState::Accepted,
        ConnectionState::BodyBuffered,
        ConnectionState::ResourceAcquired,
        ConnectionState::Dispatched { round_trips: 3 },
    ] {
        let aborted = start
            .advance(LifecycleEvent::Aborted(AbortReason::TransportClosed))
            .unwrap();
        assert_eq!(aborted, ConnectionState::Aborted(AbortReason::TransportClosed));
    }

    let overhead = t.elapsed();
    println!("test_state_machine_transitions: Testing Overhead = {:?}", overhead);
}

/// A guard that is dropped while waiting aborts its connection.
#[tokio::test]
async fn test_guard_drop_aborts_connection() {
    let t = Instant::now();

    let pool = CountingPool::new();
    let registry = Arc::new(ConnectionRegistry::new());
    let id = ConnectionId::from_parts(5, 0);
    let lease = Lease::checkout(&as_pool(&pool)).await.unwrap();
    let (_rx, cancel) = registry.register(id, Some(lease), Instant::now());

    let guard = ConnectionGuard::new(Arc::clone(&registry), id);
    drop(guard);

    assert!(!registry.contains(id));
    assert!(cancel.is_cancelled());
    assert_eq!(pool.outstanding(), 0);

    let overhead = t.elapsed();
    println!("test_guard_drop_aborts_connection: Testing Overhead = {:?}", overhead);
}

/// The deadline aborts a connection the engine never answers.
#[tokio::test]
async fn test_guard_deadline_times_out() {
    let t = Instant::now();

    let pool = CountingPool::new();
    let registry = Arc::new(ConnectionRegistry::new());
    let id = ConnectionId::from_parts(6, 0);
    let lease = Lease::checkout(&as_pool(&pool)).await.unwrap();
    let (rx, _cancel) = registry.register(id, Some(lease), Instant::now());

    let guard = ConnectionGuard::new(Arc::clone(&registry), id);
    let outcome = guard.await_response(rx, Duration::from_millis(50)).await;

    assert_eq!(outcome, ResponseOutcome::TimedOut);
    assert!(registry.is_empty());
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(registry.respond(id, ok_response("too late")), Delivery::UnknownConnection);

    let overhead = t.elapsed();
    println!("test_guard_deadline_times_out: Testing Overhead = {:?}", overhead);
}

/// A response arriving before the deadline is handed through.
#[tokio::test]
async fn test_guard_delivers_response() {
    let t = Instant::now();

    let registry = Arc::new(ConnectionRegistry::new());
    let id = ConnectionId::from_parts(7, 0);
    let (rx, _cancel) = registry.register(id, None, Instant::now());
    let guard = ConnectionGuard::new(Arc::clone(&registry), id);

    let responder = Arc::clone(&registry);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        responder.respond(id, ok_response("hello"));
    });

    match guard.await_response(rx, Duration::from_secs(5)).await {
        ResponseOutcome::Responded(response) => assert_eq!(response.body, "hello"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(registry.is_empty());

    let overhead = t.elapsed();
    println!("test_guard_delivers_response: Testing Overhead = {:?}", overhead);
}
