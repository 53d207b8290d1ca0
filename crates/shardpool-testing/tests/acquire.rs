//! Acquire, release, exhaustion and shutdown through the public pool API.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use shardpool::{ConnectionState, PartitionStrategy, Pool, PoolError};
use shardpool_testing::{
    HookEvent, MockFactory, RecordingHook, init_tracing, mock_pool, test_config,
};

#[test]
fn test_release_returns_connection_for_reuse() {
    init_tracing();
    let (pool, state) = mock_pool(test_config()).unwrap();
    assert_eq!(state.opened(), 0);

    let conn = pool.get().unwrap();
    assert_eq!(state.opened(), 1);
    assert_eq!(conn.state(), ConnectionState::CheckedOut);
    assert!(!conn.is_closed());
    let id = conn.id();
    drop(conn);

    let status = pool.status();
    assert_eq!(status.available, 1);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.total, 1);

    let again = pool.get().unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(state.opened(), 1);
    assert_eq!(pool.metrics().checkouts_successful, 2);
}

#[test]
fn test_explicit_close_releases_once() {
    let (pool, _state) = mock_pool(test_config()).unwrap();
    let conn = pool.get().unwrap();
    let handle = Arc::clone(conn.handle());
    conn.close();

    assert!(handle.is_closed());
    assert!(!handle.is_checked_out());
    assert_eq!(pool.status().available, 1);
}

#[test]
fn test_min_connections_are_prewarmed() {
    let config = test_config()
        .partition_count(2)
        .min_connections_per_partition(2)
        .max_connections_per_partition(4);
    let (pool, state) = mock_pool(config).unwrap();

    assert_eq!(state.opened(), 4);
    for partition in pool.partition_statuses() {
        assert_eq!(partition.available, 2);
        assert_eq!(partition.total, 2);
    }
    assert_eq!(pool.status().max, 8);
}

#[test]
fn test_fourth_acquire_blocks_until_release() {
    init_tracing();
    let config = test_config()
        .min_connections_per_partition(1)
        .max_connections_per_partition(3);
    let (pool, state) = mock_pool(config).unwrap();
    assert_eq!(state.opened(), 1);

    let mut held = thread::scope(|s| {
        let workers: Vec<_> = (0..3).map(|_| s.spawn(|| pool.get().unwrap())).collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .collect::<Vec<_>>()
    });
    assert_eq!(state.opened(), 3);
    assert!(pool.status().is_at_capacity());

    thread::scope(|s| {
        let waiter = s.spawn(|| pool.get_timeout(Duration::from_secs(5)).unwrap().id());

        thread::sleep(Duration::from_millis(100));
        assert!(!waiter.is_finished());

        let released = held.pop().unwrap();
        let released_id = released.id();
        drop(released);

        assert_eq!(waiter.join().unwrap(), released_id);
    });
    assert_eq!(state.opened(), 3);
}

#[test]
fn test_exhausted_partition_times_out() {
    let config = test_config().max_connections_per_partition(1);
    let (pool, _state) = mock_pool(config).unwrap();
    let _held = pool.get().unwrap();

    let started = Instant::now();
    let err = pool.get_timeout(Duration::from_millis(50)).unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(matches!(err, PoolError::PoolExhausted { partition: 0, .. }));

    assert!(pool.try_get().unwrap().is_none());
    assert_eq!(pool.metrics().checkouts_failed, 2);
}

#[test]
fn test_unbounded_timeout_waits_for_release() {
    let config = test_config()
        .max_connections_per_partition(1)
        .connection_timeout(Duration::MAX);
    let (pool, _state) = mock_pool(config).unwrap();

    let held = pool.get().unwrap();
    let held_id = held.id();

    thread::scope(|s| {
        let waiter = s.spawn(|| pool.get().unwrap().id());
        let timed = s.spawn(|| pool.get_timeout(Duration::MAX).unwrap().id());

        thread::sleep(Duration::from_millis(100));
        assert!(!waiter.is_finished());
        assert!(!timed.is_finished());

        drop(held);
        assert_eq!(waiter.join().unwrap(), held_id);
        assert_eq!(timed.join().unwrap(), held_id);
    });
}

#[test]
fn test_open_retries_stop_at_acquire_deadline() {
    let config = test_config()
        .acquire_retry_attempts(5)
        .acquire_retry_delay(Duration::from_secs(1));
    let (pool, state) = mock_pool(config).unwrap();
    state.set_fail_open(true);

    let started = Instant::now();
    let err = pool.get_timeout(Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, PoolError::Connect(_)));
    assert!(started.elapsed() < Duration::from_millis(800));
    assert_eq!(pool.status().total, 0);
}

#[test]
fn test_concurrent_callers_never_share_a_connection() {
    let config = test_config().max_connections_per_partition(4);
    let (pool, state) = mock_pool(config).unwrap();
    let held_ids = Mutex::new(HashSet::new());

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..50 {
                    let conn = pool.get().unwrap();
                    assert!(conn.is_checked_out());
                    assert!(held_ids.lock().insert(conn.id()), "connection handed out twice");

                    let status = pool.status();
                    assert!(status.total <= status.max);
                    assert!(status.available + status.in_use <= status.max);

                    assert!(held_ids.lock().remove(&conn.id()));
                    drop(conn);
                }
            });
        }
    });

    assert!(state.opened() <= 4);
    assert_eq!(state.double_closes(), 0);
    assert_eq!(pool.metrics().checkouts_successful, 400);
}

#[test]
fn test_round_robin_spreads_and_steals() {
    let config = test_config()
        .partition_count(2)
        .max_connections_per_partition(1)
        .partition_strategy(PartitionStrategy::RoundRobin);
    let (pool, _state) = mock_pool(config).unwrap();

    let a = pool.get().unwrap();
    let b = pool.get().unwrap();
    assert_eq!(a.partition(), 0);
    assert_eq!(b.partition(), 1);

    // partition 0 is full, so the free connection of partition 1 is taken
    let b_id = b.id();
    drop(b);
    let c = pool.get().unwrap();
    assert_eq!(c.id(), b_id);
    assert_eq!(c.partition(), 1);

    drop(c);
    assert_eq!(pool.partition_status(1).unwrap().available, 1);
    assert_eq!(pool.partition_status(0).unwrap().in_use(), 1);
    drop(a);
}

#[test]
fn test_open_failure_surfaces_as_connect_error() {
    let hook = Arc::new(RecordingHook::new());
    let config = test_config()
        .acquire_retry_attempts(2)
        .acquire_retry_delay(Duration::from_millis(5))
        .connection_hook(hook.clone());
    let (pool, state) = mock_pool(config).unwrap();
    state.set_fail_open(true);

    let err = pool.get().unwrap_err();
    assert!(matches!(err, PoolError::Connect(_)));
    assert_eq!(err.driver_error().unwrap().sql_state(), Some("08001"));
    assert_eq!(
        hook.count(|e| matches!(e, HookEvent::AcquireFail(_))),
        3,
        "one callback per attempt"
    );

    // the reserved slot was given back
    assert_eq!(pool.status().total, 0);
    state.set_fail_open(false);
    assert!(pool.get().is_ok());
}

#[test]
fn test_prewarm_failure_fails_creation() {
    let factory = MockFactory::new();
    factory.state().set_fail_open(true);

    let config = test_config().min_connections_per_partition(1);
    let err = Pool::new(config, Arc::new(factory)).unwrap_err();
    assert!(matches!(err, PoolError::Connect(_)));
}

#[test]
fn test_invalid_config_rejected() {
    let config = test_config()
        .min_connections_per_partition(5)
        .max_connections_per_partition(1);
    assert!(matches!(
        mock_pool(config).unwrap_err(),
        PoolError::Config(_)
    ));
}

#[test]
fn test_shutdown_closes_free_and_fails_outstanding() {
    init_tracing();
    let config = test_config().min_connections_per_partition(2);
    let (pool, state) = mock_pool(config).unwrap();
    let held = pool.get().unwrap();

    pool.shutdown();
    assert!(pool.is_closed());
    assert_eq!(state.closed(), 1);
    assert!(matches!(pool.get(), Err(PoolError::PoolClosed)));
    assert!(matches!(
        held.execute("SELECT 1"),
        Err(PoolError::AlreadyClosed("connection"))
    ));

    drop(held);
    assert_eq!(state.live(), 0);
    assert_eq!(state.double_closes(), 0);

    // second shutdown is a no-op
    pool.shutdown();
    assert_eq!(state.closed(), 2);
}

#[test]
fn test_shutdown_wakes_blocked_waiter() {
    let config = test_config().max_connections_per_partition(1);
    let (pool, _state) = mock_pool(config).unwrap();
    let _held = pool.get().unwrap();

    thread::scope(|s| {
        let waiter = s.spawn(|| pool.get_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(50));
        pool.shutdown();
        assert!(matches!(waiter.join().unwrap(), Err(PoolError::PoolClosed)));
    });
}

#[test]
fn test_connection_outliving_pool_fails_fast() {
    let (pool, state) = mock_pool(test_config()).unwrap();
    let conn = pool.get().unwrap();
    drop(pool);

    assert!(matches!(
        conn.prepare_statement("SELECT 1"),
        Err(PoolError::AlreadyClosed(_))
    ));
    drop(conn);
    assert_eq!(state.live(), 0);
}
