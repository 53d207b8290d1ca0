//! Idle eviction and keep-alive sweeps.
//!
//! Most tests run in manual maintenance mode and drive sweeps with
//! `Pool::maintain` so timings stay deterministic.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use shardpool::{ConnectionHandle, ConnectionHook, DriverError, Maintenance};
use shardpool_testing::{eventually, init_tracing, mock_pool, test_config};

#[test]
fn test_aged_connection_is_evicted() {
    init_tracing();
    let config = test_config()
        .idle_max_age(Duration::from_millis(100))
        .idle_connection_test_period(Duration::ZERO);
    let (pool, state) = mock_pool(config).unwrap();
    drop(pool.get().unwrap());

    pool.maintain();
    assert_eq!(pool.status().available, 1, "not yet idle long enough");

    thread::sleep(Duration::from_millis(150));
    pool.maintain();

    let status = pool.status();
    assert_eq!(status.available, 0);
    assert_eq!(status.total, 0);
    assert_eq!(state.closed(), 1);
}

#[test]
fn test_eviction_keeps_partition_minimum() {
    let config = test_config()
        .min_connections_per_partition(1)
        .idle_max_age(Duration::from_millis(50))
        .idle_connection_test_period(Duration::ZERO);
    let (pool, state) = mock_pool(config).unwrap();
    assert_eq!(state.opened(), 1);

    thread::sleep(Duration::from_millis(80));
    pool.maintain();

    assert_eq!(pool.status().available, 1);
    assert_eq!(state.closed(), 0);
}

#[test]
fn test_idle_connection_gets_one_keep_alive() {
    init_tracing();
    let config = test_config()
        .idle_max_age(Duration::ZERO)
        .idle_connection_test_period(Duration::from_millis(50));
    let (pool, state) = mock_pool(config).unwrap();
    let conn = pool.get().unwrap();
    let handle = Arc::clone(conn.handle());
    drop(conn);
    let reset_before = handle.metadata().last_reset_at;

    thread::sleep(Duration::from_millis(60));
    pool.maintain();

    assert_eq!(state.validations(), 1);
    assert!(handle.metadata().last_reset_at > reset_before);
    assert!(!handle.is_destroyed());
    assert_eq!(pool.status().available, 1);

    // just reset, so the next sweep leaves it alone
    pool.maintain();
    assert_eq!(state.validations(), 1);
    assert_eq!(pool.metrics().health_checks_performed, 1);
}

#[test]
fn test_failed_keep_alive_destroys_connection() {
    let config = test_config()
        .idle_max_age(Duration::ZERO)
        .idle_connection_test_period(Duration::from_millis(20));
    let (pool, state) = mock_pool(config).unwrap();
    drop(pool.get().unwrap());
    state.set_valid(false);

    thread::sleep(Duration::from_millis(40));
    pool.maintain();

    assert_eq!(state.closed(), 1);
    assert_eq!(pool.status().total, 0);
    let metrics = pool.metrics();
    assert_eq!(metrics.health_checks_failed, 1);
    assert!(metrics.health_check_success_rate() < 1.0);
}

#[test]
fn test_keep_alive_uses_test_statement_when_configured() {
    let config = test_config()
        .idle_max_age(Duration::ZERO)
        .idle_connection_test_period(Duration::from_millis(20))
        .connection_test_statement("SELECT 1");
    let (pool, state) = mock_pool(config).unwrap();
    drop(pool.get().unwrap());

    thread::sleep(Duration::from_millis(40));
    pool.maintain();

    assert_eq!(state.executes(), 1);
    assert_eq!(state.validations(), 0);
    assert_eq!(pool.status().available, 1);
}

#[test]
fn test_broken_connection_evicted_without_keep_alive() {
    let config = test_config()
        .idle_max_age(Duration::ZERO)
        .idle_connection_test_period(Duration::from_millis(20));
    let (pool, state) = mock_pool(config).unwrap();
    let conn = pool.get().unwrap();
    let handle = Arc::clone(conn.handle());
    drop(conn);
    handle.mark_possibly_broken(DriverError::new("observed late"));

    thread::sleep(Duration::from_millis(40));
    pool.maintain();

    assert!(handle.is_destroyed());
    assert_eq!(state.validations(), 0);
}

#[test]
fn test_age_is_measured_per_connection_during_paced_sweep() {
    let config = test_config()
        .idle_max_age(Duration::from_millis(100))
        .idle_connection_test_period(Duration::ZERO)
        .tester_pacing(Duration::from_millis(60));
    let (pool, state) = mock_pool(config).unwrap();
    let a = pool.get().unwrap();
    let b = pool.get().unwrap();
    drop(a);
    drop(b);

    // the first connection is young enough; the second ages past the
    // limit while the sweep paces
    thread::sleep(Duration::from_millis(70));
    pool.maintain();

    assert_eq!(state.closed(), 1);
    assert_eq!(pool.status().available, 1);
}

/// Panics the first time a connection is destroyed.
#[derive(Default)]
struct FaultyDestroyHook {
    destroys: AtomicUsize,
}

impl ConnectionHook for FaultyDestroyHook {
    fn on_destroy(&self, _conn: &ConnectionHandle) {
        if self.destroys.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("destroy hook failed");
        }
    }
}

#[test]
fn test_panicking_sweep_keeps_capacity_and_reschedules() {
    init_tracing();
    let hook = Arc::new(FaultyDestroyHook::default());
    let config = test_config()
        .maintenance(Maintenance::Scheduled)
        .max_connections_per_partition(1)
        .idle_max_age(Duration::from_millis(50))
        .idle_connection_test_period(Duration::ZERO)
        .connection_hook(hook.clone());
    let (pool, state) = mock_pool(config).unwrap();
    drop(pool.get().unwrap());

    assert!(eventually(Duration::from_secs(3), || state.closed() == 1));
    assert!(eventually(Duration::from_secs(1), || {
        hook.destroys.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(pool.status().total, 0);

    // the slot came back, and the reaper keeps running after the panic
    drop(pool.get_timeout(Duration::from_millis(500)).unwrap());
    assert!(eventually(Duration::from_secs(3), || {
        hook.destroys.load(Ordering::SeqCst) == 2
    }));
    assert_eq!(state.closed(), 2);
    assert_eq!(pool.status().total, 0);
}

#[test]
fn test_sweep_replenishes_minimum() {
    let config = test_config()
        .min_connections_per_partition(2)
        .idle_max_age(Duration::from_secs(60));
    let (pool, state) = mock_pool(config).unwrap();
    pool.terminate_all_connections();
    assert_eq!(pool.status().total, 0);

    pool.maintain();
    assert_eq!(pool.status().available, 2);
    assert_eq!(state.opened(), 4);
}

#[test]
fn test_next_sweep_delay_tracks_time_until_keep_alive() {
    let period = Duration::from_millis(200);
    let config = test_config()
        .idle_max_age(Duration::ZERO)
        .idle_connection_test_period(period);
    let (pool, _state) = mock_pool(config).unwrap();
    drop(pool.get().unwrap());

    thread::sleep(Duration::from_millis(50));
    let next = pool.maintain();
    assert!(next <= Duration::from_millis(150));
    assert!(next >= Duration::from_millis(10));
}

#[test]
fn test_scheduled_reaper_runs_in_background() {
    init_tracing();
    let config = test_config()
        .maintenance(Maintenance::Scheduled)
        .idle_max_age(Duration::from_millis(50))
        .idle_connection_test_period(Duration::ZERO);
    let (pool, state) = mock_pool(config).unwrap();
    drop(pool.get().unwrap());

    assert!(eventually(Duration::from_secs(3), || state.closed() == 1));
    assert_eq!(pool.status().total, 0);

    drop(pool);
    assert_eq!(state.live(), 0);
}
