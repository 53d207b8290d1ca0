//! # shardpool-testing
//!
//! Test infrastructure for shardpool.
//!
//! - [`MockFactory`]: an in-memory driver with failure injection and counters
//! - [`RecordingHook`]: a connection hook that records every callback
//! - [`init_tracing`]: test logging via `tracing-subscriber`, honouring `RUST_LOG`
//!
//! The pool's integration tests live in this crate's `tests/` directory.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod hook;
pub mod mock;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use shardpool::{Maintenance, Pool, PoolConfig};

pub use hook::{HookEvent, RecordingHook};
pub use mock::{MockConnection, MockFactory, MockState, MockStatement};

/// Install a test subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A configuration suited to tests: one partition, no background
/// maintenance, a short acquire timeout and no pacing between sweeps.
pub fn test_config() -> PoolConfig {
    PoolConfig::new()
        .partition_count(1)
        .min_connections_per_partition(0)
        .max_connections_per_partition(3)
        .connection_timeout(Duration::from_secs(2))
        .tester_pacing(Duration::ZERO)
        .maintenance(Maintenance::Manual)
}

/// Build a pool over a fresh [`MockFactory`].
pub fn mock_pool(config: PoolConfig) -> shardpool::Result<(Pool, Arc<MockState>)> {
    let factory = MockFactory::new();
    let state = factory.state();
    let pool = Pool::new(config, Arc::new(factory))?;
    Ok((pool, state))
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
