//! Idle connection reaper.
//!
//! One [`ConnectionTester`] per partition. Each run sweeps the partition's
//! free connections, destroying broken or over-aged ones and sending a
//! keep-alive test to those idle past the test period, then reschedules
//! itself on the pool's scheduler after the shortest remaining wait.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::connection::ConnectionHandle;
use crate::partition::Partition;
use crate::pool::PoolInner;

/// Lower bound on the delay between sweeps.
pub(crate) const MIN_SWEEP_DELAY: Duration = Duration::from_millis(10);

pub(crate) struct ConnectionTester {
    partition: usize,
    pool: Weak<PoolInner>,
}

impl ConnectionTester {
    pub(crate) fn new(partition: usize, pool: Weak<PoolInner>) -> Self {
        Self { partition, pool }
    }

    /// Sweep once and schedule the next run.
    pub(crate) fn run(self: Arc<Self>) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let Some(partition) = pool.partition(self.partition) else {
            return;
        };

        let next = panic::catch_unwind(AssertUnwindSafe(|| sweep(&pool, partition)))
            .unwrap_or_else(|_| {
                tracing::error!(
                    partition = self.partition,
                    "connection tester sweep panicked; rescheduling"
                );
                pool.config().maintenance_period().max(MIN_SWEEP_DELAY)
            });

        let Some(scheduler) = pool.scheduler() else {
            return;
        };
        let tester = Arc::clone(&self);
        drop(pool);
        if scheduler.schedule(next, move || tester.run()).is_err() {
            tracing::debug!(
                partition = self.partition,
                "scheduler shut down; connection tester exiting"
            );
        } else {
            tracing::trace!(
                partition = self.partition,
                next_ms = next.as_millis() as u64,
                "connection tester rescheduled"
            );
        }
    }
}

/// Returns a tested handle to its partition if the sweep unwinds.
struct InFlight<'a> {
    pool: &'a PoolInner,
    handle: Option<Arc<ConnectionHandle>>,
}

impl InFlight<'_> {
    fn finish(mut self) -> Option<Arc<ConnectionHandle>> {
        self.handle.take()
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.return_or_destroy(handle);
        }
    }
}

/// Sweep the free connections of `partition` once.
///
/// The clock is read per connection, so pacing does not skew age checks.
/// Returns the delay until the next sweep is due: the shortest time until a
/// kept connection's last keep-alive falls a full test period behind.
pub(crate) fn sweep(pool: &PoolInner, partition: &Partition) -> Duration {
    let config = pool.config();
    let max_age = config.idle_max_age;
    let test_period = config.idle_connection_test_period;
    let mut next = config.maintenance_period();

    let to_check = partition.free_count();
    for checked in 0..to_check {
        if pool.is_closed() {
            break;
        }
        if checked > 0 && !config.tester_pacing.is_zero() {
            thread::sleep(config.tester_pacing);
        }
        let Some(handle) = partition.poll_free() else {
            break;
        };
        let guard = InFlight {
            pool,
            handle: Some(Arc::clone(&handle)),
        };

        let now = Instant::now();
        let last_used = handle.last_used_at();
        let idle = now.saturating_duration_since(last_used);

        if handle.is_possibly_broken()
            || (!max_age.is_zero() && partition.free_count() >= partition.min() && idle > max_age)
        {
            tracing::debug!(
                connection_id = handle.id(),
                partition = partition.index(),
                broken = handle.is_possibly_broken(),
                idle_ms = idle.as_millis() as u64,
                "evicting idle connection"
            );
            drop(guard.finish());
            pool.destroy_connection(&handle);
            continue;
        }

        let last_reset = handle.last_reset_at();
        if !test_period.is_zero()
            && idle > test_period
            && now.saturating_duration_since(last_reset) > test_period
        {
            let result = pool.test_connection(&handle);
            if !result.is_healthy() {
                tracing::debug!(
                    connection_id = handle.id(),
                    partition = partition.index(),
                    result = ?result,
                    "keep-alive test failed"
                );
                drop(guard.finish());
                pool.destroy_connection(&handle);
                continue;
            }
            handle.set_last_reset_at(now);
            tracing::trace!(connection_id = handle.id(), "keep-alive test passed");
            next = next.min(test_period);
        } else if !test_period.is_zero() {
            let since_reset = now.saturating_duration_since(last_reset);
            next = next.min(test_period.saturating_sub(since_reset));
        }

        if let Some(handle) = guard.finish() {
            pool.return_or_destroy(handle);
        }
    }

    match pool.fill_to_minimum(partition) {
        Ok(0) => {}
        Ok(opened) => tracing::debug!(
            partition = partition.index(),
            opened,
            "replenished partition to minimum"
        ),
        Err(e) => tracing::warn!(
            partition = partition.index(),
            error = %e,
            "failed to replenish partition to minimum"
        ),
    }

    next.max(MIN_SWEEP_DELAY)
}
