//! Pool partitions.
//!
//! Each partition owns a FIFO of free connections and a count of live
//! connections (free, checked out, or under test), guarded by one mutex.
//! Acquire, release and reaper sweeps all serialize on that lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::connection::ConnectionHandle;

/// Outcome of trying to take a connection from a partition.
pub(crate) enum Take {
    /// A free connection was popped.
    Free(Arc<ConnectionHandle>),
    /// A slot was reserved; the caller must open a connection or release it.
    Grow,
    /// The deadline passed with nothing available.
    TimedOut,
    /// The partition was closed while waiting.
    Closed,
}

struct PartitionState {
    free: VecDeque<Arc<ConnectionHandle>>,
    /// Live connections, including reserved slots still being opened.
    created: usize,
    closed: bool,
}

impl PartitionState {
    fn take(&mut self, max: usize) -> Option<Take> {
        if self.closed {
            return Some(Take::Closed);
        }
        if let Some(handle) = self.free.pop_front() {
            return Some(Take::Free(handle));
        }
        if self.created < max {
            self.created += 1;
            return Some(Take::Grow);
        }
        None
    }
}

pub(crate) struct Partition {
    index: usize,
    min: usize,
    max: usize,
    query_execute_time_limit: Option<Duration>,
    state: Mutex<PartitionState>,
    available: Condvar,
}

impl Partition {
    pub(crate) fn new(index: usize, min: usize, max: usize, query_limit: Duration) -> Self {
        Self {
            index,
            min,
            max,
            query_execute_time_limit: (!query_limit.is_zero()).then_some(query_limit),
            state: Mutex::new(PartitionState {
                free: VecDeque::with_capacity(max),
                created: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn min(&self) -> usize {
        self.min
    }

    pub(crate) fn query_execute_time_limit(&self) -> Option<Duration> {
        self.query_execute_time_limit
    }

    /// Take without waiting. `None` means the partition is at its ceiling.
    pub(crate) fn try_take(&self) -> Option<Take> {
        self.state.lock().take(self.max)
    }

    /// Take, waiting for a release or destroy until `deadline`.
    ///
    /// With no deadline the wait is unbounded.
    pub(crate) fn wait_take(&self, deadline: Option<Instant>) -> Take {
        let mut state = self.state.lock();
        loop {
            if let Some(take) = state.take(self.max) {
                return take;
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        return state.take(self.max).unwrap_or(Take::TimedOut);
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    /// Pop the oldest free connection.
    pub(crate) fn poll_free(&self) -> Option<Arc<ConnectionHandle>> {
        self.state.lock().free.pop_front()
    }

    /// Append `handle` to the free queue and wake one waiter.
    ///
    /// A closed partition refuses the handle and gives it back.
    pub(crate) fn put_free(
        &self,
        handle: Arc<ConnectionHandle>,
    ) -> Result<(), Arc<ConnectionHandle>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(handle);
        }
        debug_assert!(!handle.is_checked_out());
        debug_assert!(state.free.len() < self.max);
        state.free.push_back(handle);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Reserve a slot if fewer than `limit` connections are live.
    pub(crate) fn reserve_below(&self, limit: usize) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.created >= limit.min(self.max) {
            return false;
        }
        state.created += 1;
        true
    }

    /// Give back a slot after a destroy or a failed open.
    pub(crate) fn release_slot(&self) {
        let mut state = self.state.lock();
        state.created = state.created.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    /// Remove every free connection.
    pub(crate) fn drain_free(&self) -> Vec<Arc<ConnectionHandle>> {
        self.state.lock().free.drain(..).collect()
    }

    /// Refuse further hand-outs, wake all waiters and drain the free queue.
    pub(crate) fn close(&self) -> Vec<Arc<ConnectionHandle>> {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            state.free.drain(..).collect()
        };
        self.available.notify_all();
        drained
    }

    pub(crate) fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    pub(crate) fn status(&self) -> PartitionStatus {
        let state = self.state.lock();
        PartitionStatus {
            index: self.index,
            available: state.free.len(),
            total: state.created,
            max: self.max,
        }
    }
}

/// Point-in-time view of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionStatus {
    /// Partition index.
    pub index: usize,
    /// Free connections.
    pub available: usize,
    /// Live connections, free or not.
    pub total: usize,
    /// Connection ceiling.
    pub max: usize,
}

impl PartitionStatus {
    /// Connections held by callers or under test.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.total.saturating_sub(self.available)
    }
}
