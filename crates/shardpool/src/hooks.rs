//! Pluggable lifecycle callbacks.
//!
//! A single [`ConnectionHook`] is shared by every connection and statement
//! of a pool. All methods have no-op defaults, so implementors override only
//! what they observe.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::connection::ConnectionHandle;
use crate::driver::{DriverError, Value};
use crate::statement::StatementHandle;

/// Positional parameters bound to a statement, keyed by 1-based index.
pub type LogParams = BTreeMap<usize, Value>;

/// What the pool should do after a driver error on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokenAction {
    /// Leave the connection as it is.
    Ignore,
    /// Flag the connection so the pool destroys it instead of reusing it.
    #[default]
    MarkBroken,
    /// Flag the connection and destroy every free connection in the pool.
    TerminateAll,
}

/// Callbacks invoked around connection and statement lifecycle events.
///
/// Hooks run on the thread that triggered the event (a caller, the reaper or
/// a release helper) and must not block for long.
pub trait ConnectionHook: Send + Sync {
    /// A new physical connection was opened.
    fn on_acquire(&self, _conn: &ConnectionHandle) {}

    /// Opening a physical connection failed.
    fn on_acquire_fail(&self, _error: &DriverError, _attempt: u32) {}

    /// A connection was handed to a caller.
    fn on_check_out(&self, _conn: &ConnectionHandle) {}

    /// A caller released a connection.
    fn on_check_in(&self, _conn: &ConnectionHandle) {}

    /// A connection is being destroyed.
    fn on_destroy(&self, _conn: &ConnectionHandle) {}

    /// A statement is about to be executed.
    fn on_before_statement_execute(
        &self,
        _conn: &ConnectionHandle,
        _statement: &StatementHandle,
        _sql: &str,
        _params: &LogParams,
    ) {
    }

    /// A statement finished executing successfully.
    fn on_after_statement_execute(
        &self,
        _conn: &ConnectionHandle,
        _statement: &StatementHandle,
        _sql: &str,
        _params: &LogParams,
    ) {
    }

    /// A statement ran longer than the configured query time limit.
    fn on_query_execute_time_limit_exceeded(
        &self,
        _conn: &ConnectionHandle,
        _statement: &StatementHandle,
        _sql: &str,
        _params: &LogParams,
        _elapsed: Duration,
    ) {
    }

    /// A driver call on `conn` failed.
    fn on_mark_possibly_broken(&self, _conn: &ConnectionHandle, _error: &DriverError) -> BrokenAction {
        BrokenAction::MarkBroken
    }
}
