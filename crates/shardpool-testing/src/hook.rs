//! A [`ConnectionHook`] that records every callback.

use std::time::Duration;

use parking_lot::Mutex;
use shardpool::{
    BrokenAction, ConnectionHandle, ConnectionHook, DriverError, LogParams, StatementHandle,
};

/// One recorded hook callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    /// `on_acquire`
    Acquire(u64),
    /// `on_acquire_fail`
    AcquireFail(u32),
    /// `on_check_out`
    CheckOut(u64),
    /// `on_check_in`
    CheckIn(u64),
    /// `on_destroy`
    Destroy(u64),
    /// `on_before_statement_execute`
    BeforeExecute(String),
    /// `on_after_statement_execute`
    AfterExecute(String),
    /// `on_query_execute_time_limit_exceeded`
    TimeLimitExceeded(String),
    /// `on_mark_possibly_broken`
    MarkBroken(u64),
}

/// Records hook callbacks and answers broken-connection callbacks with a
/// configurable [`BrokenAction`].
#[derive(Debug, Default)]
pub struct RecordingHook {
    events: Mutex<Vec<HookEvent>>,
    broken_action: Mutex<BrokenAction>,
    last_params: Mutex<LogParams>,
}

impl RecordingHook {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `on_mark_possibly_broken` with `action`.
    pub fn with_broken_action(self, action: BrokenAction) -> Self {
        *self.broken_action.lock() = action;
        self
    }

    /// Every event recorded so far.
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&HookEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Parameters seen by the last before-execute callback.
    pub fn last_params(&self) -> LogParams {
        self.last_params.lock().clone()
    }

    fn record(&self, event: HookEvent) {
        self.events.lock().push(event);
    }
}

impl ConnectionHook for RecordingHook {
    fn on_acquire(&self, conn: &ConnectionHandle) {
        self.record(HookEvent::Acquire(conn.id()));
    }

    fn on_acquire_fail(&self, _error: &DriverError, attempt: u32) {
        self.record(HookEvent::AcquireFail(attempt));
    }

    fn on_check_out(&self, conn: &ConnectionHandle) {
        self.record(HookEvent::CheckOut(conn.id()));
    }

    fn on_check_in(&self, conn: &ConnectionHandle) {
        self.record(HookEvent::CheckIn(conn.id()));
    }

    fn on_destroy(&self, conn: &ConnectionHandle) {
        self.record(HookEvent::Destroy(conn.id()));
    }

    fn on_before_statement_execute(
        &self,
        _conn: &ConnectionHandle,
        _statement: &StatementHandle,
        sql: &str,
        params: &LogParams,
    ) {
        *self.last_params.lock() = params.clone();
        self.record(HookEvent::BeforeExecute(sql.to_string()));
    }

    fn on_after_statement_execute(
        &self,
        _conn: &ConnectionHandle,
        _statement: &StatementHandle,
        sql: &str,
        _params: &LogParams,
    ) {
        self.record(HookEvent::AfterExecute(sql.to_string()));
    }

    fn on_query_execute_time_limit_exceeded(
        &self,
        _conn: &ConnectionHandle,
        _statement: &StatementHandle,
        sql: &str,
        _params: &LogParams,
        _elapsed: Duration,
    ) {
        self.record(HookEvent::TimeLimitExceeded(sql.to_string()));
    }

    fn on_mark_possibly_broken(&self, conn: &ConnectionHandle, _error: &DriverError) -> BrokenAction {
        self.record(HookEvent::MarkBroken(conn.id()));
        *self.broken_action.lock()
    }
}
