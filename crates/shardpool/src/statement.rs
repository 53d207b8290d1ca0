//! Statement handles.
//!
//! Every driver call made through a [`StatementHandle`] goes through one
//! wrapper: open check, before-hook, timed driver call, after-hook, slow
//! query signal. A driver error flags the owning connection as possibly
//! broken and is returned unchanged.
//!
//! Hooks receive the statement by reference while its driver lock is held,
//! so they must not call back into the same statement.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cache::CacheEntry;
use crate::connection::{ConnectionHandle, PoolShared};
use crate::driver::{DriverError, DriverStatement, ResultSet, Value};
use crate::error::{PoolError, Result};
use crate::hooks::LogParams;
use crate::instrumentation::{MAX_LOGGED_SQL_LEN, extract_operation, fill_log_params};

struct StatementInner {
    driver: Option<Box<dyn DriverStatement>>,
    params: LogParams,
    batch_sql: String,
}

/// A plain or prepared statement opened on a pooled connection.
pub struct StatementHandle {
    inner: Mutex<StatementInner>,
    sql: Option<String>,
    cache_key: Option<String>,
    connection: Weak<ConnectionHandle>,
    connection_id: u64,
    generation: AtomicU64,
    shared: Arc<PoolShared>,
    query_execute_time_limit: Option<Duration>,
    logically_closed: AtomicBool,
    in_cache: AtomicBool,
}

impl StatementHandle {
    pub(crate) fn new(
        driver: Box<dyn DriverStatement>,
        sql: Option<String>,
        cache_key: Option<String>,
        connection: &Arc<ConnectionHandle>,
    ) -> Self {
        Self {
            inner: Mutex::new(StatementInner {
                driver: Some(driver),
                params: LogParams::new(),
                batch_sql: String::new(),
            }),
            sql,
            cache_key,
            connection: Arc::downgrade(connection),
            connection_id: connection.id(),
            generation: AtomicU64::new(connection.generation()),
            shared: Arc::clone(connection.shared()),
            query_execute_time_limit: connection.query_execute_time_limit(),
            logically_closed: AtomicBool::new(false),
            in_cache: AtomicBool::new(false),
        }
    }

    /// SQL text this statement was prepared with, if any.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// Key under which the statement is cached, if caching applies.
    #[must_use]
    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    /// Id of the connection this statement runs on.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.logically_closed.load(Ordering::SeqCst)
    }

    /// Whether the connection's statement cache currently owns this statement.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.in_cache.load(Ordering::SeqCst)
    }

    /// Execute `sql`; returns `true` if it produced a result set.
    pub fn execute(&self, sql: &str) -> Result<bool> {
        self.delegate(Some(sql), |stmt| stmt.execute(sql))
    }

    /// Execute a query and collect its rows.
    pub fn execute_query(&self, sql: &str) -> Result<ResultSet> {
        self.delegate(Some(sql), |stmt| stmt.execute_query(sql))
    }

    /// Execute an update; returns the affected row count.
    pub fn execute_update(&self, sql: &str) -> Result<u64> {
        self.delegate(Some(sql), |stmt| stmt.execute_update(sql))
    }

    /// Run the prepared SQL as a query.
    pub fn query(&self) -> Result<ResultSet> {
        let sql = self.sql.as_deref().ok_or(PoolError::MissingSql)?;
        self.execute_query(sql)
    }

    /// Run the prepared SQL as an update.
    pub fn update(&self) -> Result<u64> {
        let sql = self.sql.as_deref().ok_or(PoolError::MissingSql)?;
        self.execute_update(sql)
    }

    /// Bind a positional parameter (1-based).
    pub fn bind(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let conn = self.check_open()?;
        let mut inner = self.inner.lock();
        let driver = inner
            .driver
            .as_deref_mut()
            .ok_or(PoolError::AlreadyClosed("statement"))?;
        driver
            .bind(index, &value)
            .map_err(|e| conn.mark_possibly_broken(e))?;
        inner.params.insert(index, value);
        Ok(())
    }

    /// Add `sql` to the current batch.
    pub fn add_batch(&self, sql: &str) -> Result<()> {
        let conn = self.check_open()?;
        let mut inner = self.inner.lock();
        let driver = inner
            .driver
            .as_deref_mut()
            .ok_or(PoolError::AlreadyClosed("statement"))?;
        driver.add_batch(sql).map_err(|e| conn.mark_possibly_broken(e))?;

        if inner.batch_sql.len() < MAX_LOGGED_SQL_LEN {
            if !inner.batch_sql.is_empty() {
                inner.batch_sql.push_str("; ");
            }
            inner.batch_sql.push_str(sql);
        }
        Ok(())
    }

    /// Discard the current batch.
    pub fn clear_batch(&self) -> Result<()> {
        let conn = self.check_open()?;
        let mut inner = self.inner.lock();
        let driver = inner
            .driver
            .as_deref_mut()
            .ok_or(PoolError::AlreadyClosed("statement"))?;
        driver.clear_batch().map_err(|e| conn.mark_possibly_broken(e))?;
        inner.batch_sql.clear();
        Ok(())
    }

    /// Execute the current batch; returns per-command update counts.
    pub fn execute_batch(&self) -> Result<Vec<u64>> {
        let counts = self.delegate(None, |stmt| stmt.execute_batch())?;
        self.inner.lock().batch_sql.clear();
        Ok(counts)
    }

    /// Ask the driver to cancel the statement.
    pub fn cancel(&self) -> Result<()> {
        let conn = self.check_open()?;
        let mut inner = self.inner.lock();
        let driver = inner
            .driver
            .as_deref_mut()
            .ok_or(PoolError::AlreadyClosed("statement"))?;
        driver.cancel().map_err(|e| conn.mark_possibly_broken(e))
    }

    /// Logically close the statement.
    ///
    /// Further calls fail with [`PoolError::AlreadyClosed`]. A cached
    /// statement stays open in the cache for the next prepare of the same
    /// SQL. Otherwise the driver statement is handed to a release helper
    /// when one is configured and available, or closed on this thread.
    /// Closing twice is a no-op.
    pub fn close(self: &Arc<Self>) -> Result<()> {
        if self.logically_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let mut inner = self.inner.lock();
            inner.params.clear();
            inner.batch_sql.clear();
        }

        if self.in_cache.load(Ordering::SeqCst) {
            return Ok(());
        }

        let statement = match &self.shared.release_queue {
            Some(queue) => match queue.offer(Arc::clone(self)) {
                Ok(handoff) => {
                    self.shared.metrics.lock().statements_closed_deferred += 1;
                    tracing::debug!(
                        connection_id = self.connection_id,
                        handoff = ?handoff,
                        "statement close deferred to release helper"
                    );
                    return Ok(());
                }
                Err(statement) => statement,
            },
            None => Arc::clone(self),
        };

        self.shared.metrics.lock().statements_closed_inline += 1;
        statement.internal_close()
    }

    /// Physically close the driver statement.
    pub(crate) fn internal_close(&self) -> Result<()> {
        let driver = {
            let mut inner = self.inner.lock();
            inner.params.clear();
            inner.batch_sql.clear();
            inner.driver.take()
        };
        let Some(mut driver) = driver else {
            return Ok(());
        };

        match driver.close() {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_failure() => match self.connection.upgrade() {
                Some(conn) => Err(conn.mark_possibly_broken(e)),
                None => Err(PoolError::Driver(e)),
            },
            Err(e) => Err(PoolError::Driver(e)),
        }
    }

    /// Bind a cached statement to the connection's current checkout.
    pub(crate) fn attach(&self, generation: u64) {
        self.generation.store(generation, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<Arc<ConnectionHandle>> {
        if self.is_closed() {
            return Err(PoolError::AlreadyClosed("statement"));
        }
        let conn = self
            .connection
            .upgrade()
            .ok_or(PoolError::AlreadyClosed("connection"))?;
        conn.check_open()?;
        if conn.generation() != self.generation.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyClosed("statement"));
        }
        Ok(conn)
    }

    /// `sql` of `None` logs the buffered batch.
    fn delegate<T>(
        &self,
        sql: Option<&str>,
        op: impl FnOnce(&mut dyn DriverStatement) -> std::result::Result<T, DriverError>,
    ) -> Result<T> {
        let conn = self.check_open()?;
        let mut guard = self.inner.lock();
        let StatementInner {
            driver,
            params,
            batch_sql,
        } = &mut *guard;
        let driver = driver
            .as_deref_mut()
            .ok_or(PoolError::AlreadyClosed("statement"))?;
        let sql = sql.unwrap_or(batch_sql.as_str());
        let hook = self.shared.hook.as_deref();

        if self.shared.log_statements {
            tracing::debug!(
                connection_id = self.connection_id,
                operation = extract_operation(sql),
                sql = %fill_log_params(sql, params),
                "executing statement"
            );
        }

        if let Some(hook) = hook {
            hook.on_before_statement_execute(&conn, self, sql, params);
        }

        let started = Instant::now();
        let result = op(driver);
        let elapsed = started.elapsed();

        let value = match result {
            Ok(value) => value,
            Err(e) => return Err(conn.mark_possibly_broken(e)),
        };

        if let Some(hook) = hook {
            hook.on_after_statement_execute(&conn, self, sql, params);
        }

        if self
            .query_execute_time_limit
            .is_some_and(|limit| elapsed > limit)
        {
            self.shared.metrics.lock().query_time_limit_exceeded += 1;
            match hook {
                Some(hook) => {
                    hook.on_query_execute_time_limit_exceeded(&conn, self, sql, params, elapsed);
                }
                None => tracing::warn!(
                    connection_id = self.connection_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    sql = %fill_log_params(sql, params),
                    "query execute time limit exceeded"
                ),
            }
        }

        Ok(value)
    }
}

impl CacheEntry for StatementHandle {
    fn try_reopen(&self) -> bool {
        self.logically_closed
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn set_cached(&self, cached: bool) {
        self.in_cache.store(cached, Ordering::SeqCst);
    }

    fn evicted(&self) {
        if self.is_closed() {
            if let Err(e) = self.internal_close() {
                tracing::warn!(
                    connection_id = self.connection_id,
                    error = %e,
                    "failed to close evicted statement"
                );
            }
        }
    }
}

impl Drop for StatementHandle {
    fn drop(&mut self) {
        if let Some(mut driver) = self.inner.get_mut().driver.take() {
            if let Err(e) = driver.close() {
                tracing::debug!(
                    connection_id = self.connection_id,
                    error = %e,
                    "failed to close dropped statement"
                );
            }
        }
    }
}

impl fmt::Debug for StatementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementHandle")
            .field("connection_id", &self.connection_id)
            .field("sql", &self.sql)
            .field("closed", &self.is_closed())
            .field("cached", &self.is_cached())
            .finish()
    }
}
