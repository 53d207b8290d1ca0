//! Pooled connection handles.
//!
//! A [`ConnectionHandle`] wraps one physical connection for its whole life.
//! While free it sits in exactly one partition's queue; while checked out it
//! is reachable only through the caller's [`PooledConnection`] guard.

use std::fmt;
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cache::StatementCache;
use crate::driver::{DriverError, PhysicalConnection, PrepareOptions};
use crate::error::{PoolError, Result};
use crate::hooks::{BrokenAction, ConnectionHook};
use crate::lifecycle::{ConnectionMetadata, ConnectionState};
use crate::pool::{PoolInner, PoolMetricsInner};
use crate::release::ReleaseQueue;
use crate::statement::StatementHandle;

/// State shared by every connection and statement of one pool.
pub(crate) struct PoolShared {
    pub(crate) hook: Option<Arc<dyn ConnectionHook>>,
    pub(crate) metrics: Mutex<PoolMetricsInner>,
    pub(crate) release_queue: Option<ReleaseQueue<Arc<StatementHandle>>>,
    pub(crate) log_statements: bool,
}

#[derive(Debug, Clone, Copy)]
struct Timestamps {
    last_used_at: Instant,
    last_reset_at: Instant,
}

/// One physical connection plus the pool's bookkeeping for it.
pub struct ConnectionHandle {
    id: u64,
    partition: usize,
    pool: Weak<PoolInner>,
    shared: Arc<PoolShared>,
    physical: Mutex<Option<Box<dyn PhysicalConnection>>>,
    statement_cache: Option<StatementCache<StatementHandle>>,
    query_execute_time_limit: Option<Duration>,
    created_at: Instant,
    timestamps: Mutex<Timestamps>,
    possibly_broken: AtomicBool,
    logically_closed: AtomicBool,
    checked_out: AtomicBool,
    destroyed: AtomicBool,
    generation: AtomicU64,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: u64,
        partition: usize,
        pool: Weak<PoolInner>,
        shared: Arc<PoolShared>,
        physical: Box<dyn PhysicalConnection>,
        statement_cache_size: usize,
        query_execute_time_limit: Option<Duration>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            partition,
            pool,
            shared,
            physical: Mutex::new(Some(physical)),
            statement_cache: NonZeroUsize::new(statement_cache_size).map(StatementCache::new),
            query_execute_time_limit,
            created_at: now,
            timestamps: Mutex::new(Timestamps {
                last_used_at: now,
                last_reset_at: now,
            }),
            possibly_broken: AtomicBool::new(false),
            logically_closed: AtomicBool::new(true),
            checked_out: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Pool-unique connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Index of the partition that owns this connection.
    #[must_use]
    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Whether a driver call on this connection has failed.
    #[must_use]
    pub fn is_possibly_broken(&self) -> bool {
        self.possibly_broken.load(Ordering::SeqCst)
    }

    /// Whether the connection is logically closed (free, released or destroyed).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.logically_closed.load(Ordering::SeqCst)
    }

    /// Whether a caller currently holds this connection.
    #[must_use]
    pub fn is_checked_out(&self) -> bool {
        self.checked_out.load(Ordering::SeqCst)
    }

    /// Whether the physical connection has been closed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.is_destroyed() {
            ConnectionState::Destroyed
        } else if self.is_possibly_broken() {
            ConnectionState::PossiblyBroken
        } else if self.is_checked_out() {
            ConnectionState::CheckedOut
        } else {
            ConnectionState::Free
        }
    }

    /// Snapshot of this connection's bookkeeping.
    #[must_use]
    pub fn metadata(&self) -> ConnectionMetadata {
        let ts = *self.timestamps.lock();
        ConnectionMetadata {
            id: self.id,
            partition: self.partition,
            created_at: self.created_at,
            last_used_at: ts.last_used_at,
            last_reset_at: ts.last_reset_at,
            state: self.state(),
        }
    }

    /// Number of statements in this connection's cache.
    #[must_use]
    pub fn cached_statements(&self) -> usize {
        self.statement_cache.as_ref().map_or(0, StatementCache::len)
    }

    /// Record a driver failure on this connection.
    ///
    /// The connection hook decides what happens; by default the connection is
    /// flagged so it gets destroyed instead of reused. The error is always
    /// handed back, wrapped as [`PoolError::Driver`], for the caller to
    /// propagate.
    pub fn mark_possibly_broken(&self, error: DriverError) -> PoolError {
        let action = self
            .shared
            .hook
            .as_ref()
            .map_or(BrokenAction::MarkBroken, |hook| {
                hook.on_mark_possibly_broken(self, &error)
            });

        match action {
            BrokenAction::Ignore => {}
            BrokenAction::MarkBroken => self.flag_broken(&error),
            BrokenAction::TerminateAll => {
                self.flag_broken(&error);
                if let Some(pool) = self.pool.upgrade() {
                    pool.terminate_all_connections();
                }
            }
        }

        PoolError::Driver(error)
    }

    fn flag_broken(&self, error: &DriverError) {
        if !self.possibly_broken.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                connection_id = self.id,
                partition = self.partition,
                error = %error,
                connection_failure = error.is_connection_failure(),
                "connection marked as possibly broken"
            );
        }
    }

    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    pub(crate) fn query_execute_time_limit(&self) -> Option<Duration> {
        self.query_execute_time_limit
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn last_used_at(&self) -> Instant {
        self.timestamps.lock().last_used_at
    }

    pub(crate) fn last_reset_at(&self) -> Instant {
        self.timestamps.lock().last_reset_at
    }

    pub(crate) fn set_last_used_at(&self, at: Instant) {
        self.timestamps.lock().last_used_at = at;
    }

    pub(crate) fn set_last_reset_at(&self, at: Instant) {
        self.timestamps.lock().last_reset_at = at;
    }

    /// Fail with `AlreadyClosed` unless a caller may use this connection.
    pub(crate) fn check_open(&self) -> Result<()> {
        let pool_closed = self.pool.upgrade().is_none_or(|pool| pool.is_closed());
        if self.is_closed() || self.is_destroyed() || pool_closed {
            return Err(PoolError::AlreadyClosed("connection"));
        }
        Ok(())
    }

    /// Run `f` against the physical connection, routing driver errors
    /// through [`mark_possibly_broken`](Self::mark_possibly_broken).
    pub(crate) fn with_physical<T>(
        &self,
        f: impl FnOnce(&mut dyn PhysicalConnection) -> std::result::Result<T, DriverError>,
    ) -> Result<T> {
        let mut physical = self.physical.lock();
        let conn = physical
            .as_deref_mut()
            .ok_or(PoolError::AlreadyClosed("connection"))?;
        f(conn).map_err(|e| self.mark_possibly_broken(e))
    }

    /// Run `f` against the physical connection without touching the broken flag.
    #[allow(clippy::redundant_closure)]
    pub(crate) fn probe<T>(&self, f: impl FnOnce(&mut dyn PhysicalConnection) -> T) -> Option<T> {
        let mut physical = self.physical.lock();
        // the closure reborrows with a shorter trait-object lifetime
        physical.as_deref_mut().map(|conn| f(conn))
    }

    /// Transition `Free -> CheckedOut`.
    pub(crate) fn check_out(&self) {
        let was_out = self.checked_out.swap(true, Ordering::SeqCst);
        debug_assert!(!was_out, "connection {} handed out twice", self.id);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.logically_closed.store(false, Ordering::SeqCst);
    }

    /// Transition `CheckedOut -> Free` (the caller may still destroy it).
    pub(crate) fn check_in(&self) {
        self.logically_closed.store(true, Ordering::SeqCst);
        let was_out = self.checked_out.swap(false, Ordering::SeqCst);
        debug_assert!(was_out, "connection {} released while not checked out", self.id);
    }

    /// Close the physical connection. Returns `false` if it was already destroyed.
    ///
    /// The destroy hook is not fired here; callers settle partition
    /// accounting first and then call [`notify_destroyed`](Self::notify_destroyed).
    pub(crate) fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.logically_closed.store(true, Ordering::SeqCst);

        if let Some(cache) = &self.statement_cache {
            cache.clear();
        }

        if let Some(mut conn) = self.physical.lock().take() {
            if let Err(e) = conn.close() {
                tracing::error!(
                    connection_id = self.id,
                    error = %e,
                    "failed to close physical connection"
                );
            }
        }

        self.shared.metrics.lock().connections_destroyed += 1;

        tracing::debug!(
            connection_id = self.id,
            partition = self.partition,
            "connection destroyed"
        );
        true
    }

    pub(crate) fn notify_destroyed(&self) {
        if let Some(hook) = &self.shared.hook {
            hook.on_destroy(self);
        }
    }

    fn prepare(
        self: &Arc<Self>,
        sql: &str,
        options: &PrepareOptions,
    ) -> Result<Arc<StatementHandle>> {
        self.check_open()?;
        let key = options.cache_key(sql);

        if let Some(cache) = &self.statement_cache {
            if let Some(statement) = cache.checkout(&key) {
                statement.attach(self.generation());
                self.shared.metrics.lock().statement_cache_hits += 1;
                tracing::trace!(connection_id = self.id, sql = sql, "statement cache hit");
                return Ok(statement);
            }
            self.shared.metrics.lock().statement_cache_misses += 1;
        }

        let driver = self.with_physical(|conn| conn.prepare(sql, options))?;
        let cache_key = self.statement_cache.as_ref().map(|_| key);
        let statement = Arc::new(StatementHandle::new(
            driver,
            Some(sql.to_string()),
            cache_key,
            self,
        ));

        if let (Some(cache), Some(key)) = (&self.statement_cache, statement.cache_key()) {
            cache.insert(key, &statement);
        }
        Ok(statement)
    }

    fn create_statement(self: &Arc<Self>) -> Result<Arc<StatementHandle>> {
        self.check_open()?;
        let driver = self.with_physical(|conn| conn.create_statement())?;
        Ok(Arc::new(StatementHandle::new(driver, None, None, self)))
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("partition", &self.partition)
            .field("state", &self.state())
            .finish()
    }
}

/// A connection checked out of the pool.
///
/// Dropping the guard (or calling [`close`](Self::close)) returns the
/// connection to its partition, or destroys it if it was marked broken.
pub struct PooledConnection {
    handle: Arc<ConnectionHandle>,
    pool: Weak<PoolInner>,
    released: bool,
}

impl PooledConnection {
    pub(crate) fn new(handle: Arc<ConnectionHandle>, pool: Weak<PoolInner>) -> Self {
        Self {
            handle,
            pool,
            released: false,
        }
    }

    /// The underlying handle, shared with statements opened on it.
    #[must_use]
    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// Create a plain statement.
    pub fn create_statement(&self) -> Result<Arc<StatementHandle>> {
        self.handle.create_statement()
    }

    /// Prepare `sql`, reusing an idle cached statement when caching is on.
    pub fn prepare_statement(&self, sql: &str) -> Result<Arc<StatementHandle>> {
        self.handle.prepare(sql, &PrepareOptions::default())
    }

    /// Prepare `sql` with explicit options.
    pub fn prepare_statement_with(
        &self,
        sql: &str,
        options: &PrepareOptions,
    ) -> Result<Arc<StatementHandle>> {
        self.handle.prepare(sql, options)
    }

    /// Prepare a stored-procedure call.
    pub fn prepare_call(&self, sql: &str) -> Result<Arc<StatementHandle>> {
        let options = PrepareOptions {
            callable: true,
            ..Default::default()
        };
        self.handle.prepare(sql, &options)
    }

    /// Execute `sql` directly on the connection.
    pub fn execute(&self, sql: &str) -> Result<u64> {
        self.handle.check_open()?;
        self.handle.with_physical(|conn| conn.execute(sql))
    }

    /// Return the connection to the pool.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match self.pool.upgrade() {
            Some(pool) => pool.release(Arc::clone(&self.handle)),
            None => {
                // pool already gone; nothing left to return to
                self.handle.check_in();
                if self.handle.destroy() {
                    self.handle.notify_destroyed();
                }
            }
        }
    }
}

impl Deref for PooledConnection {
    type Target = ConnectionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("handle", &self.handle)
            .field("released", &self.released)
            .finish()
    }
}
