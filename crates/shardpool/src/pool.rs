//! Connection pool implementation.
//!
//! The pool splits its capacity into independently locked partitions. A
//! caller is routed to one partition, takes a free connection or opens a new
//! one under the partition's ceiling, and otherwise borrows a free
//! connection from a sibling partition before blocking.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{Maintenance, PartitionStrategy, PoolConfig};
use crate::connection::{ConnectionHandle, PoolShared, PooledConnection};
use crate::driver::ConnectionFactory;
use crate::error::{PoolError, Result};
use crate::hooks::ConnectionHook;
use crate::lifecycle::HealthCheckResult;
use crate::partition::{Partition, PartitionStatus, Take};
use crate::release::{ReleaseHelpers, ReleaseQueue};
use crate::scheduler::Scheduler;
use crate::tester::{self, ConnectionTester, MIN_SWEEP_DELAY};

/// A partitioned pool of blocking database connections.
///
/// # Example
///
/// ```rust,ignore
/// use shardpool::{Pool, PoolConfig};
/// use std::time::Duration;
///
/// let pool = Pool::builder()
///     .factory(my_driver_factory)
///     .partition_count(2)
///     .max_connections_per_partition(5)
///     .idle_max_age(Duration::from_secs(600))
///     .build()?;
///
/// let conn = pool.get()?;
/// let stmt = conn.prepare_statement("SELECT name FROM users WHERE id = ?")?;
/// stmt.bind(1, 42)?;
/// let rows = stmt.query()?;
/// stmt.close()?;
/// // connection returns to its partition on drop
/// ```
pub struct Pool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    me: Weak<PoolInner>,
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    partitions: Vec<Partition>,
    shared: Arc<PoolShared>,
    scheduler: Option<Arc<Scheduler>>,
    helpers: Mutex<Option<ReleaseHelpers>>,
    closed: AtomicBool,
    next_connection_id: AtomicU64,
    next_partition: AtomicUsize,
    created_at: Instant,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
pub(crate) struct PoolMetricsInner {
    pub(crate) connections_created: u64,
    pub(crate) connections_destroyed: u64,
    pub(crate) checkouts_successful: u64,
    pub(crate) checkouts_failed: u64,
    pub(crate) health_checks_performed: u64,
    pub(crate) health_checks_failed: u64,
    pub(crate) statement_cache_hits: u64,
    pub(crate) statement_cache_misses: u64,
    pub(crate) statements_closed_deferred: u64,
    pub(crate) statements_closed_inline: u64,
    pub(crate) query_time_limit_exceeded: u64,
}

impl Pool {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Create a pool, opening the minimum connections of every partition.
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Self> {
        config.validate()?;

        let (release_queue, helpers) = if config.statement_release_helper_threads > 0 {
            let (queue, receivers) = ReleaseQueue::new(config.statement_release_queue_capacity);
            let helpers =
                ReleaseHelpers::spawn(config.statement_release_helper_threads, receivers)
                    .map_err(PoolError::Background)?;
            (Some(queue), Some(helpers))
        } else {
            (None, None)
        };

        let scheduler = if config.maintenance_enabled()
            && config.maintenance == Maintenance::Scheduled
        {
            Some(Arc::new(Scheduler::new().map_err(PoolError::Background)?))
        } else {
            None
        };

        let shared = Arc::new(PoolShared {
            hook: config.connection_hook.clone(),
            metrics: Mutex::new(PoolMetricsInner::default()),
            release_queue,
            log_statements: config.log_statements,
        });

        let partitions = (0..config.partition_count)
            .map(|index| {
                Partition::new(
                    index,
                    config.min_connections_per_partition,
                    config.max_connections_per_partition,
                    config.query_execute_time_limit,
                )
            })
            .collect();

        let inner = Arc::new_cyclic(|me| PoolInner {
            me: me.clone(),
            config,
            factory,
            partitions,
            shared,
            scheduler,
            helpers: Mutex::new(helpers),
            closed: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(1),
            next_partition: AtomicUsize::new(0),
            created_at: Instant::now(),
        });

        for partition in &inner.partitions {
            if let Err(e) = inner.fill_to_minimum(partition) {
                inner.shutdown();
                return Err(e);
            }
        }

        if let Some(scheduler) = &inner.scheduler {
            let period = inner.config.maintenance_period().max(MIN_SWEEP_DELAY);
            for index in 0..inner.partitions.len() {
                let tester = Arc::new(ConnectionTester::new(index, Arc::downgrade(&inner)));
                if scheduler.schedule(period, move || tester.run()).is_err() {
                    tracing::debug!(partition = index, "scheduler unavailable; tester not started");
                }
            }
        }

        tracing::info!(
            partitions = inner.config.partition_count,
            min_per_partition = inner.config.min_connections_per_partition,
            max_per_partition = inner.config.max_connections_per_partition,
            "connection pool created"
        );

        Ok(Self { inner })
    }

    /// Get a connection, waiting up to the configured connection timeout.
    pub fn get(&self) -> Result<PooledConnection> {
        self.inner.acquire(self.inner.config.connection_timeout)
    }

    /// Get a connection, waiting at most `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<PooledConnection> {
        self.inner.acquire(timeout)
    }

    /// Try to get a connection without waiting.
    ///
    /// Returns `None` if every partition is at its ceiling with nothing free.
    pub fn try_get(&self) -> Result<Option<PooledConnection>> {
        match self.inner.acquire(Duration::ZERO) {
            Ok(conn) => Ok(Some(conn)),
            Err(PoolError::PoolExhausted { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get the current pool status, summed over partitions.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.partition_statuses()
            .into_iter()
            .fold(PoolStatus::default(), |acc, p| PoolStatus {
                available: acc.available + p.available,
                in_use: acc.in_use + p.in_use(),
                total: acc.total + p.total,
                max: acc.max + p.max,
            })
    }

    /// Status of partition `index`.
    #[must_use]
    pub fn partition_status(&self, index: usize) -> Option<PartitionStatus> {
        self.inner.partition(index).map(Partition::status)
    }

    /// Status of every partition.
    #[must_use]
    pub fn partition_statuses(&self) -> Vec<PartitionStatus> {
        self.inner.partitions.iter().map(Partition::status).collect()
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let pending_statement_releases = self
            .inner
            .shared
            .release_queue
            .as_ref()
            .map_or(0, ReleaseQueue::backlog_len);
        let inner = self.inner.shared.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_destroyed: inner.connections_destroyed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            health_checks_performed: inner.health_checks_performed,
            health_checks_failed: inner.health_checks_failed,
            statement_cache_hits: inner.statement_cache_hits,
            statement_cache_misses: inner.statement_cache_misses,
            statements_closed_deferred: inner.statements_closed_deferred,
            statements_closed_inline: inner.statements_closed_inline,
            query_time_limit_exceeded: inner.query_time_limit_exceeded,
            pending_statement_releases,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Sweep every partition now.
    ///
    /// This is what the background reaper does on its timer; with
    /// [`Maintenance::Manual`] it is the only way sweeps happen. Returns the
    /// shortest delay until a partition is due again.
    pub fn maintain(&self) -> Duration {
        self.inner
            .partitions
            .iter()
            .map(|partition| tester::sweep(&self.inner, partition))
            .min()
            .unwrap_or(MIN_SWEEP_DELAY)
    }

    /// Destroy every free connection in every partition.
    pub fn terminate_all_connections(&self) {
        self.inner.terminate_all_connections();
    }

    /// Shut the pool down.
    ///
    /// Stops the reapers (letting an in-flight sweep finish), drains the
    /// release helpers and destroys every free connection. Connections still
    /// checked out are destroyed when released; until then their operations
    /// fail with [`PoolError::AlreadyClosed`].
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PoolInner {
    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn partition(&self, index: usize) -> Option<&Partition> {
        self.partitions.get(index)
    }

    pub(crate) fn scheduler(&self) -> Option<Arc<Scheduler>> {
        self.scheduler.clone()
    }

    fn select_partition(&self) -> usize {
        let count = self.partitions.len();
        if count == 1 {
            return 0;
        }
        match self.config.partition_strategy {
            PartitionStrategy::RoundRobin => {
                self.next_partition.fetch_add(1, Ordering::Relaxed) % count
            }
            PartitionStrategy::ThreadAffinity => {
                let mut hasher = DefaultHasher::new();
                thread::current().id().hash(&mut hasher);
                (hasher.finish() % count as u64) as usize
            }
        }
    }

    fn steal(&self, skip: usize) -> Option<Arc<ConnectionHandle>> {
        self.partitions
            .iter()
            .filter(|p| p.index() != skip)
            .find_map(Partition::poll_free)
    }

    fn acquire(&self, timeout: Duration) -> Result<PooledConnection> {
        let started = Instant::now();
        // None waits without a deadline
        let deadline = started.checked_add(timeout);
        let index = self.select_partition();
        let partition = &self.partitions[index];

        loop {
            if self.is_closed() {
                return Err(PoolError::PoolClosed);
            }

            let take = match partition.try_take() {
                Some(take) => take,
                None => match self.steal(index) {
                    Some(handle) => Take::Free(handle),
                    None => partition.wait_take(deadline),
                },
            };

            let handle = match take {
                Take::Free(handle) => handle,
                Take::Grow => match self.open_connection(partition, deadline) {
                    Ok(handle) => handle,
                    Err(e) => {
                        self.shared.metrics.lock().checkouts_failed += 1;
                        return Err(e);
                    }
                },
                Take::TimedOut => {
                    self.shared.metrics.lock().checkouts_failed += 1;
                    let waited = started.elapsed();
                    tracing::debug!(
                        partition = index,
                        waited_ms = waited.as_millis() as u64,
                        "partition exhausted"
                    );
                    return Err(PoolError::PoolExhausted {
                        partition: index,
                        waited,
                    });
                }
                Take::Closed => return Err(PoolError::PoolClosed),
            };

            if handle.is_possibly_broken() {
                self.destroy_connection(&handle);
                continue;
            }

            handle.check_out();
            if let Some(hook) = &self.shared.hook {
                hook.on_check_out(&handle);
            }
            self.shared.metrics.lock().checkouts_successful += 1;
            tracing::trace!(
                connection_id = handle.id(),
                partition = handle.partition(),
                "connection checked out"
            );
            return Ok(PooledConnection::new(handle, self.me.clone()));
        }
    }

    /// Open a physical connection into a slot already reserved on `partition`.
    ///
    /// The slot is given back if every attempt fails. Retries stop at
    /// `deadline`, and the delay between them never sleeps past it.
    fn open_connection(
        &self,
        partition: &Partition,
        deadline: Option<Instant>,
    ) -> Result<Arc<ConnectionHandle>> {
        let attempts = self.config.acquire_retry_attempts.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.factory.open() {
                Ok(physical) => {
                    let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                    let handle = Arc::new(ConnectionHandle::new(
                        id,
                        partition.index(),
                        self.me.clone(),
                        Arc::clone(&self.shared),
                        physical,
                        self.config.statement_cache_size,
                        partition.query_execute_time_limit(),
                    ));
                    if let Some(hook) = &self.shared.hook {
                        hook.on_acquire(&handle);
                    }
                    self.shared.metrics.lock().connections_created += 1;
                    tracing::debug!(
                        connection_id = id,
                        partition = partition.index(),
                        "opened physical connection"
                    );
                    return Ok(handle);
                }
                Err(e) => {
                    if let Some(hook) = &self.shared.hook {
                        hook.on_acquire_fail(&e, attempt);
                    }
                    tracing::warn!(
                        partition = partition.index(),
                        attempt,
                        error = %e,
                        "failed to open physical connection"
                    );
                    let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
                    if attempt >= attempts
                        || remaining.is_some_and(|r| r.is_zero())
                        || self.is_closed()
                    {
                        partition.release_slot();
                        return Err(PoolError::Connect(e));
                    }
                    let delay = self.config.acquire_retry_delay;
                    thread::sleep(remaining.map_or(delay, |r| delay.min(r)));
                }
            }
        }
    }

    /// Return a released connection to its partition, or destroy it.
    pub(crate) fn release(&self, handle: Arc<ConnectionHandle>) {
        handle.check_in();
        if let Some(hook) = &self.shared.hook {
            hook.on_check_in(&handle);
        }
        tracing::trace!(connection_id = handle.id(), "connection checked in");

        if handle.is_possibly_broken() {
            self.destroy_connection(&handle);
            return;
        }
        handle.set_last_used_at(Instant::now());
        self.return_or_destroy(handle);
    }

    /// Put a free connection back on its partition's queue.
    pub(crate) fn return_or_destroy(&self, handle: Arc<ConnectionHandle>) {
        if self.is_closed() {
            self.destroy_connection(&handle);
            return;
        }
        let Some(partition) = self.partitions.get(handle.partition()) else {
            self.destroy_connection(&handle);
            return;
        };
        if let Err(handle) = partition.put_free(handle) {
            self.destroy_connection(&handle);
        }
    }

    /// Destroy `handle` and free its partition slot, once.
    ///
    /// The slot is freed before the destroy hook runs, so a panicking hook
    /// cannot leak capacity.
    pub(crate) fn destroy_connection(&self, handle: &ConnectionHandle) {
        if !handle.destroy() {
            return;
        }
        if let Some(partition) = self.partitions.get(handle.partition()) {
            partition.release_slot();
        }
        handle.notify_destroyed();
    }

    /// Run a keep-alive test on a connection removed from its free queue.
    pub(crate) fn test_connection(&self, handle: &ConnectionHandle) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = match &self.config.connection_test_statement {
            Some(sql) => handle.probe(|conn| conn.execute(sql).map(drop).map_err(|e| e.to_string())),
            None => {
                let timeout = self.config.validation_timeout;
                handle.probe(|conn| {
                    if conn.is_valid(timeout) {
                        Ok(())
                    } else {
                        Err("driver reported connection invalid".to_string())
                    }
                })
            }
        };

        let result = match outcome {
            Some(Ok(())) => HealthCheckResult::Healthy {
                latency: started.elapsed(),
            },
            Some(Err(reason)) => HealthCheckResult::ValidationFailed { reason },
            None => HealthCheckResult::ValidationFailed {
                reason: "connection already destroyed".to_string(),
            },
        };

        let mut metrics = self.shared.metrics.lock();
        metrics.health_checks_performed += 1;
        if !result.is_healthy() {
            metrics.health_checks_failed += 1;
        }
        result
    }

    /// Open connections until `partition` has its minimum live.
    pub(crate) fn fill_to_minimum(&self, partition: &Partition) -> Result<usize> {
        let mut opened = 0;
        while !self.is_closed() && partition.reserve_below(partition.min()) {
            let handle = self.open_connection(partition, None)?;
            if let Err(handle) = partition.put_free(handle) {
                self.destroy_connection(&handle);
                break;
            }
            opened += 1;
        }
        Ok(opened)
    }

    pub(crate) fn terminate_all_connections(&self) {
        let mut destroyed = 0usize;
        for partition in &self.partitions {
            for handle in partition.drain_free() {
                self.destroy_connection(&handle);
                destroyed += 1;
            }
        }
        tracing::warn!(destroyed, "terminated all free connections");
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("shutting down connection pool");

        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown(self.config.shutdown_grace);
        }
        if let Some(mut helpers) = self.helpers.lock().take() {
            helpers.shutdown();
        }

        for partition in &self.partitions {
            for handle in partition.close() {
                self.destroy_connection(&handle);
            }
        }
        tracing::info!("connection pool closed");
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .factory(|| driver.connect())
///     .pool_config(pool_config)
///     .build()?;
/// ```
pub struct PoolBuilder {
    pool_config: PoolConfig,
    factory: Option<Arc<dyn ConnectionFactory>>,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    pub fn new() -> Self {
        Self {
            pool_config: PoolConfig::default(),
            factory: None,
        }
    }

    /// Set the factory that opens physical connections.
    #[must_use]
    pub fn factory(mut self, factory: impl ConnectionFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the number of partitions.
    #[must_use]
    pub fn partition_count(mut self, count: usize) -> Self {
        self.pool_config.partition_count = count;
        self
    }

    /// Set the minimum connections per partition.
    #[must_use]
    pub fn min_connections_per_partition(mut self, count: usize) -> Self {
        self.pool_config.min_connections_per_partition = count;
        self
    }

    /// Set the maximum connections per partition.
    #[must_use]
    pub fn max_connections_per_partition(mut self, count: usize) -> Self {
        self.pool_config.max_connections_per_partition = count;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.connection_timeout = timeout;
        self
    }

    /// Set the idle connection max age.
    #[must_use]
    pub fn idle_max_age(mut self, age: Duration) -> Self {
        self.pool_config.idle_max_age = age;
        self
    }

    /// Set the statement cache size per connection.
    #[must_use]
    pub fn statement_cache_size(mut self, size: usize) -> Self {
        self.pool_config.statement_cache_size = size;
        self
    }

    /// Set the lifecycle hook.
    #[must_use]
    pub fn connection_hook(mut self, hook: Arc<dyn ConnectionHook>) -> Self {
        self.pool_config.connection_hook = Some(hook);
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<Pool> {
        let factory = self
            .factory
            .ok_or_else(|| PoolError::Config("a connection factory is required".into()))?;
        Pool::new(self.pool_config, factory)
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: usize,
    /// Number of connections currently in use.
    pub in_use: usize,
    /// Total number of connections.
    pub total: usize,
    /// Maximum allowed connections.
    pub max: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections destroyed since pool start.
    pub connections_destroyed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, open failures).
    pub checkouts_failed: u64,
    /// Keep-alive tests performed.
    pub health_checks_performed: u64,
    /// Keep-alive tests that failed.
    pub health_checks_failed: u64,
    /// Prepares served from a statement cache.
    pub statement_cache_hits: u64,
    /// Prepares that missed the statement cache.
    pub statement_cache_misses: u64,
    /// Statement closes handed to a release helper.
    pub statements_closed_deferred: u64,
    /// Statement closes performed on the caller's thread.
    pub statements_closed_inline: u64,
    /// Statements that ran past the query time limit.
    pub query_time_limit_exceeded: u64,
    /// Statements waiting on the release backlog.
    pub pending_statement_releases: usize,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate health check success rate (0.0 to 1.0).
    #[must_use]
    pub fn health_check_success_rate(&self) -> f64 {
        if self.health_checks_performed == 0 {
            return 1.0;
        }
        let successful = self.health_checks_performed - self.health_checks_failed;
        successful as f64 / self.health_checks_performed as f64
    }

    /// Fraction of prepares served from a cache (0.0 to 1.0).
    #[must_use]
    pub fn statement_cache_hit_rate(&self) -> f64 {
        let total = self.statement_cache_hits + self.statement_cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.statement_cache_hits as f64 / total as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn metrics() -> PoolMetrics {
        PoolMetrics {
            connections_created: 10,
            connections_destroyed: 2,
            checkouts_successful: 90,
            checkouts_failed: 10,
            health_checks_performed: 100,
            health_checks_failed: 5,
            statement_cache_hits: 30,
            statement_cache_misses: 10,
            statements_closed_deferred: 4,
            statements_closed_inline: 6,
            query_time_limit_exceeded: 0,
            pending_statement_releases: 0,
            uptime: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 5,
            in_use: 5,
            total: 10,
            max: 20,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            available: 0,
            in_use: 10,
            total: 10,
            max: 10,
        };
        assert!(status.is_at_capacity());

        let status2 = PoolStatus {
            available: 5,
            in_use: 5,
            total: 10,
            max: 20,
        };
        assert!(!status2.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rates() {
        let metrics = metrics();
        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
        assert!((metrics.health_check_success_rate() - 0.95).abs() < f64::EPSILON);
        assert!((metrics.statement_cache_hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_requires_factory() {
        let err = Pool::builder().build().unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn test_builder_fluent() {
        let builder = Pool::builder()
            .partition_count(3)
            .min_connections_per_partition(2)
            .max_connections_per_partition(8)
            .statement_cache_size(16);

        assert_eq!(builder.pool_config.partition_count, 3);
        assert_eq!(builder.pool_config.min_connections_per_partition, 2);
        assert_eq!(builder.pool_config.max_connections_per_partition, 8);
        assert_eq!(builder.pool_config.statement_cache_size, 16);
        assert_eq!(builder.pool_config.max_connections(), 24);
    }
}
