//! Pool configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;
use crate::hooks::ConnectionHook;

/// How acquire calls pick the partition to serve them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionStrategy {
    /// Hash the calling thread so a thread keeps hitting the same partition.
    #[default]
    ThreadAffinity,
    /// Rotate through partitions on every acquire.
    RoundRobin,
}

/// Who drives the idle connection reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Maintenance {
    /// A background scheduler sweeps each partition on its own timer.
    #[default]
    Scheduled,
    /// Sweeps only run when [`Pool::maintain`](crate::Pool::maintain) is called.
    Manual,
}

/// Configuration for a [`Pool`](crate::Pool).
///
/// A zero [`Duration`] disables the corresponding feature.
#[derive(Clone)]
pub struct PoolConfig {
    /// Number of independently locked partitions.
    pub partition_count: usize,

    /// Connections opened per partition at startup and kept alive by the reaper.
    pub min_connections_per_partition: usize,

    /// Hard ceiling on live connections per partition.
    pub max_connections_per_partition: usize,

    /// How long `get()` waits for a connection before giving up.
    pub connection_timeout: Duration,

    /// Free connections unused for longer than this are destroyed.
    pub idle_max_age: Duration,

    /// Free connections idle for longer than this receive a keep-alive test.
    pub idle_connection_test_period: Duration,

    /// Statements running longer than this fire
    /// [`ConnectionHook::on_query_execute_time_limit_exceeded`].
    pub query_execute_time_limit: Duration,

    /// Threads that physically close released statements off the caller's path.
    pub statement_release_helper_threads: usize,

    /// Backlog capacity of the statement release queue.
    pub statement_release_queue_capacity: usize,

    /// Prepared statements cached per connection (0 disables caching).
    pub statement_cache_size: usize,

    /// Lifecycle callbacks.
    pub connection_hook: Option<Arc<dyn ConnectionHook>>,

    /// Log every executed statement (with parameters) at debug level.
    pub log_statements: bool,

    /// Statement used for keep-alive tests. Uses the driver's validity
    /// check when unset.
    pub connection_test_statement: Option<String>,

    /// Timeout passed to the driver's validity check.
    pub validation_timeout: Duration,

    /// Pause between connections during a reaper sweep.
    pub tester_pacing: Duration,

    /// Partition selection strategy.
    pub partition_strategy: PartitionStrategy,

    /// Extra attempts when opening a physical connection fails.
    pub acquire_retry_attempts: u32,

    /// Delay between open attempts.
    pub acquire_retry_delay: Duration,

    /// How long shutdown waits for an in-flight reaper sweep.
    pub shutdown_grace: Duration,

    /// Reaper scheduling mode.
    pub maintenance: Maintenance,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            partition_count: 1,
            min_connections_per_partition: 1,
            max_connections_per_partition: 10,
            connection_timeout: Duration::from_secs(30),
            idle_max_age: Duration::from_secs(60 * 60),
            idle_connection_test_period: Duration::from_secs(4 * 60),
            query_execute_time_limit: Duration::ZERO,
            statement_release_helper_threads: 0,
            statement_release_queue_capacity: 1024,
            statement_cache_size: 0,
            connection_hook: None,
            log_statements: false,
            connection_test_statement: None,
            validation_timeout: Duration::from_secs(5),
            tester_pacing: Duration::from_millis(20),
            partition_strategy: PartitionStrategy::default(),
            acquire_retry_attempts: 0,
            acquire_retry_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
            maintenance: Maintenance::default(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of partitions.
    #[must_use]
    pub fn partition_count(mut self, count: usize) -> Self {
        self.partition_count = count;
        self
    }

    /// Set the minimum connections per partition.
    #[must_use]
    pub fn min_connections_per_partition(mut self, count: usize) -> Self {
        self.min_connections_per_partition = count;
        self
    }

    /// Set the maximum connections per partition.
    #[must_use]
    pub fn max_connections_per_partition(mut self, count: usize) -> Self {
        self.max_connections_per_partition = count;
        self
    }

    /// Set the acquire wait timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the idle age after which free connections are destroyed.
    #[must_use]
    pub fn idle_max_age(mut self, age: Duration) -> Self {
        self.idle_max_age = age;
        self
    }

    /// Set the idle period after which free connections are keep-alive tested.
    #[must_use]
    pub fn idle_connection_test_period(mut self, period: Duration) -> Self {
        self.idle_connection_test_period = period;
        self
    }

    /// Set the slow-query threshold.
    #[must_use]
    pub fn query_execute_time_limit(mut self, limit: Duration) -> Self {
        self.query_execute_time_limit = limit;
        self
    }

    /// Set the number of statement release helper threads.
    #[must_use]
    pub fn statement_release_helper_threads(mut self, threads: usize) -> Self {
        self.statement_release_helper_threads = threads;
        self
    }

    /// Set the backlog capacity of the statement release queue.
    #[must_use]
    pub fn statement_release_queue_capacity(mut self, capacity: usize) -> Self {
        self.statement_release_queue_capacity = capacity;
        self
    }

    /// Set the per-connection statement cache size.
    #[must_use]
    pub fn statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Install lifecycle callbacks.
    #[must_use]
    pub fn connection_hook(mut self, hook: Arc<dyn ConnectionHook>) -> Self {
        self.connection_hook = Some(hook);
        self
    }

    /// Enable or disable statement logging.
    #[must_use]
    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    /// Use `sql` for keep-alive tests.
    #[must_use]
    pub fn connection_test_statement(mut self, sql: impl Into<String>) -> Self {
        self.connection_test_statement = Some(sql.into());
        self
    }

    /// Set the pause between connections during a reaper sweep.
    #[must_use]
    pub fn tester_pacing(mut self, pacing: Duration) -> Self {
        self.tester_pacing = pacing;
        self
    }

    /// Set the partition selection strategy.
    #[must_use]
    pub fn partition_strategy(mut self, strategy: PartitionStrategy) -> Self {
        self.partition_strategy = strategy;
        self
    }

    /// Set how often opening a connection is retried.
    #[must_use]
    pub fn acquire_retry_attempts(mut self, attempts: u32) -> Self {
        self.acquire_retry_attempts = attempts;
        self
    }

    /// Set the delay between open attempts.
    #[must_use]
    pub fn acquire_retry_delay(mut self, delay: Duration) -> Self {
        self.acquire_retry_delay = delay;
        self
    }

    /// Set how long shutdown waits for in-flight maintenance.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the driver validity-check timeout.
    #[must_use]
    pub fn validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    /// Set the reaper scheduling mode.
    #[must_use]
    pub fn maintenance(mut self, mode: Maintenance) -> Self {
        self.maintenance = mode;
        self
    }

    /// Whether any background maintenance is needed.
    #[must_use]
    pub fn maintenance_enabled(&self) -> bool {
        !self.idle_max_age.is_zero() || !self.idle_connection_test_period.is_zero()
    }

    /// Base delay between reaper sweeps.
    #[must_use]
    pub fn maintenance_period(&self) -> Duration {
        if self.idle_connection_test_period.is_zero() {
            self.idle_max_age
        } else {
            self.idle_connection_test_period
        }
    }

    /// Total connection ceiling across all partitions.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.partition_count * self.max_connections_per_partition
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.partition_count == 0 {
            return Err(PoolError::Config(
                "partition_count must be at least 1".into(),
            ));
        }
        if self.max_connections_per_partition == 0 {
            return Err(PoolError::Config(
                "max_connections_per_partition must be at least 1".into(),
            ));
        }
        if self.min_connections_per_partition > self.max_connections_per_partition {
            return Err(PoolError::Config(format!(
                "min_connections_per_partition ({}) exceeds max_connections_per_partition ({})",
                self.min_connections_per_partition, self.max_connections_per_partition
            )));
        }
        if self.statement_release_helper_threads > 0 && self.statement_release_queue_capacity == 0
        {
            return Err(PoolError::Config(
                "statement_release_queue_capacity must be at least 1 when helper threads are enabled"
                    .into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("partition_count", &self.partition_count)
            .field(
                "min_connections_per_partition",
                &self.min_connections_per_partition,
            )
            .field(
                "max_connections_per_partition",
                &self.max_connections_per_partition,
            )
            .field("connection_timeout", &self.connection_timeout)
            .field("idle_max_age", &self.idle_max_age)
            .field(
                "idle_connection_test_period",
                &self.idle_connection_test_period,
            )
            .field("query_execute_time_limit", &self.query_execute_time_limit)
            .field(
                "statement_release_helper_threads",
                &self.statement_release_helper_threads,
            )
            .field("statement_cache_size", &self.statement_cache_size)
            .field("connection_hook", &self.connection_hook.is_some())
            .field("log_statements", &self.log_statements)
            .field("partition_strategy", &self.partition_strategy)
            .field("maintenance", &self.maintenance)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_connections(), 10);
        assert!(config.maintenance_enabled());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = PoolConfig::new()
            .min_connections_per_partition(5)
            .max_connections_per_partition(2);
        assert!(matches!(config.validate(), Err(PoolError::Config(_))));
    }

    #[test]
    fn test_zero_partitions_rejected() {
        let config = PoolConfig::new().partition_count(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_helpers_need_queue_capacity() {
        let config = PoolConfig::new()
            .statement_release_helper_threads(2)
            .statement_release_queue_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_maintenance_period_falls_back_to_max_age() {
        let config = PoolConfig::new()
            .idle_connection_test_period(Duration::ZERO)
            .idle_max_age(Duration::from_secs(90));
        assert_eq!(config.maintenance_period(), Duration::from_secs(90));

        let off = PoolConfig::new()
            .idle_connection_test_period(Duration::ZERO)
            .idle_max_age(Duration::ZERO);
        assert!(!off.maintenance_enabled());
    }
}
