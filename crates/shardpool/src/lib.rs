//! # shardpool
//!
//! Partitioned connection pool for blocking database drivers.
//!
//! The pool bounds the number of live physical connections, hands them out
//! and takes them back with one lock per partition, evicts connections that
//! went stale or broken, and caches prepared statements per connection.
//! It is protocol-agnostic: drivers plug in through [`ConnectionFactory`],
//! [`PhysicalConnection`] and [`DriverStatement`].
//!
//! ## Features
//!
//! - Independently locked partitions with thread-affinity or round-robin routing
//! - Lazy growth up to a per-partition ceiling, blocking acquire with timeout
//! - Background reaper per partition: idle max age, keep-alive tests,
//!   replenishing to the minimum
//! - Broken-connection detection on every delegated driver call
//! - Per-connection LRU statement cache
//! - Optional helper threads that close released statements off the caller's path
//! - Lifecycle hooks and pool metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use shardpool::{Pool, PoolConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = PoolConfig::new()
//!     .partition_count(4)
//!     .min_connections_per_partition(2)
//!     .max_connections_per_partition(10)
//!     .idle_connection_test_period(Duration::from_secs(240))
//!     .statement_cache_size(32);
//!
//! let pool = Pool::new(config, Arc::new(my_driver_factory))?;
//!
//! let conn = pool.get()?;
//! let stmt = conn.prepare_statement("UPDATE accounts SET seen = ? WHERE id = ?")?;
//! stmt.bind(1, true)?;
//! stmt.bind(2, 7)?;
//! stmt.update()?;
//! stmt.close()?;
//! drop(conn); // back to its partition
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod cache;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod instrumentation;
pub mod lifecycle;
mod partition;
pub mod pool;
mod release;
mod scheduler;
pub mod statement;
mod tester;

// Configuration
pub use config::{Maintenance, PartitionStrategy, PoolConfig};

// Error types
pub use error::{PoolError, Result};

// Driver capability
pub use driver::{
    ConnectionFactory, DriverError, DriverStatement, PhysicalConnection, PrepareOptions,
    ResultSet, Value,
};

// Pool types
pub use connection::{ConnectionHandle, PooledConnection};
pub use partition::PartitionStatus;
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus};
pub use statement::StatementHandle;

// Hooks and lifecycle
pub use hooks::{BrokenAction, ConnectionHook, LogParams};
pub use lifecycle::{ConnectionMetadata, ConnectionState, HealthCheckResult};
