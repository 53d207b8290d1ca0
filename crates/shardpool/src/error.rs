//! Pool error types.

use std::time::Duration;

use thiserror::Error;

use crate::driver::DriverError;

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors surfaced to callers of the pool, its connections and statements.
///
/// Background failures (reaper sweeps, release helpers, keep-alive tests)
/// never produce a `PoolError` for an unrelated caller; they are logged.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Operation attempted on a logically closed connection or statement.
    #[error("{0} is closed")]
    AlreadyClosed(&'static str),

    /// A delegated driver call failed.
    ///
    /// The owning connection has been flagged as possibly broken before this
    /// error is returned; the driver error itself is passed through unchanged.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// No connection became available within the configured wait.
    #[error("partition {partition} exhausted: no connection available after {waited:?}")]
    PoolExhausted {
        /// Partition the caller was waiting on.
        partition: usize,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Opening a new physical connection failed.
    #[error("failed to open connection: {0}")]
    Connect(#[source] DriverError),

    /// Invalid pool configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A background thread (scheduler or release helper) could not be started.
    #[error("failed to start pool background threads: {0}")]
    Background(#[source] std::io::Error),

    /// A prepared-statement operation was called on a plain statement.
    #[error("statement has no SQL text; pass the SQL explicitly")]
    MissingSql,
}

impl PoolError {
    /// Returns `true` if this error came from the driver.
    #[must_use]
    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver(_) | Self::Connect(_))
    }

    /// Returns the underlying driver error, if any.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Driver(e) | Self::Connect(e) => Some(e),
            _ => None,
        }
    }
}
