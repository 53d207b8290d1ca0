//! Driver capability traits.
//!
//! The pool never speaks a wire protocol. It sits on top of an opaque
//! [`PhysicalConnection`] produced by a [`ConnectionFactory`], and wraps the
//! [`DriverStatement`]s that connection hands out. Result values are passed
//! through untouched.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Error reported by the underlying driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}{}", .sql_state.as_ref().map(|s| format!(" (SQLSTATE {s})")).unwrap_or_default())]
pub struct DriverError {
    message: String,
    sql_state: Option<String>,
}

impl DriverError {
    /// Create a driver error without a SQLSTATE.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
        }
    }

    /// Create a driver error carrying a SQLSTATE code.
    pub fn with_state(message: impl Into<String>, sql_state: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: Some(sql_state.into()),
        }
    }

    /// The driver's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The SQLSTATE code, if the driver reported one.
    #[must_use]
    pub fn sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }

    /// Whether the SQLSTATE belongs to class `08` (connection exception).
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        self.sql_state.as_deref().is_some_and(|s| s.starts_with("08"))
    }
}

/// A parameter or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// Text.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// Rows returned by a query, passed through from the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names.
    pub columns: Vec<String>,
    /// Row values, one inner vector per row.
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Options that change how a statement is prepared.
///
/// Options participate in the statement cache key, so the same SQL prepared
/// with different options yields distinct cached statements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PrepareOptions {
    /// Ask the driver to return generated keys.
    pub return_generated_keys: bool,
    /// Prepare as a stored-procedure call.
    pub callable: bool,
}

impl PrepareOptions {
    /// Build the statement cache key for `sql` under these options.
    #[must_use]
    pub fn cache_key(&self, sql: &str) -> String {
        let mut key = String::with_capacity(sql.len() + 4);
        key.push_str(sql);
        if self.return_generated_keys {
            key.push_str("\u{0}K");
        }
        if self.callable {
            key.push_str("\u{0}C");
        }
        key
    }
}

/// Produces physical connections.
pub trait ConnectionFactory: Send + Sync {
    /// Open a new physical connection.
    fn open(&self) -> Result<Box<dyn PhysicalConnection>, DriverError>;
}

impl<F> ConnectionFactory for F
where
    F: Fn() -> Result<Box<dyn PhysicalConnection>, DriverError> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn PhysicalConnection>, DriverError> {
        self()
    }
}

/// An opaque native connection.
///
/// Only one caller uses a physical connection at a time; the pool
/// guarantees that by construction.
pub trait PhysicalConnection: Send {
    /// Create a plain (unprepared) statement.
    fn create_statement(&mut self) -> Result<Box<dyn DriverStatement>, DriverError>;

    /// Prepare a statement for `sql`.
    fn prepare(
        &mut self,
        sql: &str,
        options: &PrepareOptions,
    ) -> Result<Box<dyn DriverStatement>, DriverError>;

    /// Execute `sql` directly, returning the affected row count.
    fn execute(&mut self, sql: &str) -> Result<u64, DriverError>;

    /// Check whether the connection is still usable.
    fn is_valid(&mut self, timeout: Duration) -> bool;

    /// Physically close the connection.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// A driver-level statement.
///
/// For prepared statements the pool passes the statement's own SQL text.
pub trait DriverStatement: Send {
    /// Execute, returning `true` if the result is a row set.
    fn execute(&mut self, sql: &str) -> Result<bool, DriverError>;

    /// Execute a query.
    fn execute_query(&mut self, sql: &str) -> Result<ResultSet, DriverError>;

    /// Execute an update, returning the affected row count.
    fn execute_update(&mut self, sql: &str) -> Result<u64, DriverError>;

    /// Bind a positional parameter (1-based).
    fn bind(&mut self, index: usize, value: &Value) -> Result<(), DriverError>;

    /// Append SQL to the current batch.
    fn add_batch(&mut self, sql: &str) -> Result<(), DriverError>;

    /// Discard the current batch.
    fn clear_batch(&mut self) -> Result<(), DriverError>;

    /// Execute the current batch.
    fn execute_batch(&mut self) -> Result<Vec<u64>, DriverError>;

    /// Cancel the running statement.
    fn cancel(&mut self) -> Result<(), DriverError>;

    /// Physically close the statement.
    fn close(&mut self) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failure_class() {
        assert!(DriverError::with_state("link down", "08006").is_connection_failure());
        assert!(!DriverError::with_state("syntax", "42000").is_connection_failure());
        assert!(!DriverError::new("boom").is_connection_failure());
    }

    #[test]
    fn test_cache_key_distinguishes_options() {
        let plain = PrepareOptions::default();
        let keys = PrepareOptions {
            return_generated_keys: true,
            ..Default::default()
        };
        let sql = "INSERT INTO t VALUES (?)";
        assert_eq!(plain.cache_key(sql), sql);
        assert_ne!(plain.cache_key(sql), keys.cache_key(sql));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from("bob").to_string(), "'bob'");
        assert_eq!(Value::from(7).to_string(), "7");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::from(vec![1u8, 2]).to_string(), "<2 bytes>");
    }
}
