//! Scriptable in-memory driver.
//!
//! Every [`MockConnection`] and [`MockStatement`] reports into one shared
//! [`MockState`], which tests use both to inject failures and to count
//! what the pool did to the driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use shardpool::{
    ConnectionFactory, DriverError, DriverStatement, PhysicalConnection, PrepareOptions,
    ResultSet, Value,
};

/// Shared counters and failure switches for the mock driver.
#[derive(Debug)]
pub struct MockState {
    opened: AtomicUsize,
    closed: AtomicUsize,
    double_closes: AtomicUsize,
    validations: AtomicUsize,
    executes: AtomicUsize,
    prepares: AtomicUsize,
    statement_closes_started: AtomicUsize,
    statements_closed: AtomicUsize,
    fail_open: AtomicBool,
    valid: AtomicBool,
    execute_error: Mutex<Option<DriverError>>,
    statement_close_error: Mutex<Option<DriverError>>,
    execute_delay: Mutex<Duration>,
    statement_close_delay: Mutex<Duration>,
    closed_sql: Mutex<Vec<String>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            double_closes: AtomicUsize::new(0),
            validations: AtomicUsize::new(0),
            executes: AtomicUsize::new(0),
            prepares: AtomicUsize::new(0),
            statement_closes_started: AtomicUsize::new(0),
            statements_closed: AtomicUsize::new(0),
            fail_open: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            execute_error: Mutex::new(None),
            statement_close_error: Mutex::new(None),
            execute_delay: Mutex::new(Duration::ZERO),
            statement_close_delay: Mutex::new(Duration::ZERO),
            closed_sql: Mutex::new(Vec::new()),
        }
    }
}

impl MockState {
    /// Physical connections opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Physical connections closed.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Physical connections open right now.
    pub fn live(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }

    /// Close calls on an already closed physical connection.
    pub fn double_closes(&self) -> usize {
        self.double_closes.load(Ordering::SeqCst)
    }

    /// `is_valid` calls.
    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }

    /// Execute calls on connections and statements.
    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    /// Statements prepared by the driver.
    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    /// Statement close calls that have begun.
    pub fn statement_closes_started(&self) -> usize {
        self.statement_closes_started.load(Ordering::SeqCst)
    }

    /// Statement close calls that have finished.
    pub fn statements_closed(&self) -> usize {
        self.statements_closed.load(Ordering::SeqCst)
    }

    /// Whether a statement prepared with `sql` has been physically closed.
    pub fn was_closed(&self, sql: &str) -> bool {
        self.closed_sql.lock().iter().any(|s| s == sql)
    }

    /// Make `open` fail with a connection-class error.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Set the answer `is_valid` gives.
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    /// Make every execute fail with `error` (or succeed with `None`).
    pub fn set_execute_error(&self, error: Option<DriverError>) {
        *self.execute_error.lock() = error;
    }

    /// Make statement close fail with `error`.
    pub fn set_statement_close_error(&self, error: Option<DriverError>) {
        *self.statement_close_error.lock() = error;
    }

    /// Sleep this long inside every statement execute.
    pub fn set_execute_delay(&self, delay: Duration) {
        *self.execute_delay.lock() = delay;
    }

    /// Sleep this long inside every statement close.
    pub fn set_statement_close_delay(&self, delay: Duration) {
        *self.statement_close_delay.lock() = delay;
    }

    fn run_execute(&self) -> Result<(), DriverError> {
        let delay = *self.execute_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.executes.fetch_add(1, Ordering::SeqCst);
        match self.execute_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Factory handing out [`MockConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    /// Create a factory with fresh state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared state of every connection this factory opened.
    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl ConnectionFactory for MockFactory {
    fn open(&self) -> Result<Box<dyn PhysicalConnection>, DriverError> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(DriverError::with_state("connection refused", "08001"));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

/// In-memory physical connection.
#[derive(Debug)]
pub struct MockConnection {
    state: Arc<MockState>,
    closed: bool,
}

impl PhysicalConnection for MockConnection {
    fn create_statement(&mut self) -> Result<Box<dyn DriverStatement>, DriverError> {
        Ok(Box::new(MockStatement::new(Arc::clone(&self.state), None)))
    }

    fn prepare(
        &mut self,
        sql: &str,
        _options: &PrepareOptions,
    ) -> Result<Box<dyn DriverStatement>, DriverError> {
        self.state.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStatement::new(
            Arc::clone(&self.state),
            Some(sql.to_string()),
        )))
    }

    fn execute(&mut self, _sql: &str) -> Result<u64, DriverError> {
        self.state.run_execute().map(|()| 1)
    }

    fn is_valid(&mut self, _timeout: Duration) -> bool {
        self.state.validations.fetch_add(1, Ordering::SeqCst);
        self.state.valid.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            self.state.double_closes.fetch_add(1, Ordering::SeqCst);
        } else {
            self.closed = true;
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// In-memory driver statement.
#[derive(Debug)]
pub struct MockStatement {
    state: Arc<MockState>,
    sql: Option<String>,
    batch: Vec<String>,
}

impl MockStatement {
    fn new(state: Arc<MockState>, sql: Option<String>) -> Self {
        Self {
            state,
            sql,
            batch: Vec::new(),
        }
    }
}

impl DriverStatement for MockStatement {
    fn execute(&mut self, _sql: &str) -> Result<bool, DriverError> {
        self.state.run_execute().map(|()| true)
    }

    fn execute_query(&mut self, _sql: &str) -> Result<ResultSet, DriverError> {
        self.state.run_execute()?;
        Ok(ResultSet {
            columns: vec!["value".to_string()],
            rows: vec![vec![Value::Int(1)]],
        })
    }

    fn execute_update(&mut self, _sql: &str) -> Result<u64, DriverError> {
        self.state.run_execute().map(|()| 1)
    }

    fn bind(&mut self, _index: usize, _value: &Value) -> Result<(), DriverError> {
        Ok(())
    }

    fn add_batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.batch.push(sql.to_string());
        Ok(())
    }

    fn clear_batch(&mut self) -> Result<(), DriverError> {
        self.batch.clear();
        Ok(())
    }

    fn execute_batch(&mut self) -> Result<Vec<u64>, DriverError> {
        self.state.run_execute()?;
        let counts = vec![1; self.batch.len()];
        self.batch.clear();
        Ok(counts)
    }

    fn cancel(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.state
            .statement_closes_started
            .fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.statement_close_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.state.statements_closed.fetch_add(1, Ordering::SeqCst);
        if let Some(sql) = &self.sql {
            self.state.closed_sql.lock().push(sql.clone());
        }
        match self.state.statement_close_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
