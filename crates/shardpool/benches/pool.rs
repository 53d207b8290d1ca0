//! Checkout, statement cache and log formatting benchmarks.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use shardpool::instrumentation::fill_log_params;
use shardpool::{
    DriverError, DriverStatement, LogParams, Maintenance, PhysicalConnection, Pool, PoolConfig,
    PrepareOptions, ResultSet, Value,
};

struct NullConnection;

struct NullStatement;

impl PhysicalConnection for NullConnection {
    fn create_statement(&mut self) -> Result<Box<dyn DriverStatement>, DriverError> {
        Ok(Box::new(NullStatement))
    }

    fn prepare(
        &mut self,
        _sql: &str,
        _options: &PrepareOptions,
    ) -> Result<Box<dyn DriverStatement>, DriverError> {
        Ok(Box::new(NullStatement))
    }

    fn execute(&mut self, _sql: &str) -> Result<u64, DriverError> {
        Ok(0)
    }

    fn is_valid(&mut self, _timeout: Duration) -> bool {
        true
    }

    fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

impl DriverStatement for NullStatement {
    fn execute(&mut self, _sql: &str) -> Result<bool, DriverError> {
        Ok(false)
    }

    fn execute_query(&mut self, _sql: &str) -> Result<ResultSet, DriverError> {
        Ok(ResultSet::default())
    }

    fn execute_update(&mut self, _sql: &str) -> Result<u64, DriverError> {
        Ok(0)
    }

    fn bind(&mut self, _index: usize, _value: &Value) -> Result<(), DriverError> {
        Ok(())
    }

    fn add_batch(&mut self, _sql: &str) -> Result<(), DriverError> {
        Ok(())
    }

    fn clear_batch(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn execute_batch(&mut self) -> Result<Vec<u64>, DriverError> {
        Ok(Vec::new())
    }

    fn cancel(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

fn null_pool(config: PoolConfig) -> Pool {
    let factory = || -> Result<Box<dyn PhysicalConnection>, DriverError> {
        Ok(Box::new(NullConnection))
    };
    Pool::new(config.maintenance(Maintenance::Manual), Arc::new(factory)).unwrap()
}

fn benchmark_checkout(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkout");

    let single = null_pool(PoolConfig::new().min_connections_per_partition(4));
    group.bench_function("one_partition", |b| {
        b.iter(|| black_box(single.get().unwrap()));
    });

    let sharded = null_pool(
        PoolConfig::new()
            .partition_count(4)
            .min_connections_per_partition(1),
    );
    group.bench_function("four_partitions", |b| {
        b.iter(|| black_box(sharded.get().unwrap()));
    });

    group.finish();
}

fn benchmark_prepare(c: &mut Criterion) {
    let mut group = c.benchmark_group("prepare");
    let sql = "SELECT id, name FROM users WHERE id = ?";

    let uncached = null_pool(PoolConfig::new());
    let conn = uncached.get().unwrap();
    group.bench_function("uncached", |b| {
        b.iter(|| conn.prepare_statement(black_box(sql)).unwrap().close().unwrap());
    });
    drop(conn);

    let cached = null_pool(PoolConfig::new().statement_cache_size(16));
    let conn = cached.get().unwrap();
    group.bench_function("cache_hit", |b| {
        b.iter(|| conn.prepare_statement(black_box(sql)).unwrap().close().unwrap());
    });
    drop(conn);

    group.finish();
}

fn benchmark_log_params(c: &mut Criterion) {
    let sql = "UPDATE accounts SET balance = ?, note = ? WHERE id = ? AND status <> 'closed?'";
    let params: LogParams = [
        (1, Value::Float(12.5)),
        (2, Value::from("monthly fee")),
        (3, Value::Int(42)),
    ]
    .into_iter()
    .collect();

    c.bench_function("fill_log_params", |b| {
        b.iter(|| fill_log_params(black_box(sql), black_box(&params)));
    });
}

criterion_group!(
    benches,
    benchmark_checkout,
    benchmark_prepare,
    benchmark_log_params
);
criterion_main!(benches);
