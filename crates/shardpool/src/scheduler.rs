//! Shared timer for self-rescheduling maintenance tasks.
//!
//! A single-worker tokio runtime owns the timers; the tasks themselves are
//! blocking and run on the runtime's blocking pool. Shutting the scheduler
//! down drops every pending timer and waits for running tasks to finish.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;

/// Returned by [`Scheduler::schedule`] once the scheduler is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SchedulerShutdown;

pub(crate) struct Scheduler {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub(crate) fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("shardpool-scheduler")
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            shutdown: CancellationToken::new(),
        })
    }

    /// Run `task` once after `delay`.
    pub(crate) fn schedule<F>(&self, delay: Duration, task: F) -> Result<(), SchedulerShutdown>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerShutdown);
        }
        let token = self.shutdown.clone();
        self.handle.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if tokio::task::spawn_blocking(task).await.is_err() {
                        tracing::error!("scheduled maintenance task panicked");
                    }
                }
            }
        });
        Ok(())
    }

    /// Cancel pending timers and wait up to `grace` for running tasks.
    pub(crate) fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        if Handle::try_current().is_ok() {
            // blocking inside another runtime would panic
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(grace);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown(Duration::ZERO);
    }
}
