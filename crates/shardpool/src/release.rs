//! Deferred statement release.
//!
//! Physically closing a statement can take a network round trip. When
//! release helpers are configured, a closing statement is handed to a helper
//! thread instead, using a ladder that never blocks the caller:
//!
//! 1. transfer to a helper that is already waiting (rendezvous channel),
//! 2. enqueue on the bounded backlog,
//! 3. give the statement back so the caller closes it inline.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, bounded, select};

use crate::statement::StatementHandle;

/// How a deferred release was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handoff {
    /// A waiting helper took it directly.
    Transferred,
    /// It was placed on the backlog.
    Queued,
}

/// Producer side of the release queue.
pub(crate) struct ReleaseQueue<T> {
    handoff: Sender<T>,
    backlog: Sender<T>,
}

/// Consumer side of the release queue.
pub(crate) struct ReleaseReceivers<T> {
    handoff: Receiver<T>,
    backlog: Receiver<T>,
}

impl<T> Clone for ReleaseReceivers<T> {
    fn clone(&self) -> Self {
        Self {
            handoff: self.handoff.clone(),
            backlog: self.backlog.clone(),
        }
    }
}

impl<T> ReleaseQueue<T> {
    /// Create a queue whose backlog holds at most `capacity` items.
    pub(crate) fn new(capacity: usize) -> (Self, ReleaseReceivers<T>) {
        let (handoff_tx, handoff_rx) = bounded(0);
        let (backlog_tx, backlog_rx) = bounded(capacity);
        (
            Self {
                handoff: handoff_tx,
                backlog: backlog_tx,
            },
            ReleaseReceivers {
                handoff: handoff_rx,
                backlog: backlog_rx,
            },
        )
    }

    /// Try to hand `item` off without blocking.
    ///
    /// On failure the item is returned so the caller can release it itself.
    pub(crate) fn offer(&self, item: T) -> Result<Handoff, T> {
        let item = match self.handoff.try_send(item) {
            Ok(()) => return Ok(Handoff::Transferred),
            Err(e) => e.into_inner(),
        };

        match self.backlog.try_send(item) {
            Ok(()) => Ok(Handoff::Queued),
            Err(e) => Err(e.into_inner()),
        }
    }

    /// Items currently waiting on the backlog.
    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

/// Helper threads draining a [`ReleaseQueue`] of statements.
pub(crate) struct ReleaseHelpers {
    shutdown: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl ReleaseHelpers {
    /// Spawn `count` helper threads consuming `receivers`.
    pub(crate) fn spawn(
        count: usize,
        receivers: ReleaseReceivers<Arc<StatementHandle>>,
    ) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let mut threads = Vec::with_capacity(count);

        for index in 0..count {
            let receivers = receivers.clone();
            let shutdown_rx = shutdown_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("shardpool-release-{index}"))
                .spawn(move || helper_loop(index, &receivers, &shutdown_rx))?;
            threads.push(handle);
        }

        tracing::debug!(threads = count, "statement release helpers started");
        Ok(Self {
            shutdown: Some(shutdown_tx),
            threads,
        })
    }

    /// Stop the helpers after they drain the backlog.
    pub(crate) fn shutdown(&mut self) {
        // Dropping the sender disconnects every helper's shutdown arm.
        self.shutdown.take();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("statement release helper panicked");
            }
        }
    }
}

impl Drop for ReleaseHelpers {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn helper_loop(
    index: usize,
    receivers: &ReleaseReceivers<Arc<StatementHandle>>,
    shutdown: &Receiver<()>,
) {
    loop {
        select! {
            recv(receivers.handoff) -> msg => match msg {
                Ok(statement) => release(index, &statement),
                Err(_) => break,
            },
            recv(receivers.backlog) -> msg => match msg {
                Ok(statement) => release(index, &statement),
                Err(_) => break,
            },
            recv(shutdown) -> _ => {
                for statement in receivers.backlog.try_iter() {
                    release(index, &statement);
                }
                break;
            },
        }
    }
    tracing::debug!(helper = index, "statement release helper exiting");
}

fn release(index: usize, statement: &StatementHandle) {
    if let Err(e) = statement.internal_close() {
        tracing::warn!(
            helper = index,
            error = %e,
            "deferred statement close failed"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_offer_queues_when_nobody_waits() {
        let (queue, receivers) = ReleaseQueue::new(2);
        assert_eq!(queue.offer(1u32), Ok(Handoff::Queued));
        assert_eq!(queue.offer(2u32), Ok(Handoff::Queued));
        assert_eq!(queue.backlog_len(), 2);
        assert_eq!(receivers.backlog.try_recv(), Ok(1));
    }

    #[test]
    fn test_offer_falls_back_when_backlog_full() {
        let (queue, _receivers) = ReleaseQueue::new(1);
        assert_eq!(queue.offer(1u32), Ok(Handoff::Queued));
        // no waiting consumer and no room: the caller gets the item back
        assert_eq!(queue.offer(2u32), Err(2));
    }

    #[test]
    fn test_offer_fails_fast_once_consumers_are_gone() {
        let (queue, receivers) = ReleaseQueue::new(8);
        drop(receivers);
        assert_eq!(queue.offer(9u32), Err(9));
    }

    #[test]
    fn test_offer_transfers_to_waiting_consumer() {
        let (queue, receivers) = ReleaseQueue::new(1);
        let handoff = receivers.handoff.clone();
        let consumer = thread::spawn(move || handoff.recv());

        let mut transferred = false;
        for _ in 0..200 {
            match queue.offer(5u32) {
                Ok(Handoff::Transferred) => {
                    transferred = true;
                    break;
                }
                // consumer not parked yet; take it back off the backlog
                Ok(Handoff::Queued) => assert_eq!(receivers.backlog.try_recv(), Ok(5)),
                Err(item) => panic!("backlog unexpectedly full: {item}"),
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert!(transferred);
        assert_eq!(consumer.join().unwrap(), Ok(5));
    }
}
