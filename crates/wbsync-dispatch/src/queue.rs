//! Mutation dispatch queue
//!
//! Serializes asynchronous operations against a single-writer backend:
//! - Strict submission order, never two operations at once
//! - Per-operation failure isolation (errors and panics are logged, the
//!   chain moves on)
//! - Drain to stability for consistency checkpoints
//!
//! The chain is a worker task fed by a channel. Every enqueue is stamped with
//! a sequence number; the latest stamp is the chain tail, and the worker
//! publishes the stamp of each operation it finishes.

use crate::error::OpError;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};

enum JobOutcome {
    Ok,
    Failed(String),
    Panicked(String),
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, JobOutcome> + Send>;

struct Envelope {
    seq: u64,
    job: Job,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Operations ever enqueued (equals the tail sequence)
    pub submitted: u64,
    /// Operations finished, successfully or not
    pub completed: u64,
    /// Operations that returned an error or panicked
    pub failed: u64,
}

impl QueueStats {
    /// Operations enqueued but not finished
    #[inline]
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.submitted.saturating_sub(self.completed)
    }
}

/// Future resolving when a queued operation finishes
///
/// Dropping it does not cancel the operation.
#[derive(Debug)]
pub struct Completion<T, E> {
    seq: u64,
    rx: oneshot::Receiver<Result<T, OpError<E>>>,
}

impl<T, E> Completion<T, E> {
    /// Position of the operation in the chain
    #[inline]
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl<T, E> Future for Completion<T, E> {
    type Output = Result<T, OpError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(OpError::QueueClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Yield to the scheduler once, letting same-tick producers finish enqueuing
pub async fn yield_once() {
    tokio::task::yield_now().await;
}

/// Ordered, failure-isolating operation queue
///
/// Must be created inside a Tokio runtime; the worker task lives as long as
/// the queue.
pub struct DispatchQueue {
    sender: mpsc::UnboundedSender<Envelope>,
    tail: Mutex<u64>,
    finished: watch::Receiver<u64>,
    counters: Arc<Counters>,
}

impl DispatchQueue {
    /// Create queue and spawn its worker
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (finished_tx, finished) = watch::channel(0);
        let counters = Arc::new(Counters::default());

        tokio::spawn(run_worker(receiver, finished_tx, Arc::clone(&counters)));

        Self {
            sender,
            tail: Mutex::new(0),
            finished,
            counters,
        }
    }

    /// Append an operation to the chain
    ///
    /// The operation starts only after every previously enqueued operation
    /// has finished. Its result is delivered to the returned [`Completion`];
    /// a failure is also logged here and never affects later operations.
    pub fn enqueue<F, Fut, T, E>(&self, op: F) -> Completion<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let outcome = AssertUnwindSafe(async move { op().await })
                    .catch_unwind()
                    .await;
                let (report, result) = match outcome {
                    Ok(Ok(value)) => (JobOutcome::Ok, Ok(value)),
                    Ok(Err(err)) => (JobOutcome::Failed(err.to_string()), Err(OpError::Failed(err))),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        (
                            JobOutcome::Panicked(message.clone()),
                            Err(OpError::Panicked(message)),
                        )
                    }
                };
                let _ = tx.send(result);
                report
            }
            .boxed()
        });

        let mut tail = self.tail.lock();
        let seq = *tail + 1;
        if self.sender.send(Envelope { seq, job }).is_err() {
            tracing::error!(seq, "dispatch worker is gone; operation dropped");
        } else {
            *tail = seq;
            tracing::trace!(seq, "operation enqueued");
        }
        drop(tail);

        Completion { seq, rx }
    }

    /// Sequence number of the most recent enqueue (0 when nothing was ever enqueued)
    #[inline]
    #[must_use]
    pub fn tail(&self) -> u64 {
        *self.tail.lock()
    }

    /// Wait until the chain is empty and stayed empty across the wait
    ///
    /// Captures the tail, waits for it to finish, then re-reads the tail; if
    /// producers appended meanwhile, waits again. Returns the tail that was
    /// observed stable.
    pub async fn drain_to_stability(&self) -> u64 {
        let mut finished = self.finished.clone();
        let mut rounds = 0u32;
        loop {
            let observed = self.tail();
            if finished.wait_for(|&done| done >= observed).await.is_err() {
                tracing::error!(observed, "dispatch worker stopped while draining");
                return observed;
            }
            rounds += 1;
            if self.tail() == observed {
                tracing::debug!(tail = observed, rounds, "dispatch queue drained");
                return observed;
            }
        }
    }

    /// Yield `ticks` times, then drain to stability
    pub async fn settle(&self, ticks: u32) -> u64 {
        for _ in 0..ticks {
            yield_once().await;
        }
        self.drain_to_stability().await
    }

    /// Snapshot of queue counters
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.tail(),
            completed: self.counters.completed.load(Ordering::Acquire),
            failed: self.counters.failed.load(Ordering::Acquire),
        }
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("stats", &self.stats())
            .finish()
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<Envelope>,
    finished: watch::Sender<u64>,
    counters: Arc<Counters>,
) {
    while let Some(Envelope { seq, job }) = receiver.recv().await {
        match job().await {
            JobOutcome::Ok => {}
            JobOutcome::Failed(error) => {
                counters.failed.fetch_add(1, Ordering::AcqRel);
                tracing::warn!(seq, %error, "queued operation failed; continuing with next");
            }
            JobOutcome::Panicked(message) => {
                counters.failed.fetch_add(1, Ordering::AcqRel);
                tracing::warn!(seq, panic = %message, "queued operation panicked; continuing with next");
            }
        }
        counters.completed.fetch_add(1, Ordering::AcqRel);
        finished.send_replace(seq);
    }
    tracing::debug!("dispatch worker exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
