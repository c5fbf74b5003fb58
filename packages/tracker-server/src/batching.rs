//! Nagle-style batching queue (§5, §9): outgoing update events accumulate
//! into batches of a configurable size or are flushed after a configurable
//! interval, whichever comes first. Flushing is single-producer from the
//! queue's perspective: at most one flush runs at a time.
//!
//! `suspend()`'s RAII guard mirrors the teacher's `ShutdownController::in_flight_guard`
//! (`network/shutdown.rs`): an atomic counter incremented on acquire,
//! decremented on `Drop`. The spec's design note allows either forbidding
//! nested suspensions or counting them with matched release; this counts
//! them, so flushing resumes only once every outstanding guard has been
//! dropped (see DESIGN.md for the full rationale).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A single flush callback invocation; `T` is the event type being batched.
#[async_trait::async_trait]
pub trait Flusher<T>: Send + Sync {
    async fn flush(&self, batch: Vec<T>);
}

struct Inner<T> {
    queue: Mutex<VecDeque<T>>,
    suspensions: AtomicU32,
    notify: Notify,
    batch_size: usize,
}

/// A batching queue with Nagle-style coalescing and scoped suspension.
pub struct BatchingQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> BatchingQueue<T> {
    #[must_use]
    pub fn new(batch_size: usize, nagle_interval: Duration, flusher: Arc<dyn Flusher<T>>) -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            suspensions: AtomicU32::new(0),
            notify: Notify::new(),
            batch_size,
        });

        let task_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            run_flush_loop(task_inner, nagle_interval, flusher).await;
        });

        Self { inner }
    }

    /// Enqueues an event. Does not itself trigger a flush beyond waking the
    /// flush loop, which checks batch size and suspension state on its own.
    pub fn push(&self, event: T) {
        let mut queue = self.inner.queue.lock();
        queue.push_back(event);
        let should_wake = queue.len() >= self.inner.batch_size;
        drop(queue);
        if should_wake {
            self.inner.notify.notify_one();
        }
    }

    /// Suspends flushing until every returned guard is dropped. Suspensions
    /// are ref-counted: a second call while one guard is outstanding
    /// increments the count rather than colliding with it, and flushing
    /// resumes only when the count returns to zero.
    #[must_use]
    pub fn suspend(&self) -> SuspendGuard<T> {
        self.inner.suspensions.fetch_add(1, Ordering::SeqCst);
        SuspendGuard { inner: Arc::clone(&self.inner) }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

/// RAII guard returned by [`BatchingQueue::suspend`]; dropping it resumes
/// flushing once no other suspension is outstanding.
pub struct SuspendGuard<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Drop for SuspendGuard<T> {
    fn drop(&mut self) {
        let remaining = self.inner.suspensions.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            self.inner.notify.notify_one();
        }
    }
}

async fn run_flush_loop<T: Send + 'static>(
    inner: Arc<Inner<T>>,
    nagle_interval: Duration,
    flusher: Arc<dyn Flusher<T>>,
) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(nagle_interval) => {},
            () = inner.notify.notified() => {},
        }

        if inner.suspensions.load(Ordering::SeqCst) > 0 {
            continue;
        }

        let batch: Vec<T> = {
            let mut queue = inner.queue.lock();
            queue.drain(..).collect()
        };

        if !batch.is_empty() {
            flusher.flush(batch).await;
        }
    }
}
