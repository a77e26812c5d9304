//! Thread-safe request intake queue.
//!
//! Any number of producer threads push requests; a single consumer drains
//! them one at a time or in bounded batches. Shutdown is cooperative: once
//! signaled, waiters wake up, the remaining items are still handed out, and
//! only an empty stopped queue reports the stop sentinel (`None` / empty batch).

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::core::request::Request;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Request>,
    stopped: bool,
}

impl QueueState {
    fn should_wait(&self) -> bool {
        self.items.is_empty() && !self.stopped
    }
}

/// FIFO multi-producer queue of inference requests.
///
/// # Example
///
/// ```
/// use infercore::core::request::Request;
/// use infercore::scheduler::queue::RequestQueue;
///
/// let queue = RequestQueue::new();
/// queue.push(Request::new(1, 4));
/// queue.shutdown();
///
/// // Items pushed before shutdown are still delivered
/// assert_eq!(queue.wait_and_pop().map(|r| r.id), Some(1));
/// assert!(queue.wait_and_pop().is_none());
/// ```
#[derive(Debug, Default)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl RequestQueue {
    /// Create an empty, running queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request at the tail and wake one waiting consumer.
    ///
    /// Never blocks beyond the internal lock. Pushing after shutdown is
    /// accepted; the item is delivered only if the consumer has not yet
    /// observed the queue as empty and stopped.
    pub fn push(&self, request: Request) {
        {
            let mut state = self.state.lock();
            state.items.push_back(request);
        }
        self.available.notify_one();
    }

    /// Block until a request is available or the queue is shut down.
    ///
    /// # Returns
    ///
    /// The head request, or `None` once the queue is stopped and drained.
    pub fn wait_and_pop(&self) -> Option<Request> {
        let mut state = self.state.lock();
        self.available.wait_while(&mut state, |s| s.should_wait());
        state.items.pop_front()
    }

    /// Wait up to `timeout` for work, then drain up to `max_batch_size` requests.
    ///
    /// The wait ends as soon as one request is available or the queue is shut
    /// down. Whatever is queued at that moment is taken in FIFO order; the
    /// call does not wait further to fill the batch.
    ///
    /// # Returns
    ///
    /// An empty batch on timeout, or when the queue is stopped and drained.
    pub fn pop_batch(&self, max_batch_size: usize, timeout: Duration) -> Vec<Request> {
        let mut state = self.state.lock();
        // Drain whatever is queued, whether or not the wait timed out.
        let _ = self
            .available
            .wait_while_for(&mut state, |s| s.should_wait(), timeout);

        let take = state.items.len().min(max_batch_size);
        state.items.drain(..take).collect()
    }

    /// Permanently stop the queue and wake every waiter.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            debug!(pending = state.items.len(), "request queue shut down");
        }
        self.available.notify_all();
    }

    /// Check if no requests are queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Check if [`shutdown`](Self::shutdown) has been called.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}
