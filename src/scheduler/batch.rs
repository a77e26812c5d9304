//! Lock-step batch scheduler.
//!
//! The scheduler is the single consumer of the [`RequestQueue`]. Each
//! iteration drains a bounded batch and decodes it in lock-step: one step per
//! generated token, up to the longest request in the batch. Every request
//! that is still generating appends one token to its cache sequence per step.
//!
//! ## Scheduling Flow
//!
//! ```text
//!   push()              pop_batch()                 decode steps
//!     │                     │                            │
//!     ▼                     ▼                            ▼
//!  ┌───────┐  FIFO   ┌─────────────┐  max_tokens  ┌──────────────┐
//!  │ Queue │ ──────► │    Batch    │ ───────────► │ append_token │
//!  └───────┘         └─────────────┘   steps      │ per active   │
//!     │                                           └──────────────┘
//!     │ shutdown() + drained                             │
//!     ▼                                                  ▼
//!  ┌─────────┐                                   ┌──────────────┐
//!  │ Stopped │                                   │   Reports    │
//!  └─────────┘                                   └──────────────┘
//! ```
//!
//! The scheduler owns its [`PagedCacheManager`] outright, so the cache is
//! only ever mutated from the scheduler's thread.
//!
//! ## Example
//!
//! ```
//! use infercore::core::block_manager::PagedCacheManager;
//! use infercore::core::request::Request;
//! use infercore::engine::compute::NoopExecutor;
//! use infercore::scheduler::batch::BatchScheduler;
//! use infercore::SchedulerConfig;
//!
//! let cache = PagedCacheManager::with_capacity(16);
//! let mut scheduler =
//!     BatchScheduler::new(SchedulerConfig::default(), cache, NoopExecutor).unwrap();
//!
//! let report = scheduler.run_batch(vec![Request::new(0, 3), Request::new(1, 5)]);
//! assert_eq!(report.steps_executed, 5);
//! assert_eq!(report.requests[0].tokens_recorded, 3);
//! ```

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::block_manager::{MemoryStats, PagedCacheManager};
use crate::core::request::{Request, RequestId};
use crate::engine::compute::StepExecutor;
use crate::error::Result;
use crate::scheduler::queue::RequestQueue;

/// Completion report for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestReport {
    pub request_id: RequestId,
    /// Tokens the request asked for.
    pub tokens_requested: usize,
    /// Tokens actually recorded in the cache during this batch.
    pub tokens_recorded: usize,
    /// Tokens dropped because the cache was exhausted.
    pub dropped_tokens: usize,
    /// Time from request creation to batch completion.
    pub latency: Duration,
    /// Bytes reserved for the request's sequence at completion.
    pub reserved_bytes: usize,
    /// Bytes used by the request's sequence at completion.
    pub used_bytes: usize,
}

/// Outcome of decoding one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Longest `tokens_to_generate` in the batch.
    pub max_tokens: usize,
    /// Decode steps actually run.
    pub steps_executed: usize,
    /// One report per request, in batch order.
    pub requests: Vec<RequestReport>,
}

/// Aggregate counters over the scheduler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub batches: u64,
    pub requests: u64,
    pub steps: u64,
    pub dropped_tokens: u64,
    /// Cache accounting when the stats were taken.
    pub memory: MemoryStats,
}

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    /// Terminal: the queue was observed stopped and drained.
    Stopped,
}

/// Result of a single scheduling iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// The batch wait timed out with nothing queued.
    Idle,
    /// A batch was drained and decoded.
    Batch(BatchReport),
    /// The queue is stopped and empty; no further batches will run.
    Stopped,
}

/// Single-consumer batch scheduler driving the paged cache.
pub struct BatchScheduler<E: StepExecutor> {
    config: SchedulerConfig,
    cache: PagedCacheManager,
    executor: E,
    state: SchedulerState,
    stats: SchedulerStats,
}

impl<E: StepExecutor> BatchScheduler<E> {
    /// Create a scheduler that takes ownership of `cache`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `config` is invalid,
    /// e.g. a zero `max_batch_size`.
    pub fn new(config: SchedulerConfig, cache: PagedCacheManager, executor: E) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache,
            executor,
            state: SchedulerState::Running,
            stats: SchedulerStats::default(),
        })
    }

    /// Get the scheduling configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get the owned cache manager.
    pub fn cache(&self) -> &PagedCacheManager {
        &self.cache
    }

    /// Get the step executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Check if the scheduler has observed shutdown.
    pub fn is_stopped(&self) -> bool {
        self.state == SchedulerState::Stopped
    }

    /// Lifetime counters with a fresh memory snapshot.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            memory: self.cache.memory_stats(),
            ..self.stats
        }
    }

    /// Run one scheduling iteration against `queue`.
    ///
    /// Once the scheduler has stopped this returns [`Iteration::Stopped`]
    /// without touching the queue.
    pub fn poll(&mut self, queue: &RequestQueue) -> Iteration {
        if self.is_stopped() {
            return Iteration::Stopped;
        }

        let batch = queue.pop_batch(self.config.max_batch_size, self.config.batch_timeout());
        if !batch.is_empty() {
            return Iteration::Batch(self.run_batch(batch));
        }

        // Stopped is checked before emptiness so that anything pushed before
        // shutdown is still seen here.
        if queue.is_stopped() && queue.is_empty() {
            self.state = SchedulerState::Stopped;
            info!(
                batches = self.stats.batches,
                requests = self.stats.requests,
                "scheduler observed shutdown"
            );
            return Iteration::Stopped;
        }
        Iteration::Idle
    }

    /// Decode a batch to completion.
    ///
    /// At step `k` every request with `k < tokens_to_generate` appends one
    /// token to its sequence, then the executor runs the step. The loop ends
    /// after the longest request or as soon as a step has nobody active.
    pub fn run_batch(&mut self, batch: Vec<Request>) -> BatchReport {
        if batch.is_empty() {
            return BatchReport::default();
        }

        let max_tokens = batch
            .iter()
            .map(|req| req.tokens_to_generate)
            .max()
            .unwrap_or(0);
        debug!(batch_size = batch.len(), max_tokens, "starting batch");

        let mut recorded = vec![0usize; batch.len()];
        let mut dropped = vec![0usize; batch.len()];
        let mut steps_executed = 0;

        for step in 0..max_tokens {
            let mut num_active = 0;
            for (idx, req) in batch.iter().enumerate() {
                if !req.is_active_at(step) {
                    continue;
                }
                num_active += 1;
                if self.cache.append_token(req.id) {
                    recorded[idx] += 1;
                } else {
                    dropped[idx] += 1;
                }
            }

            if num_active == 0 {
                break;
            }
            self.executor.execute_step(step, num_active);
            steps_executed += 1;
        }

        let finished_at = Instant::now();
        let requests: Vec<RequestReport> = batch
            .iter()
            .enumerate()
            .map(|(idx, req)| self.complete_request(req, recorded[idx], dropped[idx], finished_at))
            .collect();

        self.stats.batches += 1;
        self.stats.requests += requests.len() as u64;
        self.stats.steps += steps_executed as u64;

        BatchReport {
            max_tokens,
            steps_executed,
            requests,
        }
    }

    fn complete_request(
        &mut self,
        req: &Request,
        tokens_recorded: usize,
        dropped_tokens: usize,
        finished_at: Instant,
    ) -> RequestReport {
        let report = RequestReport {
            request_id: req.id,
            tokens_requested: req.tokens_to_generate,
            tokens_recorded,
            dropped_tokens,
            latency: req.latency_at(finished_at),
            reserved_bytes: self.cache.get_reserved_bytes(req.id),
            used_bytes: self.cache.get_used_bytes(req.id),
        };

        if dropped_tokens > 0 {
            self.stats.dropped_tokens += dropped_tokens as u64;
            warn!(
                request_id = req.id,
                dropped_tokens, "kv cache exhausted, tokens dropped"
            );
        }
        info!(
            request_id = req.id,
            latency_ms = report.latency.as_millis() as u64,
            reserved_bytes = report.reserved_bytes,
            used_bytes = report.used_bytes,
            "request finished"
        );

        if self.config.release_on_completion {
            self.cache.release(req.id);
        }
        report
    }

    /// Serve `queue` until it is shut down and drained.
    ///
    /// `on_complete` is called for every finished request, in batch order.
    /// A batch that was already drained always runs to completion before
    /// shutdown is re-checked.
    pub fn run<F>(&mut self, queue: &RequestQueue, mut on_complete: F) -> SchedulerStats
    where
        F: FnMut(RequestReport),
    {
        loop {
            match self.poll(queue) {
                Iteration::Batch(report) => report.requests.into_iter().for_each(&mut on_complete),
                Iteration::Idle => {}
                Iteration::Stopped => break,
            }
        }
        self.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::engine::compute::NoopExecutor;

    fn scheduler(num_blocks: usize, block_size: usize) -> BatchScheduler<NoopExecutor> {
        let cache = PagedCacheManager::new(CacheConfig {
            num_blocks,
            block_size,
            emb_dim: 4,
            element_size: 4,
        })
        .unwrap();
        BatchScheduler::new(SchedulerConfig::default(), cache, NoopExecutor).unwrap()
    }

    #[test]
    fn test_empty_batch() {
        let mut scheduler = scheduler(4, 4);
        let report = scheduler.run_batch(Vec::new());
        assert_eq!(report.steps_executed, 0);
        assert!(report.requests.is_empty());
        assert_eq!(scheduler.stats().batches, 0);
    }

    #[test]
    fn test_new_rejects_zero_batch_size() {
        let config = SchedulerConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        let cache = PagedCacheManager::with_capacity(4);
        assert!(matches!(
            BatchScheduler::new(config, cache, NoopExecutor),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_zero_token_request_completes_immediately() {
        let mut scheduler = scheduler(4, 4);
        let report = scheduler.run_batch(vec![Request::new(1, 0)]);

        assert_eq!(report.steps_executed, 0);
        assert_eq!(report.requests[0].tokens_recorded, 0);
        assert_eq!(report.requests[0].reserved_bytes, 0);
    }

    #[test]
    fn test_release_on_completion() {
        let cache = PagedCacheManager::new(CacheConfig {
            num_blocks: 2,
            block_size: 2,
            emb_dim: 4,
            element_size: 4,
        })
        .unwrap();
        let config = SchedulerConfig {
            release_on_completion: true,
            ..Default::default()
        };
        let mut scheduler = BatchScheduler::new(config, cache, NoopExecutor).unwrap();

        let report = scheduler.run_batch(vec![Request::new(1, 4)]);
        // Bytes are reported before the blocks go back to the pool
        assert_eq!(report.requests[0].reserved_bytes, 2 * 2 * 16);
        assert_eq!(scheduler.cache().num_free_blocks(), 2);

        let report = scheduler.run_batch(vec![Request::new(2, 4)]);
        assert_eq!(report.requests[0].dropped_tokens, 0);
    }

    #[test]
    fn test_poll_stops_only_when_drained() {
        let mut scheduler = scheduler(8, 4);
        let queue = RequestQueue::new();
        queue.push(Request::new(1, 2));
        queue.shutdown();

        assert!(matches!(scheduler.poll(&queue), Iteration::Batch(_)));
        assert_eq!(scheduler.poll(&queue), Iteration::Stopped);
        assert!(scheduler.is_stopped());

        // No new batch once stop has been observed
        queue.push(Request::new(2, 2));
        assert_eq!(scheduler.poll(&queue), Iteration::Stopped);
        assert_eq!(queue.len(), 1);
    }
}
