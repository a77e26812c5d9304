//! Inference engine: queue, scheduler thread and completion channel.
//!
//! The engine owns one long-lived worker thread running
//! [`BatchScheduler::run`]. Producers push requests through the shared
//! [`RequestQueue`]; completion reports come back over an `mpsc` channel.
//! Shutting down stops the queue, lets the worker drain it, and joins the
//! thread.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::info;

use crate::config::EngineConfig;
use crate::core::block_manager::PagedCacheManager;
use crate::core::request::Request;
use crate::engine::compute::{SleepExecutor, StepExecutor};
use crate::error::{Error, Result};
use crate::scheduler::batch::{BatchScheduler, RequestReport, SchedulerStats};
use crate::scheduler::queue::RequestQueue;

/// Handle to a running engine.
///
/// Dropping the handle shuts the engine down and waits for the worker.
pub struct InferenceEngine {
    queue: Arc<RequestQueue>,
    reports: Receiver<RequestReport>,
    worker: Option<JoinHandle<SchedulerStats>>,
}

impl InferenceEngine {
    /// Start an engine whose decode steps sleep for the configured step delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the worker thread
    /// cannot be spawned.
    pub fn start(config: EngineConfig) -> Result<Self> {
        let executor = SleepExecutor::from_config(&config.scheduler);
        Self::with_executor(config, executor)
    }

    /// Start an engine with a custom step executor.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the worker thread
    /// cannot be spawned.
    pub fn with_executor<E>(config: EngineConfig, executor: E) -> Result<Self>
    where
        E: StepExecutor + 'static,
    {
        config.validate()?;
        let cache = PagedCacheManager::new(config.cache)?;
        let mut scheduler = BatchScheduler::new(config.scheduler, cache, executor)?;
        let queue = Arc::new(RequestQueue::new());
        let (report_tx, reports) = mpsc::channel();

        let worker_queue = Arc::clone(&queue);
        let worker = thread::Builder::new()
            .name("infercore-scheduler".into())
            .spawn(move || {
                let stats = scheduler.run(&worker_queue, |report| {
                    // The receiver may already be gone; reports are then discarded.
                    let _ = report_tx.send(report);
                });
                info!(
                    batches = stats.batches,
                    requests = stats.requests,
                    "scheduler worker exiting"
                );
                stats
            })?;

        info!(
            num_blocks = config.cache.num_blocks,
            max_batch_size = config.scheduler.max_batch_size,
            "inference engine started"
        );

        Ok(Self {
            queue,
            reports,
            worker: Some(worker),
        })
    }

    /// Enqueue a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineStopped`] if the queue has been shut down.
    pub fn submit(&self, request: Request) -> Result<()> {
        if self.queue.is_stopped() {
            return Err(Error::EngineStopped);
        }
        self.queue.push(request);
        Ok(())
    }

    /// Shared queue handle for producer threads.
    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    /// Completion reports, in the order requests finish.
    pub fn reports(&self) -> &Receiver<RequestReport> {
        &self.reports
    }

    /// Stop accepting work, drain the queue and join the worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerPanicked`] if the worker thread panicked.
    pub fn shutdown(mut self) -> Result<SchedulerStats> {
        self.stop()
    }

    fn stop(&mut self) -> Result<SchedulerStats> {
        self.queue.shutdown();
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| Error::WorkerPanicked),
            None => Ok(SchedulerStats::default()),
        }
    }
}

impl Drop for InferenceEngine {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}
