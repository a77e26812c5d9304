//! Synthetic compute cost of a decode step.
//!
//! No tensor math runs in this crate. The scheduler calls a [`StepExecutor`]
//! once per decode step instead, which stands in for one forward pass over
//! the batch. The cost depends on the step, never on how many requests are
//! active in it.

use std::thread;
use std::time::Duration;

use crate::config::SchedulerConfig;

/// Runs one decode step for a batch.
pub trait StepExecutor: Send {
    /// Execute decode step `step` (0-indexed) with `num_active` requests generating.
    fn execute_step(&mut self, step: usize, num_active: usize);
}

/// Sleeps for a fixed delay per step, modeling a compute-bound forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepExecutor {
    delay: Duration,
}

impl SleepExecutor {
    /// Sleep for `delay` on every step.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Use the configured per-step delay.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.step_delay())
    }

    /// Get the per-step delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl StepExecutor for SleepExecutor {
    fn execute_step(&mut self, _step: usize, _num_active: usize) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }
}

/// Completes every step instantly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoopExecutor;

impl StepExecutor for NoopExecutor {
    fn execute_step(&mut self, _step: usize, _num_active: usize) {}
}
