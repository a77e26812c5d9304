//! Request intake and batch scheduling.
//!
//! This module handles:
//! - The multi-producer request queue with timed batch pop
//! - Lock-step batch decoding over the paged cache

pub mod batch;
pub mod queue;

pub use batch::{BatchReport, BatchScheduler, RequestReport, SchedulerStats};
pub use queue::RequestQueue;
