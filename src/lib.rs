//! infercore: the serving core of an autoregressive inference server.
//!
//! This crate models three cooperating pieces:
//! - A thread-safe request queue with timed batch pop and cooperative shutdown
//! - A paged KV cache that hands out fixed-size blocks as sequences grow
//! - A batch scheduler that decodes batches in lock-step on one worker thread
//!
//! No tensor computation happens here; a decode step's cost is supplied by a
//! [`StepExecutor`].

pub mod bench;
pub mod config;
pub mod error;

pub mod core;
pub mod engine;
pub mod scheduler;

pub use config::{CacheConfig, EngineConfig, SchedulerConfig};
pub use crate::core::block_manager::{MemoryStats, PagedCacheManager};
pub use crate::core::request::{Request, RequestId};
pub use engine::{InferenceEngine, NoopExecutor, SleepExecutor, StepExecutor};
pub use error::{Error, Result};
pub use scheduler::{BatchReport, BatchScheduler, RequestQueue, RequestReport, SchedulerStats};
