//! Inference engine.
//!
//! This module contains:
//! - InferenceEngine, which runs the scheduler on its own thread
//! - Step executors standing in for model compute

pub mod compute;
pub mod server;

pub use compute::{NoopExecutor, SleepExecutor, StepExecutor};
pub use server::InferenceEngine;
