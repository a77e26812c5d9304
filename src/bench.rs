//! Benchmark drivers for the command-line tool.
//!
//! - [`run_throughput`]: many producer threads feed a running engine and the
//!   driver measures end-to-end latency and throughput.
//! - [`run_memory_comparison`]: contrasts reserving a full context per user
//!   with the paged cache for the same prompts.

use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::config::{CacheConfig, EngineConfig};
use crate::core::block_manager::{MemoryStats, PagedCacheManager};
use crate::core::request::{Request, RequestId};
use crate::engine::compute::StepExecutor;
use crate::engine::server::InferenceEngine;
use crate::error::Result;

/// Delay each producer waits before pushing, to spread arrivals.
pub const PRODUCER_DELAY: Duration = Duration::from_micros(100);

/// Context length reserved per user by the contiguous layout.
pub const DEFAULT_MAX_CONTEXT_LEN: usize = 2048;

/// Token count of the `index`-th synthetic request: 5 to 9, cycling.
pub fn synthetic_tokens(index: usize) -> usize {
    5 + index % 5
}

/// Result of a throughput run.
#[derive(Debug, Clone)]
pub struct ThroughputSummary {
    pub total_requests: usize,
    /// Reports actually received before the engine stopped.
    pub completed_requests: usize,
    pub elapsed: Duration,
    pub mean_latency: Duration,
    pub max_latency: Duration,
    pub batches: u64,
    pub dropped_tokens: u64,
    pub memory: MemoryStats,
}

impl ThroughputSummary {
    /// Completed requests per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.completed_requests as f64 / secs
    }
}

/// Spawn one producer thread per request against a fresh engine and wait
/// for every completion.
///
/// # Errors
///
/// Returns an error if the engine cannot start or its worker panics.
pub fn run_throughput<E>(
    config: EngineConfig,
    total_requests: usize,
    executor: E,
) -> Result<ThroughputSummary>
where
    E: StepExecutor + 'static,
{
    let engine = InferenceEngine::with_executor(config, executor)?;
    let start = Instant::now();

    thread::scope(|s| {
        for index in 0..total_requests {
            let queue = engine.queue();
            s.spawn(move || {
                thread::sleep(PRODUCER_DELAY);
                queue.push(Request::new(index as RequestId, synthetic_tokens(index)));
            });
        }
    });

    let mut completed = 0;
    let mut total_latency = Duration::ZERO;
    let mut max_latency = Duration::ZERO;
    while completed < total_requests {
        let Ok(report) = engine.reports().recv() else {
            break;
        };
        completed += 1;
        total_latency += report.latency;
        max_latency = max_latency.max(report.latency);
    }
    let elapsed = start.elapsed();

    let stats = engine.shutdown()?;
    let mean_latency = match u32::try_from(completed) {
        Ok(n) if n > 0 => total_latency / n,
        _ => Duration::ZERO,
    };

    info!(
        completed,
        elapsed_ms = elapsed.as_millis() as u64,
        "throughput run finished"
    );

    Ok(ThroughputSummary {
        total_requests,
        completed_requests: completed,
        elapsed,
        mean_latency,
        max_latency,
        batches: stats.batches,
        dropped_tokens: stats.dropped_tokens,
        memory: stats.memory,
    })
}

/// Reserved versus used bytes for one memory layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryFootprint {
    pub reserved_bytes: usize,
    pub used_bytes: usize,
}

impl MemoryFootprint {
    /// Fraction of reserved memory holding no data.
    pub fn waste_ratio(&self) -> f64 {
        if self.reserved_bytes == 0 {
            return 0.0;
        }
        1.0 - self.used_bytes as f64 / self.reserved_bytes as f64
    }
}

impl From<MemoryStats> for MemoryFootprint {
    fn from(stats: MemoryStats) -> Self {
        Self {
            reserved_bytes: stats.reserved_bytes,
            used_bytes: stats.used_bytes,
        }
    }
}

/// Contiguous and paged footprints for the same workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryComparison {
    pub users: usize,
    pub prompt_len: usize,
    /// Every user reserves `max_context_len` token slots up front.
    pub contiguous: MemoryFootprint,
    /// Users reserve blocks as their tokens arrive.
    pub paged: MemoryFootprint,
}

/// Load `users` prompts of `prompt_len` tokens under both layouts.
///
/// # Errors
///
/// Returns [`Error::OutOfBlocks`](crate::Error::OutOfBlocks) if the paged pool
/// is too small for the workload, or [`Error::Config`](crate::Error::Config)
/// for an invalid cache geometry.
pub fn run_memory_comparison(
    cache: CacheConfig,
    users: usize,
    prompt_len: usize,
    max_context_len: usize,
) -> Result<MemoryComparison> {
    let token_bytes = cache.token_bytes();
    let contiguous = MemoryFootprint {
        reserved_bytes: users * max_context_len * token_bytes,
        used_bytes: users * prompt_len.min(max_context_len) * token_bytes,
    };

    let mut manager = PagedCacheManager::new(cache)?;
    for user in 0..users {
        manager.append_tokens(user as RequestId, prompt_len)?;
    }

    Ok(MemoryComparison {
        users,
        prompt_len,
        contiguous,
        paged: manager.memory_stats().into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_tokens_cycle() {
        let tokens: Vec<_> = (0..7).map(synthetic_tokens).collect();
        assert_eq!(tokens, vec![5, 6, 7, 8, 9, 5, 6]);
    }

    #[test]
    fn test_memory_comparison_defaults() {
        let comparison = run_memory_comparison(CacheConfig::default(), 50, 64, 2048).unwrap();

        let token_bytes = 1024 * 4;
        assert_eq!(comparison.contiguous.reserved_bytes, 50 * 2048 * token_bytes);
        assert_eq!(comparison.contiguous.used_bytes, 50 * 64 * token_bytes);

        // 64 tokens fill exactly four 16-token blocks
        assert_eq!(comparison.paged.reserved_bytes, 50 * 64 * token_bytes);
        assert_eq!(comparison.paged.used_bytes, 50 * 64 * token_bytes);
        assert_eq!(comparison.paged.waste_ratio(), 0.0);
        assert!(comparison.contiguous.waste_ratio() > 0.96);
    }

    #[test]
    fn test_memory_comparison_pool_too_small() {
        let cache = CacheConfig {
            num_blocks: 3,
            ..Default::default()
        };
        assert!(run_memory_comparison(cache, 1, 64, 2048).is_err());
    }
}
