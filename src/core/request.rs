//! Inference requests.
//!
//! A request is created by a producer, handed to the
//! [`RequestQueue`](crate::scheduler::queue::RequestQueue), and owned by the
//! scheduler for as long as its batch runs. Its id doubles as the sequence id
//! in the paged cache.

use std::time::{Duration, Instant};

/// Unique identifier for a request and its cache sequence.
pub type RequestId = u64;

/// A single synthetic generation request.
///
/// # Example
///
/// ```
/// use infercore::core::request::Request;
///
/// let req = Request::new(7, 3);
/// assert_eq!(req.id, 7);
/// assert_eq!(req.tokens_to_generate, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Caller-assigned id, unique among live requests.
    pub id: RequestId,
    /// Number of decode steps this request needs. Zero completes immediately.
    pub tokens_to_generate: usize,
    /// Creation time, used for end-to-end latency.
    pub start_time: Instant,
}

impl Request {
    /// Create a request stamped with the current time.
    pub fn new(id: RequestId, tokens_to_generate: usize) -> Self {
        Self::with_start_time(id, tokens_to_generate, Instant::now())
    }

    /// Create a request with an explicit arrival time.
    pub fn with_start_time(id: RequestId, tokens_to_generate: usize, start_time: Instant) -> Self {
        Self {
            id,
            tokens_to_generate,
            start_time,
        }
    }

    /// Whether this request still generates a token at decode step `step` (0-indexed).
    pub fn is_active_at(&self, step: usize) -> bool {
        step < self.tokens_to_generate
    }

    /// Time elapsed from creation until `now`.
    pub fn latency_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_steps() {
        let req = Request::new(1, 3);
        assert!(req.is_active_at(0));
        assert!(req.is_active_at(2));
        assert!(!req.is_active_at(3));

        let empty = Request::new(2, 0);
        assert!(!empty.is_active_at(0));
    }

    #[test]
    fn test_latency() {
        let start = Instant::now();
        let req = Request::with_start_time(1, 1, start);
        let later = start + Duration::from_millis(25);
        assert_eq!(req.latency_at(later), Duration::from_millis(25));

        // A clock reading before creation saturates to zero
        assert_eq!(req.latency_at(start), Duration::ZERO);
    }
}
