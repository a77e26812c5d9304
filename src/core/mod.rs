//! Core data structures for infercore.
//!
//! This module contains the fundamental building blocks:
//! - MemoryBlock and BlockTable for the paged cache
//! - PagedCacheManager for block allocation and byte accounting
//! - Request for the unit of work flowing through the queue

pub mod block;
pub mod block_manager;
pub mod request;
