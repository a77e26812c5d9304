//! Paged KV cache manager.
//!
//! The [`PagedCacheManager`] hands out fixed-size blocks from a preallocated
//! pool to sequences on demand, similar to how an operating system maps
//! physical pages into a process's page table.
//!
//! ## Features
//!
//! - **Free list allocation**: O(1) block allocation and release (LIFO, the
//!   most recently freed block is handed out first)
//! - **Per-sequence page tables**: lazily created on the first appended token
//! - **Byte accounting**: reserved (whole blocks) versus used (filled slots)
//!
//! Exhaustion is never fatal. [`allocate_block`](PagedCacheManager::allocate_block)
//! returns `None` and [`append_token`](PagedCacheManager::append_token) drops
//! the token, so a sequence that runs out of memory simply stops growing.
//!
//! ## Example
//!
//! ```
//! use infercore::core::block_manager::PagedCacheManager;
//!
//! let mut manager = PagedCacheManager::with_capacity(4);
//!
//! assert!(manager.append_token(7));
//! assert_eq!(manager.get_reserved_bytes(7), 16 * 1024 * 4);
//! assert_eq!(manager.get_used_bytes(7), 1024 * 4);
//!
//! // Return the sequence's blocks once it is done
//! assert_eq!(manager.release(7), 1);
//! ```

use std::collections::HashMap;

use tracing::debug;

use crate::config::CacheConfig;
use crate::core::block::{compute_num_blocks, BlockId, BlockTable, MemoryBlock};
use crate::core::request::RequestId;
use crate::error::{Error, Result};

/// Identifier of a cached sequence. Sequences are keyed by their request id.
pub type SequenceId = RequestId;

/// Pool-wide memory accounting snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes committed to sequences through block ownership.
    pub reserved_bytes: usize,
    /// Bytes holding token data inside reserved blocks.
    pub used_bytes: usize,
    /// Blocks on the free list.
    pub free_blocks: usize,
    /// Blocks owned by some sequence.
    pub used_blocks: usize,
}

impl MemoryStats {
    /// Fraction of reserved memory that holds no token data.
    ///
    /// Zero when nothing is reserved.
    pub fn waste_ratio(&self) -> f64 {
        if self.reserved_bytes == 0 {
            return 0.0;
        }
        1.0 - self.used_bytes as f64 / self.reserved_bytes as f64
    }
}

/// Manages a fixed pool of KV cache blocks and the sequences that own them.
///
/// The manager maintains:
/// - The pool itself, indexed by block id
/// - A free list of unowned block ids
/// - One [`BlockTable`] per sequence
///
/// Every block id is either on the free list or in exactly one page table.
#[derive(Debug)]
pub struct PagedCacheManager {
    /// Pool geometry and byte sizes.
    config: CacheConfig,
    /// All blocks indexed by block id.
    pool: Vec<MemoryBlock>,
    /// Free block ids, popped from the back.
    free_list: Vec<BlockId>,
    /// Sequence id -> owned blocks in allocation order.
    page_tables: HashMap<SequenceId, BlockTable>,
}

impl PagedCacheManager {
    /// Create a manager and preallocate `config.num_blocks` free blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the block geometry is invalid.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a manager with `num_blocks` blocks and default geometry.
    pub fn with_capacity(num_blocks: usize) -> Self {
        Self::build(CacheConfig {
            num_blocks,
            ..Default::default()
        })
    }

    fn build(config: CacheConfig) -> Self {
        let pool = (0..config.num_blocks)
            .map(|id| MemoryBlock::new(id, config.block_size))
            .collect();
        // Reversed so the first allocation hands out block 0
        let free_list = (0..config.num_blocks).rev().collect();

        Self {
            config,
            pool,
            free_list,
            page_tables: HashMap::new(),
        }
    }

    /// Get the cache geometry.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Tokens per block.
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Total number of blocks in the pool.
    pub fn num_blocks(&self) -> usize {
        self.pool.len()
    }

    /// Get the number of free blocks.
    pub fn num_free_blocks(&self) -> usize {
        self.free_list.len()
    }

    /// Number of blocks owned by some sequence.
    pub fn num_used_blocks(&self) -> usize {
        self.pool.len() - self.free_list.len()
    }

    /// Check if at least one block is free.
    pub fn has_free_blocks(&self) -> bool {
        !self.free_list.is_empty()
    }

    /// Check if `num_blocks` more blocks could be allocated right now.
    pub fn can_allocate(&self, num_blocks: usize) -> bool {
        self.free_list.len() >= num_blocks
    }

    /// Number of sequences with a page table.
    pub fn num_sequences(&self) -> usize {
        self.page_tables.len()
    }

    /// Get the page table of a sequence, if it owns any blocks.
    pub fn block_table(&self, seq_id: SequenceId) -> Option<&BlockTable> {
        self.page_tables.get(&seq_id)
    }

    /// Get a block from the pool by ID.
    pub fn block(&self, block_id: BlockId) -> Option<&MemoryBlock> {
        self.pool.get(block_id)
    }

    /// Assign one free block to a sequence.
    ///
    /// The block is emptied and appended to the sequence's page table, which
    /// is created if this is the sequence's first block.
    ///
    /// # Returns
    ///
    /// The block id, or `None` if the pool is exhausted. Exhaustion leaves
    /// the manager unchanged.
    pub fn allocate_block(&mut self, seq_id: SequenceId) -> Option<BlockId> {
        let Some(block_id) = self.free_list.pop() else {
            debug!(seq_id, num_blocks = self.pool.len(), "kv cache exhausted");
            return None;
        };

        let block = &mut self.pool[block_id];
        block.reset();

        self.page_tables
            .entry(seq_id)
            .or_default()
            .append_block(block_id);

        Some(block_id)
    }

    /// Append one token to a sequence.
    ///
    /// A new block is allocated first if the sequence has none or its last
    /// block is full. If that allocation fails the token is dropped and the
    /// sequence's token count does not advance.
    ///
    /// # Returns
    ///
    /// `true` if the token was recorded, `false` if it was dropped.
    pub fn append_token(&mut self, seq_id: SequenceId) -> bool {
        let active = self
            .page_tables
            .get(&seq_id)
            .and_then(BlockTable::last_block_id)
            .filter(|&id| !self.pool[id].is_full());

        let block_id = match active {
            Some(id) => id,
            None => match self.allocate_block(seq_id) {
                Some(id) => id,
                None => return false,
            },
        };

        let appended = self.pool[block_id].append_token();
        debug_assert!(appended, "active block {block_id} was full");
        appended
    }

    /// Append `num_tokens` tokens to a sequence, all or nothing.
    ///
    /// Used to load a prompt in one go.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBlocks`] without modifying anything if the pool
    /// cannot hold all of the tokens.
    pub fn append_tokens(&mut self, seq_id: SequenceId, num_tokens: usize) -> Result<()> {
        let free_slots = self
            .page_tables
            .get(&seq_id)
            .and_then(BlockTable::last_block_id)
            .map_or(0, |id| self.pool[id].num_empty_slots());
        let blocks_needed =
            compute_num_blocks(num_tokens.saturating_sub(free_slots), self.block_size());

        if !self.can_allocate(blocks_needed) {
            return Err(Error::OutOfBlocks);
        }

        for _ in 0..num_tokens {
            let appended = self.append_token(seq_id);
            debug_assert!(appended);
        }
        Ok(())
    }

    /// Number of tokens recorded for a sequence; 0 if unknown.
    pub fn num_tokens(&self, seq_id: SequenceId) -> usize {
        self.page_tables.get(&seq_id).map_or(0, |table| {
            table
                .get_physical_block_ids()
                .iter()
                .map(|&id| self.pool[id].num_tokens())
                .sum()
        })
    }

    /// Bytes committed to a sequence: owned blocks times block bytes.
    ///
    /// Returns 0 for unknown sequences.
    pub fn get_reserved_bytes(&self, seq_id: SequenceId) -> usize {
        self.page_tables
            .get(&seq_id)
            .map_or(0, |table| table.num_blocks() * self.config.block_bytes())
    }

    /// Bytes holding token data for a sequence.
    ///
    /// Returns 0 for unknown sequences.
    pub fn get_used_bytes(&self, seq_id: SequenceId) -> usize {
        self.num_tokens(seq_id) * self.config.token_bytes()
    }

    /// Return all of a sequence's blocks to the free list.
    ///
    /// # Returns
    ///
    /// Number of blocks freed; 0 if the sequence is unknown.
    pub fn release(&mut self, seq_id: SequenceId) -> usize {
        let Some(mut table) = self.page_tables.remove(&seq_id) else {
            return 0;
        };

        let block_ids = table.take_blocks();
        for &block_id in &block_ids {
            self.pool[block_id].reset();
            self.free_list.push(block_id);
        }

        debug!(seq_id, freed = block_ids.len(), "released sequence blocks");
        debug_assert!(self.check_partition());
        block_ids.len()
    }

    /// Sum of reserved bytes over all sequences.
    pub fn total_reserved_bytes(&self) -> usize {
        self.num_used_blocks() * self.config.block_bytes()
    }

    /// Sum of used bytes over all sequences.
    pub fn total_used_bytes(&self) -> usize {
        let tokens: usize = self
            .page_tables
            .values()
            .flat_map(|table| table.get_physical_block_ids())
            .map(|&id| self.pool[id].num_tokens())
            .sum();
        tokens * self.config.token_bytes()
    }

    /// Snapshot of pool-wide byte and block accounting.
    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            reserved_bytes: self.total_reserved_bytes(),
            used_bytes: self.total_used_bytes(),
            free_blocks: self.num_free_blocks(),
            used_blocks: self.num_used_blocks(),
        }
    }

    /// Verify that the free list and the page tables partition the pool.
    ///
    /// Every block id must appear exactly once across the free list and all
    /// page tables.
    pub fn check_partition(&self) -> bool {
        let mut seen = vec![false; self.pool.len()];
        let owned = self
            .page_tables
            .values()
            .flat_map(|table| table.get_physical_block_ids());

        for &block_id in self.free_list.iter().chain(owned) {
            match seen.get_mut(block_id) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        seen.iter().all(|&s| s)
    }

    /// Reset the manager to its initial state.
    ///
    /// All blocks are emptied and returned to the free list.
    pub fn reset(&mut self) {
        self.page_tables.clear();
        for block in &mut self.pool {
            block.reset();
        }
        self.free_list.clear();
        self.free_list.extend((0..self.pool.len()).rev());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(num_blocks: usize, block_size: usize) -> CacheConfig {
        CacheConfig {
            num_blocks,
            block_size,
            emb_dim: 8,
            element_size: 4,
        }
    }

    #[test]
    fn test_manager_creation() {
        let manager = PagedCacheManager::new(small_config(100, 16)).unwrap();
        assert_eq!(manager.num_blocks(), 100);
        assert_eq!(manager.block_size(), 16);
        assert_eq!(manager.num_free_blocks(), 100);
        assert_eq!(manager.num_used_blocks(), 0);
        assert!(manager.check_partition());
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        assert!(matches!(
            PagedCacheManager::new(small_config(4, 0)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_allocate_block_lifo() {
        let mut manager = PagedCacheManager::new(small_config(3, 4)).unwrap();

        assert_eq!(manager.allocate_block(1), Some(0));
        assert_eq!(manager.allocate_block(2), Some(1));
        manager.release(1);

        // Most recently freed block comes back first
        assert_eq!(manager.allocate_block(3), Some(0));
        assert!(manager.check_partition());
    }

    #[test]
    fn test_allocate_block_exhaustion() {
        let mut manager = PagedCacheManager::new(small_config(1, 4)).unwrap();

        assert!(manager.allocate_block(1).is_some());
        assert!(manager.allocate_block(2).is_none());
        assert!(manager.block_table(2).is_none());
        assert_eq!(manager.num_sequences(), 1);
    }

    #[test]
    fn test_append_crosses_block_boundary() {
        let mut manager = PagedCacheManager::new(small_config(4, 2)).unwrap();

        for _ in 0..5 {
            assert!(manager.append_token(9));
        }

        let table = manager.block_table(9).unwrap();
        assert_eq!(table.num_blocks(), 3);
        assert_eq!(manager.num_tokens(9), 5);
        assert_eq!(manager.get_reserved_bytes(9), 3 * 2 * 32);
        assert_eq!(manager.get_used_bytes(9), 5 * 32);
        assert!(manager.check_partition());
    }

    #[test]
    fn test_allocate_block_resets_reused_block() {
        let mut manager = PagedCacheManager::new(small_config(1, 4)).unwrap();
        manager.append_token(1);
        manager.append_token(1);
        manager.release(1);

        let block_id = manager.allocate_block(2).unwrap();
        assert_eq!(manager.block(block_id).unwrap().num_tokens(), 0);
    }

    #[test]
    fn test_append_tokens_all_or_nothing() {
        let mut manager = PagedCacheManager::new(small_config(2, 4)).unwrap();

        assert!(manager.append_tokens(1, 6).is_ok());
        assert_eq!(manager.num_tokens(1), 6);

        // Two slots remain in the last block, a third block would be needed
        assert!(matches!(
            manager.append_tokens(1, 3),
            Err(Error::OutOfBlocks)
        ));
        assert_eq!(manager.num_tokens(1), 6);

        assert!(manager.append_tokens(1, 2).is_ok());
        assert_eq!(manager.num_tokens(1), 8);
    }

    #[test]
    fn test_memory_stats() {
        let mut manager = PagedCacheManager::new(small_config(4, 4)).unwrap();
        assert_eq!(manager.memory_stats().waste_ratio(), 0.0);

        manager.append_tokens(1, 2).unwrap();
        manager.append_tokens(2, 4).unwrap();

        let stats = manager.memory_stats();
        assert_eq!(stats.used_blocks, 2);
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.reserved_bytes, 2 * 4 * 32);
        assert_eq!(stats.used_bytes, 6 * 32);
        assert!((stats.waste_ratio() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut manager = PagedCacheManager::new(small_config(5, 2)).unwrap();
        manager.append_tokens(1, 5).unwrap();
        manager.append_token(2);

        manager.reset();

        assert_eq!(manager.num_free_blocks(), 5);
        assert_eq!(manager.num_sequences(), 0);
        assert_eq!(manager.get_reserved_bytes(1), 0);
        assert!(manager.check_partition());
    }
}
