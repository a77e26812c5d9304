//! Block abstractions for the paged KV cache.
//!
//! The cache is divided into fixed-size blocks, similar to how operating
//! systems manage virtual memory with pages. A sequence owns an ordered list
//! of blocks (its [`BlockTable`]) that grows one block at a time as tokens
//! are appended.

/// Default block size (tokens per block).
pub const DEFAULT_BLOCK_SIZE: usize = 16;

/// Index of a physical block in the pool.
pub type BlockId = usize;

/// A fixed-capacity chunk of KV cache memory.
///
/// Each block holds up to `block_size` token slots. Blocks are created once
/// when the pool is built and afterwards only reset and reassigned by the
/// [`PagedCacheManager`](super::block_manager::PagedCacheManager).
///
/// # Example
///
/// ```
/// use infercore::core::block::MemoryBlock;
///
/// let mut block = MemoryBlock::new(3, 2);
/// assert!(block.append_token());
/// assert!(block.append_token());
/// assert!(block.is_full());
/// assert!(!block.append_token());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Index of this block in the pool, stable for the pool's lifetime.
    block_id: BlockId,
    /// Number of token slots this block can hold.
    block_size: usize,
    /// Number of token slots currently filled.
    num_tokens: usize,
}

impl MemoryBlock {
    /// Create an empty block.
    pub fn new(block_id: BlockId, block_size: usize) -> Self {
        Self {
            block_id,
            block_size,
            num_tokens: 0,
        }
    }

    /// Create an empty block with the default block size.
    pub fn with_default_size(block_id: BlockId) -> Self {
        Self::new(block_id, DEFAULT_BLOCK_SIZE)
    }

    /// Get the block's index in the pool.
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Get the block capacity in tokens.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Get the number of filled slots.
    pub fn num_tokens(&self) -> usize {
        self.num_tokens
    }

    /// Number of slots still available.
    pub fn num_empty_slots(&self) -> usize {
        self.block_size - self.num_tokens
    }

    /// Check if every slot is filled.
    pub fn is_full(&self) -> bool {
        self.num_tokens == self.block_size
    }

    /// Check if no slot is filled.
    pub fn is_empty(&self) -> bool {
        self.num_tokens == 0
    }

    /// Fill one more slot.
    ///
    /// # Returns
    ///
    /// `false` if the block was already full.
    pub fn append_token(&mut self) -> bool {
        if self.is_full() {
            return false;
        }
        self.num_tokens += 1;
        true
    }

    /// Clear all slots so the block can be handed to another sequence.
    pub fn reset(&mut self) {
        self.num_tokens = 0;
    }
}

/// Maps a sequence's logical positions to physical block IDs.
///
/// Think of this like a page table in virtual memory:
/// - Logical block index: Position in the sequence (0, 1, 2, ...)
/// - Physical block ID: Actual block in the global cache pool
///
/// Blocks are kept in allocation order. A table grown one token at a time
/// has every block full except possibly the last one.
///
/// # Example
///
/// ```
/// use infercore::core::block::BlockTable;
///
/// let mut table = BlockTable::new();
/// table.append_block(5);   // Tokens 0-15
/// table.append_block(12);  // Tokens 16-31
///
/// assert_eq!(table.get_block_id(1), Some(12));
/// assert_eq!(table.last_block_id(), Some(12));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTable {
    /// Physical block IDs in logical order.
    block_ids: Vec<BlockId>,
}

impl BlockTable {
    /// Create a new empty block table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the physical block ID for a logical block index.
    pub fn get_block_id(&self, logical_block_idx: usize) -> Option<BlockId> {
        self.block_ids.get(logical_block_idx).copied()
    }

    /// The most recently allocated block, where the next token goes.
    pub fn last_block_id(&self) -> Option<BlockId> {
        self.block_ids.last().copied()
    }

    /// Add a new physical block to the table.
    ///
    /// Called when the sequence grows and needs more blocks.
    pub fn append_block(&mut self, block_id: BlockId) {
        self.block_ids.push(block_id);
    }

    /// Number of blocks allocated to this sequence.
    pub fn num_blocks(&self) -> usize {
        self.block_ids.len()
    }

    /// Check if the table holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.block_ids.is_empty()
    }

    /// Get all physical block IDs for this sequence.
    pub fn get_physical_block_ids(&self) -> &[BlockId] {
        &self.block_ids
    }

    /// Remove and return all blocks from the table.
    pub fn take_blocks(&mut self) -> Vec<BlockId> {
        std::mem::take(&mut self.block_ids)
    }
}

/// Compute number of blocks needed for a sequence of given length.
///
/// # Example
///
/// ```
/// use infercore::core::block::compute_num_blocks;
///
/// assert_eq!(compute_num_blocks(35, 16), 3);  // 35 tokens -> 3 blocks
/// assert_eq!(compute_num_blocks(32, 16), 2);  // 32 tokens -> 2 blocks exactly
/// assert_eq!(compute_num_blocks(0, 16), 0);   // 0 tokens -> 0 blocks
/// ```
pub fn compute_num_blocks(seq_len: usize, block_size: usize) -> usize {
    seq_len.div_ceil(block_size)
}
