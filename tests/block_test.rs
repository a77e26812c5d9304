//! Integration tests for MemoryBlock and BlockTable.

use infercore::core::block::{compute_num_blocks, BlockTable, MemoryBlock, DEFAULT_BLOCK_SIZE};

#[test]
fn test_default_block_size() {
    let block = MemoryBlock::with_default_size(7);
    assert_eq!(block.block_size(), DEFAULT_BLOCK_SIZE);
    assert_eq!(block.block_size(), 16);
}

#[test]
fn test_block_fills_to_capacity() {
    let mut block = MemoryBlock::new(0, 16);

    for _ in 0..16 {
        assert!(block.append_token());
    }
    assert!(block.is_full());
    assert_eq!(block.num_empty_slots(), 0);

    // Further tokens are rejected, count stays at capacity
    assert!(!block.append_token());
    assert_eq!(block.num_tokens(), 16);
}

#[test]
fn test_block_table_keeps_allocation_order() {
    let mut table = BlockTable::new();
    for id in [9, 2, 5] {
        table.append_block(id);
    }

    assert_eq!(table.get_physical_block_ids(), &[9, 2, 5]);
    assert_eq!(table.get_block_id(0), Some(9));
    assert_eq!(table.last_block_id(), Some(5));
}

#[test]
fn test_compute_num_blocks() {
    assert_eq!(compute_num_blocks(0, 16), 0);
    assert_eq!(compute_num_blocks(15, 16), 1);
    assert_eq!(compute_num_blocks(32, 16), 2);
    assert_eq!(compute_num_blocks(35, 16), 3);
    assert_eq!(compute_num_blocks(3, 1), 3);
}
