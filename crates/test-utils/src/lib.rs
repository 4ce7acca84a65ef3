//! Shared fixture builders for engine tests.
//!
//! Blocks are identified by a single id byte stamped into the hash, so test
//! chains read as plain numbers: `make_block_ref(7, 7, 6)` is block 7 whose
//! parent is the block with id byte 6.

use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use tracery_filters::{AddressSpec, Filter, LogFilter};
use tracery_primitives::{BlockRecord, BlockRef, ChainId, LogRecord};

/// Hash with a single distinguishing byte.
pub fn make_hash(id: u8) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = id;
    B256::from(bytes)
}

pub fn make_block_ref(number: u64, id: u8, parent_id: u8) -> BlockRef {
    BlockRef::new(make_hash(id), make_hash(parent_id), number, number * 12)
}

pub fn make_block_record(number: u64, id: u8, parent_id: u8) -> BlockRecord {
    BlockRecord {
        hash: make_hash(id),
        parent_hash: make_hash(parent_id),
        number,
        timestamp: number * 12,
        miner: Address::ZERO,
        gas_limit: 30_000_000,
        gas_used: 0,
        base_fee_per_gas: None,
        transaction_count: 0,
    }
}

/// A linear block chain `start..=end` with id bytes equal to the block
/// numbers.
pub fn make_block_chain(start: u64, end: u64) -> Vec<BlockRecord> {
    (start..=end)
        .map(|number| make_block_record(number, number as u8, number.saturating_sub(1) as u8))
        .collect()
}

pub fn make_log(
    address: Address,
    topic0: B256,
    block: &BlockRecord,
    log_index: u64,
) -> LogRecord {
    LogRecord {
        address,
        topics: vec![topic0],
        data: Bytes::new(),
        block_hash: block.hash,
        block_number: block.number,
        transaction_hash: make_hash(0xf0u8.wrapping_add(log_index as u8)),
        transaction_index: 0,
        log_index,
    }
}

pub fn make_log_filter(chain_id: ChainId, address: Address, topic0: B256) -> Filter {
    Filter::Log(LogFilter {
        chain_id,
        from_block: None,
        to_block: None,
        address: AddressSpec::Static(vec![address]),
        topic0: Some(vec![topic0]),
        topic1: None,
        topic2: None,
        topic3: None,
        include_receipts: false,
    })
}

pub fn make_chain(chain_id: ChainId, finality: u64) -> tracery_primitives::Chain {
    tracery_primitives::Chain::new(chain_id, format!("chain-{chain_id}"))
        .with_finality_block_count(finality)
        .with_polling_interval(Duration::from_millis(10))
}
