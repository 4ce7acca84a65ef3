//! Raw chain artifacts as fetched over RPC and persisted in the sync store.
//!
//! These are deliberately flat serde structs: the sync store treats them as
//! opaque rows keyed by natural key, and the rpc-request cache round-trips
//! them as JSON blobs.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::BlockRef;

/// A fetched block, as much of it as indexing callbacks can observe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: B256,
    pub parent_hash: B256,
    pub number: u64,
    pub timestamp: u64,
    pub miner: Address,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub base_fee_per_gas: Option<u64>,
    pub transaction_count: u64,
}

impl BlockRecord {
    /// The light reference used for ordering and reorg detection.
    pub fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.hash, self.parent_hash, self.number, self.timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_hash: B256,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub log_index: u64,
}

impl LogRecord {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: B256,
    pub block_hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    pub from: Address,
    /// `None` for contract creations.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub nonce: u64,
    pub gas: u64,
    pub gas_price: Option<u128>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceiptRecord {
    pub transaction_hash: B256,
    pub block_hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    pub gas_used: u64,
    pub status: bool,
}

/// Kind of call a trace frame represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Call,
    DelegateCall,
    StaticCall,
    CallCode,
    Create,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub transaction_hash: B256,
    pub block_hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    /// Position of this frame within the block's flattened trace list.
    pub trace_index: u64,
    pub call_type: CallType,
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
    pub output: Bytes,
    pub value: U256,
    /// Revert or halt reason, when the frame failed.
    pub error: Option<String>,
}

impl TraceRecord {
    /// First four bytes of calldata, when present.
    pub fn selector(&self) -> Option<[u8; 4]> {
        if self.input.len() >= 4 {
            let mut selector = [0u8; 4];
            selector.copy_from_slice(&self.input[..4]);
            Some(selector)
        } else {
            None
        }
    }
}
