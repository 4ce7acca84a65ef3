use alloy_primitives::{Address, FixedBytes, B256};
use serde::{Deserialize, Serialize};
use tracery_primitives::{CallType, ChainId};

use crate::Factory;

/// How a filter selects addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressSpec {
    /// Match any address.
    All,
    /// Match a fixed set of addresses.
    Static(Vec<Address>),
    /// Match addresses produced by a factory.
    Factory(Factory),
}

impl AddressSpec {
    pub fn factory(&self) -> Option<&Factory> {
        match self {
            Self::Factory(factory) => Some(factory),
            _ => None,
        }
    }
}

/// Topic constraint for one topic slot: `None` matches anything, otherwise
/// any of the listed values matches.
pub type TopicSpec = Option<Vec<B256>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub chain_id: ChainId,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub address: AddressSpec,
    pub topic0: TopicSpec,
    pub topic1: TopicSpec,
    pub topic2: TopicSpec,
    pub topic3: TopicSpec,
    pub include_receipts: bool,
}

/// Selects every Nth block, offset within the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFilter {
    pub chain_id: ChainId,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub interval: u64,
    pub offset: u64,
}

impl BlockFilter {
    pub fn selects(&self, block_number: u64) -> bool {
        self.interval != 0 && block_number % self.interval == self.offset
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub chain_id: ChainId,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub from_address: AddressSpec,
    pub to_address: AddressSpec,
    pub include_receipts: bool,
}

/// Native value transfers, observed via traces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFilter {
    pub chain_id: ChainId,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub from_address: AddressSpec,
    pub to_address: AddressSpec,
    pub include_receipts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFilter {
    pub chain_id: ChainId,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub from_address: AddressSpec,
    pub to_address: AddressSpec,
    /// Four-byte function selectors; empty means any.
    pub function_selectors: Vec<FixedBytes<4>>,
    pub call_type: Option<CallType>,
    pub include_receipts: bool,
}

/// A user-requested event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    Log(LogFilter),
    Block(BlockFilter),
    Transaction(TransactionFilter),
    Transfer(TransferFilter),
    Trace(TraceFilter),
}

impl Filter {
    pub fn chain_id(&self) -> ChainId {
        match self {
            Self::Log(f) => f.chain_id,
            Self::Block(f) => f.chain_id,
            Self::Transaction(f) => f.chain_id,
            Self::Transfer(f) => f.chain_id,
            Self::Trace(f) => f.chain_id,
        }
    }

    pub fn from_block(&self) -> Option<u64> {
        match self {
            Self::Log(f) => f.from_block,
            Self::Block(f) => f.from_block,
            Self::Transaction(f) => f.from_block,
            Self::Transfer(f) => f.from_block,
            Self::Trace(f) => f.from_block,
        }
    }

    pub fn to_block(&self) -> Option<u64> {
        match self {
            Self::Log(f) => f.to_block,
            Self::Block(f) => f.to_block,
            Self::Transaction(f) => f.to_block,
            Self::Transfer(f) => f.to_block,
            Self::Trace(f) => f.to_block,
        }
    }

    /// The factory backing this filter's address set, if any.
    ///
    /// At most one factory backs a filter: log filters carry it in their
    /// address spec, trace-shaped filters in either endpoint.
    pub fn factory(&self) -> Option<&Factory> {
        match self {
            Self::Log(f) => f.address.factory(),
            Self::Block(_) => None,
            Self::Transaction(f) => f.from_address.factory().or(f.to_address.factory()),
            Self::Transfer(f) => f.from_address.factory().or(f.to_address.factory()),
            Self::Trace(f) => f.from_address.factory().or(f.to_address.factory()),
        }
    }

    pub fn include_receipts(&self) -> bool {
        match self {
            Self::Log(f) => f.include_receipts,
            Self::Block(_) => false,
            Self::Transaction(f) => f.include_receipts,
            Self::Transfer(f) => f.include_receipts,
            Self::Trace(f) => f.include_receipts,
        }
    }
}
