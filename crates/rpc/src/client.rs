use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracery_primitives::{
    BlockRecord, BlockRef, LogRecord, TraceRecord, TransactionReceiptRecord, TransactionRecord,
};

use crate::RpcError;

/// Parameters for an `eth_getLogs`-shaped query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    /// `None` matches any address.
    pub address: Option<Vec<Address>>,
    /// Positional topic constraints; `None` in a slot matches anything.
    pub topics: [Option<Vec<B256>>; 4],
    pub from_block: u64,
    pub to_block: u64,
}

/// Parameters for a `trace_filter`-shaped query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceQuery {
    pub from_block: u64,
    pub to_block: u64,
    pub from_address: Option<Vec<Address>>,
    pub to_address: Option<Vec<Address>>,
}

/// Parameters for an `eth_call` pinned to a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
    pub block_number: u64,
}

/// A block together with its transactions, when requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWithTransactions {
    pub block: BlockRecord,
    pub transactions: Vec<TransactionRecord>,
}

/// Read capability over one chain's RPC endpoint.
///
/// Implementations are expected to be cheap to clone behind an `Arc` and
/// safe to call concurrently; throttling belongs to [`crate::ThrottledClient`],
/// not to callers.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait EthClient: Send + Sync {
    async fn get_block_by_number(
        &self,
        number: u64,
        with_transactions: bool,
    ) -> Result<BlockWithTransactions, RpcError>;

    async fn get_block_by_hash(
        &self,
        hash: B256,
        with_transactions: bool,
    ) -> Result<BlockWithTransactions, RpcError>;

    /// The current tip number.
    async fn get_block_number(&self) -> Result<u64, RpcError>;

    async fn get_logs(&self, query: LogQuery) -> Result<Vec<LogRecord>, RpcError>;

    /// `debug_traceBlockByNumber`: all call frames of one block.
    async fn trace_block(&self, number: u64) -> Result<Vec<TraceRecord>, RpcError>;

    /// `trace_filter`: ranged trace query on providers that support it.
    async fn trace_filter(&self, query: TraceQuery) -> Result<Vec<TraceRecord>, RpcError>;

    async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<TransactionReceiptRecord, RpcError>;

    async fn call(&self, request: CallRequest) -> Result<Bytes, RpcError>;

    /// Subscribes to new heads. The returned receiver yields light refs as
    /// the node announces them; dropping it unsubscribes.
    async fn subscribe_new_heads(&self) -> Result<mpsc::Receiver<BlockRef>, RpcError>;
}
