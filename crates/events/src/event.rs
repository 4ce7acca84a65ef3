use alloy_primitives::Address;
use tracery_primitives::{
    BlockRecord, BlockRef, ChainId, Checkpoint, EventTypeTag, LogRecord, TraceRecord,
    TransactionReceiptRecord, TransactionRecord,
};

use crate::Value;

/// One unit of work for the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub chain_id: ChainId,
    pub checkpoint: Checkpoint,
    /// Index of the user callback (event source) this event belongs to.
    pub callback_index: usize,
    /// Light ref of the containing block.
    pub block: BlockRef,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Synthetic one-shot emitted before a contract's first real event.
    Setup { contract: Address },

    Block {
        block: BlockRecord,
    },

    Transaction {
        transaction: TransactionRecord,
        receipt: Option<TransactionReceiptRecord>,
    },

    /// Native value transfer observed via a trace.
    Transfer {
        trace: TraceRecord,
        transaction: Option<TransactionRecord>,
    },

    Log {
        log: LogRecord,
        transaction: Option<TransactionRecord>,
        receipt: Option<TransactionReceiptRecord>,
        decoded: Option<Value>,
    },

    Trace {
        trace: TraceRecord,
        transaction: Option<TransactionRecord>,
        decoded_args: Option<Value>,
        decoded_result: Option<Value>,
    },

    /// A matched item whose ABI payload failed to decode. Emitted instead of
    /// silently skipping, so users see the corrupt item.
    DecodeError {
        source: EventTypeTag,
        message: String,
    },
}

impl Event {
    /// Short name for logs and error reports.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EventKind::Setup { .. } => "setup",
            EventKind::Block { .. } => "block",
            EventKind::Transaction { .. } => "transaction",
            EventKind::Transfer { .. } => "transfer",
            EventKind::Log { .. } => "log",
            EventKind::Trace { .. } => "trace",
            EventKind::DecodeError { .. } => "decode_error",
        }
    }

    /// Decoded payload, when this event carries one.
    pub fn decoded_args(&self) -> Option<&Value> {
        match &self.kind {
            EventKind::Log { decoded, .. } => decoded.as_ref(),
            EventKind::Trace { decoded_args, .. } => decoded_args.as_ref(),
            _ => None,
        }
    }
}
