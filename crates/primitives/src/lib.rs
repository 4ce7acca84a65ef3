//! Core identity and ordering types shared across the tracery engine:
//! chain identity, light block references, raw chain records, the composite
//! checkpoint that totally orders events, and per-chain sync progress.

mod block;
mod chain;
mod checkpoint;
mod progress;
mod records;

pub use block::BlockRef;
pub use chain::{Chain, ChainId};
pub use checkpoint::{Checkpoint, CheckpointDecodeError, EventTypeTag, ENCODED_CHECKPOINT_LEN};
pub use progress::SyncProgress;
pub use records::{
    BlockRecord, CallType, LogRecord, TraceRecord, TransactionReceiptRecord, TransactionRecord,
};
