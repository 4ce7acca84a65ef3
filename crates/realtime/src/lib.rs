//! Tip-following sync for one chain.
//!
//! A per-chain task consumes new-head announcements, extracts full block
//! data, buffers it until finality, and emits block / reorg / finalize
//! signals into the aggregator. The task exclusively owns the chain's sync
//! progress, unfinalized buffer, and child-address map; everything durable
//! goes through the sync store in finalized batches.

mod buffer;
mod ctx;
mod error;
mod extract;
mod finalize;
mod handle;
mod reorg;
mod state;
mod task;

pub use buffer::UnfinalizedBlockBuffer;
pub use ctx::FetchSpec;
pub use error::RealtimeError;
pub use handle::{RealtimeHandle, RealtimeSyncBuilder};
pub use state::RealtimeState;
