//! Merging per-chain event streams into one dispatch order.
//!
//! The merger core is a pure combinator over chain signals; the pump wraps
//! it in channel plumbing. Under omnichain ordering an event is released only
//! once every chain's cursor has passed it, so the global output is monotonic
//! in checkpoint. Under multichain ordering each chain flows independently.

mod merger;
mod pump;

pub use merger::{ChainEvent, EventMerger, MergedEvent, OrderingPolicy};
pub use pump::merge_task;
