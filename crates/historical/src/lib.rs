//! Historical backfill for one chain.
//!
//! The backfill is planned as interval arithmetic: per filter, the requested
//! range minus what the store already holds. Missing ranges are chunked,
//! fetched with bounded fan-out (splitting on provider range rejections),
//! persisted, and only then marked cached. Events are always rebuilt from
//! the store afterwards, so a crash-interrupted or repeated run re-dispatches
//! without touching the RPC for covered ranges.

mod error;
mod fetch;
mod plan;
mod sync;

pub use error::HistoricalError;
pub use fetch::FetchPolicy;
pub use sync::HistoricalSync;
