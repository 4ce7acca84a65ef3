//! Durable persistence seam for raw chain data and sync bookkeeping.
//!
//! Callers never assume SQL: everything the engine persists goes through the
//! [`SyncStore`] capability. Inserts are idempotent upserts by natural key,
//! so a retried call after a failure cannot corrupt the store. The in-memory
//! implementation here backs tests and cache-disabled runs.

mod error;
mod memory;
mod store;

pub use error::SyncStoreError;
pub use memory::InMemorySyncStore;
#[cfg(any(test, feature = "test-utils"))]
pub use store::MockSyncStore;
pub use store::{RpcRequestKey, SyncStore};
