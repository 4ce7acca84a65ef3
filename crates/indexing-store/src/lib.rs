//! User-table writes: a byte-bounded row cache over a transactional backend.
//!
//! Callbacks read and write user-defined tables through [`IndexingStore`];
//! writes buffer in the cache and reach the database only at flush, in one
//! transaction that also commits the recovery checkpoint. The durable DB
//! therefore reflects exactly the events at or below the committed
//! checkpoint, which is what makes crash recovery exact.

mod backend;
mod error;
mod memory;
mod store;

#[cfg(any(test, feature = "test-utils"))]
pub use backend::MockIndexingBackend;
pub use backend::{FlushOp, IndexingBackend, RowWrite};
pub use error::IndexingStoreError;
pub use memory::InMemoryIndexingBackend;
pub use store::{IndexingStore, OnConflict};
