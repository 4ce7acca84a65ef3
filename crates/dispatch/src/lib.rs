//! Sequential event dispatch to user callbacks, and crash recovery.
//!
//! The dispatcher is the single consumer of the merged event stream:
//! strictly one callback at a time, each given a context with the chain, a
//! block-pinned read-only client, and the indexing store handle. Flushes are
//! driven by cache pressure, finalize signals, and shutdown, and each flush
//! commits the checkpoint in the same transaction, which is what makes
//! redelivery after a crash exact rather than approximate.

mod client;
mod context;
mod dispatcher;
mod error;
mod recovery;

pub use client::ReadOnlyClient;
pub use context::{EventHandler, IndexingContext};
pub use dispatcher::{DispatchMetrics, Dispatcher, RetryPolicy};
pub use error::{DispatchError, HandlerError, UserErrorReport};
pub use recovery::{recovery_point, RecoveryError, RecoveryPoint};
