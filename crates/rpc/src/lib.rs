//! The RPC seam: a capability trait for everything the engine asks of a
//! chain node, plus the error taxonomy and throttling that sit in front of
//! real transports.
//!
//! Actual wire plumbing lives outside the engine; syncs are written against
//! [`EthClient`] and tested against its mock.

mod client;
mod error;
mod queue;
mod range_policy;

pub use client::{BlockWithTransactions, CallRequest, EthClient, LogQuery, TraceQuery};
#[cfg(any(test, feature = "test-utils"))]
pub use client::MockEthClient;
pub use error::RpcError;
pub use queue::{RequestQueue, ThrottledClient};
pub use range_policy::{parse_suggested_range, plan_range_split};
