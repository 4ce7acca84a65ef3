//! Canonical event filters, factory sub-filters, and their fragment
//! decomposition.
//!
//! A filter describes what a user wants indexed; a fragment is the minimal
//! slice of a filter that serves as a stable cache key in the sync store.
//! Two filters that decompose to the same fragment set cache-hit each other.

mod factory;
mod filter;
mod fragment;
mod matching;

pub use factory::{ChildAddresses, ChildLocation, Factory};
pub use filter::{
    AddressSpec, BlockFilter, Filter, LogFilter, TraceFilter, TransactionFilter, TransferFilter,
};
pub use fragment::{Fragment, FragmentAddress};
