//! Closed integer interval sets over block numbers.
//!
//! The historical sync plans fetches as set arithmetic over cached block
//! ranges, so these operations are the substrate of everything the backfill
//! does. Sets are kept sorted and pairwise disjoint; [`IntervalSet::union`]
//! and [`IntervalSet::insert`] additionally merge touching neighbours.

mod set;

pub use set::{BlockInterval, IntervalSet};
