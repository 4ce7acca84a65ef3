use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed block-number range `[from, to]` with `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockInterval {
    pub from: u64,
    pub to: u64,
}

impl BlockInterval {
    pub fn new(from: u64, to: u64) -> Self {
        debug_assert!(from <= to, "interval bounds inverted: [{from}, {to}]");
        Self { from, to }
    }

    /// Number of blocks covered, inclusive of both ends.
    pub fn block_count(&self) -> u64 {
        self.to - self.from + 1
    }

    pub fn contains(&self, number: u64) -> bool {
        self.from <= number && number <= self.to
    }

    fn overlaps(&self, other: &BlockInterval) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    fn touches_or_overlaps(&self, other: &BlockInterval) -> bool {
        // Saturating: [0, n] touches nothing below it.
        self.from <= other.to.saturating_add(1) && other.from <= self.to.saturating_add(1)
    }

    fn intersect(&self, other: &BlockInterval) -> Option<BlockInterval> {
        if self.overlaps(other) {
            Some(BlockInterval::new(
                self.from.max(other.from),
                self.to.min(other.to),
            ))
        } else {
            None
        }
    }
}

impl fmt::Display for BlockInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// A set of block intervals, maintained sorted and pairwise disjoint.
///
/// Touching intervals such as `[1, 3]` and `[4, 6]` may coexist (chunked
/// fetch plans produce them); `union` and `insert` merge them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSet(Vec<BlockInterval>);

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(from: u64, to: u64) -> Self {
        Self(vec![BlockInterval::new(from, to)])
    }

    /// Builds a set from arbitrary intervals, sorting and merging overlaps.
    /// Touching inputs are preserved as separate intervals.
    pub fn from_intervals(mut intervals: Vec<BlockInterval>) -> Self {
        intervals.sort();
        let mut result: Vec<BlockInterval> = Vec::with_capacity(intervals.len());
        for interval in intervals {
            match result.last_mut() {
                Some(last) if last.overlaps(&interval) => last.to = last.to.max(interval.to),
                _ => result.push(interval),
            }
        }
        Self(result)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockInterval> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[BlockInterval] {
        &self.0
    }

    pub fn contains(&self, number: u64) -> bool {
        self.0.iter().any(|interval| interval.contains(number))
    }

    /// Inserts one interval, merging any overlapping or touching neighbours.
    pub fn insert(&mut self, interval: BlockInterval) {
        let mut merged = interval;
        let mut result = Vec::with_capacity(self.0.len() + 1);
        let mut placed = false;

        for existing in self.0.drain(..) {
            if existing.touches_or_overlaps(&merged) {
                merged.from = merged.from.min(existing.from);
                merged.to = merged.to.max(existing.to);
            } else if existing.to < merged.from {
                result.push(existing);
            } else {
                if !placed {
                    result.push(merged);
                    placed = true;
                }
                result.push(existing);
            }
        }
        if !placed {
            result.push(merged);
        }

        self.0 = result;
    }

    /// Union of two sets, merging overlapping and touching intervals.
    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        let mut result = self.clone();
        for interval in &other.0 {
            result.insert(*interval);
        }
        // A single-set union also normalizes: merge touching intervals that
        // from_intervals kept separate.
        let mut normalized = IntervalSet::new();
        for interval in result.0 {
            normalized.insert(interval);
        }
        normalized
    }

    /// Blocks in `self` that are not in `other`.
    pub fn difference(&self, other: &IntervalSet) -> IntervalSet {
        let mut result = Vec::new();

        for interval in &self.0 {
            let mut cursor = interval.from;
            for sub in other.0.iter().filter(|sub| sub.overlaps(interval)) {
                if sub.from > cursor {
                    result.push(BlockInterval::new(cursor, sub.from - 1));
                }
                cursor = cursor.max(sub.to.saturating_add(1));
                if cursor > interval.to {
                    break;
                }
            }
            if cursor <= interval.to {
                result.push(BlockInterval::new(cursor, interval.to));
            }
        }

        IntervalSet(result)
    }

    /// Blocks present in both sets.
    pub fn intersection(&self, other: &IntervalSet) -> IntervalSet {
        let mut result = Vec::new();
        for a in &self.0 {
            for b in other.0.iter().filter(|b| b.overlaps(a)) {
                if let Some(common) = a.intersect(b) {
                    result.push(common);
                }
            }
        }
        IntervalSet(result)
    }

    /// Total number of blocks covered.
    pub fn sum(&self) -> u64 {
        self.0.iter().map(BlockInterval::block_count).sum()
    }

    /// Smallest `from` and largest `to`, when non-empty.
    pub fn bounds(&self) -> Option<BlockInterval> {
        match (self.0.first(), self.0.last()) {
            (Some(first), Some(last)) => Some(BlockInterval::new(first.from, last.to)),
            _ => None,
        }
    }

    /// Splits every interval into consecutive chunks of at most
    /// `max_chunk_size` blocks, low to high.
    pub fn chunk(&self, max_chunk_size: u64) -> Vec<BlockInterval> {
        debug_assert!(max_chunk_size > 0);
        let mut chunks = Vec::new();
        for interval in &self.0 {
            let mut cursor = interval.from;
            while cursor <= interval.to {
                let chunk_end = interval.to.min(cursor + max_chunk_size - 1);
                chunks.push(BlockInterval::new(cursor, chunk_end));
                if chunk_end == u64::MAX {
                    break;
                }
                cursor = chunk_end + 1;
            }
        }
        chunks
    }
}

impl FromIterator<BlockInterval> for IntervalSet {
    fn from_iter<I: IntoIterator<Item = BlockInterval>>(iter: I) -> Self {
        Self::from_intervals(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn set(intervals: &[(u64, u64)]) -> IntervalSet {
        IntervalSet::from_intervals(
            intervals
                .iter()
                .map(|&(from, to)| BlockInterval::new(from, to))
                .collect(),
        )
    }

    #[test]
    fn test_union_merges_overlapping_and_touching() {
        let a = set(&[(1, 3), (10, 12)]);
        let b = set(&[(4, 6), (11, 15)]);
        assert_eq!(a.union(&b), set(&[(1, 6), (10, 15)]));
    }

    #[test]
    fn test_union_keeps_gaps() {
        let a = set(&[(1, 3)]);
        let b = set(&[(5, 6)]);
        assert_eq!(a.union(&b), set(&[(1, 3), (5, 6)]));
    }

    #[test]
    fn test_difference_splits_interval() {
        let a = set(&[(1, 10)]);
        let b = set(&[(4, 6)]);
        assert_eq!(a.difference(&b), set(&[(1, 3), (7, 10)]));
    }

    #[test]
    fn test_difference_disjoint_is_identity() {
        let a = set(&[(1, 5)]);
        let b = set(&[(10, 20)]);
        assert_eq!(a.difference(&b), a);
    }

    #[test]
    fn test_difference_fully_covered_is_empty() {
        let a = set(&[(5, 8)]);
        let b = set(&[(1, 20)]);
        assert!(a.difference(&b).is_empty());
    }

    #[test]
    fn test_difference_multiple_holes() {
        let a = set(&[(1, 20)]);
        let b = set(&[(3, 4), (8, 10), (20, 25)]);
        assert_eq!(a.difference(&b), set(&[(1, 2), (5, 7), (11, 19)]));
    }

    #[test]
    fn test_intersection() {
        let a = set(&[(1, 10), (20, 30)]);
        let b = set(&[(5, 25)]);
        assert_eq!(a.intersection(&b), set(&[(5, 10), (20, 25)]));
    }

    #[test]
    fn test_sum() {
        assert_eq!(set(&[(1, 3), (10, 10)]).sum(), 4);
        assert_eq!(IntervalSet::new().sum(), 0);
    }

    #[test]
    fn test_bounds() {
        assert_eq!(
            set(&[(3, 5), (10, 12)]).bounds(),
            Some(BlockInterval::new(3, 12))
        );
        assert_eq!(IntervalSet::new().bounds(), None);
    }

    #[test]
    fn test_chunk_boundaries_are_deterministic() {
        let chunks = set(&[(100, 350)]).chunk(100);
        assert_eq!(
            chunks,
            vec![
                BlockInterval::new(100, 199),
                BlockInterval::new(200, 299),
                BlockInterval::new(300, 350),
            ]
        );
    }

    #[test]
    fn test_chunk_smaller_than_chunk_size() {
        let chunks = set(&[(5, 7)]).chunk(100);
        assert_eq!(chunks, vec![BlockInterval::new(5, 7)]);
    }

    #[test]
    fn test_insert_merges_touching() {
        let mut cached = set(&[(1, 5)]);
        cached.insert(BlockInterval::new(6, 9));
        assert_eq!(cached, set(&[(1, 9)]));
    }

    #[test]
    fn test_insert_bridges_neighbours() {
        let mut cached = set(&[(1, 3), (7, 9)]);
        cached.insert(BlockInterval::new(4, 6));
        assert_eq!(cached, set(&[(1, 9)]));
    }

    #[test]
    fn test_insert_keeps_disjoint() {
        let mut cached = set(&[(1, 3)]);
        cached.insert(BlockInterval::new(10, 12));
        assert_eq!(cached, set(&[(1, 3), (10, 12)]));
    }

    #[test]
    fn test_contains() {
        let cached = set(&[(1, 3), (10, 12)]);
        assert!(cached.contains(2));
        assert!(cached.contains(10));
        assert!(!cached.contains(5));
    }

    proptest! {
        // union(chunk(S, C)) == normalized S, for any set and chunk size
        #[test]
        fn prop_chunk_union_round_trip(
            raw in prop::collection::vec((0u64..5_000, 0u64..100), 0..12),
            chunk_size in 1u64..500,
        ) {
            let intervals: Vec<BlockInterval> = raw
                .into_iter()
                .map(|(from, len)| BlockInterval::new(from, from + len))
                .collect();
            let original = IntervalSet::from_intervals(intervals);

            let chunks = original.chunk(chunk_size);
            let reassembled = IntervalSet::from_intervals(chunks).union(&IntervalSet::new());

            prop_assert_eq!(reassembled, original.union(&IntervalSet::new()));
        }

        #[test]
        fn prop_difference_then_union_restores(
            from in 0u64..1_000,
            len in 0u64..500,
            hole_from in 0u64..1_500,
            hole_len in 0u64..100,
        ) {
            let total = IntervalSet::single(from, from + len);
            let hole = IntervalSet::single(hole_from, hole_from + hole_len);

            let remaining = total.difference(&hole);
            let restored = remaining.union(&total.intersection(&hole));

            prop_assert_eq!(restored, total.union(&IntervalSet::new()));
        }

        #[test]
        fn prop_difference_and_intersection_partition_sum(
            from in 0u64..1_000,
            len in 0u64..500,
            other_from in 0u64..1_500,
            other_len in 0u64..500,
        ) {
            let a = IntervalSet::single(from, from + len);
            let b = IntervalSet::single(other_from, other_from + other_len);

            prop_assert_eq!(
                a.difference(&b).sum() + a.intersection(&b).sum(),
                a.sum()
            );
        }
    }
}
