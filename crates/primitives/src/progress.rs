use crate::BlockRef;

/// Per-chain view of sync position.
///
/// Invariants: `start.number <= current.number`, `finalized.number <=
/// current.number`, and `end`, when set, is at or above `start.number`. The
/// end bound is held as a bare number: when the user bounds the range, the
/// closing block usually does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    /// First block of the requested range.
    pub start: BlockRef,
    /// Most recently accepted block. Moves backward only on reorg.
    pub current: BlockRef,
    /// Highest block assumed immutable.
    pub finalized: BlockRef,
    /// Upper bound of the requested range, when the user bounded it.
    pub end: Option<u64>,
}

impl SyncProgress {
    pub fn new(start: BlockRef, current: BlockRef, finalized: BlockRef) -> Self {
        debug_assert!(start.number <= current.number);
        debug_assert!(finalized.number <= current.number);
        Self {
            start,
            current,
            finalized,
            end: None,
        }
    }

    pub fn with_end(mut self, end: u64) -> Self {
        debug_assert!(end >= self.start.number);
        self.end = Some(end);
        self
    }

    /// Accepts a new tip block. Never moves past `end`.
    pub fn advance(&mut self, block: BlockRef) {
        if let Some(end) = self.end {
            if block.number > end {
                return;
            }
        }
        self.current = block;
    }

    /// Resets the tip backward after a reorg to the common ancestor.
    pub fn reset_to(&mut self, ancestor: BlockRef) {
        debug_assert!(ancestor.number >= self.finalized.number);
        self.current = ancestor;
    }

    /// Raises the finalized mark.
    pub fn finalize_to(&mut self, block: BlockRef) {
        debug_assert!(block.number <= self.current.number);
        self.finalized = block;
    }

    /// The range is complete once the bounded end is both reached and
    /// finalized.
    pub fn is_ended(&self) -> bool {
        match self.end {
            Some(end) => self.current.number >= end && self.finalized.number >= end,
            None => false,
        }
    }
}
