use std::collections::VecDeque;

use tracery_events::ExtractedBlock;
use tracery_primitives::BlockRef;

/// Ordered, parent-linked sequence of fully-extracted blocks above the last
/// finalized block.
///
/// `base` is the finalized anchor: the buffer's first block extends it, and
/// truncation never removes it. Finalization drains from the head and moves
/// the base forward; reorgs truncate from the tail.
#[derive(Debug)]
pub struct UnfinalizedBlockBuffer {
    base: BlockRef,
    blocks: VecDeque<ExtractedBlock>,
}

impl UnfinalizedBlockBuffer {
    pub fn new(base: BlockRef) -> Self {
        Self {
            base,
            blocks: VecDeque::new(),
        }
    }

    pub fn base(&self) -> BlockRef {
        self.base
    }

    /// Light ref of the newest block (the base when empty).
    pub fn tip(&self) -> BlockRef {
        self.blocks
            .back()
            .map(|extracted| extracted.block.block_ref())
            .unwrap_or(self.base)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Appends a block that must directly extend the current tip.
    pub fn push(&mut self, extracted: ExtractedBlock) -> bool {
        if self.tip().is_parent_of(&extracted.block.block_ref()) {
            self.blocks.push_back(extracted);
            true
        } else {
            false
        }
    }

    /// Light ref of the tracked block at `number`, including the base.
    pub fn ref_at(&self, number: u64) -> Option<BlockRef> {
        if number == self.base.number {
            return Some(self.base);
        }
        if number <= self.base.number {
            return None;
        }
        let offset = (number - self.base.number - 1) as usize;
        self.blocks
            .get(offset)
            .map(|extracted| extracted.block.block_ref())
    }

    /// Drops every block above `number`, returning them newest-last.
    pub fn truncate_to(&mut self, number: u64) -> Vec<ExtractedBlock> {
        let keep = number.saturating_sub(self.base.number) as usize;
        self.blocks.split_off(keep.min(self.blocks.len())).into()
    }

    /// Removes and returns the prefix with block number at or below
    /// `number`, advancing the base to the last removed block.
    pub fn drain_finalized(&mut self, number: u64) -> Vec<ExtractedBlock> {
        let mut drained = Vec::new();
        while let Some(front) = self.blocks.front() {
            if front.block.number > number {
                break;
            }
            let extracted = self
                .blocks
                .pop_front()
                .expect("front exists inside the loop");
            self.base = extracted.block.block_ref();
            drained.push(extracted);
        }
        drained
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtractedBlock> {
        self.blocks.iter()
    }
}
