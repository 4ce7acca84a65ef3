use std::collections::HashMap;

use tracery_events::EventBuilder;
use tracery_filters::{ChildAddresses, Factory};
use tracery_primitives::{BlockRef, SyncProgress};

use crate::UnfinalizedBlockBuffer;

/// Mutable state exclusively owned by the realtime task.
#[derive(Debug)]
pub struct RealtimeState {
    pub progress: SyncProgress,
    pub buffer: UnfinalizedBlockBuffer,
    /// Per-factory child addresses discovered so far. In-memory copy is
    /// authoritative until the containing blocks finalize.
    pub children: HashMap<Factory, ChildAddresses>,
    pub builder: EventBuilder,
}

impl RealtimeState {
    /// Starts from the handoff point: `progress.current` is the last block
    /// historical sync completed, which anchors the unfinalized buffer.
    pub fn new(
        progress: SyncProgress,
        builder: EventBuilder,
        children: HashMap<Factory, ChildAddresses>,
    ) -> Self {
        let anchor: BlockRef = progress.current;
        Self {
            progress,
            buffer: UnfinalizedBlockBuffer::new(anchor),
            children,
            builder,
        }
    }
}
