use std::collections::{BTreeMap, HashMap};

use tracery_events::Event;
use tracery_primitives::{ChainId, Checkpoint};
use tracing::{debug, warn};

/// Cross-chain ordering policy, fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// One global order by checkpoint across all chains.
    Omnichain,
    /// Per-chain order only; chains flow independently.
    Multichain,
}

/// Signal from one chain's sync (historical or realtime).
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A fully-extracted block's events, plus the chain cursor after it.
    Block {
        events: Vec<Event>,
        cursor: Checkpoint,
    },
    /// The chain reorged; everything past `safe` is invalid.
    Reorg {
        safe: Checkpoint,
        /// Block numbers that were discarded.
        reorged_blocks: Vec<u64>,
    },
    /// Everything at or below `checkpoint` is immutable.
    Finalize { checkpoint: Checkpoint },
}

/// Output of the merger, consumed by the dispatcher.
#[derive(Debug, Clone)]
pub enum MergedEvent {
    Event(Box<Event>),
    Reorg {
        chain_id: ChainId,
        safe: Checkpoint,
        reorged_blocks: Vec<u64>,
    },
    Finalize {
        chain_id: ChainId,
        checkpoint: Checkpoint,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct ChainCursor {
    current: Checkpoint,
    finalized: Checkpoint,
}

/// Pure merge core: buffers pending events, tracks per-chain cursors,
/// releases events according to the ordering policy, and rolls bookkeeping
/// back on reorg.
#[derive(Debug)]
pub struct EventMerger {
    policy: OrderingPolicy,
    cursors: HashMap<ChainId, ChainCursor>,
    /// Buffered events not yet released, keyed for deterministic order.
    /// The callback index disambiguates distinct callbacks on one item.
    pending: BTreeMap<(Checkpoint, usize), Event>,
    /// Released but not yet finalized events, in release order.
    executed: Vec<Event>,
    /// Finalize signals waiting until every earlier event of their chain
    /// has been released.
    deferred_finalizes: Vec<(ChainId, Checkpoint)>,
    /// Checkpoint of the most recently released event.
    last_released: Checkpoint,
}

impl EventMerger {
    /// `chains` must list every chain that will send signals; a chain with
    /// no registered cursor would stall omnichain release.
    pub fn new(policy: OrderingPolicy, chains: &[ChainId]) -> Self {
        let cursors = chains
            .iter()
            .map(|&chain_id| (chain_id, ChainCursor::default()))
            .collect();
        Self {
            policy,
            cursors,
            pending: BTreeMap::new(),
            executed: Vec::new(),
            deferred_finalizes: Vec::new(),
            last_released: Checkpoint::ZERO,
        }
    }

    /// Number of buffered (unreleased) events.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of released-but-unfinalized events.
    pub fn executed_len(&self) -> usize {
        self.executed.len()
    }

    /// Checkpoint of the most recently released event.
    pub fn last_released(&self) -> Checkpoint {
        self.last_released
    }

    /// Feeds one chain signal, returning everything now releasable.
    pub fn on_chain_event(&mut self, chain_id: ChainId, event: ChainEvent) -> Vec<MergedEvent> {
        match event {
            ChainEvent::Block { events, cursor } => self.on_block(chain_id, events, cursor),
            ChainEvent::Reorg {
                safe,
                reorged_blocks,
            } => self.on_reorg(chain_id, safe, reorged_blocks),
            ChainEvent::Finalize { checkpoint } => self.on_finalize(chain_id, checkpoint),
        }
    }

    fn on_block(
        &mut self,
        chain_id: ChainId,
        events: Vec<Event>,
        cursor: Checkpoint,
    ) -> Vec<MergedEvent> {
        for event in events {
            debug_assert_eq!(event.chain_id, chain_id);
            self.pending
                .insert((event.checkpoint, event.callback_index), event);
        }

        let Some(chain) = self.cursors.get_mut(&chain_id) else {
            warn!(%chain_id, "signal from unregistered chain dropped");
            return Vec::new();
        };
        chain.current = chain.current.max(cursor);

        let mut output = self.release();
        output.extend(self.emit_ready_finalizes());
        output
    }

    /// Emits deferred finalize signals whose chain has no earlier event
    /// still pending. A finalize must never outrun the events it covers.
    fn emit_ready_finalizes(&mut self) -> Vec<MergedEvent> {
        let pending = &self.pending;
        let mut ready = Vec::new();
        self.deferred_finalizes.retain(|&(chain_id, checkpoint)| {
            let blocked = pending
                .values()
                .any(|event| event.chain_id == chain_id && event.checkpoint <= checkpoint);
            if blocked {
                true
            } else {
                ready.push(MergedEvent::Finalize {
                    chain_id,
                    checkpoint,
                });
                false
            }
        });
        ready
    }

    /// Releases pending events allowed by the policy, in checkpoint order.
    fn release(&mut self) -> Vec<MergedEvent> {
        let released: Vec<Event> = match self.policy {
            OrderingPolicy::Omnichain => {
                let Some(global) = self.global_cursor() else {
                    return Vec::new();
                };
                let eligible: Vec<(Checkpoint, usize)> = self
                    .pending
                    .range(..(global, usize::MAX))
                    .map(|(&key, _)| key)
                    .collect();
                eligible
                    .into_iter()
                    .filter_map(|key| self.pending.remove(&key))
                    .collect()
            }
            OrderingPolicy::Multichain => {
                let eligible: Vec<(Checkpoint, usize)> = self
                    .pending
                    .iter()
                    .filter(|(_, event)| {
                        self.cursors
                            .get(&event.chain_id)
                            .is_some_and(|chain| event.checkpoint <= chain.current)
                    })
                    .map(|(&key, _)| key)
                    .collect();
                eligible
                    .into_iter()
                    .filter_map(|key| self.pending.remove(&key))
                    .collect()
            }
        };

        let mut output = Vec::with_capacity(released.len());
        for event in released {
            self.last_released = self.last_released.max(event.checkpoint);
            self.executed.push(event.clone());
            output.push(MergedEvent::Event(Box::new(event)));
        }
        output
    }

    /// The omnichain release bound: the least advanced chain cursor.
    fn global_cursor(&self) -> Option<Checkpoint> {
        self.cursors.values().map(|chain| chain.current).min()
    }

    fn on_reorg(
        &mut self,
        chain_id: ChainId,
        safe: Checkpoint,
        reorged_blocks: Vec<u64>,
    ) -> Vec<MergedEvent> {
        // 1. Move executed events past the safe checkpoint back to pending.
        let mut kept = Vec::with_capacity(self.executed.len());
        for event in self.executed.drain(..) {
            if event.chain_id == chain_id && event.checkpoint > safe {
                self.pending
                    .insert((event.checkpoint, event.callback_index), event);
            } else {
                kept.push(event);
            }
        }
        self.executed = kept;

        // 2. Purge pending events from the discarded blocks.
        let reorged_floor = reorged_blocks.iter().copied().min();
        if let Some(floor) = reorged_floor {
            self.pending.retain(|_, event| {
                event.chain_id != chain_id || event.checkpoint.block_number < floor
            });
        }

        // 3. Reset the chain cursor.
        if let Some(chain) = self.cursors.get_mut(&chain_id) {
            chain.current = chain.current.min(safe);
        }

        debug!(
            %chain_id,
            pending = self.pending.len(),
            executed = self.executed.len(),
            "merger rolled back for reorg"
        );

        vec![MergedEvent::Reorg {
            chain_id,
            safe,
            reorged_blocks,
        }]
    }

    fn on_finalize(&mut self, chain_id: ChainId, checkpoint: Checkpoint) -> Vec<MergedEvent> {
        if let Some(chain) = self.cursors.get_mut(&chain_id) {
            chain.finalized = chain.finalized.max(checkpoint);
        }

        // Finalized events can never be rolled back; drop them from the
        // executed list.
        let bound = match self.policy {
            OrderingPolicy::Omnichain => self
                .cursors
                .values()
                .map(|chain| chain.finalized)
                .min()
                .unwrap_or(Checkpoint::ZERO),
            OrderingPolicy::Multichain => checkpoint,
        };
        self.executed.retain(|event| match self.policy {
            OrderingPolicy::Omnichain => event.checkpoint > bound,
            OrderingPolicy::Multichain => {
                event.chain_id != chain_id || event.checkpoint > bound
            }
        });

        self.deferred_finalizes.push((chain_id, checkpoint));
        self.emit_ready_finalizes()
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;
    use tracery_events::EventKind;
    use tracery_primitives::{BlockRef, EventTypeTag};

    use super::*;

    fn make_event(chain_id: ChainId, timestamp: u64, block_number: u64) -> Event {
        Event {
            chain_id,
            checkpoint: Checkpoint {
                block_timestamp: timestamp,
                chain_id,
                block_number,
                event_type: EventTypeTag::Log,
                transaction_index: 0,
                event_index: 0,
            },
            callback_index: 0,
            block: BlockRef::new(B256::ZERO, B256::ZERO, block_number, timestamp),
            kind: EventKind::DecodeError {
                source: EventTypeTag::Log,
                message: "fixture".to_string(),
            },
        }
    }

    fn cursor_at(chain_id: ChainId, timestamp: u64, block_number: u64) -> Checkpoint {
        Checkpoint::at_block_end(timestamp, chain_id, block_number)
    }

    fn released_checkpoints(output: &[MergedEvent]) -> Vec<u64> {
        output
            .iter()
            .filter_map(|merged| match merged {
                MergedEvent::Event(event) => Some(event.checkpoint.block_timestamp),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_omnichain_holds_until_all_chains_advance() {
        let mut merger = EventMerger::new(OrderingPolicy::Omnichain, &[1, 2]);

        // Chain 1 produces events at ts 10 and 30; chain 2 has not advanced.
        let output = merger.on_chain_event(
            1,
            ChainEvent::Block {
                events: vec![make_event(1, 10, 1), make_event(1, 30, 3)],
                cursor: cursor_at(1, 30, 3),
            },
        );
        assert!(released_checkpoints(&output).is_empty());
        assert_eq!(merger.pending_len(), 2);
    }

    #[test]
    fn test_omnichain_merge_order() {
        // Chain 1 events at ts {10, 30}; chain 2 at {20, 40}. After both
        // advance past 40, the global order is 10, 20, 30, 40.
        let mut merger = EventMerger::new(OrderingPolicy::Omnichain, &[1, 2]);

        merger.on_chain_event(
            1,
            ChainEvent::Block {
                events: vec![make_event(1, 10, 1), make_event(1, 30, 3)],
                cursor: cursor_at(1, 30, 3),
            },
        );
        let output = merger.on_chain_event(
            2,
            ChainEvent::Block {
                events: vec![make_event(2, 20, 2), make_event(2, 40, 4)],
                cursor: cursor_at(2, 40, 4),
            },
        );

        // Global cursor = min(30-end, 40-end): events up to chain 1's cursor.
        assert_eq!(released_checkpoints(&output), vec![10, 20, 30]);

        let output = merger.on_chain_event(
            1,
            ChainEvent::Block {
                events: vec![],
                cursor: cursor_at(1, 50, 5),
            },
        );
        assert_eq!(released_checkpoints(&output), vec![40]);
    }

    #[test]
    fn test_omnichain_output_is_globally_monotonic() {
        let mut merger = EventMerger::new(OrderingPolicy::Omnichain, &[1, 2]);
        let mut all_released = Vec::new();

        for (chain_id, timestamp, block) in
            [(1, 10, 1), (2, 5, 1), (1, 20, 2), (2, 25, 2), (1, 40, 4), (2, 35, 3)]
        {
            let output = merger.on_chain_event(
                chain_id,
                ChainEvent::Block {
                    events: vec![make_event(chain_id, timestamp, block)],
                    cursor: cursor_at(chain_id, timestamp, block),
                },
            );
            all_released.extend(released_checkpoints(&output));
        }

        for window in all_released.windows(2) {
            assert!(window[0] < window[1], "released out of order: {all_released:?}");
        }
        assert_eq!(
            merger.last_released().block_timestamp,
            *all_released.last().unwrap()
        );
    }

    #[test]
    fn test_multichain_releases_immediately() {
        let mut merger = EventMerger::new(OrderingPolicy::Multichain, &[1, 2]);

        let output = merger.on_chain_event(
            1,
            ChainEvent::Block {
                events: vec![make_event(1, 10, 1)],
                cursor: cursor_at(1, 10, 1),
            },
        );
        // No waiting on chain 2.
        assert_eq!(released_checkpoints(&output), vec![10]);
    }

    #[test]
    fn test_reorg_purges_executed_and_pending() {
        let mut merger = EventMerger::new(OrderingPolicy::Multichain, &[1]);

        for block in [9, 10] {
            merger.on_chain_event(
                1,
                ChainEvent::Block {
                    events: vec![make_event(1, block * 10, block)],
                    cursor: cursor_at(1, block * 10, block),
                },
            );
        }
        assert_eq!(merger.executed_len(), 2);

        // Reorg back to block 8: blocks 9 and 10 discarded.
        let output = merger.on_chain_event(
            1,
            ChainEvent::Reorg {
                safe: cursor_at(1, 80, 8),
                reorged_blocks: vec![9, 10],
            },
        );

        assert!(matches!(output[0], MergedEvent::Reorg { .. }));
        // No event with blockNumber > 8 remains anywhere.
        assert_eq!(merger.executed_len(), 0);
        assert_eq!(merger.pending_len(), 0);
    }

    #[test]
    fn test_reorg_leaves_other_chains_alone() {
        let mut merger = EventMerger::new(OrderingPolicy::Multichain, &[1, 2]);

        merger.on_chain_event(
            2,
            ChainEvent::Block {
                events: vec![make_event(2, 100, 10)],
                cursor: cursor_at(2, 100, 10),
            },
        );
        assert_eq!(merger.executed_len(), 1);

        merger.on_chain_event(
            1,
            ChainEvent::Reorg {
                safe: cursor_at(1, 10, 1),
                reorged_blocks: vec![2, 3],
            },
        );
        // Chain 2's executed event untouched.
        assert_eq!(merger.executed_len(), 1);
    }

    #[test]
    fn test_finalize_prunes_executed() {
        let mut merger = EventMerger::new(OrderingPolicy::Multichain, &[1]);

        for block in [1, 2, 3] {
            merger.on_chain_event(
                1,
                ChainEvent::Block {
                    events: vec![make_event(1, block * 10, block)],
                    cursor: cursor_at(1, block * 10, block),
                },
            );
        }
        assert_eq!(merger.executed_len(), 3);

        let output = merger.on_chain_event(
            1,
            ChainEvent::Finalize {
                checkpoint: cursor_at(1, 20, 2),
            },
        );
        assert!(matches!(output[0], MergedEvent::Finalize { .. }));
        // Events at blocks 1 and 2 are beyond rollback; only block 3 remains.
        assert_eq!(merger.executed_len(), 1);
    }

    #[test]
    fn test_finalize_deferred_until_covered_events_release() {
        // Omnichain: chain 1's event at ts 10 is held because chain 2 has
        // not advanced; chain 1's finalize covering it must wait too.
        let mut merger = EventMerger::new(OrderingPolicy::Omnichain, &[1, 2]);

        let output = merger.on_chain_event(
            1,
            ChainEvent::Block {
                events: vec![make_event(1, 10, 1)],
                cursor: cursor_at(1, 10, 1),
            },
        );
        assert!(released_checkpoints(&output).is_empty());

        let output = merger.on_chain_event(
            1,
            ChainEvent::Finalize {
                checkpoint: cursor_at(1, 10, 1),
            },
        );
        assert!(output.is_empty(), "finalize must not outrun its events");

        // Chain 2 advances; the event releases and the finalize follows it.
        let output = merger.on_chain_event(
            2,
            ChainEvent::Block {
                events: vec![],
                cursor: cursor_at(2, 20, 2),
            },
        );
        assert!(matches!(output[0], MergedEvent::Event(_)));
        assert!(matches!(output[1], MergedEvent::Finalize { chain_id: 1, .. }));
    }

    #[test]
    fn test_omnichain_finalize_waits_for_all_chains() {
        let mut merger = EventMerger::new(OrderingPolicy::Omnichain, &[1, 2]);

        merger.on_chain_event(
            1,
            ChainEvent::Block {
                events: vec![make_event(1, 10, 1)],
                cursor: cursor_at(1, 10, 1),
            },
        );
        merger.on_chain_event(
            2,
            ChainEvent::Block {
                events: vec![make_event(2, 20, 2)],
                cursor: cursor_at(2, 20, 2),
            },
        );
        // Push chain 1's cursor past chain 2's event so both release.
        merger.on_chain_event(
            1,
            ChainEvent::Block {
                events: vec![],
                cursor: cursor_at(1, 30, 3),
            },
        );
        assert_eq!(merger.executed_len(), 2);

        // Only chain 1 finalizes; chain 2's finalized cursor is still zero,
        // so nothing can be pruned globally.
        merger.on_chain_event(
            1,
            ChainEvent::Finalize {
                checkpoint: cursor_at(1, 30, 3),
            },
        );
        assert_eq!(merger.executed_len(), 2);

        merger.on_chain_event(
            2,
            ChainEvent::Finalize {
                checkpoint: cursor_at(2, 20, 2),
            },
        );
        assert_eq!(merger.executed_len(), 0);
    }
}
