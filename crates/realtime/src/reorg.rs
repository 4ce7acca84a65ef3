//! Reorg handling: ancestor walk, buffer trim, cache prune, re-extension.

use tracery_aggregator::ChainEvent;
use tracery_primitives::{BlockRef, Checkpoint};
use tracery_rpc::EthClient;
use tracery_sync_store::SyncStore;
use tracing::{info, warn};

use crate::{
    ctx::RealtimeCtx,
    error::{RealtimeError, Result},
    state::RealtimeState,
    task::accept_block,
};

/// Walks backward from the divergent head until a block already in the
/// buffer matches, returning the common ancestor and the new-chain refs
/// above it (oldest first).
pub(crate) async fn find_common_ancestor<C: EthClient + ?Sized>(
    client: &C,
    state: &RealtimeState,
    head: BlockRef,
    chain_id: u64,
) -> Result<(BlockRef, Vec<BlockRef>)> {
    let floor = state.buffer.base().number;
    let mut new_chain = vec![head];
    let mut cursor = head;

    loop {
        let parent_number = match cursor.number.checked_sub(1) {
            Some(number) if number >= floor => number,
            // Walked below the finalized anchor without finding a match.
            _ => {
                return Err(RealtimeError::ReorgDeeperThanFinality { chain_id, floor });
            }
        };

        if let Some(known) = state.buffer.ref_at(parent_number) {
            if known.hash == cursor.parent_hash {
                new_chain.reverse();
                return Ok((known, new_chain));
            }
        }

        let parent = client.get_block_by_hash(cursor.parent_hash, false).await?;
        cursor = parent.block.block_ref();
        new_chain.push(cursor);
    }
}

/// Handles a detected divergence: trims local state back to the common
/// ancestor, prunes caches keyed at discarded heights, emits the reorg
/// signal, and re-extends along the new chain.
pub(crate) async fn handle_reorg<C, S>(
    head: BlockRef,
    state: &mut RealtimeState,
    ctx: &RealtimeCtx<C, S>,
) -> Result<bool>
where
    C: EthClient + ?Sized,
    S: SyncStore + ?Sized,
{
    warn!(chain = %ctx.chain.name, %head, "chain divergence detected");

    let (ancestor, new_chain) =
        find_common_ancestor(ctx.client.as_ref(), state, head, ctx.chain.id).await?;

    let removed = state.buffer.truncate_to(ancestor.number);
    let reorged_blocks: Vec<u64> = removed
        .iter()
        .map(|extracted| extracted.block.number)
        .collect();

    // Cached contract reads at discarded heights are no longer valid.
    ctx.store
        .prune_rpc_request_results(ctx.chain.id, &reorged_blocks)
        .await?;

    state.progress.reset_to(ancestor);

    info!(
        chain = %ctx.chain.name,
        ancestor = %ancestor,
        discarded = reorged_blocks.len(),
        rebuilt = new_chain.len(),
        "reorg: common ancestor found"
    );

    ctx.emit(ChainEvent::Reorg {
        safe: Checkpoint::at_block_end(ancestor.timestamp, ctx.chain.id, ancestor.number),
        reorged_blocks,
    })
    .await?;

    // Extend along the replacement chain. New factory children found here
    // re-enter the in-memory map; stale ones are only ever superseded by
    // earlier sightings, so no child cleanup is needed.
    for block_ref in new_chain {
        accept_block(block_ref, state, ctx).await?;
    }

    ctx.notify_progress(&state.progress);
    Ok(state.progress.is_ended())
}
