use tracery_aggregator::ChainEvent;
use tracery_primitives::{BlockRef, Checkpoint};
use tracery_rpc::EthClient;
use tracery_sync_store::SyncStore;
use tracing::{debug, error, info, warn};

use crate::{
    ctx::RealtimeCtx,
    error::{RealtimeError, Result},
    extract::{discover_children, extract_block},
    finalize::finalize_ready_prefix,
    reorg::handle_reorg,
    state::RealtimeState,
};

/// Tip-following loop for one chain.
///
/// Consumes new-head announcements, extends the unfinalized buffer, and
/// hands reorg/finalize transitions to their handlers. Recoverable errors
/// are logged and the loop waits for the next head; fatal errors panic so
/// the supervisor shuts the run down.
pub(crate) async fn realtime_task<C, S>(mut state: RealtimeState, mut ctx: RealtimeCtx<C, S>)
where
    C: EthClient + ?Sized,
    S: SyncStore + ?Sized,
{
    let mut heads = match ctx.client.subscribe_new_heads().await {
        Ok(heads) => heads,
        Err(error) => {
            error!(chain = %ctx.chain.name, %error, "failed to subscribe to new heads");
            return;
        }
    };

    info!(
        chain = %ctx.chain.name,
        current = %state.progress.current,
        "realtime sync started"
    );

    loop {
        let head = tokio::select! {
            biased;
            changed = ctx.shutdown_rx.changed() => {
                if changed.is_err() || *ctx.shutdown_rx.borrow() {
                    debug!(chain = %ctx.chain.name, "realtime sync cancelled");
                    return;
                }
                continue;
            }
            head = heads.recv() => match head {
                Some(head) => head,
                None => {
                    warn!(chain = %ctx.chain.name, "head subscription closed");
                    return;
                }
            },
        };

        match handle_head(head, &mut state, &ctx).await {
            Ok(true) => {
                info!(chain = %ctx.chain.name, "bounded range complete; realtime sync ended");
                return;
            }
            Ok(false) => {}
            Err(error) if error.is_fatal() => {
                if matches!(error, RealtimeError::ChannelClosed) {
                    debug!(chain = %ctx.chain.name, "downstream closed; realtime sync ending");
                    return;
                }
                panic!("{}", error.fatal_message());
            }
            Err(error) => {
                error!(chain = %ctx.chain.name, %error, "recoverable error in realtime sync");
            }
        }
    }
}

/// Processes one head announcement. Returns `true` once the bounded range is
/// complete.
pub(crate) async fn handle_head<C, S>(
    head: BlockRef,
    state: &mut RealtimeState,
    ctx: &RealtimeCtx<C, S>,
) -> Result<bool>
where
    C: EthClient + ?Sized,
    S: SyncStore + ?Sized,
{
    let current = state.progress.current;

    // Stale or duplicate announcement.
    if head.number <= current.number {
        if head.number <= state.buffer.base().number {
            debug!(chain = %ctx.chain.name, %head, "head below finalized anchor ignored");
            return Ok(false);
        }
        if state.buffer.ref_at(head.number).map(|known| known.hash) == Some(head.hash) {
            debug!(chain = %ctx.chain.name, %head, "duplicate head ignored");
            return Ok(false);
        }
        // Same-height sibling: the chain replaced a block we accepted.
        return handle_reorg(head, state, ctx).await;
    }

    if head.parent_hash == current.hash && head.number == current.number + 1 {
        accept_block(head, state, ctx).await?;
    } else if head.number == current.number + 1 {
        // Parent mismatch at the next height.
        return handle_reorg(head, state, ctx).await;
    } else {
        // Gap: fill from current+1 upward; a mismatch on the way degrades
        // into reorg handling.
        for number in current.number + 1..=head.number {
            let fetched = ctx.client.get_block_by_number(number, false).await?;
            let fetched_ref = fetched.block.block_ref();
            if fetched_ref.parent_hash == state.progress.current.hash {
                accept_block(fetched_ref, state, ctx).await?;
            } else {
                return handle_reorg(fetched_ref, state, ctx).await;
            }
        }
    }

    finalize_ready_prefix(state, ctx).await?;

    ctx.notify_progress(&state.progress);
    Ok(state.progress.is_ended())
}

/// Extends the chain by one accepted block: extract, discover children,
/// buffer, emit.
pub(crate) async fn accept_block<C, S>(
    block_ref: BlockRef,
    state: &mut RealtimeState,
    ctx: &RealtimeCtx<C, S>,
) -> Result<()>
where
    C: EthClient + ?Sized,
    S: SyncStore + ?Sized,
{
    let extracted = extract_block(ctx.client.as_ref(), block_ref, ctx.fetch).await?;

    // New factory children become visible to matching in this same block.
    let factories: Vec<_> = state
        .builder
        .sources()
        .iter()
        .filter_map(|source| source.filter.factory().cloned())
        .collect();
    for (factory, child, first_seen) in discover_children(&extracted, factories.iter()) {
        state
            .children
            .entry(factory)
            .or_default()
            .insert(child, first_seen);
    }

    let events = state.builder.build(&extracted, &state.children);
    let has_matched = !events.is_empty();

    if !state.buffer.push(extracted) {
        return Err(RealtimeError::BrokenParentLink {
            number: block_ref.number,
        });
    }
    state.progress.advance(block_ref);

    debug!(
        chain = %ctx.chain.name,
        block = %block_ref,
        events = events.len(),
        %has_matched,
        "accepted block"
    );

    ctx.emit(ChainEvent::Block {
        events,
        cursor: Checkpoint::at_block_end(block_ref.timestamp, ctx.chain.id, block_ref.number),
    })
    .await
}
