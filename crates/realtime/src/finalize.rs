//! Finality: batch-persisting the immutable prefix of the buffer.

use tracery_aggregator::ChainEvent;
use tracery_intervals::BlockInterval;
use tracery_primitives::Checkpoint;
use tracery_rpc::EthClient;
use tracery_sync_store::SyncStore;
use tracing::{debug, info};

use crate::{ctx::RealtimeCtx, error::Result, state::RealtimeState};

/// Moves the buffer prefix that has reached finality depth into the sync
/// store as one batch, marks the covered interval cached, and emits the
/// finalize signal.
pub(crate) async fn finalize_ready_prefix<C, S>(
    state: &mut RealtimeState,
    ctx: &RealtimeCtx<C, S>,
) -> Result<()>
where
    C: EthClient + ?Sized,
    S: SyncStore + ?Sized,
{
    let finality = ctx.chain.finality_block_count;
    let current = state.progress.current.number;
    let threshold = current.saturating_sub(finality);

    let Some(first_buffered) = state.buffer.iter().next().map(|b| b.block.number) else {
        return Ok(());
    };
    if current.saturating_sub(first_buffered) < finality {
        return Ok(());
    }

    let drained = state.buffer.drain_finalized(threshold);
    let Some(last) = drained.last() else {
        return Ok(());
    };
    let finalized_ref = last.block.block_ref();
    let from = drained
        .first()
        .map(|extracted| extracted.block.number)
        .unwrap_or(finalized_ref.number);

    persist_batch(state, ctx, &drained).await?;

    if !ctx.chain.disable_cache {
        let entries: Vec<_> = state
            .builder
            .sources()
            .iter()
            .map(|source| {
                (
                    source.filter.clone(),
                    BlockInterval::new(from, finalized_ref.number),
                )
            })
            .collect();
        ctx.store.insert_intervals(ctx.chain.id, &entries).await?;
    }

    state.progress.finalize_to(finalized_ref);

    info!(
        chain = %ctx.chain.name,
        finalized = %finalized_ref,
        batch = drained.len(),
        "finalized prefix persisted"
    );

    ctx.emit(ChainEvent::Finalize {
        checkpoint: Checkpoint::at_block_end(
            finalized_ref.timestamp,
            ctx.chain.id,
            finalized_ref.number,
        ),
    })
    .await
}

async fn persist_batch<C: ?Sized, S>(
    state: &RealtimeState,
    ctx: &RealtimeCtx<C, S>,
    drained: &[tracery_events::ExtractedBlock],
) -> Result<()>
where
    S: SyncStore + ?Sized,
{
    let chain_id = ctx.chain.id;

    let blocks: Vec<_> = drained.iter().map(|b| b.block.clone()).collect();
    ctx.store.insert_blocks(chain_id, &blocks).await?;

    let logs: Vec<_> = drained.iter().flat_map(|b| b.logs.clone()).collect();
    if !logs.is_empty() {
        ctx.store.insert_logs(chain_id, &logs).await?;
    }

    let transactions: Vec<_> = drained
        .iter()
        .flat_map(|b| b.transactions.clone())
        .collect();
    if !transactions.is_empty() {
        ctx.store.insert_transactions(chain_id, &transactions).await?;
    }

    let receipts: Vec<_> = drained.iter().flat_map(|b| b.receipts.clone()).collect();
    if !receipts.is_empty() {
        ctx.store
            .insert_transaction_receipts(chain_id, &receipts)
            .await?;
    }

    let traces: Vec<_> = drained.iter().flat_map(|b| b.traces.clone()).collect();
    if !traces.is_empty() {
        ctx.store.insert_traces(chain_id, &traces).await?;
    }

    for (factory, children) in &state.children {
        if !children.is_empty() {
            ctx.store
                .insert_child_addresses(chain_id, factory, children)
                .await?;
        }
    }

    debug!(chain = %ctx.chain.name, blocks = blocks.len(), "batch persisted");
    Ok(())
}
