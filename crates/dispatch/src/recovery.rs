//! Resuming after a crash or clean restart.

use tracery_indexing_store::{IndexingBackend, IndexingStoreError};
use tracery_primitives::{BlockRef, ChainId, Checkpoint};
use tracery_sync_store::{SyncStore, SyncStoreError};
use tracing::info;

/// Where one chain's indexing should resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPoint {
    /// Last durably committed checkpoint, if any work ever committed.
    pub checkpoint: Option<Checkpoint>,
    /// Latest stored block at or below the checkpoint; `None` on first run.
    pub resume_block: Option<BlockRef>,
}

impl RecoveryPoint {
    /// Block number historical sync restarts from: the checkpointed block
    /// itself, replayed idempotently (events at or below the checkpoint are
    /// skipped at dispatch).
    pub fn resume_from_block(&self, default_start: u64) -> u64 {
        self.checkpoint
            .map(|checkpoint| checkpoint.block_number)
            .unwrap_or(default_start)
    }
}

/// Reads the recovery point for one chain.
///
/// The indexing backend's checkpoint is authoritative: it commits in the
/// same transaction as the user-table flush, so everything at or below it
/// has been dispatched exactly once.
pub async fn recovery_point<B, S>(
    backend: &B,
    sync_store: &S,
    chain_id: ChainId,
) -> Result<RecoveryPoint, RecoveryError>
where
    B: IndexingBackend + ?Sized,
    S: SyncStore + ?Sized,
{
    let checkpoint = backend.get_checkpoint(chain_id).await?;

    let resume_block = match checkpoint {
        Some(checkpoint) => {
            sync_store
                .get_safe_block(chain_id, checkpoint.block_number)
                .await?
        }
        None => None,
    };

    match &checkpoint {
        Some(checkpoint) => info!(
            %chain_id,
            %checkpoint,
            "recovered committed checkpoint"
        ),
        None => info!(%chain_id, "no committed checkpoint; starting fresh"),
    }

    Ok(RecoveryPoint {
        checkpoint,
        resume_block,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("indexing backend error: {0}")]
    Backend(#[from] IndexingStoreError),

    #[error("sync store error: {0}")]
    SyncStore(#[from] SyncStoreError),
}
