use tokio::sync::mpsc;
use tracery_primitives::ChainId;
use tracing::debug;

use crate::{ChainEvent, EventMerger, MergedEvent};

/// Drains chain signals into the merger and forwards releases downstream.
///
/// Backpressure is inherent: the task sends one merged event at a time into
/// the bounded outbox and only then polls the next signal. Ends when every
/// chain sender is dropped or the dispatcher hangs up.
pub async fn merge_task(
    mut merger: EventMerger,
    mut inbox: mpsc::Receiver<(ChainId, ChainEvent)>,
    outbox: mpsc::Sender<MergedEvent>,
) {
    while let Some((chain_id, signal)) = inbox.recv().await {
        for merged in merger.on_chain_event(chain_id, signal) {
            if outbox.send(merged).await.is_err() {
                debug!("merged event consumer dropped; stopping merge task");
                return;
            }
        }
    }

    debug!(
        pending = merger.pending_len(),
        "all chain senders closed; merge task ending"
    );
}
