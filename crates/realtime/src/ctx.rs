use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracery_aggregator::ChainEvent;
use tracery_primitives::{Chain, ChainId, SyncProgress};

/// Which artifacts the chain's filter set actually needs per block.
///
/// Derived once from the event sources; chains with log-only filters never
/// pay for traces or receipts.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchSpec {
    pub transactions: bool,
    pub traces: bool,
    pub receipts: bool,
}

pub(crate) struct RealtimeCtx<C: ?Sized, S: ?Sized> {
    pub chain: Arc<Chain>,
    pub client: Arc<C>,
    pub store: Arc<S>,
    pub fetch: FetchSpec,
    /// Signals into the aggregator; the chain id travels with each signal.
    pub signal_tx: mpsc::Sender<(ChainId, ChainEvent)>,
    pub progress_tx: watch::Sender<SyncProgress>,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl<C: ?Sized, S: ?Sized> RealtimeCtx<C, S> {
    /// Notify watchers of the latest sync progress.
    pub(crate) fn notify_progress(&self, progress: &SyncProgress) {
        let _ = self.progress_tx.send(progress.clone());
    }

    pub(crate) async fn emit(&self, signal: ChainEvent) -> crate::error::Result<()> {
        self.signal_tx
            .send((self.chain.id, signal))
            .await
            .map_err(|_| crate::RealtimeError::ChannelClosed)
    }
}
