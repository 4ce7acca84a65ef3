use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::sync::{mpsc, watch};
use tracery_aggregator::ChainEvent;
use tracery_events::EventBuilder;
use tracery_filters::{ChildAddresses, Factory, Filter};
use tracery_primitives::{Chain, ChainId, SyncProgress};
use tracery_rpc::EthClient;
use tracery_sync_store::SyncStore;

use crate::{ctx::RealtimeCtx, state::RealtimeState, task::realtime_task, FetchSpec};

/// Handle for observing a running realtime sync.
#[derive(Debug)]
pub struct RealtimeHandle {
    progress_rx: watch::Receiver<SyncProgress>,
}

impl RealtimeHandle {
    /// Returns a watcher for sync progress updates.
    pub fn progress_watcher(&self) -> watch::Receiver<SyncProgress> {
        self.progress_rx.clone()
    }
}

/// Builder for a per-chain realtime sync task.
pub struct RealtimeSyncBuilder<C: ?Sized, S: ?Sized> {
    chain: Arc<Chain>,
    client: Arc<C>,
    store: Arc<S>,
    builder: EventBuilder,
    progress: SyncProgress,
    children: HashMap<Factory, ChildAddresses>,
    signal_tx: mpsc::Sender<(ChainId, ChainEvent)>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<C: ?Sized, S: ?Sized> std::fmt::Debug for RealtimeSyncBuilder<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSyncBuilder")
            .field("chain", &self.chain.name)
            .field("progress", &self.progress)
            .finish()
    }
}

impl<C: ?Sized, S: ?Sized> RealtimeSyncBuilder<C, S> {
    pub fn new(
        chain: Arc<Chain>,
        client: Arc<C>,
        store: Arc<S>,
        builder: EventBuilder,
        progress: SyncProgress,
        signal_tx: mpsc::Sender<(ChainId, ChainEvent)>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            chain,
            client,
            store,
            builder,
            progress,
            children: HashMap::new(),
            signal_tx,
            shutdown_rx,
        }
    }

    /// Seeds factory children discovered during historical sync.
    pub fn with_children(mut self, children: HashMap<Factory, ChildAddresses>) -> Self {
        self.children = children;
        self
    }

    /// Builds and returns the handle and task.
    pub fn build(self) -> (RealtimeHandle, impl Future<Output = ()>)
    where
        C: EthClient + 'static,
        S: SyncStore + 'static,
    {
        let fetch = fetch_spec_for(self.builder.sources().iter().map(|source| &source.filter));
        let (progress_tx, progress_rx) = watch::channel(self.progress.clone());

        let state = RealtimeState::new(self.progress, self.builder, self.children);
        let ctx = RealtimeCtx {
            chain: self.chain,
            client: self.client,
            store: self.store,
            fetch,
            signal_tx: self.signal_tx,
            progress_tx,
            shutdown_rx: self.shutdown_rx,
        };

        (RealtimeHandle { progress_rx }, realtime_task(state, ctx))
    }
}

/// Derives which per-block artifacts the filter set needs.
fn fetch_spec_for<'a>(filters: impl Iterator<Item = &'a Filter>) -> FetchSpec {
    let mut fetch = FetchSpec::default();
    for filter in filters {
        match filter {
            Filter::Log(_) | Filter::Block(_) => {}
            Filter::Transaction(_) => fetch.transactions = true,
            Filter::Transfer(_) | Filter::Trace(_) => fetch.traces = true,
        }
        if filter.include_receipts() {
            fetch.receipts = true;
        }
    }
    fetch
}
