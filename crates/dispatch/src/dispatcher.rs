use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch};
use tracery_aggregator::MergedEvent;
use tracery_events::Event;
use tracery_indexing_store::{IndexingBackend, IndexingStore, IndexingStoreError};
use tracery_primitives::{Chain, ChainId, Checkpoint};
use tracery_sync_store::SyncStore;
use tracing::{debug, error, info, warn};

use crate::{
    DispatchError, EventHandler, HandlerError, IndexingContext, ReadOnlyClient, UserErrorReport,
};

/// Backoff tuning for retryable callback failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            backoff_base: Duration::from_millis(250),
        }
    }
}

/// Counters surfaced to the driver when the run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchMetrics {
    pub events_processed: u64,
    pub events_retried: u64,
    pub flushes: u64,
    pub reorgs: u64,
}

/// Single-consumer event loop invoking user callbacks.
///
/// Strict serialization falls out of the shape: `run(self)` consumes the
/// dispatcher and owns the only receiver, so a second concurrent run cannot
/// exist.
pub struct Dispatcher<H> {
    chains: HashMap<ChainId, Arc<Chain>>,
    handler: H,
    store: IndexingStore<dyn IndexingBackend + Send + Sync>,
    clients: HashMap<ChainId, ReadOnlyClient>,
    sync_store: Arc<dyn SyncStore>,
    inbox: mpsc::Receiver<MergedEvent>,
    kill_rx: watch::Receiver<bool>,
    policy: RetryPolicy,
    /// Last successfully processed checkpoint per chain; committed at every
    /// flush.
    cursors: HashMap<ChainId, Checkpoint>,
    metrics: DispatchMetrics,
}

impl<H: EventHandler> Dispatcher<H> {
    #[expect(clippy::too_many_arguments, reason = "assembled once by the engine")]
    pub fn new(
        chains: Vec<Arc<Chain>>,
        handler: H,
        store: IndexingStore<dyn IndexingBackend + Send + Sync>,
        clients: HashMap<ChainId, ReadOnlyClient>,
        sync_store: Arc<dyn SyncStore>,
        inbox: mpsc::Receiver<MergedEvent>,
        kill_rx: watch::Receiver<bool>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            chains: chains.into_iter().map(|chain| (chain.id, chain)).collect(),
            handler,
            store,
            clients,
            sync_store,
            inbox,
            kill_rx,
            policy,
            cursors: HashMap::new(),
            metrics: DispatchMetrics::default(),
        }
    }

    /// Seeds per-chain cursors from recovery so redelivered events below the
    /// committed checkpoint are skipped.
    pub fn with_recovered_cursors(mut self, cursors: HashMap<ChainId, Checkpoint>) -> Self {
        self.cursors = cursors;
        self
    }

    /// Runs until the inbox closes, the kill flag trips, or a non-retryable
    /// error surfaces. A clean end flushes once more so nothing indexed is
    /// lost.
    pub async fn run(mut self) -> Result<DispatchMetrics, DispatchError> {
        loop {
            // Kill flag is honored between events only; an in-flight
            // callback always completes first.
            if *self.kill_rx.borrow() {
                info!("dispatch cancelled between events");
                return Err(DispatchError::Cancelled);
            }

            let merged = tokio::select! {
                biased;
                changed = self.kill_rx.changed() => {
                    if changed.is_ok() {
                        continue;
                    }
                    // Kill sender dropped; only the inbox ends the run now.
                    self.inbox.recv().await
                }
                merged = self.inbox.recv() => merged,
            };

            match merged {
                Some(MergedEvent::Event(event)) => self.process_event(*event).await?,
                Some(MergedEvent::Finalize {
                    chain_id,
                    checkpoint,
                }) => {
                    // The merger only delivers a finalize after every event
                    // it covers, so the cursor may jump to it even when the
                    // covered blocks were empty.
                    let cursor = self.cursors.entry(chain_id).or_insert(checkpoint);
                    *cursor = (*cursor).max(checkpoint);

                    debug!(%chain_id, "finalize: flushing indexing cache");
                    self.flush().await?;
                }
                Some(MergedEvent::Reorg {
                    chain_id, safe, ..
                }) => {
                    self.handle_reorg(chain_id, safe).await?;
                }
                None => {
                    self.flush().await?;
                    info!(
                        events = self.metrics.events_processed,
                        "event stream ended; dispatch complete"
                    );
                    return Ok(self.metrics);
                }
            }
        }
    }

    async fn process_event(&mut self, event: Event) -> Result<(), DispatchError> {
        // Redelivery below the recovered checkpoint is expected after a
        // crash; those events are already durable.
        if let Some(cursor) = self.cursors.get(&event.chain_id) {
            if event.checkpoint <= *cursor {
                debug!(checkpoint = %event.checkpoint, "skipping already-indexed event");
                return Ok(());
            }
        }

        let Some(chain) = self.chains.get(&event.chain_id).cloned() else {
            warn!(chain_id = event.chain_id, "event for unknown chain dropped");
            return Ok(());
        };

        self.store.set_current_checkpoint(event.checkpoint);
        if let Some(client) = self.clients.get(&event.chain_id) {
            client.pin_block(event.block.number);
        }

        let mut attempt = 0u32;
        loop {
            let client = self
                .clients
                .get(&event.chain_id)
                .expect("client exists for known chain");
            let mut context = IndexingContext {
                chain: chain.clone(),
                client,
                db: &mut self.store,
            };

            match self.handler.handle(&event, &mut context).await {
                Ok(()) => break,
                Err(error) if error.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff_base * 2u32.saturating_pow(attempt);
                    warn!(
                        event = event.kind_name(),
                        block = event.block.number,
                        %error,
                        attempt,
                        ?delay,
                        "retryable callback failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    self.metrics.events_retried += 1;
                }
                Err(error) if error.is_retryable() => {
                    return Err(DispatchError::RetriesExhausted(error));
                }
                Err(error) => {
                    let report = build_user_report(&event, &error);
                    error!("{report}");
                    return Err(DispatchError::User(Box::new(report)));
                }
            }
        }

        self.metrics.events_processed += 1;
        self.cursors.insert(event.chain_id, event.checkpoint);

        // Backpressure: nothing further is consumed until the flush clears
        // the cache bound.
        if self.store.is_cache_full() {
            debug!("indexing cache full; flushing");
            self.flush().await?;
        }
        Ok(())
    }

    /// Flushes buffered writes and commits every chain cursor in the same
    /// backend transaction, then mirrors the cursors into the sync store.
    async fn flush(&mut self) -> Result<(), DispatchError> {
        let checkpoints: Vec<(ChainId, Checkpoint)> = self
            .cursors
            .iter()
            .map(|(&chain_id, &checkpoint)| (chain_id, checkpoint))
            .collect();

        self.store.flush(&checkpoints).await?;
        self.metrics.flushes += 1;

        // Advisory copy for sync planning and ops tooling; the backend's
        // copy is the authoritative recovery cursor.
        for (chain_id, checkpoint) in checkpoints {
            if let Err(error) = self.sync_store.commit_checkpoint(chain_id, checkpoint).await {
                warn!(%chain_id, %error, "failed to mirror checkpoint into sync store");
            }
        }
        Ok(())
    }

    async fn handle_reorg(
        &mut self,
        chain_id: ChainId,
        safe: Checkpoint,
    ) -> Result<(), DispatchError> {
        self.metrics.reorgs += 1;

        match self.store.revert(chain_id, safe).await {
            Ok(()) => {
                if let Some(cursor) = self.cursors.get_mut(&chain_id) {
                    *cursor = (*cursor).min(safe);
                }
                info!(%chain_id, safe = %safe, "indexing store reverted for reorg");
                Ok(())
            }
            Err(IndexingStoreError::RevertUnsupported) => {
                // Without a version log the only correct rollback is a
                // re-run from the committed checkpoint, which is exactly
                // what restart-time recovery does.
                warn!(
                    %chain_id,
                    "backend cannot revert; surfacing for checkpoint re-run"
                );
                Err(DispatchError::Store(IndexingStoreError::RevertUnsupported))
            }
            Err(error) => Err(DispatchError::Store(error)),
        }
    }
}

fn build_user_report(event: &Event, error: &HandlerError) -> UserErrorReport {
    UserErrorReport {
        event_name: event.kind_name().to_string(),
        chain_id: event.chain_id,
        block_number: event.block.number,
        args_pretty: event.decoded_args().map(|args| args.pretty()),
        source: error.to_string(),
    }
}

impl<H> std::fmt::Debug for Dispatcher<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("chains", &self.chains.len())
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tracery_events::EventKind;
    use tracery_indexing_store::{InMemoryIndexingBackend, OnConflict};
    use tracery_primitives::{BlockRef, EventTypeTag};
    use tracery_rpc::MockEthClient;
    use tracery_sync_store::InMemorySyncStore;
    use tracery_test_utils::make_hash;

    use super::*;
    use crate::recovery_point;

    fn make_event(block_number: u64) -> Event {
        Event {
            chain_id: 1,
            checkpoint: Checkpoint {
                block_timestamp: block_number * 12,
                chain_id: 1,
                block_number,
                event_type: EventTypeTag::Log,
                transaction_index: 0,
                event_index: 0,
            },
            callback_index: 0,
            block: BlockRef::new(make_hash(block_number as u8), B256_ZERO, block_number, block_number * 12),
            kind: EventKind::DecodeError {
                source: EventTypeTag::Log,
                message: "fixture".to_string(),
            },
        }
    }

    const B256_ZERO: alloy_primitives::B256 = alloy_primitives::B256::ZERO;

    /// Handler that counts balance increments and fails a configured number
    /// of times with a transient error first.
    struct CountingHandler {
        transient_failures: AtomicU32,
        fail_user: bool,
    }

    impl CountingHandler {
        fn ok() -> Self {
            Self {
                transient_failures: AtomicU32::new(0),
                fail_user: false,
            }
        }

        fn with_transient_failures(count: u32) -> Self {
            Self {
                transient_failures: AtomicU32::new(count),
                fail_user: false,
            }
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(
            &self,
            event: &Event,
            context: &mut IndexingContext<'_>,
        ) -> Result<(), HandlerError> {
            if self.fail_user {
                return Err(HandlerError::User("boom in user code".to_string()));
            }
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok()
            {
                return Err(HandlerError::Store(IndexingStoreError::Transient(
                    "connection reset".to_string(),
                )));
            }

            let key = event.block.number.to_string();
            context
                .db
                .insert("events", &key, json!({"block": event.block.number}), OnConflict::DoUpdate)
                .await?;
            Ok(())
        }
    }

    struct Fixture {
        sync_store: Arc<InMemorySyncStore>,
        event_tx: mpsc::Sender<MergedEvent>,
    }

    fn make_dispatcher<H: EventHandler>(
        handler: H,
        backend: Arc<InMemoryIndexingBackend>,
        sync_store: Arc<InMemorySyncStore>,
        cache_bytes: usize,
    ) -> (Dispatcher<H>, Fixture) {
        let chain = Arc::new(tracery_test_utils::make_chain(1, 2));
        let store: IndexingStore<dyn IndexingBackend + Send + Sync> =
            IndexingStore::new(backend.clone() as Arc<dyn IndexingBackend + Send + Sync>, cache_bytes);

        let client = ReadOnlyClient::new(
            1,
            Arc::new(MockEthClient::new()) as Arc<dyn tracery_rpc::EthClient>,
            sync_store.clone() as Arc<dyn SyncStore>,
        );

        let (event_tx, inbox) = mpsc::channel(64);
        // Tests without a kill scenario drop the sender; the run loop falls
        // back to inbox-only polling.
        let (kill_tx, kill_rx) = watch::channel(false);
        drop(kill_tx);

        let dispatcher = Dispatcher::new(
            vec![chain],
            handler,
            store,
            HashMap::from([(1, client)]),
            sync_store.clone() as Arc<dyn SyncStore>,
            inbox,
            kill_rx,
            RetryPolicy {
                max_retries: 3,
                backoff_base: Duration::from_millis(1),
            },
        );

        (
            dispatcher,
            Fixture {
                sync_store,
                event_tx,
            },
        )
    }

    fn finalize_at(block_number: u64) -> MergedEvent {
        MergedEvent::Finalize {
            chain_id: 1,
            checkpoint: Checkpoint::at_block_end(block_number * 12, 1, block_number),
        }
    }

    #[tokio::test]
    async fn test_events_dispatch_and_commit_on_finalize() {
        let backend = Arc::new(InMemoryIndexingBackend::new());
        let (dispatcher, fixture) = make_dispatcher(
            CountingHandler::ok(),
            backend.clone(),
            Arc::new(InMemorySyncStore::new()),
            1024 * 1024,
        );

        fixture
            .event_tx
            .send(MergedEvent::Event(Box::new(make_event(1))))
            .await
            .unwrap();
        fixture.event_tx.send(finalize_at(1)).await.unwrap();
        drop(fixture.event_tx);

        let metrics = dispatcher.run().await.unwrap();
        assert_eq!(metrics.events_processed, 1);

        assert_eq!(backend.row("events", "1"), Some(json!({"block": 1})));
        let committed = backend.committed_checkpoint(1).unwrap();
        assert_eq!(committed.block_number, 1);

        // The sync store carries the mirrored cursor.
        assert_eq!(
            fixture.sync_store.get_checkpoint(1).await.unwrap().unwrap(),
            committed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_retries_then_commits_once() {
        // Scenario: the first attempt dies with "connection reset"; the
        // retry succeeds; one flush, one checkpoint commit.
        let backend = Arc::new(InMemoryIndexingBackend::new());
        let (dispatcher, fixture) = make_dispatcher(
            CountingHandler::with_transient_failures(1),
            backend.clone(),
            Arc::new(InMemorySyncStore::new()),
            1024 * 1024,
        );

        fixture
            .event_tx
            .send(MergedEvent::Event(Box::new(make_event(1))))
            .await
            .unwrap();
        fixture.event_tx.send(finalize_at(1)).await.unwrap();
        drop(fixture.event_tx);

        let metrics = dispatcher.run().await.unwrap();
        assert_eq!(metrics.events_processed, 1);
        assert_eq!(metrics.events_retried, 1);
        // One flush for the finalize, one trailing flush at stream end.
        assert_eq!(metrics.flushes, 2);
        assert_eq!(backend.row("events", "1"), Some(json!({"block": 1})));
    }

    #[tokio::test]
    async fn test_user_error_aborts_with_report() {
        let backend = Arc::new(InMemoryIndexingBackend::new());
        let handler = CountingHandler {
            transient_failures: AtomicU32::new(0),
            fail_user: true,
        };
        let (dispatcher, fixture) =
            make_dispatcher(handler, backend.clone(), Arc::new(InMemorySyncStore::new()), 1024);

        fixture
            .event_tx
            .send(MergedEvent::Event(Box::new(make_event(7))))
            .await
            .unwrap();
        drop(fixture.event_tx);

        let error = dispatcher.run().await.unwrap_err();
        let DispatchError::User(report) = error else {
            panic!("expected user error, got {error:?}");
        };
        assert_eq!(report.block_number, 7);
        assert!(report.source.contains("boom in user code"));
        // Nothing committed.
        assert_eq!(backend.committed_checkpoint(1), None);
    }

    /// Delegates to [`CountingHandler`] and trips the kill flag after the
    /// configured block, simulating a crash between events.
    struct KillAfter {
        inner: CountingHandler,
        kill_at_block: u64,
        kill_tx: watch::Sender<bool>,
    }

    #[async_trait]
    impl EventHandler for KillAfter {
        async fn handle(
            &self,
            event: &Event,
            context: &mut IndexingContext<'_>,
        ) -> Result<(), HandlerError> {
            self.inner.handle(event, context).await?;
            if event.block.number == self.kill_at_block {
                let _ = self.kill_tx.send(true);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_exactly_once_across_restart() {
        // Property: work committed before a crash is never re-dispatched;
        // work processed but not yet committed is.
        let backend = Arc::new(InMemoryIndexingBackend::new());
        let sync_store = Arc::new(InMemorySyncStore::new());

        // First run: block 1 commits via finalize; block 2 is processed but
        // the "crash" (kill flag tripped inside the handler) lands before
        // any flush covers it.
        let (kill_tx, kill_rx) = watch::channel(false);
        let chain = Arc::new(tracery_test_utils::make_chain(1, 2));
        let store: IndexingStore<dyn IndexingBackend + Send + Sync> = IndexingStore::new(
            backend.clone() as Arc<dyn IndexingBackend + Send + Sync>,
            1024 * 1024,
        );
        let client = ReadOnlyClient::new(
            1,
            Arc::new(MockEthClient::new()) as Arc<dyn tracery_rpc::EthClient>,
            sync_store.clone() as Arc<dyn SyncStore>,
        );
        let (event_tx, inbox) = mpsc::channel(64);
        let dispatcher = Dispatcher::new(
            vec![chain],
            KillAfter {
                inner: CountingHandler::ok(),
                kill_at_block: 2,
                kill_tx,
            },
            store,
            HashMap::from([(1, client)]),
            sync_store.clone() as Arc<dyn SyncStore>,
            inbox,
            kill_rx,
            RetryPolicy::default(),
        );

        event_tx
            .send(MergedEvent::Event(Box::new(make_event(1))))
            .await
            .unwrap();
        event_tx.send(finalize_at(1)).await.unwrap();
        event_tx
            .send(MergedEvent::Event(Box::new(make_event(2))))
            .await
            .unwrap();

        let result = dispatcher.run().await;
        assert!(matches!(result, Err(DispatchError::Cancelled)));

        // Only block 1 committed; block 2's row died with the cache.
        assert_eq!(backend.committed_checkpoint(1).unwrap().block_number, 1);
        assert_eq!(backend.row("events", "2"), None);

        // Restart: recovery seeds the cursor; the full stream is
        // redelivered.
        let recovered = recovery_point(backend.as_ref(), sync_store.as_ref(), 1)
            .await
            .unwrap();
        let cursors = HashMap::from([(1u64, recovered.checkpoint.unwrap())]);

        let (dispatcher, fixture) = make_dispatcher(
            CountingHandler::ok(),
            backend.clone(),
            sync_store.clone(),
            1024 * 1024,
        );
        let dispatcher = dispatcher.with_recovered_cursors(cursors);

        for block in [1, 2] {
            fixture
                .event_tx
                .send(MergedEvent::Event(Box::new(make_event(block))))
                .await
                .unwrap();
        }
        fixture.event_tx.send(finalize_at(2)).await.unwrap();
        drop(fixture.event_tx);

        let metrics = dispatcher.run().await.unwrap();
        // Event 1 was already committed and is skipped; event 2 re-runs.
        assert_eq!(metrics.events_processed, 1);
        assert_eq!(backend.committed_checkpoint(1).unwrap().block_number, 2);
        assert_eq!(backend.row("events", "2"), Some(json!({"block": 2})));
    }

    #[tokio::test]
    async fn test_reorg_reverts_committed_rows() {
        let backend = Arc::new(InMemoryIndexingBackend::new());
        let (dispatcher, fixture) = make_dispatcher(
            CountingHandler::ok(),
            backend.clone(),
            Arc::new(InMemorySyncStore::new()),
            1024 * 1024,
        );

        for block in [9, 10] {
            fixture
                .event_tx
                .send(MergedEvent::Event(Box::new(make_event(block))))
                .await
                .unwrap();
        }
        fixture.event_tx.send(finalize_at(10)).await.unwrap();
        // Reorg back to block 8.
        fixture
            .event_tx
            .send(MergedEvent::Reorg {
                chain_id: 1,
                safe: Checkpoint::at_block_end(8 * 12, 1, 8),
                reorged_blocks: vec![9, 10],
            })
            .await
            .unwrap();
        drop(fixture.event_tx);

        let metrics = dispatcher.run().await.unwrap();
        assert_eq!(metrics.reorgs, 1);

        // Rows written by the reorged blocks are gone.
        assert_eq!(backend.row("events", "9"), None);
        assert_eq!(backend.row("events", "10"), None);
    }

    #[tokio::test]
    async fn test_cache_pressure_triggers_flush() {
        let backend = Arc::new(InMemoryIndexingBackend::new());
        // Tiny cache: every event overflows it.
        let (dispatcher, fixture) = make_dispatcher(
            CountingHandler::ok(),
            backend.clone(),
            Arc::new(InMemorySyncStore::new()),
            8,
        );

        for block in [1, 2] {
            fixture
                .event_tx
                .send(MergedEvent::Event(Box::new(make_event(block))))
                .await
                .unwrap();
        }
        drop(fixture.event_tx);

        let metrics = dispatcher.run().await.unwrap();
        // One flush per overflowing event plus the trailing flush.
        assert_eq!(metrics.flushes, 3);
        assert_eq!(backend.row_count(), 2);
    }
}
