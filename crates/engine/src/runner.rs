use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracery_aggregator::{merge_task, ChainEvent, EventMerger, MergedEvent, OrderingPolicy};
use tracery_config::{ChainConfig, EngineConfig, OrderingMode};
use tracery_dispatch::{
    recovery_point, DispatchMetrics, Dispatcher, EventHandler, ReadOnlyClient, RetryPolicy,
};
use tracery_events::{EventBuilder, EventSource};
use tracery_historical::{FetchPolicy, HistoricalSync};
use tracery_indexing_store::{IndexingBackend, IndexingStore};
use tracery_intervals::BlockInterval;
use tracery_primitives::{Chain, ChainId, Checkpoint, SyncProgress};
use tracery_realtime::RealtimeSyncBuilder;
use tracery_rpc::{EthClient, RequestQueue, ThrottledClient};
use tracery_sync_store::SyncStore;
use tracing::{error, info, warn};

use crate::EngineError;

/// Everything the engine needs for one chain.
pub struct ChainSetup {
    pub config: ChainConfig,
    pub client: Arc<dyn EthClient>,
    pub sources: Vec<EventSource>,
    /// First block the user wants indexed.
    pub start_block: u64,
    /// Optional inclusive upper bound; unbounded chains follow the tip
    /// forever.
    pub end_block: Option<u64>,
}

impl std::fmt::Debug for ChainSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSetup")
            .field("chain", &self.config.name)
            .field("start_block", &self.start_block)
            .field("end_block", &self.end_block)
            .finish()
    }
}

/// Control handle for a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl EngineHandle {
    /// Requests graceful shutdown: syncs cancel, the dispatcher stops
    /// between events, in-flight transactions complete or abort atomically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// The assembled engine. `start` wires the pipelines and returns the
/// driving future together with a shutdown handle.
pub struct Engine<H> {
    config: Arc<EngineConfig>,
    chains: Vec<ChainSetup>,
    sync_store: Arc<dyn SyncStore>,
    backend: Arc<dyn IndexingBackend + Send + Sync>,
    handler: H,
}

impl<H> std::fmt::Debug for Engine<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("chains", &self.chains.len())
            .finish()
    }
}

impl<H: EventHandler + 'static> Engine<H> {
    pub fn new(
        config: Arc<EngineConfig>,
        chains: Vec<ChainSetup>,
        sync_store: Arc<dyn SyncStore>,
        backend: Arc<dyn IndexingBackend + Send + Sync>,
        handler: H,
    ) -> Self {
        Self {
            config,
            chains,
            sync_store,
            backend,
            handler,
        }
    }

    pub fn start(
        self,
    ) -> (
        EngineHandle,
        impl Future<Output = Result<DispatchMetrics, EngineError>>,
    ) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let handle = EngineHandle {
            shutdown_tx: shutdown_tx.clone(),
        };

        (handle, self.run(shutdown_tx, shutdown_rx))
    }

    async fn run(
        self,
        shutdown_tx: Arc<watch::Sender<bool>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<DispatchMetrics, EngineError> {
        let Engine {
            config,
            chains,
            sync_store,
            backend,
            handler,
        } = self;

        let policy = match config.ordering {
            OrderingMode::Omnichain => OrderingPolicy::Omnichain,
            // Isolated is multichain ordering; namespace separation is the
            // database layer's concern.
            OrderingMode::Multichain | OrderingMode::Isolated => OrderingPolicy::Multichain,
        };

        let chain_ids: Vec<ChainId> = chains.iter().map(|setup| setup.config.id).collect();
        let (signal_tx, signal_rx) = mpsc::channel::<(ChainId, ChainEvent)>(1024);
        let (merged_tx, merged_rx) = mpsc::channel::<MergedEvent>(256);

        let merger = EventMerger::new(policy, &chain_ids);
        let merge_handle = tokio::spawn(merge_task(merger, signal_rx, merged_tx));

        // Recovery runs up front so the dispatcher starts with every chain's
        // committed cursor.
        let mut cursors: HashMap<ChainId, Checkpoint> = HashMap::new();
        let mut clients: HashMap<ChainId, ReadOnlyClient> = HashMap::new();
        let mut chain_arcs: Vec<Arc<Chain>> = Vec::with_capacity(chains.len());
        let mut chain_tasks: Vec<JoinHandle<Result<(), EngineError>>> = Vec::new();

        for setup in chains {
            let chain_id = setup.config.id;
            let chain = Arc::new(setup.config.to_chain());
            chain_arcs.push(chain.clone());

            let queue = Arc::new(RequestQueue::new(
                setup.config.max_rpc_concurrency,
                setup.config.max_requests_per_second,
            ));
            let client: Arc<dyn EthClient> =
                Arc::new(ThrottledClient::new(setup.client.clone(), queue));

            let recovered =
                recovery_point(backend.as_ref(), sync_store.as_ref(), chain_id).await?;
            if let Some(checkpoint) = recovered.checkpoint {
                cursors.insert(chain_id, checkpoint);
            }

            clients.insert(
                chain_id,
                ReadOnlyClient::new(chain_id, client.clone(), sync_store.clone()),
            );

            let task = chain_pipeline(
                chain,
                setup.config.max_block_range,
                client,
                sync_store.clone(),
                setup.sources,
                setup.start_block,
                setup.end_block,
                recovered.resume_from_block(setup.start_block),
                recovered.checkpoint,
                signal_tx.clone(),
                shutdown_rx.clone(),
                shutdown_tx.clone(),
            );
            chain_tasks.push(tokio::spawn(task));
        }
        // The merger ends when the last chain sender is dropped.
        drop(signal_tx);

        let store: IndexingStore<dyn IndexingBackend + Send + Sync> =
            IndexingStore::new(backend.clone(), config.indexing_cache_max_bytes);

        let dispatcher = Dispatcher::new(
            chain_arcs,
            handler,
            store,
            clients,
            sync_store.clone(),
            merged_rx,
            shutdown_rx,
            RetryPolicy::default(),
        )
        .with_recovered_cursors(cursors);

        let result = dispatcher.run().await;

        // Whatever ended the dispatch, wind the pipelines down.
        let _ = shutdown_tx.send(true);
        let mut first_chain_error = None;
        for task in chain_tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(%error, "chain pipeline ended with error");
                    first_chain_error.get_or_insert(error);
                }
                Err(join_error) if join_error.is_panic() => {
                    return Err(EngineError::TaskPanicked(join_error.to_string()));
                }
                Err(_) => {}
            }
        }
        let _ = merge_handle.await;

        // A cancelled dispatch caused by a failed chain pipeline surfaces
        // the pipeline's error, not the cancellation.
        if let (Err(tracery_dispatch::DispatchError::Cancelled), Some(error)) =
            (&result, first_chain_error)
        {
            return Err(error);
        }
        Ok(result?)
    }
}

/// One chain's sync lifecycle: backfill to the finality horizon, then follow
/// the tip.
#[expect(clippy::too_many_arguments, reason = "assembled once per chain")]
async fn chain_pipeline(
    chain: Arc<Chain>,
    max_block_range: u64,
    client: Arc<dyn EthClient>,
    sync_store: Arc<dyn SyncStore>,
    sources: Vec<EventSource>,
    start_block: u64,
    end_block: Option<u64>,
    resume_block: u64,
    resume_from: Option<Checkpoint>,
    signal_tx: mpsc::Sender<(ChainId, ChainEvent)>,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: Arc<watch::Sender<bool>>,
) -> Result<(), EngineError> {
    let result = run_chain_pipeline(
        chain.clone(),
        max_block_range,
        client,
        sync_store,
        sources,
        start_block,
        end_block,
        resume_block,
        resume_from,
        signal_tx,
        shutdown_rx,
    )
    .await;

    if let Err(error) = &result {
        error!(chain = %chain.name, %error, "chain pipeline failed; initiating shutdown");
        let _ = shutdown_tx.send(true);
    }
    result
}

#[expect(clippy::too_many_arguments, reason = "assembled once per chain")]
async fn run_chain_pipeline(
    chain: Arc<Chain>,
    max_block_range: u64,
    client: Arc<dyn EthClient>,
    sync_store: Arc<dyn SyncStore>,
    sources: Vec<EventSource>,
    start_block: u64,
    end_block: Option<u64>,
    resume_block: u64,
    resume_from: Option<Checkpoint>,
    signal_tx: mpsc::Sender<(ChainId, ChainEvent)>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    let tip = client.get_block_number().await?;
    let finality_horizon = tip.saturating_sub(chain.finality_block_count);
    let backfill_to = end_block.unwrap_or(u64::MAX).min(finality_horizon);
    let backfill_from = resume_block.max(start_block);

    let mut historical = HistoricalSync::new(
        chain.clone(),
        client.clone(),
        sync_store.clone(),
        EventBuilder::new(chain.id, sources.clone()),
        FetchPolicy {
            max_block_range,
            ..FetchPolicy::default()
        },
        signal_tx.clone(),
    );

    if backfill_from <= backfill_to {
        historical
            .sync(BlockInterval::new(backfill_from, backfill_to), resume_from)
            .await?;
    }

    // Bounded range fully covered by the backfill: no tip to follow. The
    // chain's cursor moves to the maximum so omnichain ordering never waits
    // on it again.
    if end_block.is_some_and(|end| end <= backfill_to) {
        let _ = signal_tx
            .send((
                chain.id,
                ChainEvent::Block {
                    events: Vec::new(),
                    cursor: Checkpoint::MAX,
                },
            ))
            .await;
        info!(chain = %chain.name, "bounded range complete after backfill");
        return Ok(());
    }

    let children = historical.children().clone();
    drop(historical);

    // Hand off at the last backfilled block (or the start block on a chain
    // with no backfillable history yet).
    let handoff_number = backfill_to.max(start_block.saturating_sub(1));
    let handoff = match sync_store.get_safe_block(chain.id, handoff_number).await {
        Ok(Some(block)) => block,
        _ => {
            let fetched = client.get_block_by_number(handoff_number, false).await?;
            fetched.block.block_ref()
        }
    };

    let mut progress = SyncProgress::new(handoff, handoff, handoff);
    if let Some(end) = end_block {
        progress = progress.with_end(end);
    }

    let (_handle, task) = RealtimeSyncBuilder::new(
        chain.clone(),
        client,
        sync_store,
        EventBuilder::new(chain.id, sources),
        progress,
        signal_tx,
        shutdown_rx,
    )
    .with_children(children)
    .build();

    info!(chain = %chain.name, handoff = %handoff, "handing off to realtime sync");
    task.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use alloy_primitives::{address, Address, B256};
    use async_trait::async_trait;
    use serde_json::json;
    use tracery_dispatch::{HandlerError, IndexingContext};
    use tracery_events::Event;
    use tracery_indexing_store::{InMemoryIndexingBackend, OnConflict};
    use tracery_primitives::{BlockRecord, LogRecord};
    use tracery_rpc::{BlockWithTransactions, MockEthClient, RpcError};
    use tracery_sync_store::InMemorySyncStore;
    use tracery_test_utils::{make_block_record, make_log, make_log_filter};

    use super::*;

    const TOKEN: Address = address!("00000000000000000000000000000000000000aa");
    const TOPIC: B256 = B256::repeat_byte(0xdd);

    /// Records every handled event's checkpoint and writes one row per
    /// event.
    struct RecordingHandler {
        seen: Arc<Mutex<Vec<Checkpoint>>>,
    }

    #[async_trait]
    impl tracery_dispatch::EventHandler for RecordingHandler {
        async fn handle(
            &self,
            event: &Event,
            context: &mut IndexingContext<'_>,
        ) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(event.checkpoint);
            context
                .db
                .insert(
                    "events",
                    &event.checkpoint.encode(),
                    json!({"block": event.block.number}),
                    OnConflict::DoUpdate,
                )
                .await?;
            Ok(())
        }
    }

    fn make_chain_config(id: u64, name: &str) -> ChainConfig {
        ChainConfig {
            id,
            name: name.to_string(),
            finality_block_count: 2,
            max_block_range: 2_000,
            polling_interval_ms: 10,
            max_requests_per_second: 10_000,
            max_rpc_concurrency: 4,
            disable_cache: false,
        }
    }

    fn make_engine_config(ordering: OrderingMode, chains: Vec<ChainConfig>) -> Arc<EngineConfig> {
        Arc::new(EngineConfig {
            ordering,
            chains,
            database_max_row_limit: 10_000,
            indexing_cache_max_bytes: 1024 * 1024,
        })
    }

    /// Mock serving a fixed block list and per-block logs.
    fn make_client(tip: u64, blocks: Vec<BlockRecord>, logs: Vec<LogRecord>) -> MockEthClient {
        let mut client = MockEthClient::new();
        client.expect_get_block_number().returning(move || Ok(tip));

        let by_number: std::collections::HashMap<u64, BlockRecord> = blocks
            .iter()
            .map(|block| (block.number, block.clone()))
            .collect();
        client
            .expect_get_block_by_number()
            .returning(move |number, _| {
                by_number
                    .get(&number)
                    .map(|block| BlockWithTransactions {
                        block: block.clone(),
                        transactions: Vec::new(),
                    })
                    .ok_or(RpcError::Transient("unknown block".to_string()))
            });
        client.expect_get_logs().returning(move |query| {
            Ok(logs
                .iter()
                .filter(|log| {
                    log.block_number >= query.from_block && log.block_number <= query.to_block
                })
                .cloned()
                .collect())
        });
        client
    }

    fn make_source(filter: tracery_filters::Filter, name: &str) -> EventSource {
        EventSource {
            filter,
            callback_index: 0,
            contract_name: name.to_string(),
            event_abi: None,
            function_abi: None,
            emit_setup: false,
            setup_address: None,
        }
    }

    #[tokio::test]
    async fn test_bounded_single_chain_end_to_end() {
        // One Transfer in block 1, block 2 empty, bounded range [1, 2]:
        // one dispatched event, checkpoint committed at block 2's end.
        let blocks = vec![make_block_record(1, 1, 0), make_block_record(2, 2, 1)];
        let logs = vec![make_log(TOKEN, TOPIC, &blocks[0], 0)];

        let seen = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(InMemoryIndexingBackend::new());
        let sync_store = Arc::new(InMemorySyncStore::new());

        let engine = Engine::new(
            make_engine_config(OrderingMode::Omnichain, vec![make_chain_config(1, "test")]),
            vec![ChainSetup {
                config: make_chain_config(1, "test"),
                client: Arc::new(make_client(10, blocks, logs)),
                sources: vec![make_source(make_log_filter(1, TOKEN, TOPIC), "Token")],
                start_block: 1,
                end_block: Some(2),
            }],
            sync_store.clone(),
            backend.clone(),
            RecordingHandler { seen: seen.clone() },
        );

        let (_handle, run) = engine.start();
        let metrics = run.await.unwrap();

        assert_eq!(metrics.events_processed, 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].block_number, 1);

        // Scenario A: the final committed checkpoint covers the empty
        // trailing block.
        let committed = backend.committed_checkpoint(1).unwrap();
        assert_eq!(committed.block_number, 2);
        assert_eq!(committed.block_timestamp, 2 * 12);

        // One interval row [1, 2].
        let cached = sync_store
            .get_intervals(1, &[make_log_filter(1, TOKEN, TOPIC)])
            .await
            .unwrap();
        assert_eq!(
            cached[0].as_slice(),
            &[tracery_intervals::BlockInterval::new(1, 2)]
        );
    }

    fn make_timestamped_block(number: u64, id: u8, parent_id: u8, timestamp: u64) -> BlockRecord {
        BlockRecord {
            timestamp,
            ..make_block_record(number, id, parent_id)
        }
    }

    #[tokio::test]
    async fn test_omnichain_order_across_two_chains() {
        // Chain 1 events at timestamps {10, 30}; chain 2 at {20, 40}.
        // Dispatched order must be 10, 20, 30, 40 regardless of which chain
        // backfills first.
        let chain_1_blocks = vec![
            make_timestamped_block(1, 1, 0, 10),
            make_timestamped_block(2, 2, 1, 30),
        ];
        let chain_2_blocks = vec![
            make_timestamped_block(1, 0x21, 0x20, 20),
            make_timestamped_block(2, 0x22, 0x21, 40),
        ];
        let chain_1_logs = vec![
            make_log(TOKEN, TOPIC, &chain_1_blocks[0], 0),
            make_log(TOKEN, TOPIC, &chain_1_blocks[1], 0),
        ];
        let chain_2_logs = vec![
            make_log(TOKEN, TOPIC, &chain_2_blocks[0], 0),
            make_log(TOKEN, TOPIC, &chain_2_blocks[1], 0),
        ];

        let seen = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(InMemoryIndexingBackend::new());
        let sync_store = Arc::new(InMemorySyncStore::new());

        let engine = Engine::new(
            make_engine_config(
                OrderingMode::Omnichain,
                vec![make_chain_config(1, "one"), make_chain_config(2, "two")],
            ),
            vec![
                ChainSetup {
                    config: make_chain_config(1, "one"),
                    client: Arc::new(make_client(10, chain_1_blocks, chain_1_logs)),
                    sources: vec![make_source(make_log_filter(1, TOKEN, TOPIC), "Token")],
                    start_block: 1,
                    end_block: Some(2),
                },
                ChainSetup {
                    config: make_chain_config(2, "two"),
                    client: Arc::new(make_client(10, chain_2_blocks, chain_2_logs)),
                    sources: vec![make_source(make_log_filter(2, TOKEN, TOPIC), "Token")],
                    start_block: 1,
                    end_block: Some(2),
                },
            ],
            sync_store,
            backend,
            RecordingHandler { seen: seen.clone() },
        );

        let (_handle, run) = engine.start();
        let metrics = run.await.unwrap();
        assert_eq!(metrics.events_processed, 4);

        let timestamps: Vec<u64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|checkpoint| checkpoint.block_timestamp)
            .collect();
        assert_eq!(timestamps, vec![10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_restart_skips_committed_events() {
        // Run the same bounded engine twice against shared storage; the
        // second run redispatches nothing.
        let blocks = vec![make_block_record(1, 1, 0), make_block_record(2, 2, 1)];
        let logs = vec![make_log(TOKEN, TOPIC, &blocks[0], 0)];

        let backend = Arc::new(InMemoryIndexingBackend::new());
        let sync_store = Arc::new(InMemorySyncStore::new());

        for expected_events in [1u64, 0] {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let engine = Engine::new(
                make_engine_config(OrderingMode::Omnichain, vec![make_chain_config(1, "test")]),
                vec![ChainSetup {
                    config: make_chain_config(1, "test"),
                    client: Arc::new(make_client(10, blocks.clone(), logs.clone())),
                    sources: vec![make_source(make_log_filter(1, TOKEN, TOPIC), "Token")],
                    start_block: 1,
                    end_block: Some(2),
                }],
                sync_store.clone(),
                backend.clone(),
                RecordingHandler { seen: seen.clone() },
            );

            let (_handle, run) = engine.start();
            let metrics = run.await.unwrap();
            assert_eq!(metrics.events_processed, expected_events);
        }

        // Exactly one durable row either way.
        assert_eq!(backend.row_count(), 1);
    }
}
