//! The backfill orchestrator: plan, fetch, persist, mark, then re-emit.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use alloy_primitives::{Address, B256};
use tokio::sync::mpsc;
use tracery_aggregator::ChainEvent;
use tracery_events::{EventBuilder, ExtractedBlock};
use tracery_filters::{AddressSpec, ChildAddresses, Factory, Filter, LogFilter};
use tracery_intervals::{BlockInterval, IntervalSet};
use tracery_primitives::{
    BlockRecord, Chain, ChainId, Checkpoint, LogRecord, TraceRecord, TransactionRecord,
};
use tracery_rpc::{EthClient, LogQuery, TraceQuery};
use tracery_sync_store::SyncStore;
use tracing::{debug, info};

use crate::{
    error::{HistoricalError, Result},
    fetch::fetch_chunks,
    plan::plan_required,
    FetchPolicy,
};

/// Backfill driver for one chain.
///
/// `sync` is idempotent: ranges already marked cached are neither re-fetched
/// nor re-persisted, and events are always rebuilt from the store, so a
/// repeated or crash-interrupted run converges without extra RPC traffic.
pub struct HistoricalSync<C: ?Sized, S: ?Sized> {
    chain: Arc<Chain>,
    client: Arc<C>,
    store: Arc<S>,
    builder: EventBuilder,
    policy: FetchPolicy,
    signal_tx: mpsc::Sender<(ChainId, ChainEvent)>,
    children: HashMap<Factory, ChildAddresses>,
}

impl<C: ?Sized, S: ?Sized> std::fmt::Debug for HistoricalSync<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoricalSync")
            .field("chain", &self.chain.name)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<C, S> HistoricalSync<C, S>
where
    C: EthClient + ?Sized,
    S: SyncStore + ?Sized,
{
    pub fn new(
        chain: Arc<Chain>,
        client: Arc<C>,
        store: Arc<S>,
        builder: EventBuilder,
        policy: FetchPolicy,
        signal_tx: mpsc::Sender<(ChainId, ChainEvent)>,
    ) -> Self {
        Self {
            chain,
            client,
            store,
            builder,
            policy,
            signal_tx,
            children: HashMap::new(),
        }
    }

    /// Factory children discovered so far, for handoff to realtime sync.
    pub fn children(&self) -> &HashMap<Factory, ChildAddresses> {
        &self.children
    }

    /// Syncs `[interval.from, interval.to]`: makes the store complete for
    /// every filter over the interval, then emits the interval's events in
    /// checkpoint order. Events at or below `resume_from` are skipped.
    pub async fn sync(
        &mut self,
        interval: BlockInterval,
        resume_from: Option<Checkpoint>,
    ) -> Result<()> {
        info!(
            chain = %self.chain.name,
            interval = %interval,
            "historical sync starting"
        );

        self.ensure_cached(interval).await?;
        self.ensure_end_block(interval.to).await?;
        self.emit_events(interval, resume_from).await?;

        info!(chain = %self.chain.name, interval = %interval, "historical sync complete");
        Ok(())
    }

    /// Brings the store up to date for every filter over the interval.
    async fn ensure_cached(&mut self, interval: BlockInterval) -> Result<()> {
        // Factory parents first: child logs cannot be fetched until the
        // parent creation events (and thus the child addresses) are known.
        let factories: Vec<Factory> = self
            .builder
            .sources()
            .iter()
            .filter_map(|source| source.filter.factory().cloned())
            .collect();

        for factory in &factories {
            let parent_filter = Filter::Log(LogFilter {
                chain_id: factory.chain_id,
                from_block: None,
                to_block: None,
                address: AddressSpec::Static(vec![factory.address]),
                topic0: Some(vec![factory.event_selector]),
                topic1: None,
                topic2: None,
                topic3: None,
                include_receipts: false,
            });
            self.ensure_filter_cached(&parent_filter, interval).await?;

            let children = self
                .store
                .get_child_addresses(self.chain.id, factory, interval.to)
                .await?;
            self.children.insert(factory.clone(), children);
        }

        let filters: Vec<Filter> = self
            .builder
            .sources()
            .iter()
            .map(|source| source.filter.clone())
            .collect();
        for filter in &filters {
            self.ensure_filter_cached(filter, interval).await?;
        }

        Ok(())
    }

    /// Fetches and persists one filter's missing ranges, then marks them
    /// cached. The interval is inserted only after every chunk is durable.
    async fn ensure_filter_cached(
        &mut self,
        filter: &Filter,
        interval: BlockInterval,
    ) -> Result<()> {
        let cached = if self.chain.disable_cache {
            vec![IntervalSet::new()]
        } else {
            self.store
                .get_intervals(self.chain.id, std::slice::from_ref(filter))
                .await?
        };

        let plans = plan_required(std::slice::from_ref(filter), &cached, interval);
        let Some(plan) = plans.into_iter().next() else {
            debug!(chain = %self.chain.name, "filter fully cached; skipping");
            return Ok(());
        };

        match filter {
            Filter::Log(log_filter) => {
                self.fetch_and_persist_logs(log_filter, &plan.required).await?
            }
            Filter::Trace(_) | Filter::Transfer(_) => {
                self.fetch_and_persist_traces(filter, &plan.required).await?
            }
            Filter::Transaction(_) => {
                self.fetch_and_persist_block_bodies(&plan.required, true).await?
            }
            Filter::Block(_) => {
                self.fetch_and_persist_block_bodies(&plan.required, false).await?
            }
        }

        if !self.chain.disable_cache {
            let entries: Vec<(Filter, BlockInterval)> = plan
                .required
                .iter()
                .map(|&range| (filter.clone(), range))
                .collect();
            self.store.insert_intervals(self.chain.id, &entries).await?;
        }

        Ok(())
    }

    async fn fetch_and_persist_logs(
        &mut self,
        filter: &LogFilter,
        required: &IntervalSet,
    ) -> Result<()> {
        let address = self.resolve_address_list(&filter.address);
        let topics = [
            filter.topic0.clone(),
            filter.topic1.clone(),
            filter.topic2.clone(),
            filter.topic3.clone(),
        ];

        let client = self.client.clone();
        let logs: Vec<LogRecord> = fetch_chunks(&self.policy, required, &|from, to| {
            let client = client.clone();
            let address = address.clone();
            let topics = topics.clone();
            async move {
                client
                    .get_logs(LogQuery {
                        address,
                        topics,
                        from_block: from,
                        to_block: to,
                    })
                    .await
            }
        })
        .await?;

        self.discover_children(&logs).await?;

        let referenced: HashSet<u64> = logs.iter().map(|log| log.block_number).collect();
        let referenced_txs: HashSet<B256> = logs.iter().map(|log| log.transaction_hash).collect();
        self.persist_referenced_blocks(&referenced, &referenced_txs)
            .await?;

        if filter.include_receipts {
            self.fetch_and_persist_receipts(&referenced_txs).await?;
        }

        if !logs.is_empty() {
            self.store.insert_logs(self.chain.id, &logs).await?;
        }

        debug!(
            chain = %self.chain.name,
            logs = logs.len(),
            blocks = referenced.len(),
            "log range persisted"
        );
        Ok(())
    }

    async fn fetch_and_persist_traces(
        &mut self,
        filter: &Filter,
        required: &IntervalSet,
    ) -> Result<()> {
        let (from_address, to_address) = match filter {
            Filter::Trace(f) => (
                self.resolve_address_list(&f.from_address),
                self.resolve_address_list(&f.to_address),
            ),
            Filter::Transfer(f) => (
                self.resolve_address_list(&f.from_address),
                self.resolve_address_list(&f.to_address),
            ),
            _ => (None, None),
        };

        let client = self.client.clone();
        let traces: Vec<TraceRecord> = fetch_chunks(&self.policy, required, &|from, to| {
            let client = client.clone();
            let from_address = from_address.clone();
            let to_address = to_address.clone();
            async move {
                client
                    .trace_filter(TraceQuery {
                        from_block: from,
                        to_block: to,
                        from_address,
                        to_address,
                    })
                    .await
            }
        })
        .await?;

        let referenced: HashSet<u64> = traces.iter().map(|trace| trace.block_number).collect();
        let referenced_txs: HashSet<B256> =
            traces.iter().map(|trace| trace.transaction_hash).collect();
        self.persist_referenced_blocks(&referenced, &referenced_txs)
            .await?;

        if filter.include_receipts() {
            self.fetch_and_persist_receipts(&referenced_txs).await?;
        }

        if !traces.is_empty() {
            self.store.insert_traces(self.chain.id, &traces).await?;
        }
        Ok(())
    }

    /// Fetches whole blocks over the required ranges, with transaction
    /// bodies when `with_transactions`.
    async fn fetch_and_persist_block_bodies(
        &mut self,
        required: &IntervalSet,
        with_transactions: bool,
    ) -> Result<()> {
        let client = self.client.clone();
        let fetched: Vec<(BlockRecord, Vec<TransactionRecord>)> =
            fetch_chunks(&self.policy, required, &|from, to| {
                let client = client.clone();
                async move {
                    let mut blocks = Vec::with_capacity((to - from + 1) as usize);
                    for number in from..=to {
                        let block = client
                            .get_block_by_number(number, with_transactions)
                            .await?;
                        blocks.push((block.block, block.transactions));
                    }
                    Ok(blocks)
                }
            })
            .await?;

        let blocks: Vec<BlockRecord> = fetched.iter().map(|(block, _)| block.clone()).collect();
        let transactions: Vec<TransactionRecord> = fetched
            .into_iter()
            .flat_map(|(_, transactions)| transactions)
            .collect();

        if !blocks.is_empty() {
            self.store.insert_blocks(self.chain.id, &blocks).await?;
        }
        if !transactions.is_empty() {
            self.store
                .insert_transactions(self.chain.id, &transactions)
                .await?;
        }
        Ok(())
    }

    /// Fetches blocks referenced by matched artifacts, deduplicated by
    /// number, persisting each with its referenced transactions.
    async fn persist_referenced_blocks(
        &mut self,
        block_numbers: &HashSet<u64>,
        referenced_txs: &HashSet<B256>,
    ) -> Result<()> {
        if block_numbers.is_empty() {
            return Ok(());
        }

        let mut blocks = Vec::with_capacity(block_numbers.len());
        let mut transactions = Vec::new();
        for &number in block_numbers {
            let fetched = self.client.get_block_by_number(number, true).await?;
            blocks.push(fetched.block);
            transactions.extend(
                fetched
                    .transactions
                    .into_iter()
                    .filter(|transaction| referenced_txs.contains(&transaction.hash)),
            );
        }

        self.store.insert_blocks(self.chain.id, &blocks).await?;
        if !transactions.is_empty() {
            self.store
                .insert_transactions(self.chain.id, &transactions)
                .await?;
        }
        Ok(())
    }

    async fn fetch_and_persist_receipts(&mut self, hashes: &HashSet<B256>) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        let mut receipts = Vec::with_capacity(hashes.len());
        for &hash in hashes {
            receipts.push(self.client.get_transaction_receipt(hash).await?);
        }
        self.store
            .insert_transaction_receipts(self.chain.id, &receipts)
            .await?;
        Ok(())
    }

    /// Extracts factory children from fetched logs, updating both the
    /// in-memory map and the store.
    async fn discover_children(&mut self, logs: &[LogRecord]) -> Result<()> {
        let factories: Vec<Factory> = self
            .builder
            .sources()
            .iter()
            .filter_map(|source| source.filter.factory().cloned())
            .collect();

        for factory in factories {
            let mut found = ChildAddresses::new();
            for log in logs {
                if let Some(child) = factory.extract_child_address(log) {
                    found.insert(child, log.block_number);
                }
            }
            if found.is_empty() {
                continue;
            }
            self.store
                .insert_child_addresses(self.chain.id, &factory, &found)
                .await?;
            self.children.entry(factory).or_default().merge(&found);
        }
        Ok(())
    }

    fn resolve_address_list(&self, spec: &AddressSpec) -> Option<Vec<Address>> {
        match spec {
            AddressSpec::All => None,
            AddressSpec::Static(addresses) => Some(addresses.clone()),
            AddressSpec::Factory(factory) => Some(
                self.children
                    .get(factory)
                    .map(|children| children.iter().map(|(&address, _)| address).collect())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Guarantees the interval's end block is in the store; its timestamp
    /// anchors the final cursor and finalize signals.
    async fn ensure_end_block(&mut self, end: u64) -> Result<()> {
        let stored = self.store.get_blocks_in_range(self.chain.id, end, end).await?;
        if stored.is_empty() {
            let fetched = self.client.get_block_by_number(end, false).await?;
            self.store
                .insert_blocks(self.chain.id, &[fetched.block])
                .await?;
        }
        Ok(())
    }

    /// Rebuilds and emits the interval's events from the store, in
    /// checkpoint order, closing with a finalize signal. Historical data is
    /// below the chain's finality horizon by definition.
    async fn emit_events(
        &mut self,
        interval: BlockInterval,
        resume_from: Option<Checkpoint>,
    ) -> Result<()> {
        let chain_id = self.chain.id;
        let blocks = self
            .store
            .get_blocks_in_range(chain_id, interval.from, interval.to)
            .await?;
        let logs = self
            .store
            .get_logs_in_range(chain_id, interval.from, interval.to)
            .await?;
        let traces = self
            .store
            .get_traces_in_range(chain_id, interval.from, interval.to)
            .await?;
        let transactions = self
            .store
            .get_transactions_in_range(chain_id, interval.from, interval.to)
            .await?;
        let receipts = self
            .store
            .get_receipts_in_range(chain_id, interval.from, interval.to)
            .await?;

        let mut per_block: BTreeMap<u64, ExtractedBlock> = blocks
            .into_iter()
            .map(|block| {
                (
                    block.number,
                    ExtractedBlock {
                        block,
                        ..Default::default()
                    },
                )
            })
            .collect();
        for log in logs {
            if let Some(extracted) = per_block.get_mut(&log.block_number) {
                extracted.logs.push(log);
            }
        }
        for trace in traces {
            if let Some(extracted) = per_block.get_mut(&trace.block_number) {
                extracted.traces.push(trace);
            }
        }
        for transaction in transactions {
            if let Some(extracted) = per_block.get_mut(&transaction.block_number) {
                extracted.transactions.push(transaction);
            }
        }
        for receipt in receipts {
            if let Some(extracted) = per_block.get_mut(&receipt.block_number) {
                extracted.receipts.push(receipt);
            }
        }

        let mut last_cursor = None;
        for (_, extracted) in per_block {
            let block_ref = extracted.block.block_ref();
            let mut events = self.builder.build(&extracted, &self.children);
            if let Some(resume) = resume_from {
                events.retain(|event| event.checkpoint > resume);
            }
            let cursor =
                Checkpoint::at_block_end(block_ref.timestamp, chain_id, block_ref.number);
            last_cursor = Some(cursor);

            if events.is_empty() && block_ref.number != interval.to {
                continue;
            }
            self.emit(ChainEvent::Block { events, cursor }).await?;
        }

        if let Some(cursor) = last_cursor {
            self.emit(ChainEvent::Finalize { checkpoint: cursor }).await?;
        }
        Ok(())
    }

    async fn emit(&self, signal: ChainEvent) -> Result<()> {
        self.signal_tx
            .send((self.chain.id, signal))
            .await
            .map_err(|_| HistoricalError::ChannelClosed)
    }
}
