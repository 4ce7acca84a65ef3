//! Assembles typed events from one extracted block.

use std::collections::{HashMap, HashSet};

use alloy_json_abi::{Event as AbiEvent, Function as AbiFunction};
use alloy_primitives::{Address, B256};
use tracing::warn;
use tracery_filters::{ChildAddresses, Factory, Filter};
use tracery_primitives::{
    BlockRecord, ChainId, Checkpoint, EventTypeTag, LogRecord, TraceRecord,
    TransactionReceiptRecord, TransactionRecord,
};

use crate::{
    decoder::{decode_function_payload, decode_log_payload},
    Event, EventKind,
};

/// One user-registered event source: a filter plus the decoding and dispatch
/// metadata attached to it.
#[derive(Debug, Clone)]
pub struct EventSource {
    pub filter: Filter,
    pub callback_index: usize,
    /// Contract (or source) name, used for setup synthesis and reports.
    pub contract_name: String,
    /// ABI item for decoding matched logs.
    pub event_abi: Option<AbiEvent>,
    /// ABI item for decoding matched traces.
    pub function_abi: Option<AbiFunction>,
    /// Whether a setup callback exists for this contract.
    pub emit_setup: bool,
    /// Address handed to the setup callback.
    pub setup_address: Option<Address>,
}

/// Everything fetched for one block.
#[derive(Debug, Clone, Default)]
pub struct ExtractedBlock {
    pub block: BlockRecord,
    pub logs: Vec<LogRecord>,
    pub transactions: Vec<TransactionRecord>,
    pub receipts: Vec<TransactionReceiptRecord>,
    pub traces: Vec<TraceRecord>,
}

/// Builds the ordered event sequence for a chain, one block at a time.
///
/// Stateful only for setup bookkeeping: exactly one setup event is emitted
/// per contract, ahead of that contract's first real event.
#[derive(Debug)]
pub struct EventBuilder {
    chain_id: ChainId,
    sources: Vec<EventSource>,
    setup_pending: HashSet<String>,
}

impl EventBuilder {
    pub fn new(chain_id: ChainId, sources: Vec<EventSource>) -> Self {
        let setup_pending = sources
            .iter()
            .filter(|source| source.emit_setup)
            .map(|source| source.contract_name.clone())
            .collect();
        Self {
            chain_id,
            sources,
            setup_pending,
        }
    }

    pub fn sources(&self) -> &[EventSource] {
        &self.sources
    }

    /// Produces this block's events in checkpoint order.
    pub fn build(
        &mut self,
        extracted: &ExtractedBlock,
        children: &HashMap<Factory, ChildAddresses>,
    ) -> Vec<Event> {
        let block = &extracted.block;
        let block_ref = block.block_ref();

        let transactions_by_index: HashMap<u64, &TransactionRecord> = extracted
            .transactions
            .iter()
            .map(|transaction| (transaction.transaction_index, transaction))
            .collect();
        let receipts_by_hash: HashMap<B256, &TransactionReceiptRecord> = extracted
            .receipts
            .iter()
            .map(|receipt| (receipt.transaction_hash, receipt))
            .collect();

        let mut events = Vec::new();

        for source in &self.sources {
            let factory_children = source
                .filter
                .factory()
                .and_then(|factory| children.get(factory));

            match &source.filter {
                Filter::Log(filter) => {
                    for log in &extracted.logs {
                        if !filter.matches(log, factory_children) {
                            continue;
                        }
                        events.push(self.make_log_event(
                            source,
                            block,
                            log,
                            transactions_by_index.get(&log.transaction_index).copied(),
                            filter
                                .include_receipts
                                .then(|| receipts_by_hash.get(&log.transaction_hash).copied())
                                .flatten(),
                        ));
                    }
                }
                Filter::Block(filter) => {
                    if filter.selects(block.number) {
                        events.push(Event {
                            chain_id: self.chain_id,
                            checkpoint: self.checkpoint(block, EventTypeTag::Block, 0, 0),
                            callback_index: source.callback_index,
                            block: block_ref,
                            kind: EventKind::Block {
                                block: block.clone(),
                            },
                        });
                    }
                }
                Filter::Transaction(filter) => {
                    for transaction in &extracted.transactions {
                        if !filter.matches(transaction, factory_children, factory_children) {
                            continue;
                        }
                        events.push(Event {
                            chain_id: self.chain_id,
                            checkpoint: self.checkpoint(
                                block,
                                EventTypeTag::Transaction,
                                transaction.transaction_index,
                                0,
                            ),
                            callback_index: source.callback_index,
                            block: block_ref,
                            kind: EventKind::Transaction {
                                transaction: transaction.clone(),
                                receipt: filter
                                    .include_receipts
                                    .then(|| {
                                        receipts_by_hash.get(&transaction.hash).copied().cloned()
                                    })
                                    .flatten(),
                            },
                        });
                    }
                }
                Filter::Transfer(filter) => {
                    for trace in &extracted.traces {
                        if !filter.matches(trace, factory_children, factory_children) {
                            continue;
                        }
                        events.push(Event {
                            chain_id: self.chain_id,
                            checkpoint: self.checkpoint(
                                block,
                                EventTypeTag::Transfer,
                                trace.transaction_index,
                                trace.trace_index,
                            ),
                            callback_index: source.callback_index,
                            block: block_ref,
                            kind: EventKind::Transfer {
                                trace: trace.clone(),
                                transaction: transactions_by_index
                                    .get(&trace.transaction_index)
                                    .copied()
                                    .cloned(),
                            },
                        });
                    }
                }
                Filter::Trace(filter) => {
                    for trace in &extracted.traces {
                        if !filter.matches(trace, factory_children, factory_children) {
                            continue;
                        }
                        events.push(self.make_trace_event(
                            source,
                            block,
                            trace,
                            transactions_by_index
                                .get(&trace.transaction_index)
                                .copied()
                                .cloned(),
                        ));
                    }
                }
            }
        }

        events.sort_by(|a, b| {
            a.checkpoint
                .cmp(&b.checkpoint)
                .then(a.callback_index.cmp(&b.callback_index))
        });

        self.insert_setup_events(&mut events, block);

        events
    }

    fn checkpoint(
        &self,
        block: &BlockRecord,
        event_type: EventTypeTag,
        transaction_index: u64,
        event_index: u64,
    ) -> Checkpoint {
        Checkpoint {
            block_timestamp: block.timestamp,
            chain_id: self.chain_id,
            block_number: block.number,
            event_type,
            transaction_index,
            event_index,
        }
    }

    fn make_log_event(
        &self,
        source: &EventSource,
        block: &BlockRecord,
        log: &LogRecord,
        transaction: Option<&TransactionRecord>,
        receipt: Option<&TransactionReceiptRecord>,
    ) -> Event {
        let checkpoint = self.checkpoint(
            block,
            EventTypeTag::Log,
            log.transaction_index,
            log.log_index,
        );

        let kind = match &source.event_abi {
            Some(abi_event) => match decode_log_payload(abi_event, log) {
                Ok(decoded) => EventKind::Log {
                    log: log.clone(),
                    transaction: transaction.cloned(),
                    receipt: receipt.cloned(),
                    decoded: Some(decoded),
                },
                Err(error) => {
                    warn!(
                        contract = %source.contract_name,
                        block_number = log.block_number,
                        log_index = log.log_index,
                        %error,
                        "matched log failed to decode"
                    );
                    EventKind::DecodeError {
                        source: EventTypeTag::Log,
                        message: error.to_string(),
                    }
                }
            },
            None => EventKind::Log {
                log: log.clone(),
                transaction: transaction.cloned(),
                receipt: receipt.cloned(),
                decoded: None,
            },
        };

        Event {
            chain_id: self.chain_id,
            checkpoint,
            callback_index: source.callback_index,
            block: block.block_ref(),
            kind,
        }
    }

    fn make_trace_event(
        &self,
        source: &EventSource,
        block: &BlockRecord,
        trace: &TraceRecord,
        transaction: Option<TransactionRecord>,
    ) -> Event {
        let checkpoint = self.checkpoint(
            block,
            EventTypeTag::Trace,
            trace.transaction_index,
            trace.trace_index,
        );

        let kind = match &source.function_abi {
            Some(abi_function) => {
                match decode_function_payload(abi_function, &trace.input, Some(&trace.output)) {
                    Ok((decoded_args, decoded_result)) => EventKind::Trace {
                        trace: trace.clone(),
                        transaction,
                        decoded_args: Some(decoded_args),
                        decoded_result,
                    },
                    Err(error) => {
                        warn!(
                            contract = %source.contract_name,
                            block_number = trace.block_number,
                            trace_index = trace.trace_index,
                            %error,
                            "matched trace failed to decode"
                        );
                        EventKind::DecodeError {
                            source: EventTypeTag::Trace,
                            message: error.to_string(),
                        }
                    }
                }
            }
            None => EventKind::Trace {
                trace: trace.clone(),
                transaction,
                decoded_args: None,
                decoded_result: None,
            },
        };

        Event {
            chain_id: self.chain_id,
            checkpoint,
            callback_index: source.callback_index,
            block: block.block_ref(),
            kind,
        }
    }

    /// Inserts one setup event ahead of the first real event of each contract
    /// that still owes one.
    fn insert_setup_events(&mut self, events: &mut Vec<Event>, block: &BlockRecord) {
        if self.setup_pending.is_empty() || events.is_empty() {
            return;
        }

        let mut insertions = Vec::new();
        for (position, event) in events.iter().enumerate() {
            let Some(source) = self
                .sources
                .iter()
                .find(|source| source.callback_index == event.callback_index)
            else {
                continue;
            };
            if self.setup_pending.remove(&source.contract_name) {
                insertions.push((
                    position,
                    Event {
                        chain_id: self.chain_id,
                        checkpoint: self.checkpoint(block, EventTypeTag::Setup, 0, 0),
                        callback_index: event.callback_index,
                        block: block.block_ref(),
                        kind: EventKind::Setup {
                            contract: source.setup_address.unwrap_or(Address::ZERO),
                        },
                    },
                ));
            }
        }

        // Insert back-to-front so earlier positions stay valid.
        for (position, setup) in insertions.into_iter().rev() {
            events.insert(position, setup);
        }
    }
}
