//! Fetching everything a single block contributes to the event stream.

use std::collections::HashSet;

use alloy_primitives::B256;
use tracery_events::ExtractedBlock;
use tracery_filters::Factory;
use tracery_primitives::BlockRef;
use tracery_rpc::{EthClient, LogQuery};

use crate::{ctx::FetchSpec, error::Result};

/// Fetches the full artifact set for one block.
///
/// Logs are fetched for the whole block and matched locally; receipts only
/// for transactions the filter set marked as receipt-bearing.
pub(crate) async fn extract_block<C: EthClient + ?Sized>(
    client: &C,
    block_ref: BlockRef,
    fetch: FetchSpec,
) -> Result<ExtractedBlock> {
    let with_transactions = client
        .get_block_by_hash(block_ref.hash, fetch.transactions)
        .await?;

    let logs = client
        .get_logs(LogQuery {
            address: None,
            topics: Default::default(),
            from_block: block_ref.number,
            to_block: block_ref.number,
        })
        .await?;

    let traces = if fetch.traces {
        client.trace_block(block_ref.number).await?
    } else {
        Vec::new()
    };

    let receipts = if fetch.receipts {
        // One receipt per referenced transaction, deduplicated by hash.
        let hashes: HashSet<B256> = logs
            .iter()
            .map(|log| log.transaction_hash)
            .chain(traces.iter().map(|trace| trace.transaction_hash))
            .collect();
        let mut receipts = Vec::with_capacity(hashes.len());
        for hash in hashes {
            receipts.push(client.get_transaction_receipt(hash).await?);
        }
        receipts
    } else {
        Vec::new()
    };

    Ok(ExtractedBlock {
        block: with_transactions.block,
        logs,
        transactions: with_transactions.transactions,
        receipts,
        traces,
    })
}

/// Scans an extracted block's logs for factory creation events, returning
/// `(factory, child, first_seen)` triples.
pub(crate) fn discover_children<'a>(
    extracted: &'a ExtractedBlock,
    factories: impl Iterator<Item = &'a Factory>,
) -> Vec<(Factory, alloy_primitives::Address, u64)> {
    let mut found = Vec::new();
    for factory in factories {
        for log in &extracted.logs {
            if let Some(child) = factory.extract_child_address(log) {
                found.push((factory.clone(), child, log.block_number));
            }
        }
    }
    found
}
