//! Matching raw chain records against filters.
//!
//! Factory-backed address specs resolve through the per-chain child-address
//! map; a child matches only when its creation block is at or before the
//! record's block (factory causality).

use alloy_primitives::{Address, U256};
use tracery_primitives::{CallType, LogRecord, TraceRecord, TransactionRecord};

use crate::{AddressSpec, ChildAddresses, LogFilter, TraceFilter, TransactionFilter, TransferFilter};

impl AddressSpec {
    /// Does `address` satisfy this spec at `block`?
    pub fn matches(
        &self,
        address: Option<&Address>,
        children: Option<&ChildAddresses>,
        block: u64,
    ) -> bool {
        match self {
            Self::All => true,
            Self::Static(addresses) => {
                address.is_some_and(|address| addresses.contains(address))
            }
            Self::Factory(_) => match (address, children) {
                (Some(address), Some(children)) => children.contains_at(address, block),
                _ => false,
            },
        }
    }
}

fn in_range(from: Option<u64>, to: Option<u64>, block: u64) -> bool {
    from.is_none_or(|from| block >= from) && to.is_none_or(|to| block <= to)
}

fn topic_matches(spec: &Option<Vec<alloy_primitives::B256>>, actual: Option<&alloy_primitives::B256>) -> bool {
    match spec {
        None => true,
        Some(values) if values.is_empty() => true,
        Some(values) => actual.is_some_and(|topic| values.contains(topic)),
    }
}

impl LogFilter {
    pub fn matches(&self, log: &LogRecord, children: Option<&ChildAddresses>) -> bool {
        in_range(self.from_block, self.to_block, log.block_number)
            && self
                .address
                .matches(Some(&log.address), children, log.block_number)
            && topic_matches(&self.topic0, log.topics.first())
            && topic_matches(&self.topic1, log.topics.get(1))
            && topic_matches(&self.topic2, log.topics.get(2))
            && topic_matches(&self.topic3, log.topics.get(3))
    }
}

impl TransactionFilter {
    pub fn matches(
        &self,
        transaction: &TransactionRecord,
        from_children: Option<&ChildAddresses>,
        to_children: Option<&ChildAddresses>,
    ) -> bool {
        in_range(self.from_block, self.to_block, transaction.block_number)
            && self.from_address.matches(
                Some(&transaction.from),
                from_children,
                transaction.block_number,
            )
            && self.to_address.matches(
                transaction.to.as_ref(),
                to_children,
                transaction.block_number,
            )
    }
}

impl TransferFilter {
    /// A transfer is a successful call trace carrying value.
    pub fn matches(
        &self,
        trace: &TraceRecord,
        from_children: Option<&ChildAddresses>,
        to_children: Option<&ChildAddresses>,
    ) -> bool {
        trace.value > U256::ZERO
            && trace.error.is_none()
            && in_range(self.from_block, self.to_block, trace.block_number)
            && self
                .from_address
                .matches(Some(&trace.from), from_children, trace.block_number)
            && self
                .to_address
                .matches(trace.to.as_ref(), to_children, trace.block_number)
    }
}

impl TraceFilter {
    pub fn matches(
        &self,
        trace: &TraceRecord,
        from_children: Option<&ChildAddresses>,
        to_children: Option<&ChildAddresses>,
    ) -> bool {
        in_range(self.from_block, self.to_block, trace.block_number)
            && self.call_type.is_none_or(|kind| kind == trace.call_type)
            && (self.function_selectors.is_empty()
                || trace
                    .selector()
                    .is_some_and(|selector| {
                        self.function_selectors
                            .iter()
                            .any(|expected| expected.as_slice() == selector)
                    }))
            && self
                .from_address
                .matches(Some(&trace.from), from_children, trace.block_number)
            && self
                .to_address
                .matches(trace.to.as_ref(), to_children, trace.block_number)
    }
}
