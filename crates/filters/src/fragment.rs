//! Fragment decomposition: the minimal cache-key slices of a filter.
//!
//! A filter with multi-valued address or topic fields decomposes into the
//! cartesian product of those fields. Fragment ids are stable strings, so a
//! filter written two different ways hits the same sync-store cache rows.

use std::fmt;

use alloy_primitives::{Address, FixedBytes, B256};
use itertools::iproduct;
use serde::{Deserialize, Serialize};
use tracery_primitives::{CallType, ChainId};

use crate::{
    filter::{AddressSpec, TopicSpec},
    BlockFilter, Factory, Filter, LogFilter, TraceFilter, TransactionFilter, TransferFilter,
};

/// Single-valued address slot of a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentAddress {
    Null,
    Static(Address),
    Factory {
        address: Address,
        event_selector: B256,
        child_location: crate::ChildLocation,
    },
}

impl FragmentAddress {
    fn from_factory(factory: &Factory) -> Self {
        Self::Factory {
            address: factory.address,
            event_selector: factory.event_selector,
            child_location: factory.child_location,
        }
    }
}

impl fmt::Display for FragmentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Static(address) => write!(f, "{address}"),
            Self::Factory {
                address,
                event_selector,
                child_location,
            } => write!(f, "{address}_{event_selector}_{child_location}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fragment {
    Log {
        chain_id: ChainId,
        address: FragmentAddress,
        topic0: Option<B256>,
        topic1: Option<B256>,
        topic2: Option<B256>,
        topic3: Option<B256>,
        include_receipts: bool,
    },
    Block {
        chain_id: ChainId,
        interval: u64,
        offset: u64,
    },
    Transaction {
        chain_id: ChainId,
        from_address: FragmentAddress,
        to_address: FragmentAddress,
        include_receipts: bool,
    },
    Transfer {
        chain_id: ChainId,
        from_address: FragmentAddress,
        to_address: FragmentAddress,
        include_receipts: bool,
    },
    Trace {
        chain_id: ChainId,
        from_address: FragmentAddress,
        to_address: FragmentAddress,
        function_selector: Option<FixedBytes<4>>,
        call_type: Option<CallType>,
        include_receipts: bool,
    },
}

impl Fragment {
    /// The stable cache-key string.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

fn fmt_topic(topic: &Option<B256>) -> String {
    match topic {
        Some(value) => value.to_string(),
        None => "null".to_string(),
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log {
                chain_id,
                address,
                topic0,
                topic1,
                topic2,
                topic3,
                include_receipts,
            } => write!(
                f,
                "log_{chain_id}_{address}_{}_{}_{}_{}_{}",
                fmt_topic(topic0),
                fmt_topic(topic1),
                fmt_topic(topic2),
                fmt_topic(topic3),
                *include_receipts as u8,
            ),
            Self::Block {
                chain_id,
                interval,
                offset,
            } => write!(f, "block_{chain_id}_{interval}_{offset}"),
            Self::Transaction {
                chain_id,
                from_address,
                to_address,
                include_receipts,
            } => write!(
                f,
                "transaction_{chain_id}_{from_address}_{to_address}_{}",
                *include_receipts as u8,
            ),
            Self::Transfer {
                chain_id,
                from_address,
                to_address,
                include_receipts,
            } => write!(
                f,
                "transfer_{chain_id}_{from_address}_{to_address}_{}",
                *include_receipts as u8,
            ),
            Self::Trace {
                chain_id,
                from_address,
                to_address,
                function_selector,
                call_type,
                include_receipts,
            } => {
                let selector = match function_selector {
                    Some(selector) => selector.to_string(),
                    None => "null".to_string(),
                };
                let call_type = match call_type {
                    Some(kind) => format!("{kind:?}").to_lowercase(),
                    None => "null".to_string(),
                };
                write!(
                    f,
                    "trace_{chain_id}_{from_address}_{to_address}_{selector}_{call_type}_{}",
                    *include_receipts as u8,
                )
            }
        }
    }
}

fn address_axis(spec: &AddressSpec) -> Vec<FragmentAddress> {
    match spec {
        AddressSpec::All => vec![FragmentAddress::Null],
        AddressSpec::Static(addresses) if addresses.is_empty() => vec![FragmentAddress::Null],
        AddressSpec::Static(addresses) => addresses
            .iter()
            .map(|&address| FragmentAddress::Static(address))
            .collect(),
        AddressSpec::Factory(factory) => vec![FragmentAddress::from_factory(factory)],
    }
}

fn topic_axis(spec: &TopicSpec) -> Vec<Option<B256>> {
    match spec {
        Some(values) if !values.is_empty() => values.iter().copied().map(Some).collect(),
        _ => vec![None],
    }
}

fn selector_axis(selectors: &[FixedBytes<4>]) -> Vec<Option<FixedBytes<4>>> {
    if selectors.is_empty() {
        vec![None]
    } else {
        selectors.iter().copied().map(Some).collect()
    }
}

impl Filter {
    /// Decomposes into the cartesian product of multi-valued fields.
    pub fn fragments(&self) -> Vec<Fragment> {
        match self {
            Filter::Log(filter) => log_fragments(filter),
            Filter::Block(filter) => block_fragments(filter),
            Filter::Transaction(filter) => transaction_fragments(filter),
            Filter::Transfer(filter) => transfer_fragments(filter),
            Filter::Trace(filter) => trace_fragments(filter),
        }
    }
}

fn log_fragments(filter: &LogFilter) -> Vec<Fragment> {
    iproduct!(
        address_axis(&filter.address),
        topic_axis(&filter.topic0),
        topic_axis(&filter.topic1),
        topic_axis(&filter.topic2),
        topic_axis(&filter.topic3)
    )
    .map(|(address, topic0, topic1, topic2, topic3)| Fragment::Log {
        chain_id: filter.chain_id,
        address,
        topic0,
        topic1,
        topic2,
        topic3,
        include_receipts: filter.include_receipts,
    })
    .collect()
}

fn block_fragments(filter: &BlockFilter) -> Vec<Fragment> {
    vec![Fragment::Block {
        chain_id: filter.chain_id,
        interval: filter.interval,
        offset: filter.offset,
    }]
}

fn transaction_fragments(filter: &TransactionFilter) -> Vec<Fragment> {
    iproduct!(
        address_axis(&filter.from_address),
        address_axis(&filter.to_address)
    )
    .map(|(from_address, to_address)| Fragment::Transaction {
        chain_id: filter.chain_id,
        from_address,
        to_address,
        include_receipts: filter.include_receipts,
    })
    .collect()
}

fn transfer_fragments(filter: &TransferFilter) -> Vec<Fragment> {
    iproduct!(
        address_axis(&filter.from_address),
        address_axis(&filter.to_address)
    )
    .map(|(from_address, to_address)| Fragment::Transfer {
        chain_id: filter.chain_id,
        from_address,
        to_address,
        include_receipts: filter.include_receipts,
    })
    .collect()
}

fn trace_fragments(filter: &TraceFilter) -> Vec<Fragment> {
    iproduct!(
        address_axis(&filter.from_address),
        address_axis(&filter.to_address),
        selector_axis(&filter.function_selectors)
    )
    .map(|(from_address, to_address, function_selector)| Fragment::Trace {
        chain_id: filter.chain_id,
        from_address,
        to_address,
        function_selector,
        call_type: filter.call_type,
        include_receipts: filter.include_receipts,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;
    use crate::ChildLocation;

    fn make_log_filter(address: AddressSpec, topic0: TopicSpec) -> LogFilter {
        LogFilter {
            chain_id: 1,
            from_block: None,
            to_block: None,
            address,
            topic0,
            topic1: None,
            topic2: None,
            topic3: None,
            include_receipts: false,
        }
    }

    #[test]
    fn test_single_address_single_topic_is_one_fragment() {
        let filter = Filter::Log(make_log_filter(
            AddressSpec::Static(vec![address!("00000000000000000000000000000000000000aa")]),
            Some(vec![B256::ZERO]),
        ));
        assert_eq!(filter.fragments().len(), 1);
    }

    #[test]
    fn test_cartesian_product_over_addresses_and_topics() {
        let filter = Filter::Log(make_log_filter(
            AddressSpec::Static(vec![
                address!("00000000000000000000000000000000000000aa"),
                address!("00000000000000000000000000000000000000bb"),
            ]),
            Some(vec![B256::ZERO, B256::repeat_byte(1), B256::repeat_byte(2)]),
        ));
        assert_eq!(filter.fragments().len(), 6);
    }

    #[test]
    fn test_wildcard_fields_collapse_to_null() {
        let filter = Filter::Log(make_log_filter(AddressSpec::All, None));
        let fragments = filter.fragments();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].id(), "log_1_null_null_null_null_null_0");
    }

    #[test]
    fn test_equal_fragment_sets_for_reordered_filters() {
        let a = address!("00000000000000000000000000000000000000aa");
        let b = address!("00000000000000000000000000000000000000bb");

        let first = Filter::Log(make_log_filter(AddressSpec::Static(vec![a, b]), None));
        let second = Filter::Log(make_log_filter(AddressSpec::Static(vec![b, a]), None));

        let mut first_ids: Vec<String> =
            first.fragments().iter().map(Fragment::id).collect();
        let mut second_ids: Vec<String> =
            second.fragments().iter().map(Fragment::id).collect();
        first_ids.sort();
        second_ids.sort();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn test_factory_fragment_id_carries_location() {
        let factory = Factory {
            chain_id: 1,
            address: address!("00000000000000000000000000000000000000fa"),
            event_selector: B256::repeat_byte(9),
            child_location: ChildLocation::Topic2,
        };
        let filter = Filter::Log(make_log_filter(AddressSpec::Factory(factory), None));
        let id = filter.fragments()[0].id();
        assert!(id.starts_with("log_1_0x"));
        assert!(id.contains("_topic2_"));
    }

    #[test]
    fn test_data_offset_location_id() {
        let factory = Factory {
            chain_id: 1,
            address: address!("00000000000000000000000000000000000000fa"),
            event_selector: B256::repeat_byte(9),
            child_location: ChildLocation::DataOffset(64),
        };
        let filter = Filter::Log(make_log_filter(AddressSpec::Factory(factory), None));
        assert!(filter.fragments()[0].id().contains("_offset64_"));
    }

    #[test]
    fn test_trace_fragments_cross_selectors() {
        let filter = Filter::Trace(TraceFilter {
            chain_id: 1,
            from_block: None,
            to_block: None,
            from_address: AddressSpec::All,
            to_address: AddressSpec::Static(vec![
                address!("00000000000000000000000000000000000000aa"),
                address!("00000000000000000000000000000000000000bb"),
            ]),
            function_selectors: vec![FixedBytes::from([1, 2, 3, 4]), FixedBytes::from([5, 6, 7, 8])],
            call_type: Some(CallType::Call),
            include_receipts: false,
        });
        assert_eq!(filter.fragments().len(), 4);
    }

    #[test]
    fn test_block_fragment_id() {
        let filter = Filter::Block(BlockFilter {
            chain_id: 10,
            from_block: None,
            to_block: None,
            interval: 100,
            offset: 3,
        });
        assert_eq!(filter.fragments()[0].id(), "block_10_100_3");
    }
}
