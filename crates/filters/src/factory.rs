use std::{collections::HashMap, fmt};

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tracery_primitives::{ChainId, LogRecord};

/// Where the child address sits inside the parent log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChildLocation {
    Topic1,
    Topic2,
    Topic3,
    /// Byte offset into the log `data` field; the address is read 20 bytes
    /// right-aligned within the 32-byte word starting at the offset.
    DataOffset(usize),
}

impl fmt::Display for ChildLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic1 => write!(f, "topic1"),
            Self::Topic2 => write!(f, "topic2"),
            Self::Topic3 => write!(f, "topic3"),
            Self::DataOffset(offset) => write!(f, "offset{offset}"),
        }
    }
}

/// A log-derived address producer: contracts deployed by a parent contract
/// are discovered by indexing the parent's creation events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Factory {
    pub chain_id: ChainId,
    /// The parent contract emitting creation events.
    pub address: Address,
    /// topic0 of the creation event.
    pub event_selector: B256,
    pub child_location: ChildLocation,
}

impl Factory {
    /// Extracts the child address from a parent log, if the log is a
    /// creation event of this factory.
    pub fn extract_child_address(&self, log: &LogRecord) -> Option<Address> {
        if log.address != self.address || log.topic0() != Some(&self.event_selector) {
            return None;
        }

        let word: &B256 = match self.child_location {
            ChildLocation::Topic1 => log.topics.get(1)?,
            ChildLocation::Topic2 => log.topics.get(2)?,
            ChildLocation::Topic3 => log.topics.get(3)?,
            ChildLocation::DataOffset(offset) => {
                let bytes = log.data.get(offset..offset + 32)?;
                return Some(Address::from_slice(&bytes[12..32]));
            }
        };

        Some(Address::from_slice(&word[12..32]))
    }
}

/// Addresses produced by one factory, each with the block number of the
/// creation event that introduced it. The map never shrinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildAddresses(HashMap<Address, u64>);

impl ChildAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a child; an earlier first-seen block wins.
    pub fn insert(&mut self, address: Address, first_seen_block: u64) {
        self.0
            .entry(address)
            .and_modify(|existing| *existing = (*existing).min(first_seen_block))
            .or_insert(first_seen_block);
    }

    /// Merges another map, first-seen block winning per address.
    pub fn merge(&mut self, other: &ChildAddresses) {
        for (&address, &block) in &other.0 {
            self.insert(address, block);
        }
    }

    /// Is `address` a known child whose creation is at or before `block`?
    pub fn contains_at(&self, address: &Address, block: u64) -> bool {
        self.0.get(address).is_some_and(|&first| first <= block)
    }

    pub fn first_seen(&self, address: &Address) -> Option<u64> {
        self.0.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &u64)> {
        self.0.iter()
    }
}

impl FromIterator<(Address, u64)> for ChildAddresses {
    fn from_iter<I: IntoIterator<Item = (Address, u64)>>(iter: I) -> Self {
        let mut children = Self::new();
        for (address, block) in iter {
            children.insert(address, block);
        }
        children
    }
}
