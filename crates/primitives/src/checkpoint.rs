//! Composite ordering key for events across all chains.
//!
//! A checkpoint totally orders every event the engine ever emits. The encoded
//! form is a fixed-width decimal string whose lexicographic order equals the
//! numeric order of the field tuple, so checkpoints can be persisted and
//! compared as plain strings by any store.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const TIMESTAMP_DIGITS: usize = 10;
const CHAIN_ID_DIGITS: usize = 16;
const BLOCK_NUMBER_DIGITS: usize = 16;
const TYPE_TAG_DIGITS: usize = 1;
const TX_INDEX_DIGITS: usize = 16;
const EVENT_INDEX_DIGITS: usize = 16;

/// Length of an encoded checkpoint string.
pub const ENCODED_CHECKPOINT_LEN: usize = TIMESTAMP_DIGITS
    + CHAIN_ID_DIGITS
    + BLOCK_NUMBER_DIGITS
    + TYPE_TAG_DIGITS
    + TX_INDEX_DIGITS
    + EVENT_INDEX_DIGITS;

const MAX_10: u64 = 9_999_999_999;
const MAX_16: u64 = 9_999_999_999_999_999;

/// Ordering tag disambiguating event kinds within the same block position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(u8)]
pub enum EventTypeTag {
    #[default]
    Setup = 0,
    Block = 2,
    Transaction = 3,
    /// Traces order ahead of logs at the same transaction position.
    Trace = 4,
    Log = 5,
    Transfer = 6,
}

impl EventTypeTag {
    fn from_digit(digit: u8) -> Option<Self> {
        match digit {
            0 => Some(Self::Setup),
            2 => Some(Self::Block),
            3 => Some(Self::Transaction),
            4 => Some(Self::Trace),
            5 => Some(Self::Log),
            6 => Some(Self::Transfer),
            _ => None,
        }
    }
}

/// Composite ordering key: `(block_timestamp, chain_id, block_number,
/// event_type, transaction_index, event_index)`.
///
/// Timestamp-first ordering makes the omnichain merge wall-clock-like;
/// chain id and block number break ties deterministically, and the trailing
/// fields order events within a block. The derived `Ord` follows field
/// declaration order and therefore matches the encoded string order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Checkpoint {
    pub block_timestamp: u64,
    pub chain_id: u64,
    pub block_number: u64,
    pub event_type: EventTypeTag,
    pub transaction_index: u64,
    pub event_index: u64,
}

/// Failed to decode an encoded checkpoint string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointDecodeError {
    #[error("invalid encoded length {0}, expected {ENCODED_CHECKPOINT_LEN}")]
    InvalidLength(usize),

    #[error("non-decimal character in field {field}")]
    InvalidDigit { field: &'static str },

    #[error("unknown event type tag {0}")]
    UnknownTypeTag(u8),
}

impl Checkpoint {
    /// Orders before every real event.
    pub const ZERO: Checkpoint = Checkpoint {
        block_timestamp: 0,
        chain_id: 0,
        block_number: 0,
        event_type: EventTypeTag::Setup,
        transaction_index: 0,
        event_index: 0,
    };

    /// Orders after every encodable event.
    pub const MAX: Checkpoint = Checkpoint {
        block_timestamp: MAX_10,
        chain_id: MAX_16,
        block_number: MAX_16,
        event_type: EventTypeTag::Transfer,
        transaction_index: MAX_16,
        event_index: MAX_16,
    };

    /// The checkpoint just past every event a block can contain; used as a
    /// chain cursor after fully processing the block.
    pub fn at_block_end(block_timestamp: u64, chain_id: u64, block_number: u64) -> Self {
        Self {
            block_timestamp,
            chain_id,
            block_number,
            event_type: EventTypeTag::Transfer,
            transaction_index: MAX_16,
            event_index: MAX_16,
        }
    }

    /// Encodes to the fixed-width decimal form.
    ///
    /// Fields wider than their encoded slot saturate to the slot maximum so
    /// the width (and therefore the ordering guarantee) always holds.
    pub fn encode(&self) -> String {
        format!(
            "{:0w_ts$}{:0w_cid$}{:0w_bn$}{}{:0w_tx$}{:0w_ev$}",
            self.block_timestamp.min(MAX_10),
            self.chain_id.min(MAX_16),
            self.block_number.min(MAX_16),
            self.event_type as u8,
            self.transaction_index.min(MAX_16),
            self.event_index.min(MAX_16),
            w_ts = TIMESTAMP_DIGITS,
            w_cid = CHAIN_ID_DIGITS,
            w_bn = BLOCK_NUMBER_DIGITS,
            w_tx = TX_INDEX_DIGITS,
            w_ev = EVENT_INDEX_DIGITS,
        )
    }

    /// Decodes the fixed-width form. The all-zero string decodes to
    /// [`Checkpoint::ZERO`] ("before anything").
    pub fn decode(encoded: &str) -> Result<Self, CheckpointDecodeError> {
        if encoded.len() != ENCODED_CHECKPOINT_LEN || !encoded.is_ascii() {
            return Err(CheckpointDecodeError::InvalidLength(encoded.len()));
        }

        let mut cursor = 0usize;
        let mut take = |width: usize, field: &'static str| {
            let slice = &encoded[cursor..cursor + width];
            cursor += width;
            slice
                .parse::<u64>()
                .map_err(|_| CheckpointDecodeError::InvalidDigit { field })
        };

        let block_timestamp = take(TIMESTAMP_DIGITS, "block_timestamp")?;
        let chain_id = take(CHAIN_ID_DIGITS, "chain_id")?;
        let block_number = take(BLOCK_NUMBER_DIGITS, "block_number")?;
        let tag_digit = take(TYPE_TAG_DIGITS, "event_type")? as u8;
        let transaction_index = take(TX_INDEX_DIGITS, "transaction_index")?;
        let event_index = take(EVENT_INDEX_DIGITS, "event_index")?;

        let event_type = EventTypeTag::from_digit(tag_digit)
            .ok_or(CheckpointDecodeError::UnknownTypeTag(tag_digit))?;

        Ok(Self {
            block_timestamp,
            chain_id,
            block_number,
            event_type,
            transaction_index,
            event_index,
        })
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ts={} chain={} block={} type={:?} tx={} idx={}",
            self.block_timestamp,
            self.chain_id,
            self.block_number,
            self.event_type,
            self.transaction_index,
            self.event_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_checkpoint(timestamp: u64, chain_id: u64, block_number: u64) -> Checkpoint {
        Checkpoint {
            block_timestamp: timestamp,
            chain_id,
            block_number,
            event_type: EventTypeTag::Log,
            transaction_index: 0,
            event_index: 0,
        }
    }

    #[test]
    fn test_encode_width_is_fixed() {
        assert_eq!(Checkpoint::ZERO.encode().len(), ENCODED_CHECKPOINT_LEN);
        assert_eq!(Checkpoint::MAX.encode().len(), ENCODED_CHECKPOINT_LEN);
        assert_eq!(
            make_checkpoint(1_700_000_000, 1, 42).encode().len(),
            ENCODED_CHECKPOINT_LEN
        );
    }

    #[test]
    fn test_round_trip() {
        let checkpoint = Checkpoint {
            block_timestamp: 1_700_000_123,
            chain_id: 8453,
            block_number: 19_000_000,
            event_type: EventTypeTag::Trace,
            transaction_index: 7,
            event_index: 199,
        };
        assert_eq!(Checkpoint::decode(&checkpoint.encode()).unwrap(), checkpoint);
    }

    #[test]
    fn test_zero_checkpoint_decodes() {
        let all_zero = "0".repeat(ENCODED_CHECKPOINT_LEN);
        assert_eq!(Checkpoint::decode(&all_zero).unwrap(), Checkpoint::ZERO);
    }

    #[test]
    fn test_lexicographic_order_matches_tuple_order() {
        let ordered = [
            Checkpoint::ZERO,
            make_checkpoint(10, 1, 1),
            make_checkpoint(10, 2, 1),
            make_checkpoint(10, 2, 2),
            Checkpoint {
                transaction_index: 3,
                ..make_checkpoint(10, 2, 2)
            },
            make_checkpoint(11, 1, 1),
            Checkpoint::MAX,
        ];

        for window in ordered.windows(2) {
            assert!(window[0] < window[1]);
            assert!(window[0].encode() < window[1].encode());
        }
    }

    #[test]
    fn test_trace_orders_before_log_at_same_position() {
        let log = make_checkpoint(10, 1, 5);
        let trace = Checkpoint {
            event_type: EventTypeTag::Trace,
            ..log
        };
        assert!(trace < log);
        assert!(trace.encode() < log.encode());
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        assert_eq!(
            Checkpoint::decode("123"),
            Err(CheckpointDecodeError::InvalidLength(3))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let mut encoded = Checkpoint::ZERO.encode();
        let tag_pos = TIMESTAMP_DIGITS + CHAIN_ID_DIGITS + BLOCK_NUMBER_DIGITS;
        encoded.replace_range(tag_pos..tag_pos + 1, "9");
        assert_eq!(
            Checkpoint::decode(&encoded),
            Err(CheckpointDecodeError::UnknownTypeTag(9))
        );
    }

    #[test]
    fn test_min_max_by_ord() {
        let a = make_checkpoint(10, 1, 1);
        let b = make_checkpoint(10, 1, 2);
        assert_eq!(a.min(b), a);
        assert_eq!(a.max(b), b);
    }
}
