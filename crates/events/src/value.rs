use alloy_dyn_abi::DynSolValue;
use alloy_primitives::hex;
use serde::Serialize;

/// Decoded ABI data as a plain typed tree.
///
/// Callbacks and error reports consume this instead of reflecting over
/// dynamic ABI values; everything serializes cleanly to JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    /// Integers that fit a machine word.
    Int(i64),
    /// Wider integers, as a decimal string with sign.
    BigInt(String),
    /// Addresses, hashes, fixed bytes: `0x`-prefixed.
    Hex(String),
    Bytes(Vec<u8>),
    String(String),
    List(Vec<Value>),
    /// Named fields in declaration order.
    Struct(Vec<(String, Value)>),
}

impl Value {
    /// Pretty JSON, used in user-facing error reports.
    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }

    pub(crate) fn from_sol(value: &DynSolValue) -> Value {
        match value {
            DynSolValue::Bool(b) => Value::Bool(*b),
            DynSolValue::Int(i, _) => match i64::try_from(*i) {
                Ok(small) => Value::Int(small),
                Err(_) => Value::BigInt(i.to_string()),
            },
            DynSolValue::Uint(u, _) => match u64::try_from(*u) {
                Ok(small) if small <= i64::MAX as u64 => Value::Int(small as i64),
                _ => Value::BigInt(u.to_string()),
            },
            DynSolValue::Address(address) => Value::Hex(address.to_string()),
            DynSolValue::Function(function) => Value::Hex(function.to_string()),
            DynSolValue::FixedBytes(word, size) => {
                Value::Hex(hex::encode_prefixed(&word[..*size]))
            }
            DynSolValue::Bytes(bytes) => Value::Bytes(bytes.clone()),
            DynSolValue::String(s) => Value::String(s.clone()),
            DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
                Value::List(items.iter().map(Value::from_sol).collect())
            }
            DynSolValue::Tuple(items) => {
                Value::List(items.iter().map(Value::from_sol).collect())
            }
            DynSolValue::CustomStruct {
                prop_names, tuple, ..
            } => Value::Struct(
                prop_names
                    .iter()
                    .cloned()
                    .zip(tuple.iter().map(Value::from_sol))
                    .collect(),
            ),
        }
    }

    /// Builds a struct value from named fields.
    pub fn record(fields: Vec<(String, Value)>) -> Value {
        Value::Struct(fields)
    }
}
