//! Runtime ABI decoding against user-supplied ABI items.

use alloy_dyn_abi::{EventExt, FunctionExt, JsonAbiExt};
use alloy_json_abi::{Event as AbiEvent, Function as AbiFunction};
use alloy_primitives::Bytes;
use thiserror::Error;
use tracery_primitives::LogRecord;

use crate::Value;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log does not decode as {event}: {message}")]
    Log { event: String, message: String },

    #[error("calldata does not decode as {function}: {message}")]
    FunctionInput { function: String, message: String },

    #[error("return data does not decode as {function}: {message}")]
    FunctionOutput { function: String, message: String },
}

/// Decodes a log against an ABI event into a named-field struct value.
///
/// Indexed and non-indexed parameters are reassembled in declaration order.
pub fn decode_log_payload(abi_event: &AbiEvent, log: &LogRecord) -> Result<Value, DecodeError> {
    let decoded = abi_event
        .decode_log_parts(log.topics.iter().copied(), &log.data)
        .map_err(|error| DecodeError::Log {
            event: abi_event.name.clone(),
            message: error.to_string(),
        })?;

    let mut indexed = decoded.indexed.iter();
    let mut body = decoded.body.iter();
    let mut fields = Vec::with_capacity(abi_event.inputs.len());

    for (position, input) in abi_event.inputs.iter().enumerate() {
        let source = if input.indexed {
            indexed.next()
        } else {
            body.next()
        };
        let Some(value) = source else {
            return Err(DecodeError::Log {
                event: abi_event.name.clone(),
                message: format!("missing value for parameter {position}"),
            });
        };
        let name = if input.name.is_empty() {
            format!("arg{position}")
        } else {
            input.name.clone()
        };
        fields.push((name, Value::from_sol(value)));
    }

    Ok(Value::record(fields))
}

/// Decodes trace calldata (and return data, when present) against an ABI
/// function.
pub fn decode_function_payload(
    abi_function: &AbiFunction,
    input: &Bytes,
    output: Option<&Bytes>,
) -> Result<(Value, Option<Value>), DecodeError> {
    // Skip the 4-byte selector; `abi_decode_input` expects bare arguments.
    let args_data = input.get(4..).unwrap_or_default();
    let args = abi_function
        .abi_decode_input(args_data)
        .map_err(|error| DecodeError::FunctionInput {
            function: abi_function.name.clone(),
            message: error.to_string(),
        })?;

    let args_value = Value::record(
        abi_function
            .inputs
            .iter()
            .enumerate()
            .zip(args.iter())
            .map(|((position, param), value)| {
                let name = if param.name.is_empty() {
                    format!("arg{position}")
                } else {
                    param.name.clone()
                };
                (name, Value::from_sol(value))
            })
            .collect(),
    );

    let result_value = match output {
        Some(output) if !output.is_empty() => {
            let results = abi_function.abi_decode_output(output).map_err(|error| {
                DecodeError::FunctionOutput {
                    function: abi_function.name.clone(),
                    message: error.to_string(),
                }
            })?;
            Some(match results.as_slice() {
                [single] => Value::from_sol(single),
                many => Value::List(many.iter().map(Value::from_sol).collect()),
            })
        }
        _ => None,
    };

    Ok((args_value, result_value))
}

#[cfg(test)]
mod tests {
    use alloy_dyn_abi::DynSolValue;
    use alloy_primitives::{Address, B256, U256};

    use super::*;

    fn make_transfer_event() -> AbiEvent {
        serde_json::from_value(serde_json::json!({
            "type": "event",
            "name": "Transfer",
            "inputs": [
                { "name": "from", "type": "address", "indexed": true },
                { "name": "to", "type": "address", "indexed": true },
                { "name": "value", "type": "uint256", "indexed": false },
            ],
            "anonymous": false,
        }))
        .unwrap()
    }

    fn make_transfer_log(value: u64) -> LogRecord {
        let event = make_transfer_event();
        let from = Address::repeat_byte(1);
        let to = Address::repeat_byte(2);
        LogRecord {
            address: Address::repeat_byte(0xaa),
            topics: vec![
                event.selector(),
                from.into_word(),
                to.into_word(),
            ],
            data: DynSolValue::Uint(U256::from(value), 256).abi_encode().into(),
            block_hash: B256::ZERO,
            block_number: 1,
            transaction_hash: B256::ZERO,
            transaction_index: 0,
            log_index: 0,
        }
    }

    #[test]
    fn test_decode_transfer_log() {
        let event = make_transfer_event();
        let decoded = decode_log_payload(&event, &make_transfer_log(1_000)).unwrap();

        let Value::Struct(fields) = decoded else {
            panic!("expected struct");
        };
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].0, "from");
        assert_eq!(fields[2], ("value".to_string(), Value::Int(1_000)));
    }

    #[test]
    fn test_decode_log_with_wrong_topic_errors() {
        let event = make_transfer_event();
        let mut log = make_transfer_log(1);
        log.topics = vec![B256::ZERO];

        let error = decode_log_payload(&event, &log).unwrap_err();
        assert!(matches!(error, DecodeError::Log { .. }));
    }

    #[test]
    fn test_decode_log_with_truncated_data_errors() {
        let event = make_transfer_event();
        let mut log = make_transfer_log(1);
        log.data = vec![0u8; 3].into();

        assert!(decode_log_payload(&event, &log).is_err());
    }

    fn make_swap_function() -> AbiFunction {
        serde_json::from_value(serde_json::json!({
            "type": "function",
            "name": "swap",
            "inputs": [
                { "name": "amountIn", "type": "uint256" },
                { "name": "recipient", "type": "address" },
            ],
            "outputs": [
                { "name": "amountOut", "type": "uint256" },
            ],
            "stateMutability": "nonpayable",
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_function_input_and_output() {
        let function = make_swap_function();

        let mut input = function.selector().to_vec();
        input.extend(
            DynSolValue::Tuple(vec![
                DynSolValue::Uint(U256::from(500u64), 256),
                DynSolValue::Address(Address::repeat_byte(3)),
            ])
            .abi_encode_params(),
        );
        let output: Bytes = DynSolValue::Uint(U256::from(499u64), 256).abi_encode().into();

        let (args, result) =
            decode_function_payload(&function, &input.into(), Some(&output)).unwrap();

        let Value::Struct(fields) = args else {
            panic!("expected struct");
        };
        assert_eq!(fields[0], ("amountIn".to_string(), Value::Int(500)));
        assert_eq!(result, Some(Value::Int(499)));
    }

    #[test]
    fn test_decode_function_garbage_input_errors() {
        let function = make_swap_function();
        let input = Bytes::from(vec![1, 2, 3, 4, 5]);
        assert!(decode_function_payload(&function, &input, None).is_err());
    }
}
