//! JSON values in and out of ABI values, for the command-line host.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, Specifier},
    json_abi::Function,
    primitives::{I256, U256},
};
use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use super::{utils, EventRecord};
use crate::bind::{abi::CallOutput, event::DynEvent, event::TypedEvent};

/// Turn call parameters given as a JSON array (positional), object (by
/// parameter name) or null (no arguments) into ABI values.
pub fn args_from_json(function: &Function, parameters: &Value) -> Result<Vec<DynSolValue>> {
    let values: Vec<&Value> = match parameters {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => function
            .inputs
            .iter()
            .map(|input| {
                map.get(&input.name).ok_or_else(|| {
                    anyhow!(
                        "Missing parameter '{}' for function '{}'",
                        input.name,
                        function.name
                    )
                })
            })
            .collect::<Result<_>>()?,
        other => {
            let expected: Vec<String> = function
                .inputs
                .iter()
                .map(|input| format!("{}: {}", input.name, input.ty))
                .collect();
            return Err(anyhow!(
                "Invalid parameter format for function '{}'. Parameters must be provided as either:\n1. Array: [value1, value2, ...]\n2. Object: {{{}}}\nProvided: {}",
                function.name,
                expected.join(", "),
                other
            ));
        }
    };

    if values.len() != function.inputs.len() {
        return Err(anyhow!(
            "Function '{}' expects {} parameters, got {}",
            function.name,
            function.inputs.len(),
            values.len()
        ));
    }

    function
        .inputs
        .iter()
        .zip(values)
        .map(|(input, value)| {
            let ty = input
                .resolve()
                .map_err(|e| anyhow!("Unsupported parameter type '{}': {}", input.ty, e))?;
            value_from_json(value, &ty).map_err(|e| {
                anyhow!(
                    "Failed to convert parameter '{}' of type '{}': {}",
                    input.name,
                    input.ty,
                    e
                )
            })
        })
        .collect()
}

/// Convert one JSON value to the given Solidity type, range checked.
pub fn value_from_json(value: &Value, ty: &DynSolType) -> Result<DynSolValue> {
    match ty {
        DynSolType::Address => {
            let s = value
                .as_str()
                .ok_or_else(|| anyhow!("Address must be a string"))?;
            Ok(DynSolValue::Address(utils::validate_address(s)?))
        }
        DynSolType::Bool => value
            .as_bool()
            .map(DynSolValue::Bool)
            .ok_or_else(|| anyhow!("Bool parameter must be a boolean")),
        DynSolType::String => value
            .as_str()
            .map(|s| DynSolValue::String(s.to_string()))
            .ok_or_else(|| anyhow!("String parameter must be a string")),
        DynSolType::Uint(bits) => {
            let n = match value {
                Value::Number(n) => utils::validate_hex_value(&n.to_string())?,
                Value::String(s) => utils::validate_hex_value(s)?,
                _ => return Err(anyhow!("Uint must be a number or string")),
            };
            if *bits < 256 && n >> *bits != U256::ZERO {
                return Err(anyhow!("{} does not fit in uint{}", n, bits));
            }
            Ok(DynSolValue::Uint(n, *bits))
        }
        DynSolType::Int(bits) => {
            let text = match value {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.trim().to_string(),
                _ => return Err(anyhow!("Int must be a number or string")),
            };
            let n = parse_int(&text)?;
            if *bits < 256 {
                let max = I256::from_raw((U256::from(1u64) << (*bits - 1)) - U256::from(1u64));
                let min = -max - I256::ONE;
                if n > max || n < min {
                    return Err(anyhow!("{} does not fit in int{}", n, bits));
                }
            }
            Ok(DynSolValue::Int(n, *bits))
        }
        DynSolType::FixedBytes(size) => {
            let bytes = hex_bytes(value)?;
            if bytes.len() > *size {
                return Err(anyhow!(
                    "{} bytes given for bytes{}",
                    bytes.len(),
                    size
                ));
            }
            let mut word = [0u8; 32];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(word.into(), *size))
        }
        DynSolType::Bytes => Ok(DynSolValue::Bytes(hex_bytes(value)?)),
        DynSolType::Array(inner) => {
            let items = value
                .as_array()
                .ok_or_else(|| anyhow!("Array parameter must be an array"))?;
            let values = items
                .iter()
                .map(|item| value_from_json(item, inner))
                .collect::<Result<_>>()?;
            Ok(DynSolValue::Array(values))
        }
        DynSolType::FixedArray(inner, len) => {
            let items = value
                .as_array()
                .ok_or_else(|| anyhow!("Array parameter must be an array"))?;
            if items.len() != *len {
                return Err(anyhow!("Expected {} elements, got {}", len, items.len()));
            }
            let values = items
                .iter()
                .map(|item| value_from_json(item, inner))
                .collect::<Result<_>>()?;
            Ok(DynSolValue::FixedArray(values))
        }
        DynSolType::Tuple(types) => {
            let items = value
                .as_array()
                .ok_or_else(|| anyhow!("Tuple parameter must be an array"))?;
            if items.len() != types.len() {
                return Err(anyhow!(
                    "Expected a tuple of {} elements, got {}",
                    types.len(),
                    items.len()
                ));
            }
            let values = items
                .iter()
                .zip(types)
                .map(|(item, ty)| value_from_json(item, ty))
                .collect::<Result<_>>()?;
            Ok(DynSolValue::Tuple(values))
        }
        other => Err(anyhow!("Unsupported Solidity type: {}", other)),
    }
}

fn parse_int(text: &str) -> Result<I256> {
    let parsed = match text.strip_prefix('-') {
        Some(rest) => utils::validate_hex_value(rest).and_then(|magnitude| {
            I256::checked_from_sign_and_abs(alloy::primitives::Sign::Negative, magnitude)
                .ok_or_else(|| anyhow!("out of range"))
        }),
        None => utils::validate_hex_value(text).and_then(|magnitude| {
            I256::checked_from_sign_and_abs(alloy::primitives::Sign::Positive, magnitude)
                .ok_or_else(|| anyhow!("out of range"))
        }),
    };
    parsed.map_err(|e| anyhow!("Invalid int value '{}': {}", text, e))
}

fn hex_bytes(value: &Value) -> Result<Vec<u8>> {
    let s = value
        .as_str()
        .ok_or_else(|| anyhow!("Bytes must be a hex string"))?;
    hex::decode(s.trim_start_matches("0x")).map_err(|_| anyhow!("Invalid hex string: {}", s))
}

/// Render an ABI value as JSON. Numbers become decimal strings so nothing
/// loses precision.
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::Uint(num, _) => Value::String(num.to_string()),
        DynSolValue::Int(num, _) => Value::String(num.to_string()),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Function(f) => Value::String(format!("0x{}", hex::encode(f.as_slice()))),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        other => Value::String(format!("{:?}", other)),
    }
}

pub fn output_to_json(output: &CallOutput) -> Value {
    match output {
        CallOutput::Empty => Value::Null,
        CallOutput::Single(value) => value_to_json(value),
        CallOutput::Tuple(values) => Value::Array(values.iter().map(value_to_json).collect()),
        CallOutput::Named(fields) => Value::Object(named_fields(fields)),
    }
}

fn named_fields(fields: &[(String, DynSolValue)]) -> Map<String, Value> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), value_to_json(value)))
        .collect()
}

pub fn event_record(event: &TypedEvent<DynEvent>) -> EventRecord {
    let log = &event.raw;
    EventRecord {
        address: log.address().to_checksum(None),
        event: event.data.name.clone(),
        fields: named_fields(&event.data.fields),
        block_number: log.block_number,
        transaction_hash: log.transaction_hash.map(|h| format!("{:#x}", h)),
        log_index: log.log_index,
        removed: log.removed,
    }
}
