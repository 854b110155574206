use alloy::{
    dyn_abi::{DynSolType, DynSolValue, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Event, Function, JsonAbi, Param},
    primitives::{I256, U256},
};

use crate::error::{BindError, Result};

/// Parsed interface description of one contract type.
///
/// Built once and shared (usually behind an `Arc`) by every bound contract
/// of that type. Lookups never mutate the table.
#[derive(Debug, Clone)]
pub struct InterfaceTable {
    abi: JsonAbi,
}

impl InterfaceTable {
    /// Parse a JSON interface description.
    pub fn parse(json: &str) -> Result<Self> {
        let abi: JsonAbi = serde_json::from_str(json)
            .map_err(|e| BindError::MalformedInterface(e.to_string()))?;
        Self::from_abi(abi)
    }

    /// Build a table from human-readable declarations such as
    /// `function transfer(address to, uint256 amount) returns (bool)`.
    pub fn from_signatures<'a, I>(signatures: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let abi = JsonAbi::parse(signatures)
            .map_err(|e| BindError::MalformedInterface(e.to_string()))?;
        Self::from_abi(abi)
    }

    /// Wrap an already parsed ABI. Every parameter type is resolved up front
    /// so a table that exists can always encode.
    pub fn from_abi(abi: JsonAbi) -> Result<Self> {
        for function in abi.functions() {
            for param in function.inputs.iter().chain(function.outputs.iter()) {
                param.resolve().map_err(|e| {
                    BindError::MalformedInterface(format!(
                        "function '{}' has unusable type '{}': {}",
                        function.name, param.ty, e
                    ))
                })?;
            }
        }

        for event in abi.events() {
            for param in &event.inputs {
                param.resolve().map_err(|e| {
                    BindError::MalformedInterface(format!(
                        "event '{}' has unusable type '{}': {}",
                        event.name, param.ty, e
                    ))
                })?;
            }
        }

        Ok(Self { abi })
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// Resolve a method by bare name (first overload) or by full signature.
    pub fn method(&self, name: &str) -> Result<&Function> {
        let found = if name.contains('(') {
            self.abi.functions().find(|f| f.signature() == name)
        } else {
            self.abi.function(name).and_then(|overloads| overloads.first())
        };

        found.ok_or_else(|| BindError::MethodNotFound(name.to_string()))
    }

    /// Resolve an event by bare name (first overload) or by full signature.
    pub fn event(&self, name: &str) -> Result<&Event> {
        let found = if name.contains('(') {
            self.abi.events().find(|e| e.signature() == name)
        } else {
            self.abi.event(name).and_then(|overloads| overloads.first())
        };

        found.ok_or_else(|| BindError::EventNotFound(name.to_string()))
    }

    /// Find the event whose topic-0 selector matches.
    pub fn event_by_selector(&self, selector: &alloy::primitives::B256) -> Option<&Event> {
        self.abi
            .events()
            .find(|e| !e.anonymous && e.selector() == *selector)
    }

    pub fn method_names(&self) -> Vec<String> {
        self.abi.functions().map(|f| f.name.clone()).collect()
    }
}

/// Encode a call payload (selector followed by the arguments).
///
/// Every argument is checked against its declared type first, so a mismatch
/// is reported with its position instead of a generic encoder error.
pub fn encode_input(function: &Function, args: &[DynSolValue]) -> Result<Vec<u8>> {
    if args.len() != function.inputs.len() {
        return Err(BindError::Encoding(format!(
            "method '{}' expects {} arguments, got {}",
            function.name,
            function.inputs.len(),
            args.len()
        )));
    }

    for (i, (param, arg)) in function.inputs.iter().zip(args).enumerate() {
        check_type(param, arg).map_err(|reason| {
            BindError::Encoding(format!(
                "argument #{} ('{}' of type '{}') of method '{}': {}",
                i + 1,
                param.name,
                param.ty,
                function.name,
                reason
            ))
        })?;
    }

    function
        .abi_encode_input(args)
        .map_err(|e| BindError::Encoding(e.to_string()))
}

fn check_type(param: &Param, value: &DynSolValue) -> std::result::Result<(), String> {
    let ty: DynSolType = param.resolve().map_err(|e| e.to_string())?;
    check_value(&ty, value)
}

/// Check that `value` has the shape of `ty` and lies inside its domain.
///
/// `DynSolType::matches` only compares tags, so a `Uint(300, 8)` would pass
/// it and be encoded with its high bits intact.
pub(crate) fn check_value(
    ty: &DynSolType,
    value: &DynSolValue,
) -> std::result::Result<(), String> {
    if !ty.matches(value) {
        return Err(format!("value {:?} is not of type {}", value, ty));
    }
    check_domain(value)
}

fn check_domain(value: &DynSolValue) -> std::result::Result<(), String> {
    match value {
        DynSolValue::Uint(n, bits) => {
            if *bits < 256 && *n >> *bits != U256::ZERO {
                return Err(format!("{} does not fit in uint{}", n, bits));
            }
            Ok(())
        }
        DynSolValue::Int(n, bits) => {
            if *bits < 256 {
                let max = I256::from_raw((U256::from(1u64) << (*bits - 1)) - U256::from(1u64));
                let min = -max - I256::ONE;
                if *n > max || *n < min {
                    return Err(format!("{} does not fit in int{}", n, bits));
                }
            }
            Ok(())
        }
        DynSolValue::FixedBytes(word, size) => {
            if word[(*size).min(32)..].iter().any(|b| *b != 0) {
                return Err(format!("{} has bytes set past bytes{}", word, size));
            }
            Ok(())
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            items.iter().try_for_each(check_domain)
        }
        _ => Ok(()),
    }
}

/// Decoded result of a read call. The variant is fixed by the method
/// declaration, not by the returned bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutput {
    Empty,
    Single(DynSolValue),
    Tuple(Vec<DynSolValue>),
    Named(Vec<(String, DynSolValue)>),
}

impl CallOutput {
    pub fn into_single(self) -> Option<DynSolValue> {
        match self {
            CallOutput::Single(value) => Some(value),
            _ => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        match self {
            CallOutput::Named(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// All returned values in declaration order.
    pub fn values(&self) -> Vec<&DynSolValue> {
        match self {
            CallOutput::Empty => Vec::new(),
            CallOutput::Single(value) => vec![value],
            CallOutput::Tuple(values) => values.iter().collect(),
            CallOutput::Named(fields) => fields.iter().map(|(_, v)| v).collect(),
        }
    }
}

/// Decode returned bytes into the declared output shape.
pub fn decode_output(function: &Function, data: &[u8]) -> Result<CallOutput> {
    if function.outputs.is_empty() {
        return Ok(CallOutput::Empty);
    }

    if data.is_empty() {
        return Err(BindError::Decoding(format!(
            "method '{}' returned no data; is a contract deployed at the address?",
            function.name
        )));
    }

    let mut values = function
        .abi_decode_output(data, true)
        .map_err(|e| BindError::Decoding(format!("output of '{}': {}", function.name, e)))?;

    if values.len() != function.outputs.len() {
        return Err(BindError::Decoding(format!(
            "method '{}' declares {} outputs, decoded {}",
            function.name,
            function.outputs.len(),
            values.len()
        )));
    }

    let named = function.outputs.iter().all(|p| !p.name.is_empty());
    let output = match values.len() {
        1 => CallOutput::Single(values.remove(0)),
        _ if named => CallOutput::Named(
            function
                .outputs
                .iter()
                .map(|p| p.name.clone())
                .zip(values)
                .collect(),
        ),
        _ => CallOutput::Tuple(values),
    };

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256};

    const TOKEN_ABI: &str = r#"[
        {"type":"function","name":"transfer","stateMutability":"nonpayable",
         "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],
         "outputs":[{"name":"","type":"bool"}]},
        {"type":"function","name":"reserves","stateMutability":"view","inputs":[],
         "outputs":[{"name":"base","type":"uint256"},{"name":"quote","type":"uint256"}]},
        {"type":"function","name":"pair","stateMutability":"view","inputs":[],
         "outputs":[{"name":"","type":"address"},{"name":"","type":"address"}]},
        {"type":"function","name":"pause","stateMutability":"nonpayable","inputs":[],"outputs":[]},
        {"type":"event","name":"LogIndex","anonymous":false,
         "inputs":[{"name":"index","type":"bytes32","indexed":false}]}
    ]"#;

    #[test]
    fn test_parse_and_lookup() {
        let table = InterfaceTable::parse(TOKEN_ABI).unwrap();
        assert_eq!(table.method("transfer").unwrap().inputs.len(), 2);
        assert!(table.method("transfer(address,uint256)").is_ok());
        assert!(table.event("LogIndex").is_ok());

        assert!(matches!(
            table.method("mint"),
            Err(BindError::MethodNotFound(name)) if name == "mint"
        ));
        assert!(matches!(
            table.event("LogTrade"),
            Err(BindError::EventNotFound(_))
        ));
    }

    #[test]
    fn test_malformed_interface() {
        assert!(matches!(
            InterfaceTable::parse("{not json"),
            Err(BindError::MalformedInterface(_))
        ));
        assert!(matches!(
            InterfaceTable::parse(
                r#"[{"type":"function","name":"f","inputs":[{"name":"x","type":"uint7"}],"outputs":[]}]"#
            ),
            Err(BindError::MalformedInterface(_))
        ));
    }

    #[test]
    fn test_from_signatures() {
        let table = InterfaceTable::from_signatures([
            "function balanceOf(address owner) view returns (uint256)",
            "event Transfer(address indexed from, address indexed to, uint256 value)",
        ])
        .unwrap();

        assert!(table.method("balanceOf").is_ok());
        let event = table.event("Transfer").unwrap();
        assert_eq!(event.inputs.iter().filter(|p| p.indexed).count(), 2);
        assert!(table.event_by_selector(&event.selector()).is_some());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let table = InterfaceTable::parse(TOKEN_ABI).unwrap();
        let transfer = table.method("transfer").unwrap();
        let args = [
            DynSolValue::Address(Address::repeat_byte(0x11)),
            DynSolValue::Uint(U256::from(100u64), 256),
        ];

        let first = encode_input(transfer, &args).unwrap();
        let second = encode_input(transfer, &args).unwrap();
        assert_eq!(first, second);
        assert_eq!(&first[..4], transfer.selector().as_slice());
        assert_eq!(first.len(), 4 + 64);
    }

    #[test]
    fn test_encoding_rejects_wrong_types() {
        let table = InterfaceTable::parse(TOKEN_ABI).unwrap();
        let transfer = table.method("transfer").unwrap();

        let wrong = [
            DynSolValue::Address(Address::ZERO),
            DynSolValue::String("100".into()),
        ];
        assert!(matches!(
            encode_input(transfer, &wrong),
            Err(BindError::Encoding(_))
        ));

        let short = [DynSolValue::Address(Address::ZERO)];
        assert!(matches!(
            encode_input(transfer, &short),
            Err(BindError::Encoding(_))
        ));
    }

    #[test]
    fn test_encoding_rejects_out_of_range_values() {
        let table = InterfaceTable::from_signatures([
            "function setLevel(uint8 level)",
            "function setOffset(int16 offset)",
            "function setTag(bytes4 tag)",
            "function setLevels(uint8[] levels)",
        ])
        .unwrap();

        let set_level = table.method("setLevel").unwrap();
        assert!(matches!(
            encode_input(set_level, &[DynSolValue::Uint(U256::from(300u64), 8)]),
            Err(BindError::Encoding(_))
        ));
        assert!(matches!(
            encode_input(set_level, &[DynSolValue::Uint(U256::MAX, 8)]),
            Err(BindError::Encoding(_))
        ));
        assert!(encode_input(set_level, &[DynSolValue::Uint(U256::from(255u64), 8)]).is_ok());

        let set_offset = table.method("setOffset").unwrap();
        assert!(matches!(
            encode_input(set_offset, &[DynSolValue::Int(I256::try_from(32768i64).unwrap(), 16)]),
            Err(BindError::Encoding(_))
        ));
        assert!(matches!(
            encode_input(set_offset, &[DynSolValue::Int(I256::try_from(-32769i64).unwrap(), 16)]),
            Err(BindError::Encoding(_))
        ));
        assert!(encode_input(set_offset, &[DynSolValue::Int(I256::try_from(-32768i64).unwrap(), 16)]).is_ok());

        let set_tag = table.method("setTag").unwrap();
        assert!(matches!(
            encode_input(set_tag, &[DynSolValue::FixedBytes(B256::repeat_byte(0xff), 4)]),
            Err(BindError::Encoding(_))
        ));
        let mut word = [0u8; 32];
        word[..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(encode_input(set_tag, &[DynSolValue::FixedBytes(B256::from(word), 4)]).is_ok());

        let set_levels = table.method("setLevels").unwrap();
        let levels = DynSolValue::Array(vec![
            DynSolValue::Uint(U256::from(1u64), 8),
            DynSolValue::Uint(U256::from(256u64), 8),
        ]);
        assert!(matches!(
            encode_input(set_levels, &[levels]),
            Err(BindError::Encoding(_))
        ));
    }

    #[test]
    fn test_output_shapes() {
        let table = InterfaceTable::parse(TOKEN_ABI).unwrap();

        let transfer = table.method("transfer").unwrap();
        let data = DynSolValue::Bool(true).abi_encode();
        assert_eq!(
            decode_output(transfer, &data).unwrap(),
            CallOutput::Single(DynSolValue::Bool(true))
        );

        let reserves = table.method("reserves").unwrap();
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(7u64), 256),
            DynSolValue::Uint(U256::from(9u64), 256),
        ])
        .abi_encode_params();
        let out = decode_output(reserves, &data).unwrap();
        assert_eq!(
            out.get("quote"),
            Some(&DynSolValue::Uint(U256::from(9u64), 256))
        );

        let pair = table.method("pair").unwrap();
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Address(Address::repeat_byte(1)),
            DynSolValue::Address(Address::repeat_byte(2)),
        ])
        .abi_encode_params();
        assert!(matches!(decode_output(pair, &data).unwrap(), CallOutput::Tuple(v) if v.len() == 2));

        let pause = table.method("pause").unwrap();
        assert_eq!(decode_output(pause, &[]).unwrap(), CallOutput::Empty);
    }

    #[test]
    fn test_decoding_failures() {
        let table = InterfaceTable::parse(TOKEN_ABI).unwrap();
        let reserves = table.method("reserves").unwrap();

        assert!(matches!(
            decode_output(reserves, &[]),
            Err(BindError::Decoding(_))
        ));
        assert!(matches!(
            decode_output(reserves, &[0u8; 17]),
            Err(BindError::Decoding(_))
        ));
    }
}
