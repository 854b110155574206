use alloy::{
    dyn_abi::{DynSolType, DynSolValue, Specifier},
    json_abi::Event,
    primitives::{keccak256, Address, B256},
};

use super::{abi::check_value, backend::LogQuery};
use crate::error::{BindError, Result};

/// Caller-side description of which records of one event to fetch.
///
/// `indexed` holds one alternative set per indexed parameter, in declaration
/// order. An empty set is a wildcard; trailing parameters may be omitted.
#[derive(Debug, Clone, Default)]
pub struct LogFilterSpec {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub event: String,
    pub indexed: Vec<Vec<DynSolValue>>,
}

impl LogFilterSpec {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn indexed(mut self, indexed: Vec<Vec<DynSolValue>>) -> Self {
        self.indexed = indexed;
        self
    }

    pub fn range(mut self, from_block: Option<u64>, to_block: Option<u64>) -> Self {
        self.from_block = from_block;
        self.to_block = to_block;
        self
    }

    /// Build the native query for `event` emitted by `address`.
    pub fn to_query(&self, address: Address, event: &Event) -> Result<LogQuery> {
        let mut topics = Vec::with_capacity(4);
        if !event.anonymous {
            topics.push(vec![event.selector()]);
        }

        let indexed_params: Vec<_> = event.inputs.iter().filter(|p| p.indexed).collect();
        if self.indexed.len() > indexed_params.len() {
            return Err(BindError::Encoding(format!(
                "event '{}' has {} indexed parameters, got {} filter sets",
                event.name,
                indexed_params.len(),
                self.indexed.len()
            )));
        }

        for (param, alternatives) in indexed_params.iter().zip(&self.indexed) {
            let ty: DynSolType = param
                .resolve()
                .map_err(|e| BindError::Encoding(e.to_string()))?;

            let mut words = Vec::with_capacity(alternatives.len());
            for value in alternatives {
                let word = encode_topic(&ty, value).map_err(|reason| {
                    BindError::Encoding(format!(
                        "filter value for '{}' of event '{}': {}",
                        param.name, event.name, reason
                    ))
                })?;
                if !words.contains(&word) {
                    words.push(word);
                }
            }
            topics.push(words);
        }

        // Trailing wildcards add nothing to the query.
        while topics.last().is_some_and(|t: &Vec<B256>| t.is_empty()) {
            topics.pop();
        }

        Ok(LogQuery {
            address,
            from_block: self.from_block,
            to_block: self.to_block,
            topics,
        })
    }
}

/// Encode one indexed value the way the ledger stores it in a topic: value
/// types as their 32-byte word, strings and bytes as their keccak hash.
pub fn encode_topic(ty: &DynSolType, value: &DynSolValue) -> std::result::Result<B256, String> {
    check_value(ty, value)?;

    match value {
        DynSolValue::String(s) => Ok(keccak256(s.as_bytes())),
        DynSolValue::Bytes(b) => Ok(keccak256(b)),
        DynSolValue::Array(_) | DynSolValue::FixedArray(_) | DynSolValue::Tuple(_) => {
            Err(format!("indexed type {} cannot be filtered on", ty))
        }
        other => other
            .as_word()
            .ok_or_else(|| format!("value {:?} has no topic encoding", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{json_abi::JsonAbi, primitives::U256};

    fn transfer_event() -> Event {
        let abi = JsonAbi::parse([
            "event Transfer(address indexed from, address indexed to, uint256 value)",
        ])
        .unwrap();
        abi.events().next().unwrap().clone()
    }

    #[test]
    fn test_query_without_constraints() {
        let event = transfer_event();
        let query = LogFilterSpec::new("Transfer")
            .range(Some(5), None)
            .to_query(Address::ZERO, &event)
            .unwrap();

        assert_eq!(query.topics, vec![vec![event.selector()]]);
        assert_eq!(query.from_block, Some(5));
        assert_eq!(query.to_block, None);
    }

    #[test]
    fn test_query_alternatives() {
        let event = transfer_event();
        let (a, b, c) = (
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
        );

        let query = LogFilterSpec::new("Transfer")
            .indexed(vec![
                vec![],
                vec![
                    DynSolValue::Address(b),
                    DynSolValue::Address(c),
                    DynSolValue::Address(b),
                ],
            ])
            .to_query(a, &event)
            .unwrap();

        assert_eq!(query.topics.len(), 3);
        assert!(query.topics[1].is_empty());
        assert_eq!(
            query.topics[2],
            vec![b.into_word(), c.into_word()],
            "duplicates collapse, order kept"
        );
    }

    #[test]
    fn test_trailing_wildcards_dropped() {
        let event = transfer_event();
        let query = LogFilterSpec::new("Transfer")
            .indexed(vec![vec![DynSolValue::Address(Address::repeat_byte(1))], vec![]])
            .to_query(Address::ZERO, &event)
            .unwrap();
        assert_eq!(query.topics.len(), 2);
    }

    #[test]
    fn test_filter_type_checked() {
        let event = transfer_event();
        let err = LogFilterSpec::new("Transfer")
            .indexed(vec![vec![DynSolValue::Uint(U256::from(1u64), 256)]])
            .to_query(Address::ZERO, &event)
            .unwrap_err();
        assert!(matches!(err, BindError::Encoding(_)));

        let err = LogFilterSpec::new("Transfer")
            .indexed(vec![vec![], vec![], vec![]])
            .to_query(Address::ZERO, &event)
            .unwrap_err();
        assert!(matches!(err, BindError::Encoding(_)));
    }

    #[test]
    fn test_dynamic_topics_are_hashed() {
        assert_eq!(
            encode_topic(&DynSolType::String, &DynSolValue::String("okb".into())).unwrap(),
            keccak256("okb")
        );
        assert_eq!(
            encode_topic(
                &DynSolType::Uint(256),
                &DynSolValue::Uint(U256::from(42u64), 256)
            )
            .unwrap(),
            B256::from(U256::from(42u64))
        );
        assert!(encode_topic(
            &DynSolType::Array(Box::new(DynSolType::Bool)),
            &DynSolValue::Array(vec![DynSolValue::Bool(true)])
        )
        .is_err());
    }

    #[test]
    fn test_topic_values_range_checked() {
        assert!(encode_topic(
            &DynSolType::Uint(8),
            &DynSolValue::Uint(U256::from(300u64), 8)
        )
        .is_err());
        assert!(encode_topic(
            &DynSolType::FixedBytes(4),
            &DynSolValue::FixedBytes(B256::repeat_byte(0xff), 4)
        )
        .is_err());
        assert_eq!(
            encode_topic(&DynSolType::Uint(8), &DynSolValue::Uint(U256::from(200u64), 8)).unwrap(),
            B256::from(U256::from(200u64))
        );
    }
}
