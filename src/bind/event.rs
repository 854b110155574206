use std::sync::Arc;

use alloy::{
    dyn_abi::{DynSolValue, EventExt},
    json_abi::Event,
    rpc::types::Log,
    sol_types::SolEvent,
};

use crate::error::{BindError, Result};

/// A decoded event together with the raw record it came from.
#[derive(Debug, Clone)]
pub struct TypedEvent<T> {
    pub data: T,
    pub raw: Log,
}

/// Event decoded against a runtime interface description.
#[derive(Debug, Clone, PartialEq)]
pub struct DynEvent {
    pub name: String,
    pub fields: Vec<(String, DynSolValue)>,
}

impl DynEvent {
    pub fn field(&self, name: &str) -> Option<&DynSolValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

/// Shared decoding step of an event stream.
pub type LogDecoder<T> = Arc<dyn Fn(&Log) -> Result<T> + Send + Sync>;

/// Topic count and topic-0 must agree with the declaration before any field
/// is looked at.
fn check_shape(event: &Event, log: &Log) -> Result<()> {
    let topics = log.topics();
    let indexed = event.inputs.iter().filter(|p| p.indexed).count();
    let expected = indexed + usize::from(!event.anonymous);

    if topics.len() != expected {
        return Err(BindError::Decoding(format!(
            "event '{}' expects {} topics, record has {}",
            event.name,
            expected,
            topics.len()
        )));
    }

    if !event.anonymous && topics[0] != event.selector() {
        return Err(BindError::Decoding(format!(
            "record topic {} is not the signature of event '{}'",
            topics[0], event.name
        )));
    }

    Ok(())
}

/// Reject records whose body is longer or shorter than the decoded fields
/// re-encode to. The decoder alone ignores trailing bytes.
fn check_body_len(event: &Event, log: &Log, encoded: usize) -> Result<()> {
    let actual = log.data().data.len();
    if actual != encoded {
        return Err(BindError::Decoding(format!(
            "event '{}' body is {} bytes, its fields encode to {}",
            event.name, actual, encoded
        )));
    }
    Ok(())
}

/// Decode a record into named fields following the event declaration.
pub fn decode_dyn(event: &Event, log: &Log) -> Result<DynEvent> {
    check_shape(event, log)?;

    let decoded = event
        .decode_log(log.data(), true)
        .map_err(|e| BindError::Decoding(format!("event '{}': {}", event.name, e)))?;

    let encoded = DynSolValue::Tuple(decoded.body.clone()).abi_encode_params();
    check_body_len(event, log, encoded.len())?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut fields = Vec::with_capacity(event.inputs.len());

    for (i, param) in event.inputs.iter().enumerate() {
        let value = if param.indexed {
            indexed.next()
        } else {
            body.next()
        };
        let value = value.ok_or_else(|| {
            BindError::Decoding(format!(
                "event '{}' is missing parameter '{}'",
                event.name, param.name
            ))
        })?;

        let name = if param.name.is_empty() {
            format!("arg{}", i)
        } else {
            param.name.clone()
        };
        fields.push((name, value));
    }

    Ok(DynEvent {
        name: event.name.clone(),
        fields,
    })
}

/// Decode a record into a `sol!`-generated event type.
pub fn decode_sol<E: SolEvent>(event: &Event, log: &Log) -> Result<E> {
    check_shape(event, log)?;

    let decoded = E::decode_log_data(log.data(), true)
        .map_err(|e| BindError::Decoding(format!("event '{}': {}", event.name, e)))?;
    check_body_len(event, log, decoded.encode_data().len())?;
    Ok(decoded)
}

pub fn dyn_decoder(event: Event) -> LogDecoder<DynEvent> {
    Arc::new(move |log| decode_dyn(&event, log))
}

pub fn sol_decoder<E: SolEvent + 'static>(event: Event) -> LogDecoder<E> {
    Arc::new(move |log| decode_sol::<E>(&event, log))
}
