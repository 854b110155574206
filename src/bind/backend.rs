use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, Bytes, TxHash, B256},
    rpc::types::{Filter, Log},
};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::opts::{CallOpts, TransactOpts};
use crate::error::TransportError;

/// Read capability: executes a call without changing state.
#[async_trait]
pub trait ContractCaller: Send + Sync {
    async fn call(
        &self,
        opts: &CallOpts,
        to: Address,
        input: Bytes,
    ) -> Result<Bytes, TransportError>;
}

/// Write capability: submits a state-changing transaction and returns its
/// hash without waiting for inclusion.
#[async_trait]
pub trait ContractTransactor: Send + Sync {
    async fn send_transaction(
        &self,
        opts: &TransactOpts,
        to: Address,
        input: Bytes,
    ) -> Result<TxHash, TransportError>;
}

/// Log capability: historical queries and live watches.
#[async_trait]
pub trait ContractFilterer: Send + Sync {
    async fn filter_logs(&self, query: &LogQuery) -> Result<Vec<Log>, TransportError>;

    async fn watch_logs(&self, query: &LogQuery) -> Result<LogWatch, TransportError>;
}

/// Topic positions a ledger record can carry.
pub const MAX_TOPICS: usize = 4;

/// Native log query: one address, an optional block range and up to four
/// topic positions. Inside a position the values are alternatives (OR), an
/// empty position matches anything, positions combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub topics: Vec<Vec<B256>>,
}

impl LogQuery {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    pub fn with_range(&self, from_block: Option<u64>, to_block: Option<u64>) -> Self {
        Self {
            from_block,
            to_block,
            ..self.clone()
        }
    }

    pub fn matches(&self, log: &Log) -> bool {
        if log.address() != self.address {
            return false;
        }

        if let Some(block) = log.block_number {
            if self.from_block.is_some_and(|from| block < from)
                || self.to_block.is_some_and(|to| block > to)
            {
                return false;
            }
        }

        let topics = log.topics();
        self.topics.iter().enumerate().all(|(i, alternatives)| {
            alternatives.is_empty() || topics.get(i).is_some_and(|t| alternatives.contains(t))
        })
    }

    /// Translate into an `eth_getLogs` filter. Queries over more than
    /// `MAX_TOPICS` positions are rejected rather than folded together.
    pub fn to_filter(&self) -> Result<Filter, TransportError> {
        if self.topics.len() > MAX_TOPICS {
            return Err(TransportError::new(format!(
                "log query has {} topic positions, at most {} are supported",
                self.topics.len(),
                MAX_TOPICS
            )));
        }

        let mut filter = Filter::new().address(self.address);

        filter = match self.from_block {
            Some(block) => filter.from_block(block),
            None => filter.from_block(BlockNumberOrTag::Earliest),
        };
        filter = match self.to_block {
            Some(block) => filter.to_block(block),
            None => filter.to_block(BlockNumberOrTag::Latest),
        };

        for (position, alternatives) in self.topics.iter().enumerate() {
            if alternatives.is_empty() {
                continue;
            }
            let alternatives = alternatives.clone();
            filter = match position {
                0 => filter.event_signature(alternatives),
                1 => filter.topic1(alternatives),
                2 => filter.topic2(alternatives),
                _ => filter.topic3(alternatives),
            };
        }

        Ok(filter)
    }
}

/// Live source handed out by a filterer: records, a terminal error source
/// and an optional release hook run exactly once when the watch is dropped.
pub struct LogWatch {
    pub logs: mpsc::Receiver<Log>,
    pub errors: oneshot::Receiver<TransportError>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LogWatch {
    pub fn new(logs: mpsc::Receiver<Log>, errors: oneshot::Receiver<TransportError>) -> Self {
        Self {
            logs,
            errors,
            release: None,
        }
    }

    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }
}

impl std::fmt::Debug for LogWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWatch")
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

impl Drop for LogWatch {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
