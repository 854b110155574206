//! In-memory transport used by the unit tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use alloy::{
    primitives::{keccak256, Address, Bytes, LogData, TxHash, B256},
    rpc::types::Log,
};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::backend::{ContractCaller, ContractFilterer, ContractTransactor, LogQuery, LogWatch};
use super::opts::{CallOpts, TransactOpts};
use crate::error::TransportError;

pub const CONTRACT: Address = Address::new([0x42; 20]);

pub const TEST_ABI: &str = r#"[
    {"type":"function","name":"transfer","stateMutability":"nonpayable",
     "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],
     "outputs":[{"name":"","type":"bool"}]},
    {"type":"function","name":"balanceOf","stateMutability":"view",
     "inputs":[{"name":"owner","type":"address"}],
     "outputs":[{"name":"","type":"uint256"}]},
    {"type":"event","name":"LogIndex","anonymous":false,
     "inputs":[{"name":"index","type":"bytes32","indexed":false}]},
    {"type":"event","name":"Transfer","anonymous":false,
     "inputs":[{"name":"from","type":"address","indexed":true},
               {"name":"to","type":"address","indexed":true},
               {"name":"value","type":"uint256","indexed":false}]}
]"#;

pub fn log_index_selector() -> B256 {
    keccak256("LogIndex(bytes32)")
}

/// A `LogIndex(bytes32)` record whose index is `byte` repeated.
pub fn log_index_record(block: u64, byte: u8) -> Log {
    record(
        vec![log_index_selector()],
        B256::repeat_byte(byte).to_vec(),
        block,
    )
}

pub fn record(topics: Vec<B256>, data: Vec<u8>, block: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: CONTRACT,
            data: LogData::new_unchecked(topics, Bytes::from(data)),
        },
        block_number: Some(block),
        transaction_hash: Some(B256::repeat_byte(block as u8)),
        ..Default::default()
    }
}

type LiveEnds = (mpsc::Sender<Log>, oneshot::Sender<TransportError>);

#[derive(Default)]
pub struct MockBackend {
    call_response: Mutex<Option<Result<Bytes, String>>>,
    calls: AtomicUsize,
    sent: Mutex<Vec<(Address, Bytes)>>,
    history: Mutex<Option<Result<Vec<Log>, String>>>,
    queries: Mutex<Vec<LogQuery>>,
    live: Mutex<Option<LiveEnds>>,
    released: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_history(logs: Vec<Log>) -> Arc<Self> {
        let backend = Self::default();
        *backend.history.lock().unwrap() = Some(Ok(logs));
        Arc::new(backend)
    }

    pub fn failing_history(message: &str) -> Arc<Self> {
        let backend = Self::default();
        *backend.history.lock().unwrap() = Some(Err(message.to_string()));
        Arc::new(backend)
    }

    pub fn respond_with(&self, response: Result<Bytes, String>) {
        *self.call_response.lock().unwrap() = Some(response);
    }

    pub fn query(&self) -> LogQuery {
        LogQuery::new(CONTRACT)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(Address, Bytes)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<LogQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub async fn wait_released(&self, count: usize) {
        while self.released() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Deliver a record on the open live watch.
    pub async fn push_live(&self, log: Log) {
        let tx = self
            .live
            .lock()
            .unwrap()
            .as_ref()
            .map(|(tx, _)| tx.clone())
            .expect("no live watch open");
        tx.send(log).await.expect("live watch receiver gone");
    }

    /// Fire the error source of the open live watch.
    pub fn drop_live(&self, reason: &str) {
        if let Some((_, err_tx)) = self.live.lock().unwrap().take() {
            let _ = err_tx.send(TransportError::new(reason));
        }
    }
}

#[async_trait]
impl ContractCaller for MockBackend {
    async fn call(
        &self,
        _opts: &CallOpts,
        _to: Address,
        _input: Bytes,
    ) -> Result<Bytes, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.call_response.lock().unwrap().clone() {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(message)) => Err(TransportError::new(message)),
            None => Ok(Bytes::new()),
        }
    }
}

#[async_trait]
impl ContractTransactor for MockBackend {
    async fn send_transaction(
        &self,
        _opts: &TransactOpts,
        to: Address,
        input: Bytes,
    ) -> Result<TxHash, TransportError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to, input));
        Ok(TxHash::repeat_byte(sent.len() as u8))
    }
}

#[async_trait]
impl ContractFilterer for MockBackend {
    async fn filter_logs(&self, query: &LogQuery) -> Result<Vec<Log>, TransportError> {
        self.queries.lock().unwrap().push(query.clone());
        match self.history.lock().unwrap().clone() {
            Some(Ok(logs)) => Ok(logs.into_iter().filter(|l| query.matches(l)).collect()),
            Some(Err(message)) => Err(TransportError::new(message)),
            None => Ok(Vec::new()),
        }
    }

    async fn watch_logs(&self, query: &LogQuery) -> Result<LogWatch, TransportError> {
        self.queries.lock().unwrap().push(query.clone());
        let (log_tx, log_rx) = mpsc::channel(16);
        let (err_tx, err_rx) = oneshot::channel();
        *self.live.lock().unwrap() = Some((log_tx, err_tx));

        let released = self.released.clone();
        Ok(LogWatch::new(log_rx, err_rx).on_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}
