use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::{
    dyn_abi::DynSolValue,
    json_abi::Event,
    primitives::{Address, Bytes, TxHash},
    rpc::types::Log,
    sol_types::{SolCall, SolEvent},
};
use tokio::sync::mpsc;
use tracing::debug;

use super::abi::{decode_output, encode_input, CallOutput, InterfaceTable};
use super::backend::{ContractCaller, ContractFilterer, ContractTransactor, LogQuery};
use super::event::{
    decode_dyn, decode_sol, dyn_decoder, sol_decoder, DynEvent, LogDecoder, TypedEvent,
};
use super::iterator::EventIterator;
use super::opts::{CallOpts, FilterOpts, TransactOpts, WatchOpts};
use super::stream::{LogStream, DEFAULT_BUFFER};
use super::topics::LogFilterSpec;
use super::watch::{self, EventSubscription};
use crate::error::{BindError, Result, TransportError};

/// One deployed contract: an address, the interface of its type and the
/// transport capabilities used to reach it.
#[derive(Clone)]
pub struct BoundContract {
    address: Address,
    abi: Arc<InterfaceTable>,
    caller: Arc<dyn ContractCaller>,
    transactor: Arc<dyn ContractTransactor>,
    filterer: Arc<dyn ContractFilterer>,
    buffer: usize,
}

impl BoundContract {
    pub fn new(
        address: Address,
        abi: Arc<InterfaceTable>,
        caller: Arc<dyn ContractCaller>,
        transactor: Arc<dyn ContractTransactor>,
        filterer: Arc<dyn ContractFilterer>,
    ) -> Self {
        Self {
            address,
            abi,
            caller,
            transactor,
            filterer,
            buffer: DEFAULT_BUFFER,
        }
    }

    /// Bind through a single backend that provides all three capabilities.
    pub fn with_backend<B>(address: Address, abi: Arc<InterfaceTable>, backend: Arc<B>) -> Self
    where
        B: ContractCaller + ContractTransactor + ContractFilterer + 'static,
    {
        Self::new(address, abi, backend.clone(), backend.clone(), backend)
    }

    /// Number of records each event stream buffers ahead of its consumer.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &InterfaceTable {
        &self.abi
    }

    /// Invoke a read-only method and decode its declared return shape.
    pub async fn call(
        &self,
        opts: &CallOpts,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<CallOutput> {
        let function = self.abi.method(method)?;
        let input = encode_input(function, args)?;

        debug!(contract = %self.address, method = %function.signature(), "calling contract");
        let output = self.raw_call(opts, input.into()).await?;
        decode_output(function, &output)
    }

    /// Read call through a `sol!`-generated call type.
    pub async fn call_sol<C: SolCall>(&self, opts: &CallOpts, call: &C) -> Result<C::Return> {
        debug!(contract = %self.address, method = C::SIGNATURE, "calling contract");
        let output = self.raw_call(opts, call.abi_encode().into()).await?;

        C::abi_decode_returns(&output, true).map_err(|e| {
            if output.is_empty() {
                BindError::Decoding(format!(
                    "method '{}' returned no data; is a contract deployed at the address?",
                    C::SIGNATURE
                ))
            } else {
                BindError::Decoding(format!("output of '{}': {}", C::SIGNATURE, e))
            }
        })
    }

    /// Submit a state-changing invocation of `method`. Returns as soon as the
    /// transport accepted it.
    pub async fn transact(
        &self,
        opts: &TransactOpts,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<TxHash> {
        let function = self.abi.method(method)?;
        let input = encode_input(function, args)?;

        debug!(contract = %self.address, method = %function.signature(), "submitting transaction");
        self.raw_transact(opts, input.into()).await
    }

    pub async fn transact_sol<C: SolCall>(&self, opts: &TransactOpts, call: &C) -> Result<TxHash> {
        debug!(contract = %self.address, method = C::SIGNATURE, "submitting transaction");
        self.raw_transact(opts, call.abi_encode().into()).await
    }

    /// Plain value transfer to the contract, without calldata.
    pub async fn transfer(&self, opts: &TransactOpts) -> Result<TxHash> {
        self.raw_transact(opts, Bytes::new()).await
    }

    /// Submit already encoded calldata.
    pub async fn raw_transact(&self, opts: &TransactOpts, input: Bytes) -> Result<TxHash> {
        if opts.simulate {
            self.raw_call(&opts.as_call_opts(), input.clone()).await?;
        }

        let hash = with_deadline(
            opts.timeout,
            "transaction submission",
            self.transactor.send_transaction(opts, self.address, input),
        )
        .await?;

        debug!(contract = %self.address, tx = %hash, "transaction submitted");
        Ok(hash)
    }

    async fn raw_call(&self, opts: &CallOpts, input: Bytes) -> Result<Bytes> {
        let output = with_deadline(
            opts.timeout,
            "contract call",
            self.caller.call(opts, self.address, input),
        )
        .await?;
        Ok(output)
    }

    /// Bounded historical query for `event`, yielding every match in the
    /// range and then exhaustion.
    pub async fn filter_logs(
        &self,
        opts: &FilterOpts,
        event: &str,
        indexed: Vec<Vec<DynSolValue>>,
    ) -> Result<EventIterator<DynEvent>> {
        let event = self.abi.event(event)?;
        let query = self.filter_query(opts, event, indexed)?;
        Ok(self.historical(query, dyn_decoder(event.clone())))
    }

    pub async fn filter_events<E: SolEvent + 'static>(
        &self,
        opts: &FilterOpts,
        indexed: Vec<Vec<DynSolValue>>,
    ) -> Result<EventIterator<E>> {
        let event = self.sol_event::<E>()?;
        let query = self.filter_query(opts, event, indexed)?;
        Ok(self.historical(query, sol_decoder::<E>(event.clone())))
    }

    /// Live watch for `event`. With `opts.start` set the backlog from that
    /// block is delivered first.
    pub async fn watch_logs(
        &self,
        opts: &WatchOpts,
        event: &str,
        indexed: Vec<Vec<DynSolValue>>,
    ) -> Result<EventIterator<DynEvent>> {
        let event = self.abi.event(event)?;
        let query = self.watch_query(event, indexed)?;
        self.live(opts, query, dyn_decoder(event.clone())).await
    }

    pub async fn watch_events<E: SolEvent + 'static>(
        &self,
        opts: &WatchOpts,
        indexed: Vec<Vec<DynSolValue>>,
    ) -> Result<EventIterator<E>> {
        let event = self.sol_event::<E>()?;
        let query = self.watch_query(event, indexed)?;
        self.live(opts, query, sol_decoder::<E>(event.clone())).await
    }

    /// Live watch delivering into `sink` from a background task.
    pub async fn watch_into(
        &self,
        opts: &WatchOpts,
        event: &str,
        indexed: Vec<Vec<DynSolValue>>,
        sink: mpsc::Sender<TypedEvent<DynEvent>>,
    ) -> Result<EventSubscription> {
        let iter = self.watch_logs(opts, event, indexed).await?;
        Ok(watch::forward(iter, sink))
    }

    pub async fn watch_events_into<E: SolEvent + Send + 'static>(
        &self,
        opts: &WatchOpts,
        indexed: Vec<Vec<DynSolValue>>,
        sink: mpsc::Sender<TypedEvent<E>>,
    ) -> Result<EventSubscription> {
        let iter = self.watch_events::<E>(opts, indexed).await?;
        Ok(watch::forward(iter, sink))
    }

    /// Decode one raw record outside of any stream.
    pub fn parse_log(&self, event: &str, log: &Log) -> Result<TypedEvent<DynEvent>> {
        let event = self.abi.event(event)?;
        Ok(TypedEvent {
            data: decode_dyn(event, log)?,
            raw: log.clone(),
        })
    }

    pub fn parse_event<E: SolEvent>(&self, log: &Log) -> Result<TypedEvent<E>> {
        let event = self.sol_event::<E>()?;
        Ok(TypedEvent {
            data: decode_sol::<E>(event, log)?,
            raw: log.clone(),
        })
    }

    fn sol_event<E: SolEvent>(&self) -> Result<&Event> {
        self.abi
            .event_by_selector(&E::SIGNATURE_HASH)
            .ok_or_else(|| BindError::EventNotFound(E::SIGNATURE.to_string()))
    }

    fn filter_query(
        &self,
        opts: &FilterOpts,
        event: &Event,
        indexed: Vec<Vec<DynSolValue>>,
    ) -> Result<LogQuery> {
        if opts.end.is_some_and(|end| end < opts.start) {
            return Err(BindError::Encoding(format!(
                "block range {}..={:?} is empty",
                opts.start, opts.end
            )));
        }

        LogFilterSpec::new(event.name.clone())
            .indexed(indexed)
            .range(Some(opts.start), opts.end)
            .to_query(self.address, event)
    }

    fn watch_query(&self, event: &Event, indexed: Vec<Vec<DynSolValue>>) -> Result<LogQuery> {
        LogFilterSpec::new(event.name.clone())
            .indexed(indexed)
            .to_query(self.address, event)
    }

    fn historical<T>(&self, query: LogQuery, decoder: LogDecoder<T>) -> EventIterator<T> {
        debug!(contract = %self.address, from = ?query.from_block, to = ?query.to_block, "querying logs");
        let stream = LogStream::historical(self.filterer.clone(), query, self.buffer);
        EventIterator::new(stream, decoder)
    }

    async fn live<T>(
        &self,
        opts: &WatchOpts,
        query: LogQuery,
        decoder: LogDecoder<T>,
    ) -> Result<EventIterator<T>> {
        let backlog = opts.start.map(|start| query.with_range(Some(start), None));
        debug!(contract = %self.address, start = ?opts.start, "watching logs");

        let stream = LogStream::live(self.filterer.clone(), query, backlog, self.buffer).await?;
        Ok(EventIterator::new(stream, decoder))
    }
}

impl std::fmt::Debug for BoundContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundContract")
            .field("address", &self.address)
            .field("methods", &self.abi.method_names())
            .field("buffer", &self.buffer)
            .finish()
    }
}

async fn with_deadline<T>(
    timeout: Option<Duration>,
    operation: &str,
    request: impl Future<Output = std::result::Result<T, TransportError>>,
) -> std::result::Result<T, TransportError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, request)
            .await
            .map_err(|_| TransportError::timeout(operation))?,
        None => request.await,
    }
}

/// A bound contract with preset call and transaction options.
#[derive(Debug, Clone)]
pub struct Session {
    pub contract: BoundContract,
    pub call_opts: CallOpts,
    pub transact_opts: TransactOpts,
}

impl Session {
    pub fn new(contract: BoundContract, call_opts: CallOpts, transact_opts: TransactOpts) -> Self {
        Self {
            contract,
            call_opts,
            transact_opts,
        }
    }

    pub async fn call(&self, method: &str, args: &[DynSolValue]) -> Result<CallOutput> {
        self.contract.call(&self.call_opts, method, args).await
    }

    pub async fn call_sol<C: SolCall>(&self, call: &C) -> Result<C::Return> {
        self.contract.call_sol(&self.call_opts, call).await
    }

    pub async fn transact(&self, method: &str, args: &[DynSolValue]) -> Result<TxHash> {
        self.contract.transact(&self.transact_opts, method, args).await
    }

    pub async fn transact_sol<C: SolCall>(&self, call: &C) -> Result<TxHash> {
        self.contract.transact_sol(&self.transact_opts, call).await
    }

    pub async fn transfer(&self) -> Result<TxHash> {
        self.contract.transfer(&self.transact_opts).await
    }
}
