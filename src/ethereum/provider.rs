use std::time::Duration;

use alloy::{
    eips::BlockId,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, TxHash},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Log, TransactionRequest},
    signers::local::PrivateKeySigner,
    transports::http::{reqwest::Url, Client, Http},
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::{
    sync::{mpsc, oneshot},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use super::utils;
use crate::bind::{
    backend::{ContractCaller, ContractFilterer, ContractTransactor, LogQuery, LogWatch},
    opts::{CallOpts, TransactOpts},
};
use crate::config::{Config, EventsConfig, NetworkConfig};
use crate::error::TransportError;

type HttpProvider = RootProvider<Http<Client>>;

/// JSON-RPC implementation of the three contract capabilities over HTTP.
///
/// HTTP has no push subscriptions, so live watches poll for new blocks.
#[derive(Debug, Clone)]
pub struct RpcBackend {
    network: String,
    rpc_url: Url,
    provider: HttpProvider,
    signer: Option<PrivateKeySigner>,
    poll_interval: Duration,
    capacity: usize,
}

impl RpcBackend {
    pub fn new(name: &str, network: &NetworkConfig, events: &EventsConfig) -> Result<Self> {
        let rpc_url: Url = network
            .rpc_url
            .parse()
            .map_err(|e| anyhow!("Invalid RPC URL '{}': {}", network.rpc_url, e))?;
        let provider = ProviderBuilder::new().on_http(rpc_url.clone());
        debug!(network = name, chain_id = network.chain_id, "created HTTP provider");

        Ok(Self {
            network: name.to_string(),
            rpc_url,
            provider,
            signer: None,
            poll_interval: Duration::from_millis(events.poll_interval_ms.max(1)),
            capacity: events.channel_capacity.max(1),
        })
    }

    /// Backend for `network`, or the configured default network.
    pub fn for_network(config: &Config, network: Option<&str>) -> Result<Self> {
        let name = network.unwrap_or(&config.default_network);
        let available: Vec<String> = config.networks.keys().cloned().collect();
        utils::validate_network(name, &available)?;

        let network_config = config
            .networks
            .get(name)
            .ok_or_else(|| anyhow!("Network '{}' not configured", name))?;
        Self::new(name, network_config, &config.events)
    }

    /// Sign transactions locally instead of relying on node-managed accounts.
    pub fn with_signer(mut self, signer: PrivateKeySigner) -> Self {
        info!(address = %signer.address(), "using local signer");
        self.signer = Some(signer);
        self
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    pub fn provider(&self) -> &HttpProvider {
        &self.provider
    }

    /// Check the endpoint answers; returns the current head block.
    pub async fn check_connection(&self) -> Result<u64> {
        self.provider.get_block_number().await.map_err(|e| {
            anyhow!(
                "Cannot connect to network '{}': {}. Please check your RPC endpoint configuration and network connectivity.",
                self.network,
                utils::interpret_rpc_error(&e.to_string())
            )
        })
    }

    fn transaction_request(opts: &TransactOpts, to: Address, input: Bytes) -> TransactionRequest {
        let mut tx = TransactionRequest::default().with_to(to).with_input(input);
        if let Some(from) = opts.from {
            tx = tx.with_from(from);
        }
        if let Some(value) = opts.value {
            tx = tx.with_value(value);
        }
        if let Some(gas) = opts.gas_limit {
            tx = tx.with_gas_limit(gas);
        }
        if let Some(gas_price) = opts.gas_price {
            tx = tx.with_gas_price(gas_price);
        }
        if let Some(nonce) = opts.nonce {
            tx = tx.with_nonce(nonce);
        }
        tx
    }
}

fn rpc_failure(operation: &str, err: alloy::transports::TransportError) -> TransportError {
    debug!(
        operation,
        reason = %utils::interpret_rpc_error(&err.to_string()),
        "rpc request failed"
    );
    TransportError::from_source(operation, err)
}

#[async_trait]
impl ContractCaller for RpcBackend {
    async fn call(
        &self,
        opts: &CallOpts,
        to: Address,
        input: Bytes,
    ) -> Result<Bytes, TransportError> {
        let mut tx = TransactionRequest::default().with_to(to).with_input(input);
        if let Some(from) = opts.from {
            tx = tx.with_from(from);
        }

        let block = if opts.pending {
            BlockId::pending()
        } else {
            opts.block.map(BlockId::number).unwrap_or_else(BlockId::latest)
        };

        self.provider
            .call(&tx)
            .block(block)
            .await
            .map_err(|e| rpc_failure("eth_call", e))
    }
}

#[async_trait]
impl ContractTransactor for RpcBackend {
    async fn send_transaction(
        &self,
        opts: &TransactOpts,
        to: Address,
        input: Bytes,
    ) -> Result<TxHash, TransportError> {
        let mut tx = Self::transaction_request(opts, to, input);

        let pending = match &self.signer {
            Some(signer) => {
                if opts.from.is_none() {
                    tx = tx.with_from(signer.address());
                }
                let wallet = EthereumWallet::from(signer.clone());
                let provider = ProviderBuilder::new()
                    .with_recommended_fillers()
                    .wallet(wallet)
                    .on_http(self.rpc_url.clone());
                provider
                    .send_transaction(tx)
                    .await
                    .map_err(|e| rpc_failure("eth_sendRawTransaction", e))?
            }
            None => self
                .provider
                .send_transaction(tx)
                .await
                .map_err(|e| rpc_failure("eth_sendTransaction", e))?,
        };

        let hash = *pending.tx_hash();
        info!(network = %self.network, tx = %hash, "transaction sent");
        Ok(hash)
    }
}

#[async_trait]
impl ContractFilterer for RpcBackend {
    async fn filter_logs(&self, query: &LogQuery) -> Result<Vec<Log>, TransportError> {
        self.provider
            .get_logs(&query.to_filter()?)
            .await
            .map_err(|e| rpc_failure("eth_getLogs", e))
    }

    async fn watch_logs(&self, query: &LogQuery) -> Result<LogWatch, TransportError> {
        query.to_filter()?;
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| rpc_failure("eth_blockNumber", e))?;

        let (log_tx, log_rx) = mpsc::channel(self.capacity);
        let (err_tx, err_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let poller = LogPoller {
            provider: self.provider.clone(),
            query: query.clone(),
            next_block: head + 1,
            interval: self.poll_interval,
        };
        tokio::spawn(poller.run(log_tx, err_tx, stop_rx));
        debug!(network = %self.network, head, "log poller started");

        Ok(LogWatch::new(log_rx, err_rx).on_release(move || {
            let _ = stop_tx.send(());
        }))
    }
}

/// Background task behind an HTTP live watch.
struct LogPoller {
    provider: HttpProvider,
    query: LogQuery,
    next_block: u64,
    interval: Duration,
}

impl LogPoller {
    async fn run(
        mut self,
        logs: mpsc::Sender<Log>,
        errors: oneshot::Sender<TransportError>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = logs.closed() => break,
                _ = ticker.tick() => {}
            }

            match self.poll().await {
                Ok(batch) => {
                    for log in batch {
                        if logs.send(log).await.is_err() {
                            debug!("log poller receiver dropped");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "log polling failed, ending watch");
                    let _ = errors.send(e);
                    return;
                }
            }
        }

        debug!("log poller stopped");
    }

    /// Fetch records from blocks not seen yet.
    async fn poll(&mut self) -> Result<Vec<Log>, TransportError> {
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| rpc_failure("eth_blockNumber", e))?;
        if head < self.next_block {
            return Ok(Vec::new());
        }

        let filter = self
            .query
            .with_range(Some(self.next_block), Some(head))
            .to_filter()?;
        let batch = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| rpc_failure("eth_getLogs", e))?;

        self.next_block = head + 1;
        Ok(batch)
    }
}
