use std::time::Duration;

use alloy::primitives::{Address, U256};

/// Options for a read-only call.
#[derive(Debug, Clone, Default)]
pub struct CallOpts {
    /// Caller identity seen by the contract (`msg.sender`).
    pub from: Option<Address>,
    /// Block to read the state at; latest when unset.
    pub block: Option<u64>,
    /// Read against the pending state instead of a mined block.
    pub pending: bool,
    pub timeout: Option<Duration>,
}

impl CallOpts {
    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn at_block(mut self, block: u64) -> Self {
        self.block = Some(block);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for a state-changing transaction. Fee fields are forwarded to the
/// transport as given; filling and signing are the transport's job.
#[derive(Debug, Clone, Default)]
pub struct TransactOpts {
    pub from: Option<Address>,
    pub value: Option<U256>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    pub nonce: Option<u64>,
    /// Run the payload as a read call first and abort if it fails.
    pub simulate: bool,
    pub timeout: Option<Duration>,
}

impl TransactOpts {
    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn simulated(mut self) -> Self {
        self.simulate = true;
        self
    }

    /// Read options matching this transaction, used for simulation.
    pub fn as_call_opts(&self) -> CallOpts {
        CallOpts {
            from: self.from,
            block: None,
            pending: true,
            timeout: self.timeout,
        }
    }
}

/// Block range of a historical log query. `end = None` means latest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOpts {
    pub start: u64,
    pub end: Option<u64>,
}

impl FilterOpts {
    pub fn range(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }
}

/// Options of a live watch. With `start` set, the backlog from that block
/// is replayed before live records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOpts {
    pub start: Option<u64>,
}

impl WatchOpts {
    pub fn from_block(start: u64) -> Self {
        Self { start: Some(start) }
    }
}
