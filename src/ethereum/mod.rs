pub mod json;
pub mod provider;
pub mod utils;

use serde::{Deserialize, Serialize};

/// A decoded event as printed by the host binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub address: String,
    pub event: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<u64>,
    pub removed: bool,
}

/// Outcome of a submitted transaction. Inclusion is not awaited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub network: String,
    pub from: Option<String>,
    pub to: String,
    pub value: String,
    pub simulated: bool,
}
