use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub networks: HashMap<String, NetworkConfig>,
    pub default_network: String,
    #[serde(default)]
    pub events: EventsConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: Option<String>,
}

/// Event stream tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// How often the HTTP live watcher asks for new blocks.
    pub poll_interval_ms: u64,
    /// Records buffered per event stream ahead of its consumer.
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            channel_capacity: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub allow_write_operations: bool,
    /// Upper bound on the value attached to a transaction, in wei.
    pub max_transaction_value: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut networks = HashMap::new();

        networks.insert(
            "ethereum".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-mainnet.g.alchemy.com/v2/demo".to_string(),
                chain_id: 1,
                explorer_url: Some("https://etherscan.io".to_string()),
            },
        );

        networks.insert(
            "sepolia".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-sepolia.g.alchemy.com/v2/demo".to_string(),
                chain_id: 11155111,
                explorer_url: Some("https://sepolia.etherscan.io".to_string()),
            },
        );

        networks.insert(
            "arbitrum".to_string(),
            NetworkConfig {
                rpc_url: "https://arb-mainnet.g.alchemy.com/v2/demo".to_string(),
                chain_id: 42161,
                explorer_url: Some("https://arbiscan.io".to_string()),
            },
        );

        networks.insert(
            "local".to_string(),
            NetworkConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                chain_id: 31337,
                explorer_url: None,
            },
        );

        Self {
            networks,
            default_network: "ethereum".to_string(),
            events: EventsConfig::default(),
            security: SecurityConfig {
                allow_write_operations: false,
                max_transaction_value: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))?;

        if !config.networks.contains_key(&config.default_network) {
            return Err(anyhow!(
                "Default network '{}' is not defined in {:?}",
                config.default_network,
                path
            ));
        }

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow!("Failed to create config directory {:?}: {}", parent, e)
                })?;
            }
        }

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path, e))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            Some(path) => match Self::load_from_file(path).await {
                Ok(config) => {
                    tracing::info!("Loaded configuration from file");
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_vars(std::env::var("ALCHEMY_API_KEY").ok().as_deref());
        config
    }

    /// Put a real API key into placeholder RPC URLs.
    fn apply_env_vars(&mut self, alchemy_key: Option<&str>) {
        let Some(api_key) = alchemy_key else {
            for (network_name, network_config) in &self.networks {
                if network_config.rpc_url.contains("/demo") {
                    tracing::warn!("Using demo RPC endpoint for {}, set ALCHEMY_API_KEY environment variable for better reliability", network_name);
                }
            }
            return;
        };

        tracing::info!("Using ALCHEMY_API_KEY environment variable for RPC URLs");
        for (network_name, network_config) in &mut self.networks {
            let url = &mut network_config.rpc_url;
            if url.contains("alchemy.com/v2/demo") {
                *url = url.replace("/demo", &format!("/{}", api_key));
            } else if url.contains("YOUR_API_KEY_HERE") {
                *url = url.replace("YOUR_API_KEY_HERE", api_key);
            } else {
                continue;
            }
            tracing::debug!("Updated {} RPC URL with API key", network_name);
        }
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("contract-bind").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# bindctl configuration file
# Networks, event streaming and write permissions

# Network used when --network is not given
default_network = "ethereum"

[networks.ethereum]
rpc_url = "https://eth-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 1
explorer_url = "https://etherscan.io"

[networks.sepolia]
rpc_url = "https://eth-sepolia.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 11155111
explorer_url = "https://sepolia.etherscan.io"

[networks.arbitrum]
rpc_url = "https://arb-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 42161
explorer_url = "https://arbiscan.io"

[networks.local]
rpc_url = "http://127.0.0.1:8545"
chain_id = 31337

# Event streams
[events]
poll_interval_ms = 2000  # live watch polling over HTTP
channel_capacity = 128   # records buffered per stream

# Security settings
[security]
allow_write_operations = false
# max_transaction_value = "1000000000000000000"  # 1 ETH in wei

# Environment variables that can be used:
# ALCHEMY_API_KEY - Your Alchemy API key (replaces YOUR_API_KEY_HERE above)
# BINDCTL_PRIVATE_KEY - Key used to sign transactions sent by `bindctl transact`
"#;
        sample_config.to_string()
    }
}
