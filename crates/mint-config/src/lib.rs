//! Mint Config - configuration loading and validation

use mint_core::relay::DEFAULT_RELAY_ENDPOINT;
use mint_core::{IntentInput, NonceConflictPolicy, TransactionIntent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Configuration problems, always reported before any submission
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("unsupported config format `{0}`, expected .json, .yaml or .yml")]
    UnsupportedFormat(String),

    #[error("no network provider configured, set rpcProvider or defaultProvider")]
    MissingProvider,

    #[error("unknown default network `{0}`")]
    UnknownNetwork(String),

    #[error("no bundles configured")]
    NoBundles,

    #[error("bundle #{index} is invalid: {reason}")]
    InvalidIntent { index: usize, reason: String },

    #[error("listenPool is invalid: {0}")]
    InvalidListenPool(String),

    #[error("limit must be greater than 0")]
    ZeroLimit,

    #[error("listenPool requires flashbot mode, a captured transaction cannot be broadcast directly")]
    FrontRunWithoutRelay,

    #[error("environment variable {name} has invalid value `{value}`")]
    InvalidEnv { name: String, value: String },
}

/// String that never appears in debug output
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString(<redacted>)")
    }
}

/// Provider arguments: a bare URL or a positional argument list whose first
/// element is the URL (or network name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderArgs {
    Url(String),
    Args(Vec<Value>),
}

impl ProviderArgs {
    fn first(&self) -> Option<&str> {
        match self {
            ProviderArgs::Url(url) => Some(url.as_str()),
            ProviderArgs::Args(args) => args.first().and_then(Value::as_str),
        }
    }
}

/// Where the JSON-RPC provider comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSource {
    /// Explicit endpoint
    Static(String),
    /// Public endpoint of a well-known network
    Default(String),
}

impl ProviderSource {
    pub fn url(&self) -> Result<String, ConfigError> {
        match self {
            ProviderSource::Static(url) => Ok(url.clone()),
            ProviderSource::Default(network) => match network.to_ascii_lowercase().as_str() {
                "homestead" | "mainnet" => Ok("https://cloudflare-eth.com".to_string()),
                "goerli" => Ok("https://rpc.ankr.com/eth_goerli".to_string()),
                "sepolia" => Ok("https://rpc.sepolia.org".to_string()),
                "holesky" => Ok("https://ethereum-holesky-rpc.publicnode.com".to_string()),
                _ => Err(ConfigError::UnknownNetwork(network.clone())),
            },
        }
    }
}

/// Pending-pool watcher settings; their presence enables front-running
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenPoolConfig {
    /// WebSocket endpoint of the pending-transaction feed
    pub wss: String,
    /// Subscription request, sent verbatim when a string
    pub subscribe: Value,
    /// Dotted path to the transaction hash inside each message
    pub tx_chain: String,
    /// Contract the captured transaction must call
    pub contract: String,
    /// Call data the captured transaction must carry
    pub input: IntentInput,
}

impl ListenPoolConfig {
    pub fn subscribe_message(&self) -> String {
        match &self.subscribe {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, alias = "RPCProvider")]
    pub rpc_provider: Option<ProviderArgs>,

    #[serde(default)]
    pub default_provider: Option<ProviderArgs>,

    #[serde(default)]
    pub bundles: Vec<TransactionIntent>,

    /// Submit through the relay instead of broadcasting
    #[serde(default)]
    pub flashbot: bool,

    pub block_number: Option<u64>,

    pub block_number_in_future: Option<u64>,

    pub listen_pool: Option<ListenPoolConfig>,

    /// Simulate before submitting and log every attempt in full
    #[serde(default)]
    pub debug: bool,

    /// Relay endpoint
    pub endpoint: Option<String>,

    /// Concurrency cap of intent compilation and broadcasting
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Accumulator ready-threshold for plain relay batches
    pub batch_size: Option<usize>,

    pub max_attempts: Option<u32>,

    pub deadline_secs: Option<u64>,

    pub nonce_conflict_policy: Option<NonceConflictPolicy>,

    /// Relay reputation key; a fresh key is generated when absent
    pub auth_key: Option<SecretString>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_subscribe_timeout_secs")]
    pub subscribe_timeout_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_limit() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_subscribe_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load a JSON or YAML file, chosen by extension
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let parse_error = |reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        };

        let raw: Value = match extension.as_str() {
            "json" => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };

        check_input_forms(&raw)?;
        let config: Config = serde_json::from_value(raw).map_err(|e| parse_error(e.to_string()))?;

        debug!(path = %path.display(), bundles = config.bundles.len(), "Loaded config");
        Ok(config)
    }

    /// Apply `FLASHMINT_ENDPOINT`, `FLASHMINT_LIMIT`, `FLASHMINT_DEBUG` and `RPC_URL`
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("FLASHMINT_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(limit) = lookup("FLASHMINT_LIMIT") {
            self.limit = limit.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "FLASHMINT_LIMIT".to_string(),
                value: limit.clone(),
            })?;
        }
        if let Some(debug) = lookup("FLASHMINT_DEBUG") {
            self.debug = match debug.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: "FLASHMINT_DEBUG".to_string(),
                        value: debug,
                    })
                }
            };
        }
        if let Some(url) = lookup("RPC_URL") {
            self.rpc_provider = Some(ProviderArgs::Url(url));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider_source()?;

        if self.bundles.is_empty() {
            return Err(ConfigError::NoBundles);
        }
        if self.limit == 0 {
            return Err(ConfigError::ZeroLimit);
        }

        for (index, intent) in self.bundles.iter().enumerate() {
            if intent.contract.trim().is_empty() {
                return Err(ConfigError::InvalidIntent {
                    index,
                    reason: "missing contract address".to_string(),
                });
            }
        }

        if let Some(pool) = &self.listen_pool {
            if !pool.wss.starts_with("ws://") && !pool.wss.starts_with("wss://") {
                return Err(ConfigError::InvalidListenPool(format!(
                    "wss must start with ws:// or wss://, got: {}",
                    pool.wss
                )));
            }
            if pool.tx_chain.trim().is_empty() {
                return Err(ConfigError::InvalidListenPool("txChain cannot be empty".to_string()));
            }
            if !self.flashbot {
                return Err(ConfigError::FrontRunWithoutRelay);
            }
        }

        Ok(())
    }

    /// The static provider wins over the network default
    pub fn provider_source(&self) -> Result<ProviderSource, ConfigError> {
        if let Some(url) = self.rpc_provider.as_ref().and_then(ProviderArgs::first) {
            return Ok(ProviderSource::Static(url.to_string()));
        }
        match &self.default_provider {
            Some(args) => Ok(ProviderSource::Default(args.first().unwrap_or("homestead").to_string())),
            None => Err(ConfigError::MissingProvider),
        }
    }

    pub fn relay_endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_RELAY_ENDPOINT)
    }

    pub fn front_run(&self) -> bool {
        self.listen_pool.is_some()
    }

    /// Explicit policy, else the default of the deployment mode
    pub fn resolved_nonce_policy(&self) -> NonceConflictPolicy {
        self.nonce_conflict_policy
            .unwrap_or_else(|| NonceConflictPolicy::for_mode(self.front_run()))
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_secs)
    }
}

/// Both input forms, or neither, are rejected with the offending entry named
fn check_input_forms(root: &Value) -> Result<(), ConfigError> {
    if let Some(bundles) = root.get("bundles").and_then(Value::as_array) {
        for (index, intent) in bundles.iter().enumerate() {
            check_input(intent.get("input")).map_err(|reason| ConfigError::InvalidIntent { index, reason })?;
        }
    }
    if let Some(pool) = root.get("listenPool") {
        check_input(pool.get("input")).map_err(ConfigError::InvalidListenPool)?;
    }
    Ok(())
}

fn check_input(input: Option<&Value>) -> Result<(), String> {
    let input = input
        .and_then(Value::as_object)
        .ok_or_else(|| "missing `input`".to_string())?;
    let raw = input.contains_key("data");
    let call = input.contains_key("abi") || input.contains_key("func");

    match (raw, call) {
        (true, true) => Err("`input` has both raw `data` and a structured call".to_string()),
        (false, false) => Err("`input` needs either raw `data` or `abi` and `func`".to_string()),
        _ => Ok(()),
    }
}
