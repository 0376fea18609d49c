//! Relay JSON-RPC client

use crate::error::RelayError;
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Bytes, H256, U256};
use ethers::utils::keccak256;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// Public Flashbots relay
pub const DEFAULT_RELAY_ENDPOINT: &str = "https://relay.flashbots.net";

/// Header carrying the request authentication signature
pub const FLASHBOTS_SIGNATURE_HEADER: &str = "X-Flashbots-Signature";

/// Outcome of one bundle member in a relay dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedTransaction {
    pub tx_hash: Option<H256>,
    pub gas_used: u64,
    /// Execution error, set when the member reverts
    pub error: Option<String>,
    /// Decoded revert reason, when the contract supplied one
    pub revert: Option<String>,
}

impl SimulatedTransaction {
    pub fn reverted(&self) -> bool {
        self.error.is_some() || self.revert.is_some()
    }
}

/// Relay dry-run result for a whole bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResponse {
    pub results: Vec<SimulatedTransaction>,
    /// Total payment to the block producer, in wei
    pub coinbase_diff: U256,
    pub total_gas_used: u64,
}

/// Operations a private block-builder relay offers
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Dry-run the raw bundle on top of the given block
    async fn simulate(&self, transactions: &[Bytes], block_number: u64) -> Result<SimulationResponse, RelayError>;

    /// Submit the raw bundle for inclusion in `target_block`, returning the bundle hash
    async fn send_bundle(&self, transactions: &[Bytes], target_block: u64) -> Result<H256, RelayError>;
}

/// Flashbots-compatible relay over HTTPS
pub struct FlashbotsRelay {
    client: Client,
    endpoint: Url,
    auth: LocalWallet,
    request_id: AtomicU64,
}

impl FlashbotsRelay {
    /// Create a client. `auth` signs every request and builds relay reputation.
    pub fn new(endpoint: &str, auth: LocalWallet, timeout: Duration) -> Result<Self, RelayError> {
        let endpoint = Url::parse(endpoint).map_err(|_| RelayError::InvalidEndpoint(endpoint.to_string()))?;
        let client = Client::builder().timeout(timeout).build()?;

        debug!(endpoint = %endpoint, auth = ?auth.address(), "Created relay client");

        Ok(Self {
            client,
            endpoint,
            auth,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RelayError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": [params],
        })
        .to_string();

        // The signature covers the exact bytes sent
        let signature = sign_request_body(&self.auth, &body).await?;
        trace!(method, id, "Sending relay request");

        let response: Value = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(FLASHBOTS_SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?
            .json()
            .await?;

        extract_result(response)
    }
}

#[async_trait]
impl RelayClient for FlashbotsRelay {
    async fn simulate(&self, transactions: &[Bytes], block_number: u64) -> Result<SimulationResponse, RelayError> {
        let params = json!({
            "txs": transactions,
            "blockNumber": format!("0x{:x}", block_number),
            "stateBlockNumber": "latest",
        });
        let result = self.request("eth_callBundle", params).await?;
        parse_simulation(result)
    }

    async fn send_bundle(&self, transactions: &[Bytes], target_block: u64) -> Result<H256, RelayError> {
        let params = json!({
            "txs": transactions,
            "blockNumber": format!("0x{:x}", target_block),
        });
        let result = self.request("eth_sendBundle", params).await?;

        let hash = result
            .get("bundleHash")
            .cloned()
            .ok_or_else(|| RelayError::InvalidResponse(format!("missing bundleHash in {}", result)))?;
        serde_json::from_value(hash).map_err(|e| RelayError::InvalidResponse(e.to_string()))
    }
}

/// Build the authentication header value: `<address>:<signature>`, where the
/// signature is an EIP-191 personal signature over the hex keccak256 of the body.
pub async fn sign_request_body(auth: &LocalWallet, body: &str) -> Result<String, RelayError> {
    let digest = format!("0x{}", hex::encode(keccak256(body.as_bytes())));
    let signature = auth
        .sign_message(digest)
        .await
        .map_err(|e| RelayError::Signing(e.to_string()))?;
    Ok(format!("{:?}:0x{}", auth.address(), hex::encode(signature.to_vec())))
}

fn extract_result(response: Value) -> Result<Value, RelayError> {
    if let Some(error) = response.get("error") {
        return Err(RelayError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        });
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| RelayError::InvalidResponse(format!("no result in {}", response)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallBundleResult {
    #[serde(default)]
    results: Vec<CallBundleTransaction>,
    coinbase_diff: Value,
    #[serde(default)]
    total_gas_used: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallBundleTransaction {
    tx_hash: Option<H256>,
    #[serde(default)]
    gas_used: u64,
    error: Option<String>,
    revert: Option<String>,
}

fn parse_simulation(result: Value) -> Result<SimulationResponse, RelayError> {
    let parsed: CallBundleResult =
        serde_json::from_value(result).map_err(|e| RelayError::InvalidResponse(e.to_string()))?;

    Ok(SimulationResponse {
        results: parsed
            .results
            .into_iter()
            .map(|tx| SimulatedTransaction {
                tx_hash: tx.tx_hash,
                gas_used: tx.gas_used,
                error: tx.error,
                revert: tx.revert,
            })
            .collect(),
        coinbase_diff: parse_quantity(&parsed.coinbase_diff)?,
        total_gas_used: parsed.total_gas_used,
    })
}

/// Relays report wei amounts as decimal strings, hex strings or plain numbers
fn parse_quantity(value: &Value) -> Result<U256, RelayError> {
    let invalid = || RelayError::InvalidResponse(format!("invalid quantity {}", value));
    match value {
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex_digits) => U256::from_str_radix(hex_digits, 16).map_err(|_| invalid()),
            None => U256::from_dec_str(s).map_err(|_| invalid()),
        },
        Value::Number(n) => n.as_u64().map(U256::from).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}
