//! Declarative transaction intents as supplied by configuration

use crate::amount::DecimalAmount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference to a signing credential.
///
/// The reference may embed key material (`0x…` private keys are accepted for
/// compatibility), so it is never printed in full.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRef(String);

impl CredentialRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_once(':') {
            Some((scheme, rest)) if scheme == "env" || scheme == "keyfile" => {
                write!(f, "CredentialRef({}:{})", scheme, rest)
            }
            _ => write!(f, "CredentialRef(<redacted>)"),
        }
    }
}

/// Raw, already encoded call data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawInput {
    pub data: String,
}

/// Structured call described by human-readable interface fragments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallInput {
    /// Fragments such as `function mint(uint256 amount) payable`
    pub abi: Vec<String>,
    /// Function name to call
    pub func: String,
    /// Ordered call arguments
    #[serde(default)]
    pub payload: Vec<serde_json::Value>,
}

/// Exactly one of the two input forms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntentInput {
    Raw(RawInput),
    Call(CallInput),
}

impl IntentInput {
    pub fn raw(data: impl Into<String>) -> Self {
        IntentInput::Raw(RawInput { data: data.into() })
    }
}

/// One desired on-chain action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionIntent {
    /// Target contract address
    pub contract: String,

    pub input: IntentInput,

    /// Native currency attached, in ether
    #[serde(alias = "price")]
    pub value_native: DecimalAmount,

    #[serde(alias = "secret")]
    pub credential_ref: CredentialRef,

    /// EIP-1559 priority fee, in gwei
    #[serde(alias = "maxPriorityFeePerGas")]
    pub priority_fee: DecimalAmount,

    /// EIP-1559 fee cap, in gwei
    #[serde(alias = "maxFeePerGas")]
    pub max_fee: DecimalAmount,

    #[serde(default)]
    pub gas_limit: Option<u64>,
}
