//! Transaction intent compiler

use super::types::{CompiledTransaction, EIP1559_TX_TYPE};
use crate::amount::{GWEI_DECIMALS, NATIVE_DECIMALS};
use crate::error::{EncodingError, IntentError, NetworkError};
use crate::intent::{CallInput, IntentInput, TransactionIntent};
use crate::provider::ChainProvider;
use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{parse_abi, Function, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Compiles declarative intents into fee-market transactions.
///
/// The chain id is fetched once and reused for every later intent.
pub struct IntentCompiler {
    provider: Arc<dyn ChainProvider>,
    chain_id: OnceCell<u64>,
}

impl IntentCompiler {
    pub fn new(provider: Arc<dyn ChainProvider>) -> Self {
        Self {
            provider,
            chain_id: OnceCell::new(),
        }
    }

    /// Chain id of the connected network, cached after the first lookup
    pub async fn chain_id(&self) -> Result<u64, NetworkError> {
        let chain_id = self
            .chain_id
            .get_or_try_init(|| async { self.provider.chain_id().await })
            .await?;
        Ok(*chain_id)
    }

    pub async fn compile(&self, intent: &TransactionIntent) -> Result<CompiledTransaction, IntentError> {
        let to: Address = intent
            .contract
            .trim()
            .parse()
            .map_err(|_| EncodingError::InvalidAddress(intent.contract.clone()))?;
        let data = encode_input(&intent.input)?;

        let value = intent.value_native.to_units(NATIVE_DECIMALS)?;
        let max_priority_fee_per_gas = intent.priority_fee.to_units(GWEI_DECIMALS)?;
        let max_fee_per_gas = intent.max_fee.to_units(GWEI_DECIMALS)?;
        if max_priority_fee_per_gas > max_fee_per_gas {
            warn!(
                contract = ?to,
                priority_fee = %intent.priority_fee,
                max_fee = %intent.max_fee,
                "Priority fee exceeds fee cap, the node will reject this transaction"
            );
        }

        let chain_id = self.chain_id().await?;

        debug!(contract = ?to, chain_id, calldata_len = data.len(), "Compiled intent");

        Ok(CompiledTransaction {
            chain_id,
            to,
            data,
            value,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit: intent.gas_limit.map(U256::from),
            transaction_type: EIP1559_TX_TYPE,
        })
    }
}

/// Produce call data for either input form
pub fn encode_input(input: &IntentInput) -> Result<Bytes, EncodingError> {
    match input {
        IntentInput::Raw(raw) => {
            let hex_data = raw.data.trim();
            let bytes = hex::decode(hex_data.strip_prefix("0x").unwrap_or(hex_data))
                .map_err(|_| EncodingError::InvalidPayload(raw.data.clone()))?;
            Ok(Bytes::from(bytes))
        }
        IntentInput::Call(call) => encode_call(call),
    }
}

fn encode_call(call: &CallInput) -> Result<Bytes, EncodingError> {
    let fragments: Vec<&str> = call.abi.iter().map(String::as_str).collect();
    let abi = parse_abi(&fragments).map_err(|e| EncodingError::InvalidAbi(e.to_string()))?;

    let overloads = abi
        .functions_by_name(&call.func)
        .map_err(|_| EncodingError::UnknownFunction(call.func.clone()))?;
    let function = select_overload(overloads, call)?;

    let tokens = function
        .inputs
        .iter()
        .zip(&call.payload)
        .enumerate()
        .map(|(index, (param, value))| {
            tokenize(&param.kind, value).map_err(|reason| EncodingError::InvalidArgument {
                function: call.func.clone(),
                index,
                param_type: param.kind.to_string(),
                reason,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let data = function
        .encode_input(&tokens)
        .map_err(|e| EncodingError::InvalidAbi(e.to_string()))?;
    Ok(Bytes::from(data))
}

fn select_overload<'a>(overloads: &'a [Function], call: &CallInput) -> Result<&'a Function, EncodingError> {
    overloads
        .iter()
        .find(|f| f.inputs.len() == call.payload.len())
        .ok_or_else(|| EncodingError::ArityMismatch {
            function: call.func.clone(),
            expected: overloads.first().map(|f| f.inputs.len()).unwrap_or_default(),
            actual: call.payload.len(),
        })
}

/// Convert one JSON argument into an ABI token of the declared type
fn tokenize(kind: &ParamType, value: &Value) -> Result<Token, String> {
    match kind {
        ParamType::Array(inner) => {
            let items = as_array(value)?;
            let tokens = items.iter().map(|v| tokenize(inner, v)).collect::<Result<_, _>>()?;
            Ok(Token::Array(tokens))
        }
        ParamType::FixedArray(inner, len) => {
            let items = as_array(value)?;
            if items.len() != *len {
                return Err(format!("expected {} elements, got {}", len, items.len()));
            }
            let tokens = items.iter().map(|v| tokenize(inner, v)).collect::<Result<_, _>>()?;
            Ok(Token::FixedArray(tokens))
        }
        ParamType::Tuple(members) => {
            let items = as_array(value)?;
            if items.len() != members.len() {
                return Err(format!("expected {} tuple members, got {}", members.len(), items.len()));
            }
            let tokens = members
                .iter()
                .zip(items)
                .map(|(member, v)| tokenize(member, v))
                .collect::<Result<_, _>>()?;
            Ok(Token::Tuple(tokens))
        }
        ParamType::Address | ParamType::Bytes | ParamType::FixedBytes(_) => {
            let text = scalar_text(value)?;
            let hex_text = text.strip_prefix("0x").unwrap_or(&text);
            LenientTokenizer::tokenize(kind, hex_text).map_err(|e| e.to_string())
        }
        _ => {
            let text = scalar_text(value)?;
            LenientTokenizer::tokenize(kind, &text).map_err(|e| e.to_string())
        }
    }
}

fn as_array(value: &Value) -> Result<&Vec<Value>, String> {
    value.as_array().ok_or_else(|| format!("expected a JSON array, got {}", value))
}

fn scalar_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("unsupported argument {}", other)),
    }
}
