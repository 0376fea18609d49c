//! Error taxonomy for intent compilation, simulation and relay submission

use ethers::providers::ProviderError;
use ethers::types::H256;
use thiserror::Error;

/// Failure talking to the chain provider
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("provider request failed: {0}")]
    Provider(String),

    #[error("invalid provider endpoint `{0}`")]
    InvalidEndpoint(String),
}

impl From<ProviderError> for NetworkError {
    fn from(err: ProviderError) -> Self {
        NetworkError::Provider(err.to_string())
    }
}

/// A numeric field could not be read as a non-negative fixed-point amount
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount `{0}` is negative")]
    Negative(String),

    #[error("amount `{0}` is not a decimal number")]
    Malformed(String),

    #[error("amount `{value}` has more than {decimals} fractional digits")]
    ExcessPrecision { value: String, decimals: u32 },

    #[error("amount `{0}` does not fit in 256 bits")]
    Overflow(String),
}

/// Call data could not be produced from the intent input
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("invalid interface fragments: {0}")]
    InvalidAbi(String),

    #[error("function `{0}` is not declared in the interface fragments")]
    UnknownFunction(String),

    #[error("function `{function}` takes {expected} arguments, {actual} supplied")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("argument #{index} of `{function}` is not a valid {param_type}: {reason}")]
    InvalidArgument {
        function: String,
        index: usize,
        param_type: String,
        reason: String,
    },

    #[error("raw payload is not valid hex: {0}")]
    InvalidPayload(String),

    #[error("invalid contract address `{0}`")]
    InvalidAddress(String),
}

/// A credential reference could not be turned into a signer
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("environment variable `{0}` is not set")]
    MissingEnv(String),

    #[error("credential is not a valid private key")]
    InvalidKey,

    #[error("key file error: {0}")]
    KeyFile(String),
}

/// Per-intent failure; the intent is skipped and the run continues
#[derive(Debug, Error)]
pub enum IntentError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Amount(#[from] AmountError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Transport or protocol failure talking to the relay
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("relay returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid relay response: {0}")]
    InvalidResponse(String),

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error("invalid relay endpoint `{0}`")]
    InvalidEndpoint(String),
}

/// One bundle member that would revert during simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertedTransaction {
    pub index: usize,
    pub tx_hash: Option<H256>,
    pub error: String,
    pub reason: Option<String>,
}

impl std::fmt::Display for RevertedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx #{}: {}", self.index, self.error)?;
        if let Some(reason) = &self.reason {
            write!(f, " (reason: {})", reason)?;
        }
        Ok(())
    }
}

fn format_reverts(reverts: &[RevertedTransaction]) -> String {
    let members: Vec<String> = reverts.iter().map(ToString::to_string).collect();
    format!("bundle would revert: {}", members.join("; "))
}

/// Bundle-level rejection from the pre-submission dry run
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("{}", format_reverts(.0))]
    Revert(Vec<RevertedTransaction>),

    #[error("bundle does not pay the block producer")]
    Unprofitable,

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Terminal failure of the relay submission state machine
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("bundle is empty")]
    EmptyBundle,

    #[error("simulation rejected bundle: {0}")]
    Simulation(#[from] SimulationError),

    #[error("relay submission failed: {0}")]
    RelaySubmit(RelayError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("account nonce too high for bundle targeting block {target_block}")]
    NonceConflict { target_block: u64 },

    #[error("bundle not included after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("submission deadline elapsed after {attempts} attempts")]
    DeadlineElapsed { attempts: u32 },

    #[error("submission cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}
