//! Mint Core - bundle compilation, signing and relay submission

pub mod amount;
pub mod bundle;
pub mod error;
pub mod executor;
pub mod intent;
pub mod logging;
pub mod provider;
pub mod relay;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use amount::{parse_amount, DecimalAmount, GWEI_DECIMALS, NATIVE_DECIMALS};
pub use bundle::{
    AccumulatorConfig, Bundle, BundleAccumulator, BundleMember, CapturedPendingTransaction,
    CompiledTransaction, CredentialSource, IntentCompiler, KeyStore, PushOutcome, SignedTransaction,
    SignerCache, TransactionSigner,
};
pub use error::*;
pub use executor::{BoundedExecutor, ExecutionSummary, TaskError};
pub use intent::{CallInput, CredentialRef, IntentInput, RawInput, TransactionIntent};
pub use logging::{init_logging, LogFormat};
pub use provider::{ChainProvider, EthersProvider};
pub use relay::{
    BundleResolution, BundleResolver, BundleSimulator, BundleSubmitter, CancellationFlag,
    FeeEstimate, FlashbotsRelay, InclusionWaiter, NonceConflictPolicy, RelayClient,
    SimulatedTransaction, SimulationResponse, SubmissionAttempt, SubmissionConfig,
    SubmissionFailure, SubmissionReport,
};

/// Version of the core crate, reported at startup
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
