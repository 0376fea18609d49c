//! Bundle construction and signing
//!
//! - Transaction intent compilation (call data, amounts, chain id)
//! - Credential resolution and the per-credential signer cache
//! - EIP-1559 signing with per-account nonce tracking
//! - The bundle accumulator with its front-run prefix slot

pub mod accumulator;
pub mod compiler;
pub mod key_manager;
pub mod signer;
pub mod signer_cache;
pub mod types;

pub use accumulator::{AccumulatorConfig, BundleAccumulator, PushOutcome};
pub use compiler::{encode_input, IntentCompiler};
pub use key_manager::{CredentialSource, KeyStore};
pub use signer::TransactionSigner;
pub use signer_cache::SignerCache;
pub use types::*;
