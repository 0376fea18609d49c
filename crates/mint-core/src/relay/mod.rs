//! Relay integration
//!
//! - JSON-RPC relay client (`eth_callBundle`, `eth_sendBundle`)
//! - Pre-submission simulation and fee estimate
//! - Inclusion resolution against the chain
//! - The submission state machine driving retries across blocks

pub mod client;
pub mod resolution;
pub mod simulator;
pub mod submitter;

pub use client::{FlashbotsRelay, RelayClient, SimulatedTransaction, SimulationResponse, DEFAULT_RELAY_ENDPOINT};
pub use resolution::{BundleResolution, BundleResolver, InclusionWaiter};
pub use simulator::{BundleSimulator, FeeEstimate};
pub use submitter::{
    BundleSubmitter, CancellationFlag, NonceConflictPolicy, SubmissionAttempt, SubmissionConfig,
    SubmissionFailure, SubmissionReport,
};
