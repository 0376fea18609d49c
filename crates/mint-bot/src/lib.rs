//! Mint Bot - bundle minting engine behind the `flashmint` CLI

pub mod engine;
pub mod report;

pub use engine::{EngineServices, MintEngine, RunOutcome};
pub use report::{attempt_table, broadcast_table, BroadcastResult, BroadcastSummary, DryRunReport};
