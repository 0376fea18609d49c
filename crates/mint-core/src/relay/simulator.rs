//! Pre-submission simulation

use super::client::{RelayClient, SimulationResponse};
use crate::bundle::Bundle;
use crate::error::{RevertedTransaction, SimulationError};
use ethers::types::U256;
use ethers::utils::format_units;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Diagnostic fee figures of a successful dry run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// Total payment to the block producer, in wei
    pub coinbase_diff: U256,
    pub total_gas_used: u64,
    /// `coinbase_diff / total_gas_used`, in wei per gas
    pub effective_gas_price: U256,
}

impl FeeEstimate {
    pub fn effective_gas_price_gwei(&self) -> String {
        format_units(self.effective_gas_price, "gwei").unwrap_or_else(|_| self.effective_gas_price.to_string())
    }
}

/// Dry-runs bundles through the relay before submission
pub struct BundleSimulator {
    relay: Arc<dyn RelayClient>,
}

impl BundleSimulator {
    pub fn new(relay: Arc<dyn RelayClient>) -> Self {
        Self { relay }
    }

    /// Simulate on top of `block_number` and judge the outcome
    pub async fn simulate(&self, bundle: &Bundle, block_number: u64) -> Result<FeeEstimate, SimulationError> {
        let response = self.relay.simulate(&bundle.raw_transactions(), block_number).await?;
        let estimate = evaluate(bundle, &response)?;

        info!(
            block_number,
            coinbase_diff = %estimate.coinbase_diff,
            total_gas_used = estimate.total_gas_used,
            effective_gas_price_gwei = %estimate.effective_gas_price_gwei(),
            "Bundle simulation passed"
        );
        Ok(estimate)
    }
}

/// Reject reverting or unpaid bundles; every reverting member is reported
pub fn evaluate(bundle: &Bundle, response: &SimulationResponse) -> Result<FeeEstimate, SimulationError> {
    let members = bundle.members();

    let reverts: Vec<RevertedTransaction> = response
        .results
        .iter()
        .enumerate()
        .filter(|(_, tx)| tx.reverted())
        .map(|(index, tx)| RevertedTransaction {
            index,
            tx_hash: tx.tx_hash.or_else(|| members.get(index).map(|m| m.hash)),
            error: tx.error.clone().unwrap_or_else(|| "execution reverted".to_string()),
            reason: tx.revert.clone(),
        })
        .collect();

    if !reverts.is_empty() {
        for revert in &reverts {
            warn!(index = revert.index, tx_hash = ?revert.tx_hash, error = %revert.error, reason = ?revert.reason, "Simulated transaction reverted");
        }
        return Err(SimulationError::Revert(reverts));
    }

    if response.coinbase_diff.is_zero() {
        return Err(SimulationError::Unprofitable);
    }

    let effective_gas_price = if response.total_gas_used == 0 {
        U256::zero()
    } else {
        response.coinbase_diff / U256::from(response.total_gas_used)
    };

    Ok(FeeEstimate {
        coinbase_diff: response.coinbase_diff,
        total_gas_used: response.total_gas_used,
        effective_gas_price,
    })
}
