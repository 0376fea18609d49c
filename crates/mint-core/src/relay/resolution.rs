//! Inclusion resolution for submitted bundles

use crate::bundle::{Bundle, BundleMember};
use crate::error::NetworkError;
use crate::provider::ChainProvider;
use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// How a submission attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BundleResolution {
    /// Every bundle transaction landed in the target block
    Included,
    /// The target block was produced without the bundle
    BlockPassedWithoutInclusion,
    /// An account nonce moved past the bundle before the target block
    AccountNonceTooHigh,
}

impl fmt::Display for BundleResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleResolution::Included => write!(f, "included"),
            BundleResolution::BlockPassedWithoutInclusion => write!(f, "block passed without inclusion"),
            BundleResolution::AccountNonceTooHigh => write!(f, "account nonce too high"),
        }
    }
}

/// Waits for the resolution of a bundle submitted for a target block
#[async_trait]
pub trait BundleResolver: Send + Sync {
    async fn wait(&self, bundle: &Bundle, target_block: u64) -> Result<BundleResolution, NetworkError>;
}

/// Resolves bundles by polling the chain head
pub struct InclusionWaiter {
    provider: Arc<dyn ChainProvider>,
    poll_interval: Duration,
}

impl InclusionWaiter {
    pub fn new(provider: Arc<dyn ChainProvider>, poll_interval: Duration) -> Self {
        Self {
            provider,
            poll_interval,
        }
    }

    async fn nonce_too_high(&self, expected: &HashMap<Address, U256>) -> Result<bool, NetworkError> {
        for (account, nonce) in expected {
            let confirmed = self.provider.transaction_count(*account, false).await?;
            if confirmed > *nonce {
                debug!(account = ?account, bundle_nonce = %nonce, confirmed = %confirmed, "Account nonce moved past bundle");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl BundleResolver for InclusionWaiter {
    async fn wait(&self, bundle: &Bundle, target_block: u64) -> Result<BundleResolution, NetworkError> {
        let members = bundle.members();
        let expected = lowest_nonces(&members);

        loop {
            let head = self.provider.block_number().await?;
            trace!(head, target_block, "Polling for bundle resolution");

            if head >= target_block {
                if let Some(hashes) = self.provider.block_transaction_hashes(target_block).await? {
                    let in_block: HashSet<_> = hashes.into_iter().collect();
                    let included = members.iter().all(|m| in_block.contains(&m.hash));
                    return Ok(if included {
                        BundleResolution::Included
                    } else {
                        BundleResolution::BlockPassedWithoutInclusion
                    });
                }
            } else if self.nonce_too_high(&expected).await? {
                return Ok(BundleResolution::AccountNonceTooHigh);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Lowest nonce the bundle uses per account
fn lowest_nonces(members: &[BundleMember]) -> HashMap<Address, U256> {
    let mut nonces: HashMap<Address, U256> = HashMap::new();
    for member in members {
        nonces
            .entry(member.from)
            .and_modify(|n| *n = (*n).min(member.nonce))
            .or_insert(member.nonce);
    }
    nonces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::types::tests::signed_tx;
    use crate::testing::FakeChainProvider;

    fn bundle_from(sender: Address, nonces: &[u64]) -> Bundle {
        Bundle {
            prefix: None,
            transactions: nonces.iter().map(|n| signed_tx(sender, *n, &[*n as u8])).collect(),
        }
    }

    #[tokio::test]
    async fn test_included_when_all_hashes_in_target_block() {
        let sender = Address::random();
        let bundle = bundle_from(sender, &[3, 4]);
        let provider = Arc::new(FakeChainProvider::new(1));
        provider.set_head(1000);
        provider.insert_block(1000, bundle.members().iter().map(|m| m.hash).collect());

        let waiter = InclusionWaiter::new(provider, Duration::from_millis(5));
        assert_eq!(waiter.wait(&bundle, 1000).await.unwrap(), BundleResolution::Included);
    }

    #[tokio::test]
    async fn test_block_passed_without_inclusion() {
        let sender = Address::random();
        let bundle = bundle_from(sender, &[3, 4]);
        let provider = Arc::new(FakeChainProvider::new(1));
        provider.set_head(1001);
        // Only one of the two members landed
        provider.insert_block(1000, vec![bundle.transactions[0].hash]);

        let waiter = InclusionWaiter::new(provider, Duration::from_millis(5));
        assert_eq!(
            waiter.wait(&bundle, 1000).await.unwrap(),
            BundleResolution::BlockPassedWithoutInclusion
        );
    }

    #[tokio::test]
    async fn test_nonce_too_high_before_target() {
        let sender = Address::random();
        let bundle = bundle_from(sender, &[3, 4]);
        let provider = Arc::new(FakeChainProvider::new(1));
        provider.set_head(990);
        provider.set_transaction_count(sender, 4);

        let waiter = InclusionWaiter::new(provider, Duration::from_millis(5));
        assert_eq!(
            waiter.wait(&bundle, 1000).await.unwrap(),
            BundleResolution::AccountNonceTooHigh
        );
    }

    #[tokio::test]
    async fn test_waits_for_head_to_reach_target() {
        let sender = Address::random();
        let bundle = bundle_from(sender, &[0]);
        let provider = Arc::new(FakeChainProvider::new(1));
        provider.set_head(997);
        provider.set_auto_mine(true);
        provider.insert_block(1000, vec![bundle.transactions[0].hash]);

        let waiter = InclusionWaiter::new(provider.clone(), Duration::from_millis(1));
        assert_eq!(waiter.wait(&bundle, 1000).await.unwrap(), BundleResolution::Included);
        assert!(provider.head() >= 1000);
    }

    #[test]
    fn test_lowest_nonce_per_account() {
        let sender = Address::random();
        let bundle = bundle_from(sender, &[7, 5, 6]);
        let nonces = lowest_nonces(&bundle.members());
        assert_eq!(nonces.get(&sender), Some(&U256::from(5)));
    }
}
