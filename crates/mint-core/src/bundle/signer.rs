//! Transaction signing with per-account nonce tracking

use super::types::{CompiledTransaction, SignedTransaction};
use crate::error::IntentError;
use crate::provider::ChainProvider;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{transaction::eip2718::TypedTransaction, Address, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Signs compiled transactions, assigning consecutive nonces per sender
pub struct TransactionSigner {
    provider: Arc<dyn ChainProvider>,
    nonces: Mutex<HashMap<Address, U256>>,
}

impl TransactionSigner {
    pub fn new(provider: Arc<dyn ChainProvider>) -> Self {
        Self {
            provider,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    /// Sign a compiled transaction.
    ///
    /// A missing gas limit is estimated first, so a failed estimate never
    /// consumes a nonce.
    pub async fn sign(
        &self,
        wallet: &LocalWallet,
        transaction: CompiledTransaction,
    ) -> Result<SignedTransaction, IntentError> {
        let from = wallet.address();

        let gas_limit = match transaction.gas_limit {
            Some(gas) => gas,
            None => {
                let request: TypedTransaction = transaction.to_request(from, None, None).into();
                self.provider.estimate_gas(&request).await?
            }
        };

        let nonce = self.next_nonce(from).await?;
        let typed: TypedTransaction = transaction.to_request(from, Some(nonce), Some(gas_limit)).into();

        let signature = wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| IntentError::Signing(e.to_string()))?;
        let raw = typed.rlp_signed(&signature);
        let hash = typed.hash(&signature);

        debug!(from = ?from, nonce = %nonce, hash = ?hash, gas_limit = %gas_limit, "Signed transaction");

        Ok(SignedTransaction {
            hash,
            from,
            nonce,
            gas_limit,
            transaction,
            raw,
        })
    }

    /// Next nonce for an account; the first lookup reads the pending count
    async fn next_nonce(&self, address: Address) -> Result<U256, IntentError> {
        let mut nonces = self.nonces.lock().await;
        let nonce = match nonces.get(&address) {
            Some(nonce) => *nonce,
            None => self.provider.transaction_count(address, true).await?,
        };
        nonces.insert(address, nonce + 1);
        Ok(nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::types::EIP1559_TX_TYPE;
    use crate::testing::FakeChainProvider;
    use ethers::types::{Bytes, H256};
    use ethers::utils::rlp::Rlp;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn compiled(gas_limit: Option<u64>) -> CompiledTransaction {
        CompiledTransaction {
            chain_id: 1,
            to: "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap(),
            data: Bytes::from(vec![0x12, 0x49, 0xc5, 0x8b]),
            value: U256::exp10(17),
            max_priority_fee_per_gas: U256::from(2_000_000_000u64),
            max_fee_per_gas: U256::from(50_000_000_000u64),
            gas_limit: gas_limit.map(U256::from),
            transaction_type: EIP1559_TX_TYPE,
        }
    }

    #[tokio::test]
    async fn test_consecutive_nonces_for_same_sender() {
        let wallet: LocalWallet = KEY.parse::<LocalWallet>().unwrap().with_chain_id(1u64);
        let provider = Arc::new(FakeChainProvider::new(1));
        provider.set_transaction_count(wallet.address(), 5);
        let signer = TransactionSigner::new(provider);

        let first = signer.sign(&wallet, compiled(Some(90_000))).await.unwrap();
        let second = signer.sign(&wallet, compiled(Some(90_000))).await.unwrap();

        assert_eq!(first.nonce, U256::from(5));
        assert_eq!(second.nonce, U256::from(6));
        assert_ne!(first.hash, second.hash);
        assert_eq!(first.from, wallet.address());
    }

    #[tokio::test]
    async fn test_missing_gas_limit_is_estimated() {
        let wallet: LocalWallet = KEY.parse::<LocalWallet>().unwrap().with_chain_id(1u64);
        let provider = Arc::new(FakeChainProvider::new(1));
        provider.set_gas_estimate(U256::from(123_456));
        let signer = TransactionSigner::new(provider);

        let signed = signer.sign(&wallet, compiled(None)).await.unwrap();
        assert_eq!(signed.gas_limit, U256::from(123_456));
    }

    #[tokio::test]
    async fn test_raw_bytes_recover_sender_and_hash() {
        let wallet: LocalWallet = KEY.parse::<LocalWallet>().unwrap().with_chain_id(1u64);
        let signer = TransactionSigner::new(Arc::new(FakeChainProvider::new(1)));

        let signed = signer.sign(&wallet, compiled(Some(90_000))).await.unwrap();

        assert_eq!(signed.raw[0], EIP1559_TX_TYPE);
        assert_eq!(signed.hash, H256::from(ethers::utils::keccak256(&signed.raw)));

        let (decoded, signature) = TypedTransaction::decode_signed(&Rlp::new(&signed.raw)).unwrap();
        assert_eq!(signature.recover(decoded.sighash()).unwrap(), wallet.address());
        assert_eq!(decoded.nonce(), Some(&U256::zero()));
        assert_eq!(decoded.value(), Some(&U256::exp10(17)));
    }
}
