//! Per-credential signer cache

use super::key_manager::KeyStore;
use crate::error::CredentialError;
use crate::intent::CredentialRef;
use ethers::signers::{LocalWallet, Signer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Lazily builds one signer per distinct credential and shares it afterwards.
///
/// The lock is held while a signer is constructed, so concurrent first use of
/// the same credential still builds exactly one instance.
pub struct SignerCache {
    keystore: KeyStore,
    chain_id: u64,
    signers: Mutex<HashMap<CredentialRef, Arc<LocalWallet>>>,
}

impl SignerCache {
    pub fn new(keystore: KeyStore, chain_id: u64) -> Self {
        Self {
            keystore,
            chain_id,
            signers: Mutex::new(HashMap::new()),
        }
    }

    /// Signer for a credential, constructing it on first use
    pub async fn get_signer(&self, reference: &CredentialRef) -> Result<Arc<LocalWallet>, CredentialError> {
        let mut signers = self.signers.lock().await;
        if let Some(signer) = signers.get(reference) {
            return Ok(signer.clone());
        }

        let wallet = self.keystore.load_wallet(reference).await?.with_chain_id(self.chain_id);
        debug!(address = ?wallet.address(), chain_id = self.chain_id, "Cached new signer");

        let signer = Arc::new(wallet);
        signers.insert(reference.clone(), signer.clone());
        Ok(signer)
    }

    /// Number of distinct credentials with a built signer
    pub async fn cached_count(&self) -> usize {
        self.signers.lock().await.len()
    }
}
