//! Chain provider abstraction over the JSON-RPC node

use crate::error::NetworkError;
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, PendingTransaction, Provider};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, Transaction,
    TransactionReceipt, H256, U256,
};
use std::time::Duration;
use tracing::debug;

/// Read and broadcast operations the engine needs from the network
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Network chain id
    async fn chain_id(&self) -> Result<u64, NetworkError>;

    /// Current chain head
    async fn block_number(&self) -> Result<u64, NetworkError>;

    /// Transaction hashes of a block, `None` if the block is not known yet
    async fn block_transaction_hashes(&self, number: u64) -> Result<Option<Vec<H256>>, NetworkError>;

    /// Look up a (possibly pending) transaction by hash
    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, NetworkError>;

    /// Transaction count of an account, including pending transactions when `pending` is set
    async fn transaction_count(&self, address: Address, pending: bool) -> Result<U256, NetworkError>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, NetworkError>;

    /// Broadcast a signed transaction to the public pool
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, NetworkError>;

    /// Wait until a broadcast transaction is mined
    async fn wait_for_receipt(
        &self,
        hash: H256,
        poll_interval: Duration,
    ) -> Result<Option<TransactionReceipt>, NetworkError>;
}

/// `ChainProvider` backed by an ethers HTTP provider
#[derive(Debug, Clone)]
pub struct EthersProvider {
    inner: Provider<Http>,
}

impl EthersProvider {
    /// Connect to a static JSON-RPC endpoint
    pub fn connect(url: &str) -> Result<Self, NetworkError> {
        let inner = Provider::<Http>::try_from(url)
            .map_err(|_| NetworkError::InvalidEndpoint(url.to_string()))?;
        debug!(endpoint = %url, "Created HTTP provider");
        Ok(Self { inner })
    }

    pub fn inner(&self) -> &Provider<Http> {
        &self.inner
    }
}

#[async_trait]
impl ChainProvider for EthersProvider {
    async fn chain_id(&self) -> Result<u64, NetworkError> {
        Ok(self.inner.get_chainid().await?.as_u64())
    }

    async fn block_number(&self) -> Result<u64, NetworkError> {
        Ok(self.inner.get_block_number().await?.as_u64())
    }

    async fn block_transaction_hashes(&self, number: u64) -> Result<Option<Vec<H256>>, NetworkError> {
        let block = self.inner.get_block(number).await?;
        Ok(block.map(|b| b.transactions))
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, NetworkError> {
        Ok(self.inner.get_transaction(hash).await?)
    }

    async fn transaction_count(&self, address: Address, pending: bool) -> Result<U256, NetworkError> {
        let tag = if pending { BlockNumber::Pending } else { BlockNumber::Latest };
        Ok(self.inner.get_transaction_count(address, Some(tag.into())).await?)
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, NetworkError> {
        Ok(self.inner.estimate_gas(tx, None).await?)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, NetworkError> {
        let pending = self.inner.send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_receipt(
        &self,
        hash: H256,
        poll_interval: Duration,
    ) -> Result<Option<TransactionReceipt>, NetworkError> {
        let pending = PendingTransaction::new(hash, &self.inner).interval(poll_interval);
        Ok(pending.await?)
    }
}
