//! In-memory collaborators for tests

use crate::bundle::Bundle;
use crate::error::{NetworkError, RelayError};
use crate::provider::ChainProvider;
use crate::relay::{BundleResolution, BundleResolver, RelayClient, SimulatedTransaction, SimulationResponse};
use async_trait::async_trait;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, Transaction, TransactionReceipt, H256, U256, U64,
};
use ethers::utils::keccak256;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Chain provider backed by in-memory state
pub struct FakeChainProvider {
    chain_id: u64,
    chain_id_calls: AtomicUsize,
    fail_chain_id: AtomicBool,
    head: AtomicU64,
    auto_mine: AtomicBool,
    blocks: Mutex<HashMap<u64, Vec<H256>>>,
    transactions: Mutex<HashMap<H256, Transaction>>,
    counts: Mutex<HashMap<Address, U256>>,
    gas_estimate: Mutex<U256>,
    broadcasts: Mutex<Vec<Bytes>>,
    fail_broadcasts: AtomicBool,
}

impl FakeChainProvider {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            chain_id_calls: AtomicUsize::new(0),
            fail_chain_id: AtomicBool::new(false),
            head: AtomicU64::new(0),
            auto_mine: AtomicBool::new(false),
            blocks: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            counts: Mutex::new(HashMap::new()),
            gas_estimate: Mutex::new(U256::from(21_000)),
            broadcasts: Mutex::new(Vec::new()),
            fail_broadcasts: AtomicBool::new(false),
        }
    }

    pub fn chain_id_calls(&self) -> usize {
        self.chain_id_calls.load(Ordering::SeqCst)
    }

    pub fn fail_chain_id(&self, fail: bool) {
        self.fail_chain_id.store(fail, Ordering::SeqCst);
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Raise the head to at least `block`
    pub fn advance_to(&self, block: u64) {
        self.head.fetch_max(block, Ordering::SeqCst);
    }

    pub fn head(&self) -> u64 {
        self.head.load(Ordering::SeqCst)
    }

    /// Produce one block per head query
    pub fn set_auto_mine(&self, enabled: bool) {
        self.auto_mine.store(enabled, Ordering::SeqCst);
    }

    pub fn insert_block(&self, number: u64, hashes: Vec<H256>) {
        lock(&self.blocks).insert(number, hashes);
    }

    pub fn insert_transaction(&self, tx: Transaction) {
        lock(&self.transactions).insert(tx.hash, tx);
    }

    pub fn set_transaction_count(&self, address: Address, count: u64) {
        lock(&self.counts).insert(address, U256::from(count));
    }

    pub fn set_gas_estimate(&self, gas: U256) {
        *lock(&self.gas_estimate) = gas;
    }

    pub fn fail_broadcasts(&self, fail: bool) {
        self.fail_broadcasts.store(fail, Ordering::SeqCst);
    }

    /// Raw transactions broadcast so far
    pub fn broadcasts(&self) -> Vec<Bytes> {
        lock(&self.broadcasts).clone()
    }
}

#[async_trait]
impl ChainProvider for FakeChainProvider {
    async fn chain_id(&self) -> Result<u64, NetworkError> {
        self.chain_id_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_chain_id.load(Ordering::SeqCst) {
            return Err(NetworkError::Provider("chain id unavailable".to_string()));
        }
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> Result<u64, NetworkError> {
        if self.auto_mine.load(Ordering::SeqCst) {
            Ok(self.head.fetch_add(1, Ordering::SeqCst) + 1)
        } else {
            Ok(self.head.load(Ordering::SeqCst))
        }
    }

    async fn block_transaction_hashes(&self, number: u64) -> Result<Option<Vec<H256>>, NetworkError> {
        if number > self.head() {
            return Ok(None);
        }
        Ok(Some(lock(&self.blocks).get(&number).cloned().unwrap_or_default()))
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, NetworkError> {
        Ok(lock(&self.transactions).get(&hash).cloned())
    }

    async fn transaction_count(&self, address: Address, _pending: bool) -> Result<U256, NetworkError> {
        Ok(lock(&self.counts).get(&address).copied().unwrap_or_default())
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> Result<U256, NetworkError> {
        Ok(*lock(&self.gas_estimate))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, NetworkError> {
        if self.fail_broadcasts.load(Ordering::SeqCst) {
            return Err(NetworkError::Provider("broadcast rejected".to_string()));
        }
        let hash = H256::from(keccak256(&raw));
        lock(&self.broadcasts).push(raw);
        Ok(hash)
    }

    async fn wait_for_receipt(
        &self,
        hash: H256,
        _poll_interval: Duration,
    ) -> Result<Option<TransactionReceipt>, NetworkError> {
        Ok(Some(TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(self.head())),
            status: Some(U64::one()),
            ..Default::default()
        }))
    }
}

/// Relay recording every call
#[derive(Default)]
pub struct FakeRelay {
    simulation: Mutex<Option<SimulationResponse>>,
    simulated: Mutex<Vec<u64>>,
    sent: Mutex<Vec<(u64, Vec<Bytes>)>>,
    send_failure: Mutex<Option<String>>,
}

impl FakeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed dry-run answer; otherwise every member succeeds and pays
    pub fn set_simulation(&self, response: SimulationResponse) {
        *lock(&self.simulation) = Some(response);
    }

    pub fn fail_sends(&self, message: &str) {
        *lock(&self.send_failure) = Some(message.to_string());
    }

    pub fn simulated_blocks(&self) -> Vec<u64> {
        lock(&self.simulated).clone()
    }

    /// `(target_block, raw transactions)` per submission
    pub fn sent_bundles(&self) -> Vec<(u64, Vec<Bytes>)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl RelayClient for FakeRelay {
    async fn simulate(&self, transactions: &[Bytes], block_number: u64) -> Result<SimulationResponse, RelayError> {
        lock(&self.simulated).push(block_number);
        if let Some(response) = lock(&self.simulation).clone() {
            return Ok(response);
        }
        Ok(SimulationResponse {
            results: transactions
                .iter()
                .map(|raw| SimulatedTransaction {
                    tx_hash: Some(H256::from(keccak256(raw))),
                    gas_used: 21_000,
                    error: None,
                    revert: None,
                })
                .collect(),
            coinbase_diff: U256::from(21_000u64 * transactions.len() as u64) * U256::from(2_000_000_000u64),
            total_gas_used: 21_000 * transactions.len() as u64,
        })
    }

    async fn send_bundle(&self, transactions: &[Bytes], target_block: u64) -> Result<H256, RelayError> {
        if let Some(message) = lock(&self.send_failure).clone() {
            return Err(RelayError::Rpc { code: -32000, message });
        }
        lock(&self.sent).push((target_block, transactions.to_vec()));
        Ok(H256::random())
    }
}

/// Resolver answering from a fixed script
pub struct ScriptedResolver {
    script: Mutex<VecDeque<BundleResolution>>,
    calls: Mutex<Vec<(u64, Bundle)>>,
    provider: Option<Arc<FakeChainProvider>>,
    block_forever: AtomicBool,
}

impl ScriptedResolver {
    pub fn new(script: Vec<BundleResolution>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            provider: None,
            block_forever: AtomicBool::new(false),
        }
    }

    /// Move the provider head to each target block as it resolves
    pub fn advancing(mut self, provider: Arc<FakeChainProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Never resolve
    pub fn block_forever(&self) {
        self.block_forever.store(true, Ordering::SeqCst);
    }

    /// `(target_block, bundle)` per wait
    pub fn calls(&self) -> Vec<(u64, Bundle)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl BundleResolver for ScriptedResolver {
    async fn wait(&self, bundle: &Bundle, target_block: u64) -> Result<BundleResolution, NetworkError> {
        lock(&self.calls).push((target_block, bundle.clone()));
        if self.block_forever.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if let Some(provider) = &self.provider {
            provider.advance_to(target_block);
        }
        Ok(lock(&self.script)
            .pop_front()
            .unwrap_or(BundleResolution::BlockPassedWithoutInclusion))
    }
}

// A panicking test must not cascade into unrelated assertions
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
