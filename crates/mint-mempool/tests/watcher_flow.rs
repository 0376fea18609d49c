use async_trait::async_trait;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, Transaction, TransactionReceipt, H256, U256,
};
use mint_core::testing::FakeChainProvider;
use mint_core::{CapturedPendingTransaction, ChainProvider, NetworkError};
use mint_mempool::{DispatchTrigger, FrontRunWatcher, PendingFeed, WatcherConfig, WatcherError, WatcherState};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use std::sync::{Arc, Mutex};

/// Replays scripted messages, then either ends or stays open
struct ScriptedFeed {
    messages: VecDeque<String>,
    hold_open: bool,
    subscribed: Option<String>,
    closed: bool,
}

impl ScriptedFeed {
    fn new(messages: Vec<String>, hold_open: bool) -> Self {
        Self {
            messages: messages.into(),
            hold_open,
            subscribed: None,
            closed: false,
        }
    }
}

#[async_trait]
impl PendingFeed for ScriptedFeed {
    async fn subscribe(&mut self, request: &str) -> Result<(), WatcherError> {
        self.subscribed = Some(request.to_string());
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<String, WatcherError>> {
        if let Some(message) = self.messages.pop_front() {
            return Some(Ok(message));
        }
        if self.hold_open {
            futures::future::pending::<()>().await;
        }
        None
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[derive(Default)]
struct RecordingTrigger {
    captured: Mutex<Vec<CapturedPendingTransaction>>,
    fail: AtomicBool,
}

#[async_trait]
impl DispatchTrigger for RecordingTrigger {
    async fn dispatch(&self, captured: CapturedPendingTransaction) -> anyhow::Result<()> {
        // Let the remaining messages race the dispatch
        tokio::task::yield_now().await;
        self.captured.lock().unwrap().push(captured);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("relay unavailable");
        }
        Ok(())
    }
}

const MINT_SELECTOR: [u8; 4] = [0xa0, 0x71, 0x2d, 0x68];

fn target() -> Address {
    "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap()
}

fn setup() -> (Arc<FakeChainProvider>, FrontRunWatcher) {
    let provider = Arc::new(FakeChainProvider::new(1));
    let watcher = FrontRunWatcher::new(
        provider.clone(),
        WatcherConfig {
            contract: target(),
            input: Bytes::from(MINT_SELECTOR.to_vec()),
            tx_chain: "params.result".to_string(),
            subscribe: r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newPendingTransactions"]}"#
                .to_string(),
            max_lookups: 8,
        },
    );
    (provider, watcher)
}

fn pending_mint(hash: H256) -> Transaction {
    Transaction {
        hash,
        from: Address::from_low_u64_be(0xfeed),
        to: Some(target()),
        input: Bytes::from(MINT_SELECTOR.to_vec()),
        nonce: U256::from(12),
        ..Default::default()
    }
}

fn announcement(hash: H256) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": { "subscription": "0x1", "result": format!("{hash:?}") }
    })
    .to_string()
}

#[tokio::test]
async fn test_duplicate_match_dispatches_once() {
    let (provider, watcher) = setup();
    let hash = H256::from_low_u64_be(0x11);
    provider.insert_transaction(pending_mint(hash));

    let mut feed = ScriptedFeed::new(vec![announcement(hash), announcement(hash)], true);
    let trigger = RecordingTrigger::default();

    let outcome = watcher.run(&mut feed, &trigger).await.unwrap();

    assert_eq!(outcome.captured, hash);
    assert_eq!(trigger.captured.lock().unwrap().len(), 1);
    let dispatching = watcher
        .transitions()
        .into_iter()
        .filter(|state| matches!(state, WatcherState::Dispatching(_)))
        .count();
    assert_eq!(dispatching, 1);
    assert_eq!(watcher.state(), WatcherState::Closed);
    assert!(feed.closed);
    assert!(feed.subscribed.unwrap().contains("newPendingTransactions"));
}

#[tokio::test]
async fn test_malformed_messages_do_not_stop_listening() {
    let (provider, watcher) = setup();
    let decoy = H256::from_low_u64_be(0x21);
    let hash = H256::from_low_u64_be(0x22);
    let mut other = pending_mint(decoy);
    other.input = Bytes::from(vec![0x00]);
    provider.insert_transaction(other);
    provider.insert_transaction(pending_mint(hash));

    let mut feed = ScriptedFeed::new(
        vec![
            "{ not json".to_string(),
            json!({ "jsonrpc": "2.0", "id": 1, "result": "0x9ce59a13" }).to_string(),
            announcement(decoy),
            announcement(hash),
        ],
        true,
    );
    let trigger = RecordingTrigger::default();

    let outcome = watcher.run(&mut feed, &trigger).await.unwrap();

    assert_eq!(outcome.captured, hash);
    assert_eq!(outcome.messages, 4);
    let captured = trigger.captured.lock().unwrap();
    assert_eq!(captured[0].hash, hash);
    assert_eq!(captured[0].nonce, U256::from(12));
}

#[tokio::test]
async fn test_disconnect_before_capture() {
    let (_provider, watcher) = setup();
    let mut feed = ScriptedFeed::new(vec![announcement(H256::from_low_u64_be(0x31))], false);
    let trigger = RecordingTrigger::default();

    let result = watcher.run(&mut feed, &trigger).await;

    assert!(matches!(result, Err(WatcherError::Disconnected(_))));
    assert!(trigger.captured.lock().unwrap().is_empty());
    assert_eq!(watcher.state(), WatcherState::Closed);
}

#[tokio::test]
async fn test_capture_in_flight_survives_disconnect() {
    let (provider, watcher) = setup();
    let hash = H256::from_low_u64_be(0x41);
    provider.insert_transaction(pending_mint(hash));

    let mut feed = ScriptedFeed::new(vec![announcement(hash)], false);
    let trigger = RecordingTrigger::default();

    let outcome = watcher.run(&mut feed, &trigger).await.unwrap();
    assert_eq!(outcome.captured, hash);
}

#[tokio::test]
async fn test_dispatch_failure_is_reported() {
    let (provider, watcher) = setup();
    let hash = H256::from_low_u64_be(0x51);
    provider.insert_transaction(pending_mint(hash));

    let mut feed = ScriptedFeed::new(vec![announcement(hash)], true);
    let trigger = RecordingTrigger::default();
    trigger.fail.store(true, Ordering::SeqCst);

    let result = watcher.run(&mut feed, &trigger).await;

    match result {
        Err(WatcherError::Dispatch(reason)) => assert!(reason.contains("relay unavailable")),
        other => panic!("expected dispatch failure, got {other:?}"),
    }
    assert!(watcher.has_fired());
}

/// Slow lookups that record how many ran at once
struct SlowLookups {
    inner: FakeChainProvider,
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ChainProvider for SlowLookups {
    async fn chain_id(&self) -> Result<u64, NetworkError> {
        self.inner.chain_id().await
    }

    async fn block_number(&self) -> Result<u64, NetworkError> {
        self.inner.block_number().await
    }

    async fn block_transaction_hashes(&self, number: u64) -> Result<Option<Vec<H256>>, NetworkError> {
        self.inner.block_transaction_hashes(number).await
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, NetworkError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.transaction(hash).await
    }

    async fn transaction_count(&self, address: Address, pending: bool) -> Result<U256, NetworkError> {
        self.inner.transaction_count(address, pending).await
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, NetworkError> {
        self.inner.estimate_gas(tx).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, NetworkError> {
        self.inner.send_raw_transaction(raw).await
    }

    async fn wait_for_receipt(
        &self,
        hash: H256,
        poll_interval: Duration,
    ) -> Result<Option<TransactionReceipt>, NetworkError> {
        self.inner.wait_for_receipt(hash, poll_interval).await
    }
}

#[tokio::test]
async fn test_lookups_are_capped() {
    let hash = H256::from_low_u64_be(0x99);
    let provider = Arc::new(SlowLookups {
        inner: FakeChainProvider::new(1),
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    provider.inner.insert_transaction(pending_mint(hash));
    let watcher = FrontRunWatcher::new(
        provider.clone(),
        WatcherConfig {
            contract: target(),
            input: Bytes::from(MINT_SELECTOR.to_vec()),
            tx_chain: "params.result".to_string(),
            subscribe: "{}".to_string(),
            max_lookups: 2,
        },
    );

    let mut messages: Vec<String> = (1..=6u64)
        .map(|n| announcement(H256::from_low_u64_be(n)))
        .collect();
    messages.push(announcement(hash));
    let mut feed = ScriptedFeed::new(messages, true);
    let trigger = RecordingTrigger::default();

    let outcome = watcher.run(&mut feed, &trigger).await.unwrap();

    assert_eq!(outcome.captured, hash);
    assert_eq!(outcome.messages, 7);
    assert!(provider.peak.load(Ordering::SeqCst) <= 2);
}
