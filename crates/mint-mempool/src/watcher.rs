//! Front-run watcher
//!
//! Listens to a pending-transaction feed, looks up each announced hash and
//! compares the transaction against a target recipient and payload. The first
//! match is captured and handed to a [`DispatchTrigger`] exactly once, after
//! which the feed is closed.
//!
//! ```text
//! Idle -> Listening -> Matching(hash) -> Captured(hash) -> Dispatching(hash) -> Closed
//! ```

use crate::feed::PendingFeed;
use crate::json_path;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use futures::stream::{FuturesUnordered, StreamExt};
use mint_core::{CapturedPendingTransaction, ChainProvider};
use serde_json::Value;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Feed connection failed: {0}")]
    Connect(String),

    #[error("Feed subscription failed: {0}")]
    Subscribe(String),

    #[error("Feed disconnected: {0}")]
    Disconnected(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

/// Invoked once with the captured transaction
#[async_trait]
pub trait DispatchTrigger: Send + Sync {
    async fn dispatch(&self, captured: CapturedPendingTransaction) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Recipient the pending transaction must call
    pub contract: Address,
    /// Exact call data the pending transaction must carry
    pub input: Bytes,
    /// Path to the transaction hash inside a feed message
    pub tx_chain: String,
    /// Subscription request sent once connected
    pub subscribe: String,
    /// Transaction lookups allowed in flight; the feed is not read past this
    pub max_lookups: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Listening,
    Matching(H256),
    Captured(H256),
    Dispatching(H256),
    Closed,
}

/// What became of a single feed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Arrived after a capture
    Ignored,
    Malformed(String),
    NoHash,
    LookupFailed(String),
    NotFound,
    Unmatched,
    Dispatched(H256),
    DispatchFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOutcome {
    pub captured: H256,
    /// Feed messages received before closing
    pub messages: usize,
}

pub struct FrontRunWatcher {
    provider: Arc<dyn ChainProvider>,
    config: WatcherConfig,
    fired: AtomicBool,
    transitions: Mutex<Vec<WatcherState>>,
}

impl FrontRunWatcher {
    pub fn new(provider: Arc<dyn ChainProvider>, config: WatcherConfig) -> Self {
        Self {
            provider,
            config,
            fired: AtomicBool::new(false),
            transitions: Mutex::new(vec![WatcherState::Idle]),
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn state(&self) -> WatcherState {
        self.transitions().last().copied().unwrap_or(WatcherState::Idle)
    }

    /// Every state entered so far, oldest first
    pub fn transitions(&self) -> Vec<WatcherState> {
        self.lock_transitions().clone()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    fn lock_transitions(&self) -> std::sync::MutexGuard<'_, Vec<WatcherState>> {
        self.transitions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, state: WatcherState) {
        let mut transitions = self.lock_transitions();
        if transitions.last() != Some(&state) {
            transitions.push(state);
        }
    }

    // Fall back to listening unless another handler moved the state on
    fn abandon(&self, hash: H256) {
        let mut transitions = self.lock_transitions();
        if transitions.last() == Some(&WatcherState::Matching(hash)) {
            transitions.push(WatcherState::Listening);
        }
    }

    /// Subscribe and listen until a capture has been dispatched.
    ///
    /// Messages are handled concurrently. A disconnect while a handler is
    /// still in flight lets that handler finish before reporting.
    pub async fn run<F>(&self, feed: &mut F, trigger: &dyn DispatchTrigger) -> Result<WatchOutcome, WatcherError>
    where
        F: PendingFeed + ?Sized,
    {
        feed.subscribe(&self.config.subscribe).await?;
        self.enter(WatcherState::Listening);
        info!(
            contract = ?self.config.contract,
            tx_chain = %self.config.tx_chain,
            "Watching pending transactions"
        );

        let max_lookups = self.config.max_lookups.max(1);
        let mut in_flight = FuturesUnordered::new();
        let mut messages = 0usize;
        let mut disconnect: Option<String> = None;

        let result = loop {
            tokio::select! {
                message = feed.next_message(), if disconnect.is_none() && in_flight.len() < max_lookups => match message {
                    Some(Ok(text)) => {
                        messages += 1;
                        if self.has_fired() {
                            debug!("Capture already made, ignoring message");
                            continue;
                        }
                        in_flight.push(self.handle_message(text, trigger));
                    }
                    Some(Err(e)) => disconnect = Some(e.to_string()),
                    None => disconnect = Some("feed closed".to_string()),
                },
                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => match outcome {
                    MessageOutcome::Dispatched(captured) => break Ok(WatchOutcome { captured, messages }),
                    MessageOutcome::DispatchFailed(reason) => break Err(WatcherError::Dispatch(reason)),
                    other => debug!(outcome = ?other, "Message handled"),
                },
                else => {}
            }

            if in_flight.is_empty() {
                if let Some(reason) = disconnect.take() {
                    warn!(reason = %reason, messages, "Feed disconnected before a capture");
                    break Err(WatcherError::Disconnected(reason));
                }
            }
        };

        feed.close().await;
        self.enter(WatcherState::Closed);
        result
    }

    /// Handle one raw feed message
    pub async fn handle_message(&self, text: String, trigger: &dyn DispatchTrigger) -> MessageOutcome {
        if self.has_fired() {
            return MessageOutcome::Ignored;
        }

        let message: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Discarding malformed feed message");
                return MessageOutcome::Malformed(e.to_string());
            }
        };

        let Some(hash) = self.extract_hash(&message) else {
            return MessageOutcome::NoHash;
        };

        self.enter(WatcherState::Matching(hash));
        let tx = match self.provider.transaction(hash).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                self.abandon(hash);
                return MessageOutcome::NotFound;
            }
            Err(e) => {
                debug!(hash = ?hash, error = %e, "Pending transaction lookup failed");
                self.abandon(hash);
                return MessageOutcome::LookupFailed(e.to_string());
            }
        };

        if tx.to != Some(self.config.contract) || tx.input != self.config.input {
            self.abandon(hash);
            return MessageOutcome::Unmatched;
        }

        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return MessageOutcome::Ignored;
        }

        let captured = CapturedPendingTransaction::from_transaction(&tx);
        self.enter(WatcherState::Captured(hash));
        info!(hash = ?hash, from = ?captured.from, nonce = %captured.nonce, "Captured pending transaction");

        self.enter(WatcherState::Dispatching(hash));
        match trigger.dispatch(captured).await {
            Ok(()) => MessageOutcome::Dispatched(hash),
            Err(e) => {
                warn!(hash = ?hash, error = %e, "Dispatch after capture failed");
                MessageOutcome::DispatchFailed(format!("{e:#}"))
            }
        }
    }

    // The path may point at the hash itself or at a transaction object
    fn extract_hash(&self, message: &Value) -> Option<H256> {
        let value = json_path::extract(message, &self.config.tx_chain)?;
        let text = match value {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map.get("hash")?.as_str()?,
            _ => return None,
        };
        H256::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Transaction, U256};
    use mint_core::testing::FakeChainProvider;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct CountingTrigger {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DispatchTrigger for CountingTrigger {
        async fn dispatch(&self, _captured: CapturedPendingTransaction) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn contract() -> Address {
        Address::from_low_u64_be(0xc0ffee)
    }

    fn watcher(provider: Arc<FakeChainProvider>) -> FrontRunWatcher {
        FrontRunWatcher::new(
            provider,
            WatcherConfig {
                contract: contract(),
                input: Bytes::from(vec![0xa0, 0x71, 0x2d, 0x68]),
                tx_chain: "params.result".to_string(),
                subscribe: "{}".to_string(),
                max_lookups: 8,
            },
        )
    }

    fn pending(hash: H256, to: Address, input: Vec<u8>) -> Transaction {
        Transaction {
            hash,
            from: Address::from_low_u64_be(0xbeef),
            to: Some(to),
            input: Bytes::from(input),
            nonce: U256::from(3),
            ..Default::default()
        }
    }

    fn announcement(hash: H256) -> String {
        json!({ "method": "eth_subscription", "params": { "result": format!("{hash:?}") } }).to_string()
    }

    #[tokio::test]
    async fn test_match_dispatches_and_walks_states() {
        let provider = Arc::new(FakeChainProvider::new(1));
        let hash = H256::from_low_u64_be(1);
        provider.insert_transaction(pending(hash, contract(), vec![0xa0, 0x71, 0x2d, 0x68]));
        let watcher = watcher(provider);
        let trigger = CountingTrigger { calls: AtomicUsize::new(0) };

        let outcome = watcher.handle_message(announcement(hash), &trigger).await;

        assert_eq!(outcome, MessageOutcome::Dispatched(hash));
        assert_eq!(
            watcher.transitions(),
            vec![
                WatcherState::Idle,
                WatcherState::Matching(hash),
                WatcherState::Captured(hash),
                WatcherState::Dispatching(hash),
            ]
        );
        assert_eq!(watcher.handle_message(announcement(hash), &trigger).await, MessageOutcome::Ignored);
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_matching_messages() {
        let provider = Arc::new(FakeChainProvider::new(1));
        let wrong_input = H256::from_low_u64_be(2);
        let wrong_target = H256::from_low_u64_be(3);
        provider.insert_transaction(pending(wrong_input, contract(), vec![0xa0, 0x71, 0x2d, 0x69]));
        provider.insert_transaction(pending(wrong_target, Address::zero(), vec![0xa0, 0x71, 0x2d, 0x68]));
        let watcher = watcher(provider);
        let trigger = CountingTrigger { calls: AtomicUsize::new(0) };

        assert!(matches!(
            watcher.handle_message("not json".to_string(), &trigger).await,
            MessageOutcome::Malformed(_)
        ));
        assert_eq!(
            watcher.handle_message(json!({ "id": 1, "result": "0x01" }).to_string(), &trigger).await,
            MessageOutcome::NoHash
        );
        assert_eq!(
            watcher.handle_message(announcement(H256::from_low_u64_be(9)), &trigger).await,
            MessageOutcome::NotFound
        );
        assert_eq!(watcher.handle_message(announcement(wrong_input), &trigger).await, MessageOutcome::Unmatched);
        assert_eq!(watcher.handle_message(announcement(wrong_target), &trigger).await, MessageOutcome::Unmatched);
        assert_eq!(watcher.state(), WatcherState::Listening);
        assert!(!watcher.has_fired());
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hash_inside_transaction_object() {
        let provider = Arc::new(FakeChainProvider::new(1));
        let hash = H256::from_low_u64_be(4);
        provider.insert_transaction(pending(hash, contract(), vec![0xa0, 0x71, 0x2d, 0x68]));
        let watcher = watcher(provider);
        let trigger = CountingTrigger { calls: AtomicUsize::new(0) };

        let message = json!({ "params": { "result": { "hash": format!("{hash:?}"), "nonce": "0x3" } } });
        assert_eq!(
            watcher.handle_message(message.to_string(), &trigger).await,
            MessageOutcome::Dispatched(hash)
        );
    }
}
