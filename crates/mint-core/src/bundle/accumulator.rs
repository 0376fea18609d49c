//! Bundle accumulator
//!
//! Collects signed transactions between dispatches. `drain` is the only read
//! path and atomically resets the accumulator, including the front-run prefix.

use super::types::{Bundle, CapturedPendingTransaction, SignedTransaction};
use ethers::types::Address;
use std::collections::HashMap;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct AccumulatorConfig {
    /// Pending count at which the accumulator signals ready-to-dispatch
    pub ready_threshold: Option<usize>,
}

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accumulated { pending: usize },
    /// Threshold reached; reported once per dispatch cycle
    ReadyToDispatch { pending: usize },
}

#[derive(Default)]
struct AccumulatorState {
    transactions: Vec<SignedTransaction>,
    prefix: Option<CapturedPendingTransaction>,
    signalled: bool,
}

pub struct BundleAccumulator {
    config: AccumulatorConfig,
    state: Mutex<AccumulatorState>,
    ready: Notify,
}

impl BundleAccumulator {
    pub fn new(config: AccumulatorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AccumulatorState::default()),
            ready: Notify::new(),
        }
    }

    pub async fn push(&self, tx: SignedTransaction) -> PushOutcome {
        let mut state = self.state.lock().await;
        state.transactions.push(tx);
        let pending = state.transactions.len();

        match self.config.ready_threshold {
            Some(threshold) if pending >= threshold && !state.signalled => {
                state.signalled = true;
                self.ready.notify_one();
                info!(pending, threshold, "Accumulator ready to dispatch");
                PushOutcome::ReadyToDispatch { pending }
            }
            _ => PushOutcome::Accumulated { pending },
        }
    }

    /// Install the captured transaction to lead the next drained bundle
    pub async fn set_front_run_prefix(&self, captured: CapturedPendingTransaction) {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.prefix.replace(captured) {
            debug!(previous = ?previous.hash, "Replaced front-run prefix");
        }
    }

    /// Take everything accumulated so far and reset for the next cycle.
    ///
    /// Transactions keep their push slots, except that each sender's
    /// transactions are reordered by ascending nonce.
    pub async fn drain(&self) -> Bundle {
        let mut state = self.state.lock().await;
        let transactions = std::mem::take(&mut state.transactions);
        let prefix = state.prefix.take();
        state.signalled = false;

        let bundle = Bundle {
            prefix,
            transactions: order_by_nonce(transactions),
        };
        debug!(size = bundle.len(), has_prefix = bundle.has_prefix(), "Drained bundle");
        bundle
    }

    /// Wait until a push reaches the ready threshold
    pub async fn wait_ready(&self) {
        self.ready.notified().await
    }
}

impl Default for BundleAccumulator {
    fn default() -> Self {
        Self::new(AccumulatorConfig::default())
    }
}

fn order_by_nonce(transactions: Vec<SignedTransaction>) -> Vec<SignedTransaction> {
    let slots: Vec<Address> = transactions.iter().map(|tx| tx.from).collect();

    let mut by_sender: HashMap<Address, Vec<SignedTransaction>> = HashMap::new();
    for tx in transactions {
        by_sender.entry(tx.from).or_default().push(tx);
    }
    // Descending, so pop yields the lowest nonce
    for queue in by_sender.values_mut() {
        queue.sort_by(|a, b| b.nonce.cmp(&a.nonce));
    }

    slots
        .into_iter()
        .filter_map(|sender| by_sender.get_mut(&sender).and_then(Vec::pop))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::types::tests::{captured_tx, signed_tx};
    use ethers::types::U256;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_twice_returns_empty_bundle() {
        let accumulator = BundleAccumulator::default();
        accumulator.push(signed_tx(Address::random(), 0, &[0x01])).await;
        accumulator.set_front_run_prefix(captured_tx(&[0xaa])).await;

        let first = accumulator.drain().await;
        assert_eq!(first.len(), 2);

        let second = accumulator.drain().await;
        assert!(second.is_empty());
        assert!(second.prefix.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_pushes_keep_every_transaction_once() {
        let accumulator = Arc::new(BundleAccumulator::default());
        accumulator.set_front_run_prefix(captured_tx(&[0xaa])).await;

        let handles: Vec<_> = (0..16u8)
            .map(|i| {
                let accumulator = accumulator.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(u64::from(i % 4))).await;
                    accumulator.push(signed_tx(Address::random(), 0, &[i])).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let bundle = accumulator.drain().await;
        let raw = bundle.raw_transactions();
        assert_eq!(raw.len(), 17);
        assert_eq!(raw[0].as_ref(), &[0xaa]);

        let mut payloads: Vec<u8> = raw[1..].iter().map(|r| r[0]).collect();
        payloads.sort_unstable();
        assert_eq!(payloads, (0..16u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_threshold_signals_once_per_cycle() {
        let accumulator = BundleAccumulator::new(AccumulatorConfig {
            ready_threshold: Some(2),
        });

        let sender = Address::random();
        assert_eq!(
            accumulator.push(signed_tx(sender, 0, &[1])).await,
            PushOutcome::Accumulated { pending: 1 }
        );
        assert_eq!(
            accumulator.push(signed_tx(sender, 1, &[2])).await,
            PushOutcome::ReadyToDispatch { pending: 2 }
        );
        assert_eq!(
            accumulator.push(signed_tx(sender, 2, &[3])).await,
            PushOutcome::Accumulated { pending: 3 }
        );

        // Permit stored by the first signal
        tokio::time::timeout(Duration::from_millis(100), accumulator.wait_ready())
            .await
            .unwrap();

        accumulator.drain().await;
        accumulator.push(signed_tx(sender, 3, &[4])).await;
        assert_eq!(
            accumulator.push(signed_tx(sender, 4, &[5])).await,
            PushOutcome::ReadyToDispatch { pending: 2 }
        );
    }

    #[tokio::test]
    async fn test_drain_orders_each_sender_by_nonce() {
        let accumulator = BundleAccumulator::default();
        let alice = Address::random();
        let bob = Address::random();

        accumulator.push(signed_tx(alice, 2, &[0xa2])).await;
        accumulator.push(signed_tx(bob, 0, &[0xb0])).await;
        accumulator.push(signed_tx(alice, 1, &[0xa1])).await;

        let bundle = accumulator.drain().await;
        let order: Vec<(Address, U256)> = bundle.transactions.iter().map(|tx| (tx.from, tx.nonce)).collect();
        assert_eq!(
            order,
            vec![(alice, U256::from(1)), (bob, U256::zero()), (alice, U256::from(2))]
        );
    }
}
