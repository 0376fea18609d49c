//! Relay submission state machine
//!
//! `Idle -> (simulate) -> Submitted(target) -> Resolved`, looping on
//! resolutions that allow a retry. Every retry resubmits the same signed
//! bytes; only the target block is recomputed.

use super::client::RelayClient;
use super::resolution::{BundleResolution, BundleResolver};
use super::simulator::{BundleSimulator, FeeEstimate};
use crate::bundle::Bundle;
use crate::error::SubmissionError;
use crate::provider::ChainProvider;
use crate::{log_bundle_resolved, log_bundle_submitted};
use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Target offset when a captured transaction leads the bundle
pub const FRONT_RUN_BLOCK_OFFSET: u64 = 1;

/// Target offset for plain batches
pub const BATCH_BLOCK_OFFSET: u64 = 3;

/// What to do when an account nonce moves past the bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NonceConflictPolicy {
    /// Drop the captured prefix and retry with the local transactions
    ClearPrefixAndRetry,
    /// Abort the submission
    Fatal,
}

impl NonceConflictPolicy {
    /// Default policy of a deployment mode
    pub fn for_mode(front_run: bool) -> Self {
        if front_run {
            NonceConflictPolicy::ClearPrefixAndRetry
        } else {
            NonceConflictPolicy::Fatal
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    /// Absolute target of the first attempt
    pub fixed_target_block: Option<u64>,
    /// Blocks ahead of the head to target; derived from the bundle shape when unset
    pub block_offset: Option<u64>,
    /// Dry-run the bundle before the first submission
    pub simulate: bool,
    /// Dump every submitted bundle
    pub verbose: bool,
    pub nonce_conflict_policy: NonceConflictPolicy,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            fixed_target_block: None,
            block_offset: None,
            simulate: false,
            verbose: false,
            nonce_conflict_policy: NonceConflictPolicy::Fatal,
            max_attempts: None,
            deadline: None,
        }
    }
}

impl SubmissionConfig {
    pub fn offset_for(&self, bundle: &Bundle) -> u64 {
        self.block_offset.unwrap_or(if bundle.has_prefix() {
            FRONT_RUN_BLOCK_OFFSET
        } else {
            BATCH_BLOCK_OFFSET
        })
    }
}

/// One resolved submission. Retries append new attempts.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionAttempt {
    pub number: u32,
    pub target_block: u64,
    pub bundle_hash: H256,
    /// Exactly what was submitted
    pub bundle: Bundle,
    pub resolution: BundleResolution,
    pub submitted_at: DateTime<Utc>,
}

/// Successful submission history
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub attempts: Vec<SubmissionAttempt>,
    pub included_block: u64,
    pub fee_estimate: Option<FeeEstimate>,
    pub prefix_cleared: bool,
}

impl SubmissionReport {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

/// Terminal failure together with the attempts made before it
#[derive(Debug, Error)]
#[error("bundle submission failed after {} attempts: {error}", .attempts.len())]
pub struct SubmissionFailure {
    #[source]
    pub error: SubmissionError,
    pub attempts: Vec<SubmissionAttempt>,
    pub fee_estimate: Option<FeeEstimate>,
}

/// Shared stop signal for in-flight retries
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

pub struct BundleSubmitter {
    provider: Arc<dyn ChainProvider>,
    relay: Arc<dyn RelayClient>,
    resolver: Arc<dyn BundleResolver>,
    simulator: BundleSimulator,
    config: SubmissionConfig,
    cancel: CancellationFlag,
}

impl BundleSubmitter {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        relay: Arc<dyn RelayClient>,
        resolver: Arc<dyn BundleResolver>,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            provider,
            simulator: BundleSimulator::new(relay.clone()),
            relay,
            resolver,
            config,
            cancel: CancellationFlag::new(),
        }
    }

    /// Share an externally owned cancellation flag
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    /// Drive a bundle to a terminal outcome
    pub async fn submit(&self, bundle: Bundle) -> Result<SubmissionReport, SubmissionFailure> {
        let mut run = SubmissionRun {
            attempts: Vec::new(),
            fee_estimate: None,
        };
        if bundle.is_empty() {
            return Err(run.fail(SubmissionError::EmptyBundle));
        }

        let started = Instant::now();
        let mut bundle = bundle;
        let mut fixed_target = self.config.fixed_target_block;
        let mut prefix_cleared = false;

        info!(
            size = bundle.len(),
            has_prefix = bundle.has_prefix(),
            policy = ?self.config.nonce_conflict_policy,
            "Starting bundle submission"
        );

        loop {
            let number = run.attempts.len() as u32 + 1;
            if self.cancel.is_cancelled() {
                return Err(run.fail(SubmissionError::Cancelled { attempts: number - 1 }));
            }
            if let Some(max) = self.config.max_attempts {
                if number > max {
                    return Err(run.fail(SubmissionError::RetriesExhausted { attempts: number - 1 }));
                }
            }
            if let Some(deadline) = self.config.deadline {
                if started.elapsed() >= deadline {
                    return Err(run.fail(SubmissionError::DeadlineElapsed { attempts: number - 1 }));
                }
            }

            let target_block = match fixed_target.take() {
                Some(block) => block,
                None => match self.provider.block_number().await {
                    Ok(head) => head + self.config.offset_for(&bundle),
                    Err(e) => return Err(run.fail(e.into())),
                },
            };

            if self.config.simulate && number == 1 {
                match self.simulator.simulate(&bundle, target_block).await {
                    Ok(estimate) => run.fee_estimate = Some(estimate),
                    Err(e) => return Err(run.fail(e.into())),
                }
            }

            if self.config.verbose {
                match serde_json::to_string_pretty(&bundle) {
                    Ok(dump) => debug!(attempt = number, target_block, bundle = %dump, "Submitting bundle"),
                    Err(e) => debug!(error = %e, "Could not serialize bundle"),
                }
            }

            let bundle_hash = match self.relay.send_bundle(&bundle.raw_transactions(), target_block).await {
                Ok(hash) => hash,
                Err(e) => return Err(run.fail(SubmissionError::RelaySubmit(e))),
            };
            let submitted_at = Utc::now();
            log_bundle_submitted!(number, target_block, bundle_hash, bundle.len());

            let resolution = tokio::select! {
                resolution = self.resolver.wait(&bundle, target_block) => match resolution {
                    Ok(resolution) => resolution,
                    Err(e) => return Err(run.fail(e.into())),
                },
                _ = self.cancel.cancelled() => {
                    return Err(run.fail(SubmissionError::Cancelled { attempts: number }));
                }
                _ = deadline_reached(started, self.config.deadline) => {
                    return Err(run.fail(SubmissionError::DeadlineElapsed { attempts: number }));
                }
            };
            log_bundle_resolved!(number, target_block, resolution);

            run.attempts.push(SubmissionAttempt {
                number,
                target_block,
                bundle_hash,
                bundle: bundle.clone(),
                resolution,
                submitted_at,
            });

            match resolution {
                BundleResolution::Included => {
                    info!(block = target_block, attempts = number, "Bundle included");
                    return Ok(SubmissionReport {
                        attempts: run.attempts,
                        included_block: target_block,
                        fee_estimate: run.fee_estimate,
                        prefix_cleared,
                    });
                }
                BundleResolution::BlockPassedWithoutInclusion => {
                    debug!(target_block, "Bundle not included, retrying");
                }
                BundleResolution::AccountNonceTooHigh => {
                    let retryable = self.config.nonce_conflict_policy == NonceConflictPolicy::ClearPrefixAndRetry
                        && bundle.has_prefix()
                        && !bundle.transactions.is_empty();
                    if !retryable {
                        return Err(run.fail(SubmissionError::NonceConflict { target_block }));
                    }

                    warn!(target_block, "Nonce conflict, dropping captured transaction and retrying");
                    bundle = bundle.without_prefix();
                    prefix_cleared = true;
                }
            }
        }
    }
}

// Never resolves without a deadline
async fn deadline_reached(started: Instant, deadline: Option<Duration>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(started + deadline).await,
        None => std::future::pending().await,
    }
}

struct SubmissionRun {
    attempts: Vec<SubmissionAttempt>,
    fee_estimate: Option<FeeEstimate>,
}

impl SubmissionRun {
    fn fail(&mut self, error: SubmissionError) -> SubmissionFailure {
        warn!(error = %error, attempts = self.attempts.len(), "Bundle submission failed");
        SubmissionFailure {
            error,
            attempts: std::mem::take(&mut self.attempts),
            fee_estimate: self.fee_estimate,
        }
    }
}
