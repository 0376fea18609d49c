//! Bundle minting engine
//!
//! Wires configuration to the core components: intents are compiled and
//! signed under the executor's concurrency cap, collected in the accumulator
//! and then either broadcast directly, submitted to the relay right away, or
//! held until the front-run watcher captures its target.

use crate::report::{BroadcastResult, BroadcastSummary, DryRunReport};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use ethers::signers::LocalWallet;
use ethers::types::{Address, H256, U64};
use mint_config::Config;
use mint_core::bundle::encode_input;
use mint_core::{
    AccumulatorConfig, BoundedExecutor, Bundle, BundleAccumulator, BundleResolver, BundleSimulator,
    BundleSubmitter, CancellationFlag, CapturedPendingTransaction, ChainProvider, EthersProvider, FlashbotsRelay,
    InclusionWaiter, IntentCompiler, IntentError, KeyStore, NetworkError, PushOutcome, RelayClient,
    SignedTransaction, SignerCache, SubmissionConfig, SubmissionReport, TransactionIntent, TransactionSigner,
};
use mint_mempool::{DispatchTrigger, FrontRunWatcher, PendingFeed, WatcherConfig, WsPendingFeed};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

/// External collaborators of the engine
#[derive(Clone)]
pub struct EngineServices {
    pub provider: Arc<dyn ChainProvider>,
    pub relay: Arc<dyn RelayClient>,
    pub resolver: Arc<dyn BundleResolver>,
}

impl EngineServices {
    /// Connect the JSON-RPC provider and the relay named by the config
    pub fn connect(config: &Config) -> Result<Self> {
        let url = config
            .provider_source()
            .and_then(|source| source.url())
            .context("Failed to resolve provider")?;
        let provider: Arc<dyn ChainProvider> =
            Arc::new(EthersProvider::connect(&url).with_context(|| format!("Failed to connect to {url}"))?);

        let auth = match &config.auth_key {
            Some(key) => LocalWallet::from_str(key.expose()).context("Invalid relay auth key")?,
            None => {
                let wallet = LocalWallet::new(&mut ethers::core::rand::thread_rng());
                debug!("Generated ephemeral relay auth key");
                wallet
            }
        };
        let relay = FlashbotsRelay::new(config.relay_endpoint(), auth, RELAY_TIMEOUT)
            .with_context(|| format!("Invalid relay endpoint {}", config.relay_endpoint()))?;
        let resolver = InclusionWaiter::new(provider.clone(), config.poll_interval());

        Ok(Self {
            provider,
            relay: Arc::new(relay),
            resolver: Arc::new(resolver),
        })
    }
}

/// Terminal outcome of a run
#[derive(Debug)]
pub enum RunOutcome {
    /// One report per dispatched bundle
    Submitted(Vec<SubmissionReport>),
    Broadcast(BroadcastSummary),
    DryRun(DryRunReport),
}

pub struct MintEngine {
    config: Config,
    services: EngineServices,
    keystore: KeyStore,
    accumulator: Arc<BundleAccumulator>,
    cancel: CancellationFlag,
    dry_run: bool,
    run_id: Uuid,
}

impl MintEngine {
    /// Build an engine from a validated configuration
    pub fn new(config: Config, services: EngineServices) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let accumulator = BundleAccumulator::new(AccumulatorConfig {
            ready_threshold: batch_threshold(&config),
        });

        Ok(Self {
            config,
            services,
            keystore: KeyStore::new(),
            accumulator: Arc::new(accumulator),
            cancel: CancellationFlag::new(),
            dry_run: false,
            run_id: Uuid::new_v4(),
        })
    }

    /// Compile and simulate, but never submit or broadcast
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_keystore(mut self, keystore: KeyStore) -> Self {
        self.keystore = keystore;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Stop watching and stop retrying; the current attempt is reported
    pub fn shutdown(&self) {
        info!(run_id = %self.run_id, "Shutting down engine");
        self.cancel.cancel();
    }

    /// Run to completion in the configured mode
    pub async fn run(&self) -> Result<RunOutcome> {
        match &self.config.listen_pool {
            Some(pool) => {
                let mut feed = WsPendingFeed::new(pool.wss.clone(), self.config.subscribe_timeout());
                self.run_front_run(&mut feed).await
            }
            None if self.config.flashbot => self.run_relay().await,
            None => self.run_direct().await,
        }
    }

    /// Front-run mode over an already constructed feed
    pub async fn run_front_run<F>(&self, feed: &mut F) -> Result<RunOutcome>
    where
        F: PendingFeed + ?Sized,
    {
        let pool = self
            .config
            .listen_pool
            .as_ref()
            .context("Front-running needs a listenPool section")?;
        let watcher_config = WatcherConfig {
            contract: Address::from_str(&pool.contract)
                .with_context(|| format!("Invalid listenPool contract {}", pool.contract))?,
            input: encode_input(&pool.input).context("Invalid listenPool input")?,
            tx_chain: pool.tx_chain.clone(),
            subscribe: pool.subscribe_message(),
            max_lookups: self.config.limit,
        };

        self.log_start("front-run");
        self.compile_intents().await?;

        let watcher = FrontRunWatcher::new(self.services.provider.clone(), watcher_config);
        let trigger = EngineTrigger {
            engine: self,
            submitter: self.submitter(),
            outcome: Mutex::new(None),
        };

        tokio::select! {
            watched = watcher.run(feed, &trigger) => {
                let watched = watched.context("Front-run watcher stopped")?;
                info!(captured = ?watched.captured, messages = watched.messages, "Watcher closed");
            }
            _ = self.cancel.cancelled() => bail!("Cancelled while waiting for a front-run target"),
        }

        let outcome = trigger.outcome.lock().await.take();
        outcome.context("Watcher closed without a dispatch outcome")
    }

    /// Plain relay mode: dispatch once compilation completes, or earlier in
    /// batches when a ready threshold is configured. Early batches are
    /// submitted while the remaining intents keep compiling.
    async fn run_relay(&self) -> Result<RunOutcome> {
        self.log_start("relay");
        let submitter = self.submitter();
        let early_flush = batch_threshold(&self.config).is_some() && !self.dry_run;
        let mut reports = Vec::new();
        let mut in_flight = FuturesUnordered::new();
        let mut compiling = true;

        let compile = self.compile_intents();
        tokio::pin!(compile);
        while compiling || !in_flight.is_empty() {
            tokio::select! {
                compiled = &mut compile, if compiling => {
                    compiled?;
                    compiling = false;
                    let bundle = self.accumulator.drain().await;
                    if self.dry_run {
                        return self.dry_run_bundle(&submitter, bundle).await;
                    }
                    if !bundle.is_empty() {
                        info!(size = bundle.len(), value = %bundle.total_value(), "Dispatching final batch");
                        in_flight.push(self.submit(&submitter, bundle));
                    }
                }
                _ = self.accumulator.wait_ready(), if early_flush && compiling => {
                    let bundle = self.accumulator.drain().await;
                    if bundle.is_empty() {
                        continue;
                    }
                    info!(size = bundle.len(), value = %bundle.total_value(), "Dispatching ready batch");
                    in_flight.push(self.submit(&submitter, bundle));
                }
                Some(submitted) = in_flight.next(), if !in_flight.is_empty() => {
                    reports.push(submitted?);
                }
            }
        }

        Ok(RunOutcome::Submitted(reports))
    }

    /// Broadcast every compiled transaction through the provider
    async fn run_direct(&self) -> Result<RunOutcome> {
        self.log_start("direct");
        self.compile_intents().await?;
        let bundle = self.accumulator.drain().await;
        if self.dry_run {
            return self.dry_run_bundle(&self.submitter(), bundle).await;
        }

        let provider = self.services.provider.clone();
        let poll_interval = self.config.poll_interval();
        let executor = BoundedExecutor::new(self.config.limit);

        let summary = executor
            .run(bundle.transactions, move |tx: SignedTransaction| {
                let provider = provider.clone();
                async move {
                    let hash = provider.send_raw_transaction(tx.raw.clone()).await?;
                    info!(hash = ?hash, from = ?tx.from, nonce = %tx.nonce, "Transaction broadcast");
                    let receipt = provider.wait_for_receipt(hash, poll_interval).await?;
                    Ok::<_, NetworkError>(BroadcastResult {
                        hash,
                        block: receipt.as_ref().and_then(|r| r.block_number).map(|b| b.as_u64()),
                        success: receipt.and_then(|r| r.status) == Some(U64::one()),
                    })
                }
            })
            .await;

        let mut report = BroadcastSummary::default();
        for result in summary.results {
            match result {
                Ok(sent) => {
                    info!(hash = ?sent.hash, block = ?sent.block, success = sent.success, "Transaction confirmed");
                    report.sent.push(sent);
                }
                Err(e) => {
                    error!(error = %e, "Broadcast failed");
                    report.failed += 1;
                }
            }
        }
        Ok(RunOutcome::Broadcast(report))
    }

    /// Compile, sign and accumulate every intent; failed intents are skipped
    async fn compile_intents(&self) -> Result<usize> {
        let provider = self.services.provider.clone();
        let compiler = Arc::new(IntentCompiler::new(provider.clone()));
        let chain_id = compiler.chain_id().await.context("Failed to resolve chain id")?;
        let signers = Arc::new(SignerCache::new(self.keystore.clone(), chain_id));
        let signers_handle = signers.clone();
        let signer = Arc::new(TransactionSigner::new(provider));
        let accumulator = self.accumulator.clone();

        let intents: Vec<(usize, TransactionIntent)> = self.config.bundles.iter().cloned().enumerate().collect();
        let total = intents.len();
        info!(intents = total, limit = self.config.limit, chain_id, "Compiling intents");

        let summary = BoundedExecutor::new(self.config.limit)
            .run(intents, move |(index, intent): (usize, TransactionIntent)| {
                let compiler = compiler.clone();
                let signers = signers.clone();
                let signer = signer.clone();
                let accumulator = accumulator.clone();
                async move {
                    let compiled = compiler.compile(&intent).await?;
                    let wallet = signers.get_signer(&intent.credential_ref).await?;
                    let signed = signer.sign(&wallet, compiled).await?;
                    let hash = signed.hash;
                    if let PushOutcome::ReadyToDispatch { pending } = accumulator.push(signed).await {
                        debug!(intent = index, pending, "Batch threshold reached");
                    }
                    Ok::<H256, IntentError>(hash)
                }
            })
            .await;
        debug!(signers = signers_handle.cached_count().await, "Signer cache warmed");

        for (index, result) in summary.results.iter().enumerate() {
            match result {
                Ok(hash) => info!(intent = index, hash = ?hash, "Intent signed"),
                Err(e) => error!(intent = index, error = %e, "Skipping intent"),
            }
        }

        let compiled = summary.succeeded();
        if compiled == 0 {
            bail!("None of the {total} intents could be compiled");
        }
        if compiled < total {
            warn!(compiled, failed = total - compiled, "Some intents were skipped");
        }
        Ok(compiled)
    }

    fn submitter(&self) -> BundleSubmitter {
        let config = SubmissionConfig {
            fixed_target_block: self.config.block_number,
            block_offset: self.config.block_number_in_future,
            simulate: self.config.debug,
            verbose: self.config.debug,
            nonce_conflict_policy: self.config.resolved_nonce_policy(),
            max_attempts: self.config.max_attempts,
            deadline: self.config.deadline(),
        };
        BundleSubmitter::new(
            self.services.provider.clone(),
            self.services.relay.clone(),
            self.services.resolver.clone(),
            config,
        )
        .with_cancellation(self.cancel.clone())
    }

    async fn submit(&self, submitter: &BundleSubmitter, bundle: Bundle) -> Result<SubmissionReport> {
        match submitter.submit(bundle).await {
            Ok(report) => Ok(report),
            Err(failure) => {
                if !failure.attempts.is_empty() {
                    info!(table = %crate::report::attempt_table(&failure.attempts), "Attempts before failure");
                }
                Err(failure.into())
            }
        }
    }

    async fn dispatch(&self, submitter: &BundleSubmitter, bundle: Bundle) -> Result<RunOutcome> {
        if self.dry_run {
            return self.dry_run_bundle(submitter, bundle).await;
        }
        Ok(RunOutcome::Submitted(vec![self.submit(submitter, bundle).await?]))
    }

    async fn dry_run_bundle(&self, submitter: &BundleSubmitter, bundle: Bundle) -> Result<RunOutcome> {
        if bundle.is_empty() {
            bail!("Nothing to dry-run: the bundle is empty");
        }
        let target_block = match self.config.block_number {
            Some(block) => block,
            None => {
                let head = self.services.provider.block_number().await.context("Failed to read head")?;
                head + submitter.config().offset_for(&bundle)
            }
        };

        let fee_estimate = if self.config.flashbot {
            let estimate = BundleSimulator::new(self.services.relay.clone())
                .simulate(&bundle, target_block)
                .await
                .context("Dry-run simulation failed")?;
            Some(estimate)
        } else {
            None
        };

        info!(size = bundle.len(), target_block, "Dry run complete, nothing submitted");
        Ok(RunOutcome::DryRun(DryRunReport {
            bundle_size: bundle.len(),
            has_prefix: bundle.has_prefix(),
            target_block,
            fee_estimate,
        }))
    }

    fn log_start(&self, mode: &str) {
        info!(
            run_id = %self.run_id,
            mode,
            intents = self.config.bundles.len(),
            dry_run = self.dry_run,
            nonce_conflict_policy = ?self.config.resolved_nonce_policy(),
            policy_explicit = self.config.nonce_conflict_policy.is_some(),
            "Starting run"
        );
    }
}

// Only plain relay batches flush early
fn batch_threshold(config: &Config) -> Option<usize> {
    config.batch_size.filter(|_| config.flashbot && !config.front_run())
}

/// Installs the capture as the bundle prefix and dispatches once
struct EngineTrigger<'a> {
    engine: &'a MintEngine,
    submitter: BundleSubmitter,
    outcome: Mutex<Option<RunOutcome>>,
}

#[async_trait]
impl<'a> DispatchTrigger for EngineTrigger<'a> {
    async fn dispatch(&self, captured: CapturedPendingTransaction) -> Result<()> {
        info!(hash = ?captured.hash, from = ?captured.from, "Front-run target captured");
        self.engine.accumulator.set_front_run_prefix(captured).await;
        let bundle = self.engine.accumulator.drain().await;
        info!(size = bundle.len(), value = %bundle.total_value(), "Dispatching front-run bundle");

        let outcome = self.engine.dispatch(&self.submitter, bundle).await?;
        *self.outcome.lock().await = Some(outcome);
        Ok(())
    }
}
