//! The supervisor. One `run` keeps the indexer alive: each attempt imports
//! genesis on a fresh store, resumes from the store's cursor, prefetches
//! heights through the pipeline queue and dispatches them in order. A failed
//! attempt tears everything down and restarts after a backoff.

use super::backoff::{restart_delay, sleep_with_cancellation};
use super::decoders::MessageDecoders;
use super::dispatch::HeightDispatcher;
use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::query::ChainQuery;
use crate::bus::EventBus;
use crate::genesis::{GenesisImportError, GenesisImporter};
use crate::pipeline::{HeightData, PipelineQueue};
use crate::rpc::{AsyncRpcClient, ChainSource};
use crate::runtime::config::{IndexerConfig, TipMode};
use crate::runtime::health::{HealthState, HealthStatus};
use crate::runtime::progress::ProgressTracker;
use crate::runtime::storage::IndexerStore;
use crate::runtime::telemetry::{init_tracing, Telemetry};
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub struct Indexer<S: IndexerStore> {
    config: IndexerConfig,
    store: Arc<S>,
    bus: EventBus,
    source: Arc<dyn ChainSource>,
    decoders: Arc<MessageDecoders>,
    queue: Arc<PipelineQueue<HeightData>>,
    progress: Arc<ProgressTracker>,
    telemetry: Arc<Telemetry>,
    health: HealthState,
    shutdown_root: CancellationToken,
}

impl<S: IndexerStore> Clone for Indexer<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: self.store.clone(),
            bus: self.bus.clone(),
            source: self.source.clone(),
            decoders: self.decoders.clone(),
            queue: self.queue.clone(),
            progress: self.progress.clone(),
            telemetry: self.telemetry.clone(),
            health: self.health.clone(),
            shutdown_root: self.shutdown_root.clone(),
        }
    }
}

impl<S: IndexerStore> Indexer<S> {
    /// Builds an indexer that talks to the configured CometBFT RPC endpoint.
    pub fn new(config: IndexerConfig, store: Arc<S>, bus: EventBus) -> Result<Self> {
        let client = AsyncRpcClient::from_config(&config)?;
        Ok(Self::with_source(config, store, bus, Arc::new(client)))
    }

    pub fn with_source(
        config: IndexerConfig,
        store: Arc<S>,
        bus: EventBus,
        source: Arc<dyn ChainSource>,
    ) -> Self {
        let queue = Arc::new(PipelineQueue::with_storage(
            config.batch_size(),
            config.queue_storage(),
        ));
        Self {
            config,
            store,
            bus,
            source,
            decoders: Arc::new(MessageDecoders::new()),
            queue,
            progress: Arc::new(ProgressTracker::new()),
            telemetry: Arc::new(Telemetry::default()),
            health: HealthState::new(),
            shutdown_root: CancellationToken::new(),
        }
    }

    pub fn with_decoders(mut self, decoders: MessageDecoders) -> Self {
        self.decoders = Arc::new(decoders);
        self
    }

    /// Replaces the root token so shutdown can be driven from outside.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_root = token;
        self
    }

    pub(crate) fn replace_shutdown_root(&mut self, token: CancellationToken) {
        self.shutdown_root = token;
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown_root.clone()
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn health(&self) -> watch::Receiver<HealthStatus> {
        self.health.subscribe()
    }

    pub fn health_status(&self) -> HealthStatus {
        self.health.current()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn last_committed_height(&self) -> Option<u64> {
        self.progress.last_committed()
    }

    /// On-demand chain queries bounded by the configured query timeout.
    pub fn query(&self) -> ChainQuery {
        ChainQuery::new(
            self.source.clone(),
            self.config.query_timeout(),
            self.health.clone(),
        )
    }

    /// Runs until the root token is cancelled or a fatal error occurs.
    ///
    /// Failed attempts are retried with capped exponential backoff. Genesis
    /// import errors are fatal, as is exceeding the configured number of
    /// consecutive failures at one height.
    pub async fn run(&self) -> Result<()> {
        if let Err(err) = self.preflight() {
            self.health.set(HealthStatus::Failed);
            return Err(err);
        }

        loop {
            if self.shutdown_root.is_cancelled() {
                break;
            }

            let err = match self.run_once().await {
                Ok(()) => break,
                Err(err) => err,
            };
            self.health.set(HealthStatus::Failed);

            if err.downcast_ref::<GenesisImportError>().is_some() {
                tracing::error!(error = format!("{err:#}"), "genesis import failed; giving up");
                return Err(err);
            }
            if self.shutdown_root.is_cancelled() {
                tracing::debug!(error = %err, "run failed during shutdown");
                break;
            }

            let failures = self.progress.record_failure();
            let stuck_at = self.progress.current_height();
            self.telemetry.record_restart();

            if let Some(limit) = self.config.max_consecutive_failures() {
                if failures >= limit {
                    let at = stuck_at.map_or_else(|| "startup".to_string(), |h| format!("height {h}"));
                    tracing::error!(failures, at = %at, "too many consecutive failures; giving up");
                    return Err(err.context(format!(
                        "giving up after {failures} consecutive failures at {at}"
                    )));
                }
            }

            let delay = restart_delay(self.config.restart_backoff(), failures);
            tracing::warn!(
                error = format!("{err:#}"),
                failures,
                height = stuck_at,
                delay_ms = delay.as_millis() as u64,
                "indexer run failed; restarting"
            );
            if sleep_with_cancellation(delay, &self.shutdown_root).await.is_err() {
                break;
            }
        }

        self.health.set(HealthStatus::Stopped);
        tracing::info!("indexer stopped");
        Ok(())
    }

    fn preflight(&self) -> Result<()> {
        self.config.validate()?;
        init_tracing(self.config.log_level());
        if matches!(self.config.tip_mode(), TipMode::Push) && self.source.subscribe_heights().is_none() {
            bail!("push mode is configured but the chain source offers no height subscription");
        }
        Ok(())
    }

    /// One attempt: connect, import genesis on a fresh store, then prefetch
    /// and dispatch until cancelled or failed.
    async fn run_once(&self) -> Result<()> {
        self.health.set(HealthStatus::Connecting);
        let query = self.query();

        let next_height = self.resolve_next_height().await?;
        let tip = query
            .latest_height()
            .await
            .context("failed to read the chain tip")?;

        self.queue.clear();
        self.progress.reset(next_height);
        self.health.set(HealthStatus::Syncing);
        tracing::info!(next_height, tip, "indexer run starting");

        let pushed_heights = match self.config.tip_mode() {
            TipMode::Push => Some(
                self.source
                    .subscribe_heights()
                    .ok_or_else(|| anyhow!("chain source dropped its height subscription"))?,
            ),
            TipMode::Poll(_) => None,
        };

        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &self.shutdown_root,
            telemetry: self.telemetry.clone(),
            queue: self.queue.clone(),
            source: self.source.clone(),
            query,
            health: self.health.clone(),
            metrics_interval: self.config.metrics_interval(),
            tip_mode: self.config.tip_mode(),
            pushed_heights,
            initial_tip: tip,
            next_height,
            minimal: self.config.minimal(),
        })?;
        let failure = lifecycle.failure();
        let run_token = lifecycle.run_token.clone();

        let mut dispatcher = HeightDispatcher::new(
            self.store.clone(),
            self.bus.clone(),
            self.decoders.clone(),
            self.progress.clone(),
            self.telemetry.clone(),
            next_height,
        );

        loop {
            let slot = self.queue.dequeue();
            let fetched = tokio::select! {
                _ = run_token.cancelled() => break,
                fetched = slot => fetched,
            };

            let data = match fetched {
                Ok(data) => data,
                Err(err) => {
                    failure.trigger("fetch", err);
                    break;
                }
            };

            // Cancellation is only observed between heights.
            if let Err(err) = dispatcher.process(data).await {
                failure.trigger("dispatch", err);
                break;
            }

            if self.queue.is_synced() && self.queue.buffered() == 0 {
                self.health.set(HealthStatus::Steady);
            }
        }

        lifecycle.shutdown().await;
        self.queue.clear();

        match failure.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn resolve_next_height(&self) -> Result<u64> {
        if let Some(next) = self
            .store
            .next_height()
            .await
            .context("failed to read the store cursor")?
        {
            return Ok(next);
        }

        let Some(path) = self.config.genesis_path() else {
            return Ok(self.config.start_height());
        };

        let importer = GenesisImporter::new(self.bus.clone(), path.clone());
        let initial_height = importer
            .initial_height()
            .await?
            .unwrap_or_else(|| self.config.start_height());
        let summary = importer.import(self.store.as_ref(), initial_height).await?;
        tracing::info!(
            initial_height,
            published = summary.published,
            gentx_messages = summary.gentx_messages,
            "genesis imported"
        );

        Ok(self
            .store
            .next_height()
            .await
            .context("failed to read the store cursor after genesis")?
            .unwrap_or(initial_height))
    }
}
