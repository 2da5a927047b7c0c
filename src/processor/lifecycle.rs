//! Background tasks of one indexer run: metrics reporter, tip tracker and
//! prefetcher, all bound to the run's child token.

use super::prefetch::Prefetcher;
use super::query::ChainQuery;
use super::tip::{TipFeed, TipTracker};
use crate::pipeline::{HeightData, PipelineQueue};
use crate::rpc::ChainSource;
use crate::runtime::config::TipMode;
use crate::runtime::failure::{panic_message, RunFailure};
use crate::runtime::health::HealthState;
use crate::runtime::telemetry::{self, MetricsReporterParams, Telemetry};
use anyhow::anyhow;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    failure: RunFailure,
    metrics_handle: Option<JoinHandle<()>>,
    tip_handle: Option<JoinHandle<()>>,
    prefetch_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub queue: Arc<PipelineQueue<HeightData>>,
    pub source: Arc<dyn ChainSource>,
    pub query: ChainQuery,
    pub health: HealthState,
    pub metrics_interval: Duration,
    pub tip_mode: TipMode,
    /// Required in push mode.
    pub pushed_heights: Option<watch::Receiver<u64>>,
    pub initial_tip: u64,
    pub next_height: u64,
    pub minimal: bool,
}

impl LifecycleHandles {
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> anyhow::Result<Self> {
        let LifecycleSpawnParams {
            shutdown_root,
            telemetry,
            queue,
            source,
            query,
            health,
            metrics_interval,
            tip_mode,
            pushed_heights,
            initial_tip,
            next_height,
            minimal,
        } = params;

        let feed = match tip_mode {
            TipMode::Poll(every) => TipFeed::Poll { query, every },
            TipMode::Push => TipFeed::Push(
                pushed_heights.ok_or_else(|| anyhow!("push mode requires a height subscription"))?,
            ),
        };

        let run_token = shutdown_root.child_token();
        let failure = RunFailure::new(run_token.clone());
        let (tip_tx, tip_rx) = watch::channel(initial_tip);

        let rpc_source = source.clone();
        let metrics_handle = telemetry::spawn_metrics_reporter(MetricsReporterParams {
            telemetry,
            queue: queue.clone(),
            tip: tip_rx.clone(),
            rpc: Arc::new(move || rpc_source.metrics()),
            shutdown: run_token.clone(),
            interval: metrics_interval,
        });
        let tip_handle = TipTracker::spawn(feed, tip_tx, run_token.clone(), failure.clone());

        let prefetcher = Prefetcher {
            source,
            queue,
            tip: tip_rx,
            health,
            next_height,
            minimal,
            shutdown: run_token.clone(),
        };
        let prefetch_failure = failure.clone();
        let prefetch_handle = tokio::spawn(async move {
            match AssertUnwindSafe(prefetcher.run()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => prefetch_failure.trigger("prefetch", err),
                Err(panic) => prefetch_failure.trigger(
                    "prefetch",
                    anyhow!("prefetch task panicked: {}", panic_message(panic.as_ref())),
                ),
            }
        });

        Ok(Self {
            run_token,
            failure,
            metrics_handle: Some(metrics_handle),
            tip_handle: Some(tip_handle),
            prefetch_handle: Some(prefetch_handle),
        })
    }

    pub(crate) fn failure(&self) -> RunFailure {
        self.failure.clone()
    }

    /// Cancels the run token and waits for every background task.
    pub(crate) async fn shutdown(mut self) {
        self.run_token.cancel();

        for (name, handle) in [
            ("prefetch", self.prefetch_handle.take()),
            ("tip tracker", self.tip_handle.take()),
            ("metrics reporter", self.metrics_handle.take()),
        ] {
            if let Some(handle) = handle {
                if let Err(err) = handle.await {
                    tracing::warn!(task = name, error = %err, "run task panicked");
                }
            }
        }
    }
}
