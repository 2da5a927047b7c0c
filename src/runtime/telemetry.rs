use crate::pipeline::{HeightData, PipelineQueue};
use crate::rpc::RpcMetricsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a fmt subscriber unless one is already active.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (usually the
/// configured log level) is used. Calling this function multiple times is harmless.
pub fn init_tracing(default_directive: &str) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = tracing_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok(), default_directive);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Picks the active filter: a parseable `RUST_LOG` value, then the
/// configured directive, then `info`.
fn tracing_filter(env_directive: Option<String>, default_directive: &str) -> EnvFilter {
    env_directive
        .filter(|directive| !directive.trim().is_empty())
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| EnvFilter::try_new(default_directive).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Rolling counters used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    processed_heights: AtomicU64,
    published_events: AtomicU64,
    rollbacks: AtomicU64,
    restarts: AtomicU64,
}

impl Telemetry {
    pub fn record_height(&self, published_events: u64) {
        self.processed_heights.fetch_add(1, Ordering::Relaxed);
        self.published_events
            .fetch_add(published_events, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            processed_heights: self.processed_heights.load(Ordering::Relaxed),
            published_events: self.published_events.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub processed_heights: u64,
    pub published_events: u64,
    pub rollbacks: u64,
    pub restarts: u64,
}

pub(crate) type RpcMetricsProbe = Arc<dyn Fn() -> Option<RpcMetricsSnapshot> + Send + Sync>;

pub(crate) struct MetricsReporterParams {
    pub telemetry: Arc<Telemetry>,
    pub queue: Arc<PipelineQueue<HeightData>>,
    pub tip: watch::Receiver<u64>,
    pub rpc: RpcMetricsProbe,
    pub shutdown: CancellationToken,
    pub interval: Duration,
}

/// Spawns a background task that periodically logs throughput, queue depth,
/// the chain tip, and RPC counters.
pub(crate) fn spawn_metrics_reporter(params: MetricsReporterParams) -> JoinHandle<()> {
    let MetricsReporterParams {
        telemetry,
        queue,
        tip,
        rpc,
        shutdown,
        interval,
    } = params;

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "cosmoblock::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let processed_delta = current
                        .processed_heights
                        .saturating_sub(last_snapshot.processed_heights);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        processed_delta as f64 / elapsed
                    };
                    let rpc = rpc().unwrap_or_default();

                    tracing::info!(
                        target: "cosmoblock::metrics",
                        throughput = format!("{throughput:.2}"),
                        processed = current.processed_heights,
                        published_events = current.published_events,
                        rollbacks = current.rollbacks,
                        restarts = current.restarts,
                        tip = *tip.borrow(),
                        queue_size = queue.size(),
                        buffered = queue.buffered(),
                        synced = queue.is_synced(),
                        rpc_requests = rpc.total_requests,
                        rpc_errors = rpc.total_errors,
                        rpc_timeouts = rpc.total_timeouts,
                        rpc_latency_ms = format!("{:.1}", rpc.average_latency_ms),
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
