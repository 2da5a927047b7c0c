use crate::pipeline::{HeightData, PipelineQueue};
use crate::rpc::ChainSource;
use crate::runtime::health::{HealthState, HealthStatus};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Fetches every height a source needs for one [`HeightData`]. Block and
/// results are requested concurrently; validators join them unless the
/// indexer runs in minimal mode.
pub(crate) fn fetch_height(
    source: Arc<dyn ChainSource>,
    height: u64,
    minimal: bool,
) -> impl Future<Output = Result<HeightData>> + Send + 'static {
    async move {
        let block = source.fetch_block(height);
        let results = source.fetch_block_results(height);
        let data = if minimal {
            let (block, results) = tokio::try_join!(block, results)?;
            HeightData::new(block, results, None)
        } else {
            let validators = source.fetch_validators(height);
            let (block, results, validators) = tokio::try_join!(block, results, validators)?;
            HeightData::new(block, results, Some(validators))
        };
        Ok(data)
    }
}

/// Enqueues heights from `next_height` up to the tip, honouring queue
/// backpressure while catching up. Once the tip is reached the queue is
/// marked synced and every later height is enqueued as the tip moves.
pub(crate) struct Prefetcher {
    pub source: Arc<dyn ChainSource>,
    pub queue: Arc<PipelineQueue<HeightData>>,
    pub tip: watch::Receiver<u64>,
    pub health: HealthState,
    pub next_height: u64,
    pub minimal: bool,
    pub shutdown: CancellationToken,
}

impl Prefetcher {
    pub(crate) async fn run(mut self) -> Result<()> {
        loop {
            let tip = *self.tip.borrow_and_update();

            while self.next_height <= tip {
                let height = self.next_height;
                let fetch = fetch_height(self.source.clone(), height, self.minimal);
                self.queue
                    .enqueue(async move { fetch.await.with_context(|| format!("failed to fetch height {height}")) });
                self.next_height += 1;

                if !self.queue.is_synced() {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(()),
                        _ = self.queue.proceed() => {}
                    }
                }
            }

            if !self.queue.is_synced() {
                self.queue.set_synced();
                if self.queue.buffered() == 0 {
                    self.health.set(HealthStatus::Steady);
                }
                tracing::info!(tip, "prefetch reached the chain tip; following new heights");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                changed = self.tip.changed() => {
                    if changed.is_err() {
                        tracing::debug!("tip tracker stopped; prefetch exiting");
                        return Ok(());
                    }
                }
            }
        }
    }
}
