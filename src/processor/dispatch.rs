use super::decoders::MessageDecoders;
use super::periodic::{due_intervals, RateMeter};
use super::plan::plan_height_events;
use crate::bus::{topics, Envelope, EventBus, EventPayload};
use crate::pipeline::HeightData;
use crate::runtime::progress::ProgressTracker;
use crate::runtime::storage::{IndexerStore, TxScope};
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Publishes one height at a time inside its own store transaction.
pub(crate) struct HeightDispatcher<S: IndexerStore> {
    store: Arc<S>,
    bus: EventBus,
    decoders: Arc<MessageDecoders>,
    progress: Arc<ProgressTracker>,
    telemetry: Arc<Telemetry>,
    rate: RateMeter,
}

impl<S: IndexerStore> HeightDispatcher<S> {
    pub(crate) fn new(
        store: Arc<S>,
        bus: EventBus,
        decoders: Arc<MessageDecoders>,
        progress: Arc<ProgressTracker>,
        telemetry: Arc<Telemetry>,
        start_height: u64,
    ) -> Self {
        Self {
            store,
            bus,
            decoders,
            progress,
            telemetry,
            rate: RateMeter::new(start_height),
        }
    }

    /// Commits the height when every listener acknowledged every event;
    /// otherwise rolls back exactly once and returns the failure.
    pub(crate) async fn process(&mut self, data: HeightData) -> Result<()> {
        let height = data.height();
        let data = Arc::new(data);

        self.progress.begin(height);
        self.store
            .begin_transaction(TxScope::Height(height))
            .await
            .with_context(|| format!("failed to begin transaction for height {height}"))?;

        let published = match self.publish_height(&data).await {
            Ok(published) => published,
            Err(err) => {
                if let Err(rollback_err) = self.store.end_transaction(false).await {
                    tracing::warn!(
                        height,
                        error = %rollback_err,
                        "failed to roll back height transaction"
                    );
                }
                self.telemetry.record_rollback();
                return Err(err.context(format!("failed to process height {height}")));
            }
        };

        self.store
            .end_transaction(true)
            .await
            .with_context(|| format!("failed to commit height {height}"))?;
        self.progress.mark_committed(height);
        self.telemetry.record_height(published);
        self.rate.observe(height);

        tracing::debug!(height, published, "height committed");
        Ok(())
    }

    async fn publish_height(&self, data: &Arc<HeightData>) -> Result<u64> {
        let height = data.height();
        let timestamp = data.time().to_string();
        let mut published = 0u64;

        for event in plan_height_events(data, &self.decoders)? {
            let envelope = Envelope::new(event.event_type, event.payload)
                .with_height(height)
                .with_timestamp(timestamp.clone());
            self.bus.publish_and_await(envelope).await?;
            published += 1;
        }

        for interval in due_intervals(height) {
            let envelope = Envelope::new(
                topics::periodic(interval),
                EventPayload::Periodic { interval },
            )
            .with_height(height)
            .with_timestamp(timestamp.clone());
            self.bus.publish_and_await(envelope).await?;
            published += 1;
        }

        Ok(published)
    }
}
