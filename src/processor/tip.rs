//! Chain tip tracking. Poll mode asks the node for its latest height on an
//! interval; push mode forwards the source's height subscription. Either
//! way the result lands in a `watch` channel the prefetcher follows.

use super::query::ChainQuery;
use crate::runtime::failure::RunFailure;
use anyhow::anyhow;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) enum TipFeed {
    Poll {
        query: ChainQuery,
        every: Duration,
    },
    Push(watch::Receiver<u64>),
}

pub(crate) struct TipTracker;

impl TipTracker {
    pub(crate) fn spawn(
        feed: TipFeed,
        tip_tx: watch::Sender<u64>,
        shutdown: CancellationToken,
        failure: RunFailure,
    ) -> JoinHandle<()> {
        match feed {
            TipFeed::Poll { query, every } => {
                Self::spawn_refresh_loop(query, every, tip_tx, shutdown, failure)
            }
            TipFeed::Push(heights) => Self::spawn_forward_loop(heights, tip_tx, shutdown, failure),
        }
    }

    fn spawn_refresh_loop(
        query: ChainQuery,
        every: Duration,
        tip_tx: watch::Sender<u64>,
        shutdown: CancellationToken,
        failure: RunFailure,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately and the run already knows the tip.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match query.latest_height().await {
                            Ok(tip) => advance(&tip_tx, tip),
                            Err(err) => {
                                failure.trigger("tip refresh", err.context("failed to refresh chain tip"));
                                break;
                            }
                        }
                    }
                }
            }

            tracing::debug!("chain tip refresher stopped");
        })
    }

    fn spawn_forward_loop(
        mut heights: watch::Receiver<u64>,
        tip_tx: watch::Sender<u64>,
        shutdown: CancellationToken,
        failure: RunFailure,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let current = *heights.borrow_and_update();
            advance(&tip_tx, current);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = heights.changed() => {
                        if changed.is_err() {
                            failure.trigger("tip subscription", anyhow!("height subscription closed"));
                            break;
                        }
                        let height = *heights.borrow_and_update();
                        advance(&tip_tx, height);
                    }
                }
            }

            tracing::debug!("chain height subscription forwarder stopped");
        })
    }
}

/// Raises the shared tip. A node reporting a lower height is ignored.
fn advance(tip_tx: &watch::Sender<u64>, height: u64) {
    tip_tx.send_if_modified(|current| {
        if height > *current {
            tracing::trace!(previous = *current, tip = height, "chain tip advanced");
            *current = height;
            true
        } else {
            if height < *current {
                tracing::debug!(previous = *current, reported = height, "ignoring lower chain tip");
            }
            false
        }
    });
}
