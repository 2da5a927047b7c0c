use crate::bus::topics::PERIODIC_INTERVALS;
use std::time::Instant;

/// Heights at which a processing-rate line is logged.
pub(crate) const RATE_LOG_INTERVAL: u64 = 1_000;

/// Periodic intervals that fire at `height`, smallest first.
pub(crate) fn due_intervals(height: u64) -> impl Iterator<Item = u64> {
    PERIODIC_INTERVALS
        .into_iter()
        .filter(move |interval| height != 0 && height % interval == 0)
}

/// Logs heights-per-second every [`RATE_LOG_INTERVAL`] committed heights.
#[derive(Debug)]
pub(crate) struct RateMeter {
    since: Instant,
    from_height: u64,
}

impl RateMeter {
    pub(crate) fn new(start_height: u64) -> Self {
        Self {
            since: Instant::now(),
            from_height: start_height,
        }
    }

    /// Returns the rate logged at `height`, if a line was due.
    pub(crate) fn observe(&mut self, height: u64) -> Option<f64> {
        if height == 0 || height % RATE_LOG_INTERVAL != 0 {
            return None;
        }

        let elapsed = self.since.elapsed().as_secs_f64();
        let heights = height.saturating_sub(self.from_height).saturating_add(1);
        let rate = if elapsed <= f64::EPSILON {
            0.0
        } else {
            heights as f64 / elapsed
        };
        tracing::info!(
            height,
            heights,
            rate = format!("{rate:.2}"),
            "processing rate (heights/s)"
        );

        self.since = Instant::now();
        self.from_height = height.saturating_add(1);
        Some(rate)
    }
}
