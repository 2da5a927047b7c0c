use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

const UNSET: u64 = u64::MAX;

#[derive(Debug, Default, Clone, Copy)]
struct FailureStreak {
    height: Option<u64>,
    count: u32,
}

/// Tracks the last committed height, the height being dispatched, and how
/// many runs in a row failed without getting past the same height.
#[derive(Debug)]
pub struct ProgressTracker {
    last_committed: AtomicU64,
    in_flight: AtomicU64,
    streak: Mutex<FailureStreak>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            last_committed: AtomicU64::new(UNSET),
            in_flight: AtomicU64::new(UNSET),
            streak: Mutex::new(FailureStreak::default()),
        }
    }

    /// Prepares for a run that resumes at `next_height`.
    pub fn reset(&self, next_height: u64) {
        let last = next_height.checked_sub(1).unwrap_or(UNSET);
        self.last_committed.store(last, Ordering::SeqCst);
        self.in_flight.store(UNSET, Ordering::SeqCst);
    }

    pub fn begin(&self, height: u64) {
        self.in_flight.store(height, Ordering::SeqCst);
    }

    pub fn mark_committed(&self, height: u64) {
        self.last_committed.store(height, Ordering::SeqCst);
        self.in_flight.store(UNSET, Ordering::SeqCst);
    }

    pub fn last_committed(&self) -> Option<u64> {
        load(&self.last_committed)
    }

    /// The height the indexer is working on: the one being dispatched, else
    /// the one after the last commit.
    pub fn current_height(&self) -> Option<u64> {
        load(&self.in_flight).or_else(|| self.last_committed().map(|h| h.saturating_add(1)))
    }

    /// Records a failed run and returns how many consecutive failures
    /// happened at the current height.
    pub fn record_failure(&self) -> u32 {
        let height = self.current_height();
        let mut streak = self.streak.lock().unwrap_or_else(PoisonError::into_inner);
        if streak.height == height && streak.count > 0 {
            streak.count = streak.count.saturating_add(1);
        } else {
            *streak = FailureStreak { height, count: 1 };
        }
        streak.count
    }
}

fn load(value: &AtomicU64) -> Option<u64> {
    match value.load(Ordering::SeqCst) {
        UNSET => None,
        value => Some(value),
    }
}
