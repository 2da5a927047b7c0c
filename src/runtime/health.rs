use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Idle,
    Connecting,
    Syncing,
    /// Caught up and following new heights.
    Steady,
    Failed,
    Stopped,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthStatus::Idle => "idle",
            HealthStatus::Connecting => "connecting",
            HealthStatus::Syncing => "syncing",
            HealthStatus::Steady => "steady",
            HealthStatus::Failed => "failed",
            HealthStatus::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Externally observable indexer state.
#[derive(Debug, Clone)]
pub struct HealthState {
    tx: Arc<watch::Sender<HealthStatus>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(HealthStatus::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, status: HealthStatus) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            tracing::debug!(status = %status, "health status changed");
        }
    }

    pub fn current(&self) -> HealthStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.tx.subscribe()
    }
}
