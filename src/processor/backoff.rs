use crate::runtime::config::RestartBackoff;
use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Delay before the next supervisor restart after `failures` consecutive
/// failed runs. The first restart waits `initial`.
pub(crate) fn restart_delay(backoff: RestartBackoff, failures: u32) -> Duration {
    let mut delay = backoff.initial.min(backoff.max);
    for _ in 1..failures {
        if delay >= backoff.max {
            break;
        }
        delay = next_backoff(delay, backoff.max);
    }
    delay
}

pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: &CancellationToken,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    tokio::select! {
        _ = cancellation.cancelled() => Err(anyhow!("restart backoff cancelled")),
        _ = sleep(delay) => Ok(()),
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
