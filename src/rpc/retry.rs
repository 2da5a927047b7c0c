//! Retry context and canned log messages so every CometBFT endpoint reports
//! attempts, backoff and exhaustion with the same structured fields.

use anyhow::Error;
use std::time::Duration;

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(height) = $ctx.height {
            tracing::$level!(height, $($rest)*);
        } else {
            tracing::$level!($($rest)*);
        }
    }};
}

/// Log labels for one RPC operation.
#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) timeout: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) unavailable: Option<&'static str>,
}

#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    height: Option<u64>,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(messages: &'a RetryMessages) -> Self {
        Self {
            height: None,
            messages,
        }
    }

    pub(crate) fn with_height(messages: &'a RetryMessages, height: Option<u64>) -> Self {
        Self { height, messages }
    }

    pub(crate) fn log_timeout(&self, attempt: usize, method: &str, backoff: Duration) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            method,
            backoff_ms = duration_to_millis(backoff),
            "{}",
            self.messages.timeout
        );
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &Error) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            error = %err,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &Error) {
        log_with_retry_ctx!(error, self, attempt, error = %err, "{}", self.messages.exhausted);
    }

    pub(crate) fn log_unavailable(&self, attempt: usize) {
        if let Some(message) = self.messages.unavailable {
            log_with_retry_ctx!(info, self, attempt, "{}", message);
        }
    }

    pub(crate) fn log_oversized(&self, attempt: usize, method: &str) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            method,
            "rpc response exceeded HTTP size limit; raise rpc_max_response_body_bytes"
        );
    }
}

fn duration_to_millis(backoff: Duration) -> u64 {
    backoff.as_millis().min(u128::from(u64::MAX)) as u64
}

pub(crate) const STATUS_RETRY: RetryMessages = RetryMessages {
    timeout: "status timed out; retrying",
    retry: "status failed; retrying",
    exhausted: "status exhausted retries",
    unavailable: None,
};

pub(crate) const BLOCK_RETRY: RetryMessages = RetryMessages {
    timeout: "block request timed out; retrying",
    retry: "block request failed; retrying",
    exhausted: "block request exhausted retries",
    unavailable: Some("block is not yet available on the node"),
};

pub(crate) const BLOCK_RESULTS_RETRY: RetryMessages = RetryMessages {
    timeout: "block_results timed out; retrying",
    retry: "block_results failed; retrying",
    exhausted: "block_results exhausted retries",
    unavailable: Some("block results are not yet available on the node"),
};

pub(crate) const VALIDATORS_RETRY: RetryMessages = RetryMessages {
    timeout: "validators page timed out; retrying",
    retry: "validators page failed; retrying",
    exhausted: "validators page exhausted retries",
    unavailable: Some("validator set is not yet available on the node"),
};

pub(crate) const ABCI_QUERY_RETRY: RetryMessages = RetryMessages {
    timeout: "abci_query timed out; retrying",
    retry: "abci_query failed; retrying",
    exhausted: "abci_query exhausted retries",
    unavailable: Some("abci_query height is not available on the node"),
};
