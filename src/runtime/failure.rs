use anyhow::Error as AnyError;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// First-error capture for one indexer run. Any task of the run can report a
/// failure; the first one is kept and the run token is cancelled so every
/// sibling task winds down.
#[derive(Clone)]
pub struct RunFailure {
    inner: Arc<FailureInner>,
}

struct FailureInner {
    triggered: AtomicBool,
    run_token: CancellationToken,
    captured: Mutex<Option<AnyError>>,
}

impl RunFailure {
    pub fn new(run_token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FailureInner {
                triggered: AtomicBool::new(false),
                run_token,
                captured: Mutex::new(None),
            }),
        }
    }

    pub fn trigger(&self, context: &'static str, error: AnyError) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            tracing::debug!(context, error = %error, "run already failing; dropping later error");
            return;
        }

        tracing::error!(context, error = format!("{error:#}"), "indexer run failed; tearing down");

        *self
            .inner
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
        self.inner.run_token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Takes the captured error, leaving nothing behind.
    pub fn take_error(&self) -> Option<AnyError> {
        self.inner
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn keeps_first_error_and_cancels_run() {
        let token = CancellationToken::new();
        let failure = RunFailure::new(token.clone());

        failure.trigger("prefetch", anyhow!("first"));
        failure.trigger("dispatch", anyhow!("second"));

        assert!(token.is_cancelled());
        assert!(failure.is_triggered());
        let err = failure.take_error().expect("error captured");
        assert_eq!(err.to_string(), "first");
        assert!(failure.take_error().is_none());
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
