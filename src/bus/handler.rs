use super::envelope::Envelope;
use anyhow::Result;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

pub type HandlerFuture = BoxFuture<'static, Result<()>>;

/// A bus listener. Returning `Err` (or panicking) acknowledges the event as
/// failed.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, envelope: Arc<Envelope>) -> HandlerFuture;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, envelope: Arc<Envelope>) -> HandlerFuture {
        Box::pin(self(envelope))
    }
}

/// Wraps a closure so it can be registered and later removed by identity.
pub fn handler_fn<F, Fut>(handler: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(handler)
}

pub(crate) fn same_handler(left: &Arc<dyn EventHandler>, right: &Arc<dyn EventHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(left) as *const (),
        Arc::as_ptr(right) as *const (),
    )
}
