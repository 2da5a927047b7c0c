use super::ack::{Ack, AckStatus, BusError};
use super::envelope::Envelope;
use super::handler::{handler_fn, same_handler, EventHandler};
use super::topics;
use crate::runtime::failure::panic_message;
use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

type HandlerMap = HashMap<String, Vec<Arc<dyn EventHandler>>>;

struct BusInner {
    handlers: RwLock<HandlerMap>,
    waiters: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Ack>>>,
}

impl BusInner {
    fn acknowledge(&self, ack: Ack) {
        let waiter = self.lock_waiters().get(&ack.correlation_id).cloned();
        if let Some(waiter) = waiter {
            let _ = waiter.send(ack);
        }
    }

    fn lock_waiters(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::UnboundedSender<Ack>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deregisters an acknowledgment waiter however the wait ends.
struct WaiterGuard<'a> {
    inner: &'a BusInner,
    correlation_id: Uuid,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.inner.lock_waiters().remove(&self.correlation_id);
    }
}

/// Typed publish/subscribe with per-publish acknowledgments.
///
/// Cloning yields another handle to the same bus. Each listener invocation
/// runs on its own task and reports success or failure back to whoever is
/// waiting on that publish's correlation id. Publishes with no listener are
/// redirected to [`topics::UNHANDLED`], whose default listener acknowledges
/// them so waiters never stall.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let bus = Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(HashMap::new()),
                waiters: Mutex::new(HashMap::new()),
            }),
        };
        bus.on(
            topics::UNHANDLED,
            handler_fn(|envelope: Arc<Envelope>| async move {
                if let super::EventPayload::Unhandled(original) = &envelope.payload {
                    tracing::trace!(
                        event_type = %original.event_type,
                        correlation_id = %envelope.correlation_id,
                        "no listener registered; acknowledging"
                    );
                }
                Ok(())
            }),
        );
        bus
    }

    /// Registers `handler` for `event_type`. Registering the same handler
    /// twice makes it run twice per publish.
    pub fn on(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        tracing::debug!(event_type = %event_type, "registering bus listener");
        self.write_handlers()
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Removes one registration of `handler`. Returns whether one was found.
    pub fn off(&self, event_type: &str, handler: &Arc<dyn EventHandler>) -> bool {
        let mut handlers = self.write_handlers();
        let Some(registered) = handlers.get_mut(event_type) else {
            return false;
        };
        let Some(position) = registered.iter().position(|h| same_handler(h, handler)) else {
            return false;
        };
        registered.remove(position);
        if registered.is_empty() {
            handlers.remove(event_type);
        }
        true
    }

    /// Number of registrations for `event_type`; `None` when there are none.
    pub fn handled(&self, event_type: &str) -> Option<usize> {
        self.read_handlers().get(event_type).map(Vec::len)
    }

    /// Every event type with at least one listener, sorted.
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.read_handlers().keys().cloned().collect();
        types.sort();
        types
    }

    /// Fire-and-forget publish.
    pub fn emit(&self, envelope: Envelope) {
        self.dispatch(Arc::new(envelope));
    }

    /// Publishes `envelope` and waits until every listener acknowledged
    /// success. The first failure rejects the wait immediately.
    ///
    /// Every call stamps a fresh correlation id, so the same envelope can be
    /// published concurrently or more than once.
    pub async fn publish_and_await(&self, mut envelope: Envelope) -> Result<()> {
        envelope.correlation_id = Uuid::new_v4();
        let correlation_id = envelope.correlation_id;
        let event_type = envelope.event_type.clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner.lock_waiters().insert(correlation_id, tx);
        let _guard = WaiterGuard {
            inner: &self.inner,
            correlation_id,
        };

        let expected = self.dispatch(Arc::new(envelope));
        let mut succeeded = 0usize;

        while succeeded < expected {
            let Some(ack) = rx.recv().await else {
                return Err(BusError::WaiterClosed {
                    event_type,
                    correlation_id,
                }
                .into());
            };
            match ack.status {
                AckStatus::Success => succeeded += 1,
                AckStatus::Failure(source) => {
                    return Err(BusError::ListenerFailed {
                        event_type,
                        correlation_id,
                        source,
                    }
                    .into());
                }
            }
        }

        tracing::trace!(
            event_type = %event_type,
            correlation_id = %correlation_id,
            listeners = expected,
            "publish acknowledged"
        );
        Ok(())
    }

    /// Starts every listener for the envelope and returns how many
    /// acknowledgments it will produce.
    fn dispatch(&self, envelope: Arc<Envelope>) -> usize {
        let handlers = self
            .read_handlers()
            .get(&envelope.event_type)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            if envelope.event_type == topics::UNHANDLED {
                return 0;
            }
            return self.dispatch(Arc::new(Envelope::unhandled(envelope)));
        }

        for handler in &handlers {
            self.spawn_listener(handler.clone(), envelope.clone());
        }
        handlers.len()
    }

    fn spawn_listener(&self, handler: Arc<dyn EventHandler>, envelope: Arc<Envelope>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let correlation_id = envelope.correlation_id;
            let event_type = envelope.event_type.clone();
            let outcome = AssertUnwindSafe(async { handler.handle(envelope).await })
                .catch_unwind()
                .await;

            let status = match outcome {
                Ok(Ok(())) => AckStatus::Success,
                Ok(Err(err)) => {
                    tracing::warn!(
                        event_type = %event_type,
                        correlation_id = %correlation_id,
                        error = %err,
                        "bus listener failed"
                    );
                    AckStatus::Failure(Arc::new(err))
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(
                        event_type = %event_type,
                        correlation_id = %correlation_id,
                        panic = %message,
                        "bus listener panicked"
                    );
                    AckStatus::Failure(Arc::new(anyhow!("listener panicked: {message}")))
                }
            };

            inner.acknowledge(Ack {
                correlation_id,
                event_type,
                status,
            });
        });
    }

    fn read_handlers(&self) -> std::sync::RwLockReadGuard<'_, HandlerMap> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_handlers(&self) -> std::sync::RwLockWriteGuard<'_, HandlerMap> {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
