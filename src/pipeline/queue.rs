use super::ring::RingBuffer;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, Notify};
use tokio::task::AbortHandle;

/// Backing storage for queue slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueStorage {
    #[default]
    Growable,
    Ring,
}

struct Slot<T> {
    rx: oneshot::Receiver<Result<T>>,
    feeder: Option<AbortHandle>,
}

impl<T> Slot<T> {
    fn pending(rx: oneshot::Receiver<Result<T>>) -> Self {
        Self { rx, feeder: None }
    }

    fn abort(self) {
        if let Some(feeder) = self.feeder {
            feeder.abort();
        }
    }
}

enum SlotBuffer<T> {
    Growable(VecDeque<Slot<T>>),
    Ring(RingBuffer<Slot<T>>),
}

impl<T> SlotBuffer<T> {
    fn new(storage: QueueStorage, batch_size: usize) -> Self {
        match storage {
            QueueStorage::Growable => SlotBuffer::Growable(VecDeque::with_capacity(batch_size + 2)),
            QueueStorage::Ring => SlotBuffer::Ring(RingBuffer::with_capacity(batch_size + 2)),
        }
    }

    fn len(&self) -> usize {
        match self {
            SlotBuffer::Growable(slots) => slots.len(),
            SlotBuffer::Ring(slots) => slots.len(),
        }
    }

    fn push_back(&mut self, slot: Slot<T>) {
        match self {
            SlotBuffer::Growable(slots) => slots.push_back(slot),
            SlotBuffer::Ring(slots) => slots.push_back(slot),
        }
    }

    fn pop_front(&mut self) -> Option<Slot<T>> {
        match self {
            SlotBuffer::Growable(slots) => slots.pop_front(),
            SlotBuffer::Ring(slots) => slots.pop_front(),
        }
    }

    fn back_mut(&mut self) -> Option<&mut Slot<T>> {
        match self {
            SlotBuffer::Growable(slots) => slots.back_mut(),
            SlotBuffer::Ring(slots) => slots.back_mut(),
        }
    }
}

struct QueueState<T> {
    slots: SlotBuffer<T>,
    /// Resolves the newest slot. The slot itself may already have been
    /// handed to the consumer.
    next_tx: oneshot::Sender<Result<T>>,
}

impl<T> QueueState<T> {
    fn new(storage: QueueStorage, batch_size: usize) -> Self {
        let (next_tx, next_rx) = oneshot::channel();
        let mut slots = SlotBuffer::new(storage, batch_size);
        slots.push_back(Slot::pending(next_rx));
        Self { slots, next_tx }
    }

    /// Installs a fresh sender and returns the previous one together with the
    /// receiver for the slot that must be appended after it.
    fn rotate_sender(&mut self) -> (oneshot::Sender<Result<T>>, oneshot::Receiver<Result<T>>) {
        let (next_tx, next_rx) = oneshot::channel();
        (std::mem::replace(&mut self.next_tx, next_tx), next_rx)
    }

    /// Slots holding produced (or in-flight) values, excluding the trailing
    /// pending slot while it is still queued.
    fn buffered(&self) -> usize {
        self.slots.len().saturating_sub(1)
    }
}

/// Bounded FIFO of values that may still be in flight.
///
/// Slots are released strictly in insertion order no matter when their
/// inputs resolve, so a producer can run many fetches concurrently while the
/// consumer still sees them in sequence. The queue always holds one pending
/// "next" slot, which `dequeue` can hand out before anything was produced;
/// the consumer then waits for the producer's next `enqueue`.
///
/// `enqueue` never blocks. Backpressure is discovered by the producer through
/// [`PipelineQueue::proceed`], which resolves once no more than `batch_size`
/// slots are buffered.
pub struct PipelineQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: Notify,
    batch_size: usize,
    storage: QueueStorage,
    synced: AtomicBool,
}

impl<T> PipelineQueue<T>
where
    T: Send + 'static,
{
    pub fn new(batch_size: usize) -> Self {
        Self::with_storage(batch_size, QueueStorage::Growable)
    }

    pub fn with_storage(batch_size: usize, storage: QueueStorage) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            state: Mutex::new(QueueState::new(storage, batch_size)),
            capacity: Notify::new(),
            batch_size,
            storage,
            synced: AtomicBool::new(false),
        }
    }

    /// Resolves the pending slot with the output of `input` and opens a fresh
    /// one. The input runs on its own task; a failed input is logged here and
    /// surfaces again when the consumer dequeues its slot.
    pub fn enqueue<F>(&self, input: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let mut state = self.lock_state();
        let (tx, next_rx) = state.rotate_sender();

        let feeder = tokio::spawn(async move {
            let result = input.await;
            if let Err(err) = &result {
                tracing::warn!(error = %err, "pipeline input failed; slot will surface the error");
            }
            // The consumer may have given up on the slot; nothing to do then.
            let _ = tx.send(result);
        });

        // While still queued, the slot being fed is the last one.
        if let Some(slot) = state.slots.back_mut() {
            slot.feeder = Some(feeder.abort_handle());
        }
        state.slots.push_back(Slot::pending(next_rx));
        self.trace_backpressure(state.buffered());
    }

    /// Resolves the pending slot with a ready value.
    pub fn enqueue_value(&self, value: T) {
        let mut state = self.lock_state();
        let (tx, next_rx) = state.rotate_sender();
        let _ = tx.send(Ok(value));
        state.slots.push_back(Slot::pending(next_rx));
        self.trace_backpressure(state.buffered());
    }

    /// Removes the oldest slot and returns a future for its value. The slot is
    /// taken eagerly; awaiting the future only waits for the value.
    pub fn dequeue(&self) -> BoxFuture<'static, Result<T>> {
        let slot = self.lock_state().slots.pop_front();
        self.capacity.notify_waiters();

        Box::pin(async move {
            let Some(slot) = slot else {
                return Err(anyhow!("pipeline queue has no slot to dequeue"));
            };
            match slot.rx.await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("pipeline slot was abandoned before it resolved")),
            }
        })
    }

    /// Resolves to `true` once no more than `batch_size` slots are buffered.
    pub async fn proceed(&self) -> bool {
        loop {
            let notified = self.capacity.notified();
            if self.lock_state().buffered() <= self.batch_size {
                return true;
            }
            notified.await;
        }
    }

    pub fn size(&self) -> usize {
        self.lock_state().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Slots currently counted against the batch limit.
    pub fn buffered(&self) -> usize {
        self.lock_state().buffered()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Marks that the producer has caught up with the chain tip.
    pub fn set_synced(&self) {
        if !self.synced.swap(true, Ordering::SeqCst) {
            tracing::debug!("pipeline queue caught up with chain tip");
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Aborts every in-flight input, drops all slots and installs one fresh
    /// pending slot. Resets the synced latch.
    pub fn clear(&self) {
        {
            let mut state = self.lock_state();
            while let Some(slot) = state.slots.pop_front() {
                slot.abort();
            }
            *state = QueueState::new(self.storage, self.batch_size);
        }
        self.synced.store(false, Ordering::SeqCst);
        self.capacity.notify_waiters();
    }

    fn trace_backpressure(&self, buffered: usize) {
        if buffered > self.batch_size {
            tracing::trace!(
                buffered,
                batch_size = self.batch_size,
                "pipeline queue over batch limit; producer must wait"
            );
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
