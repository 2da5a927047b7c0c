//! In-process event bus: listeners subscribe by event type, publishers can
//! wait for every listener's acknowledgment.

pub mod ack;
pub mod envelope;
pub mod event_bus;
pub mod handler;
pub mod topics;

pub use ack::{Ack, AckStatus, BusError};
pub use envelope::{Envelope, EventPayload, MessagePayload, TxEventsPayload, TxMemoPayload};
pub use event_bus::EventBus;
pub use handler::{handler_fn, EventHandler, HandlerFuture};
