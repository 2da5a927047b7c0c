use super::topics;
use crate::pipeline::HeightData;
use crate::rpc::types::{AbciEvent, TxResult};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct TxEventsPayload {
    pub tx_hash: String,
    pub tx_index: usize,
    pub result: TxResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxMemoPayload {
    pub tx_hash: String,
    pub tx_index: usize,
    pub memo: String,
}

/// One decoded message of a successful transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePayload {
    pub tx_hash: String,
    pub tx_index: usize,
    pub msg_index: usize,
    /// Position inside an authz exec wrapper, for unwrapped inner messages.
    pub authz_index: Option<usize>,
    pub type_url: String,
    pub value: Bytes,
    /// Present when a decoder is registered for `type_url`.
    pub decoded: Option<Value>,
    /// Log events scoped to this message.
    pub events: Vec<AbciEvent>,
}

/// What an envelope carries, by event category. Chain-defined message types
/// all share [`EventPayload::Message`]; anything outside the engine's own
/// vocabulary goes through [`EventPayload::Custom`].
#[derive(Debug, Clone)]
pub enum EventPayload {
    Block(Arc<HeightData>),
    BlockEvents(Arc<Vec<AbciEvent>>),
    TxEvents(Arc<TxEventsPayload>),
    TxMemo(Arc<TxMemoPayload>),
    Message(Arc<MessagePayload>),
    Periodic { interval: u64 },
    Genesis(Arc<Value>),
    /// The original envelope of a publish nobody listened to.
    Unhandled(Arc<Envelope>),
    Custom(Arc<Value>),
}

impl EventPayload {
    pub fn as_block(&self) -> Option<&HeightData> {
        match self {
            EventPayload::Block(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_block_events(&self) -> Option<&[AbciEvent]> {
        match self {
            EventPayload::BlockEvents(events) => Some(events),
            _ => None,
        }
    }

    pub fn as_tx_events(&self) -> Option<&TxEventsPayload> {
        match self {
            EventPayload::TxEvents(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn as_memo(&self) -> Option<&TxMemoPayload> {
        match self {
            EventPayload::TxMemo(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessagePayload> {
        match self {
            EventPayload::Message(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            EventPayload::Genesis(value) | EventPayload::Custom(value) => Some(value),
            _ => None,
        }
    }
}

/// A single publish. Created once per publish call and immutable afterwards;
/// the correlation id joins acknowledgments back to the publisher.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event_type: String,
    pub payload: EventPayload,
    pub height: Option<u64>,
    pub timestamp: Option<String>,
    pub correlation_id: Uuid,
}

impl Envelope {
    pub fn new(event_type: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            height: None,
            timestamp: None,
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn with_height(mut self, height: u64) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// The `_unhandled` redirect of `original`, sharing its correlation id.
    pub(crate) fn unhandled(original: Arc<Envelope>) -> Self {
        Self {
            event_type: topics::UNHANDLED.to_string(),
            height: original.height,
            timestamp: original.timestamp.clone(),
            correlation_id: original.correlation_id,
            payload: EventPayload::Unhandled(original),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_envelope_gets_its_own_correlation_id() {
        let first = Envelope::new("x", EventPayload::Periodic { interval: 50 });
        let second = Envelope::new("x", EventPayload::Periodic { interval: 50 });
        assert_ne!(first.correlation_id, second.correlation_id);
    }

    #[test]
    fn unhandled_redirect_keeps_origin() {
        let original = Arc::new(
            Envelope::new("custom", EventPayload::Custom(Arc::new(json!({"k": 1}))))
                .with_height(12)
                .with_timestamp("2024-01-01T00:00:00Z"),
        );
        let redirect = Envelope::unhandled(original.clone());

        assert_eq!(redirect.event_type, topics::UNHANDLED);
        assert_eq!(redirect.correlation_id, original.correlation_id);
        assert_eq!(redirect.height, Some(12));
        match &redirect.payload {
            EventPayload::Unhandled(inner) => assert_eq!(inner.event_type, "custom"),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
