//! Turns one fetched height into the ordered list of events it publishes:
//! the block, its begin-block events, every transaction's result events,
//! then per successful transaction its memo and one event per message
//! (authz exec wrappers followed by their inner messages), and finally the
//! end-block events.

use super::decoders::MessageDecoders;
use crate::bus::topics;
use crate::bus::{EventPayload, MessagePayload, TxEventsPayload, TxMemoPayload};
use crate::pipeline::HeightData;
use crate::rpc::tx::{decode_tx, encoded_tx_hash, unwrap_exec};
use crate::rpc::types::{number, AbciEvent, TxResult};
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

const MSG_INDEX_ATTRIBUTE: &str = "msg_index";
const AUTHZ_MSG_INDEX_ATTRIBUTE: &str = "authz_msg_index";

#[derive(Debug, Clone)]
pub(crate) struct PlannedEvent {
    pub event_type: String,
    pub payload: EventPayload,
}

impl PlannedEvent {
    fn new(event_type: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

pub(crate) fn plan_height_events(
    data: &Arc<HeightData>,
    decoders: &MessageDecoders,
) -> Result<Vec<PlannedEvent>> {
    let height = data.height();
    let txs = data.txs();
    let results = data.tx_results();
    if txs.len() != results.len() {
        bail!(
            "height {height} has {} transactions but {} results",
            txs.len(),
            results.len()
        );
    }

    let mut events = vec![
        PlannedEvent::new(topics::BLOCK, EventPayload::Block(data.clone())),
        PlannedEvent::new(
            topics::BEGIN_BLOCK,
            EventPayload::BlockEvents(Arc::new(data.begin_block_events())),
        ),
    ];

    let mut successful = Vec::new();
    for (tx_index, (encoded, result)) in txs.iter().zip(results).enumerate() {
        let tx_hash = if result.is_success() {
            let decoded = decode_tx(encoded)
                .with_context(|| format!("height {height}: failed to decode tx {tx_index}"))?;
            let hash = decoded.hash.clone();
            successful.push((tx_index, decoded, result));
            hash
        } else {
            encoded_tx_hash(encoded)
                .with_context(|| format!("height {height}: failed to hash tx {tx_index}"))?
        };

        events.push(PlannedEvent::new(
            topics::TX_EVENTS,
            EventPayload::TxEvents(Arc::new(TxEventsPayload {
                tx_hash,
                tx_index,
                result: result.clone(),
            })),
        ));
    }

    for (tx_index, decoded, result) in successful {
        if !decoded.memo.is_empty() {
            events.push(PlannedEvent::new(
                topics::TX_MEMO,
                EventPayload::TxMemo(Arc::new(TxMemoPayload {
                    tx_hash: decoded.hash.clone(),
                    tx_index,
                    memo: decoded.memo.clone(),
                })),
            ));
        }

        for (msg_index, message) in decoded.messages.iter().enumerate() {
            let scoped = message_events(result, msg_index);
            let inner = unwrap_exec(message).with_context(|| {
                format!("height {height}: tx {tx_index} message {msg_index}")
            })?;

            events.push(PlannedEvent::new(
                message.type_url.clone(),
                EventPayload::Message(Arc::new(MessagePayload {
                    tx_hash: decoded.hash.clone(),
                    tx_index,
                    msg_index,
                    authz_index: None,
                    type_url: message.type_url.clone(),
                    value: Bytes::from(message.value.clone()),
                    decoded: decoders.decode(message)?,
                    events: scoped.clone(),
                })),
            ));

            for (authz_index, inner) in inner.into_iter().flatten().enumerate() {
                let authz_key = authz_index.to_string();
                let inner_events = scoped
                    .iter()
                    .filter(|event| {
                        event.attribute(AUTHZ_MSG_INDEX_ATTRIBUTE) == Some(authz_key.as_str())
                    })
                    .cloned()
                    .collect();
                events.push(PlannedEvent::new(
                    inner.type_url.clone(),
                    EventPayload::Message(Arc::new(MessagePayload {
                        tx_hash: decoded.hash.clone(),
                        tx_index,
                        msg_index,
                        authz_index: Some(authz_index),
                        type_url: inner.type_url.clone(),
                        decoded: decoders.decode(&inner)?,
                        value: Bytes::from(inner.value),
                        events: inner_events,
                    })),
                ));
            }
        }
    }

    events.push(PlannedEvent::new(
        topics::END_BLOCK,
        EventPayload::BlockEvents(Arc::new(data.end_block_events())),
    ));

    Ok(events)
}

/// Events belonging to message `msg_index`. Nodes that tag events with a
/// `msg_index` attribute are filtered on it; older nodes only carry the
/// per-message grouping in the JSON log.
pub(crate) fn message_events(result: &TxResult, msg_index: usize) -> Vec<AbciEvent> {
    let tagged = result
        .events
        .iter()
        .any(|event| event.attribute(MSG_INDEX_ATTRIBUTE).is_some());
    if tagged {
        let key = msg_index.to_string();
        return result
            .events
            .iter()
            .filter(|event| event.attribute(MSG_INDEX_ATTRIBUTE) == Some(key.as_str()))
            .cloned()
            .collect();
    }

    legacy_log_events(&result.log, msg_index)
}

#[derive(Deserialize)]
struct LegacyMessageLog {
    #[serde(default, deserialize_with = "number")]
    msg_index: u64,
    #[serde(default)]
    events: Vec<AbciEvent>,
}

fn legacy_log_events(log: &str, msg_index: usize) -> Vec<AbciEvent> {
    let Ok(entries) = serde_json::from_str::<Vec<LegacyMessageLog>>(log) else {
        return Vec::new();
    };
    entries
        .into_iter()
        .find(|entry| entry.msg_index == msg_index as u64)
        .map(|entry| entry.events)
        .unwrap_or_default()
}
