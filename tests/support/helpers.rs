use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use cosmoblock::{
    handler_fn,
    rpc::tx::{encode_tx, TxBody},
    Envelope, EventBus, IndexerConfig, IndexerConfigBuilder, MemoryStore,
};
use once_cell::sync::Lazy;
use prost_types::Any;
use tokio::time::sleep;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| cosmoblock::init_tracing("warn"));

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Every envelope a [`Recorder`] saw, as `(event_type, height)`.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<(String, Option<u64>)>>>,
}

impl Recorder {
    pub fn listen(&self, bus: &EventBus, event_types: &[&str]) {
        for event_type in event_types {
            let seen = self.seen.clone();
            bus.on(
                *event_type,
                handler_fn(move |envelope: Arc<Envelope>| {
                    let seen = seen.clone();
                    async move {
                        seen.lock()
                            .expect("recorder lock poisoned")
                            .push((envelope.event_type.clone(), envelope.height));
                        Ok(())
                    }
                }),
            );
        }
    }

    pub fn kinds_at(&self, height: u64) -> Vec<String> {
        self.seen
            .lock()
            .expect("recorder lock poisoned")
            .iter()
            .filter(|(_, seen_height)| *seen_height == Some(height))
            .map(|(kind, _)| kind.clone())
            .collect()
    }

    pub fn heights_of(&self, event_type: &str) -> Vec<u64> {
        self.seen
            .lock()
            .expect("recorder lock poisoned")
            .iter()
            .filter(|(kind, _)| kind == event_type)
            .filter_map(|(_, height)| *height)
            .collect()
    }
}

pub fn test_config(
    rpc_url: &str,
    tweak: impl FnOnce(IndexerConfigBuilder) -> IndexerConfigBuilder,
) -> Result<IndexerConfig> {
    tweak(
        IndexerConfig::builder()
            .rpc_url(rpc_url)
            .batch_size(8)
            .poll_interval(Duration::from_millis(20))
            .metrics_interval(Duration::from_secs(60))
            .rpc_timeout(Duration::from_secs(2))
            .restart_backoff(Duration::from_millis(10), Duration::from_millis(50)),
    )
    .build()
}

pub fn message(type_url: &str) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: b"payload".to_vec(),
    }
}

pub fn tx(messages: Vec<Any>, memo: &str) -> String {
    encode_tx(&TxBody {
        messages,
        memo: memo.to_string(),
        timeout_height: 0,
    })
}

pub async fn wait_for_committed(store: &MemoryStore, target: u64, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        if store.cursor().is_some_and(|next| next > target) {
            return Ok(());
        }
        if start.elapsed() > timeout {
            let reported = store
                .cursor()
                .map(|next| next.saturating_sub(1).to_string())
                .unwrap_or_else(|| "<none>".to_owned());
            bail!(
                "indexer did not commit height {target} within {:?} (last committed: {reported})",
                timeout
            );
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub fn assert_is_contiguous(heights: &[u64]) {
    for window in heights.windows(2) {
        if let [lhs, rhs] = window {
            assert_eq!(rhs, &(lhs + 1), "heights must increase monotonically");
        }
    }
}
