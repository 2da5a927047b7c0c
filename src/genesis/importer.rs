use super::stream::{path_segments, stream_path, GenesisTarget, StreamOutcome};
use crate::bus::{topics, Envelope, EventBus, EventPayload};
use crate::runtime::storage::{IndexerStore, TxScope};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Where genesis transactions live in a Cosmos SDK genesis document.
pub const GEN_TXS_PATH: &str = "app_state.genutil.gen_txs";
const INITIAL_HEIGHT_PATH: &str = "initial_height";
const TYPE_FIELD: &str = "@type";
/// Parsed values buffered between the file reader and the bus.
const STREAM_BUFFER: usize = 64;

/// Genesis could not be imported; the store transaction was rolled back.
/// Fatal to the indexer because no height can be processed without it.
#[derive(Debug)]
pub struct GenesisImportError {
    pub path: PathBuf,
    pub source: anyhow::Error,
}

impl fmt::Display for GenesisImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "genesis import from {} failed: {:#}",
            self.path.display(),
            self.source
        )
    }
}

impl std::error::Error for GenesisImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenesisSummary {
    /// Acknowledged `genesis/array/*` and `genesis/value/*` publishes.
    pub published: usize,
    /// Acknowledged `gentx/*` publishes.
    pub gentx_messages: usize,
}

/// Feeds a genesis file through the bus inside one store transaction.
///
/// Listeners opt in by subscribing to `genesis/array/<path>` (one publish per
/// array element) or `genesis/value/<path>` (one publish for the value).
/// Afterwards every message of every genesis transaction is published as
/// `gentx/<type url>`.
pub struct GenesisImporter {
    bus: EventBus,
    path: PathBuf,
}

impl GenesisImporter {
    pub fn new(bus: EventBus, path: impl Into<PathBuf>) -> Self {
        Self {
            bus,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The chain's `initial_height`, when the document declares one.
    pub async fn initial_height(&self) -> Result<Option<u64>, GenesisImportError> {
        let (mut values, reader) = self.spawn_stream(INITIAL_HEIGHT_PATH, GenesisTarget::Value);
        let value = values.recv().await;
        drop(values);
        join_reader(reader).await.map_err(|err| self.fail(err))?;

        let height = match value {
            None => None,
            Some(Value::Number(number)) => number.as_u64(),
            Some(Value::String(raw)) => raw.trim().parse().ok(),
            Some(_) => None,
        };
        Ok(height.filter(|height| *height > 0))
    }

    pub async fn import<S>(
        &self,
        store: &S,
        initial_height: u64,
    ) -> Result<GenesisSummary, GenesisImportError>
    where
        S: IndexerStore + ?Sized,
    {
        store
            .begin_transaction(TxScope::Genesis { initial_height })
            .await
            .context("failed to begin genesis transaction")
            .map_err(|err| self.fail(err))?;

        match self.publish_all().await {
            Ok(summary) => {
                store
                    .end_transaction(true)
                    .await
                    .context("failed to commit genesis transaction")
                    .map_err(|err| self.fail(err))?;
                Ok(summary)
            }
            Err(err) => {
                if let Err(rollback_err) = store.end_transaction(false).await {
                    tracing::warn!(error = %rollback_err, "failed to roll back genesis transaction");
                }
                Err(self.fail(err))
            }
        }
    }

    async fn publish_all(&self) -> Result<GenesisSummary> {
        let mut summary = GenesisSummary::default();

        for event_type in self.bus.event_types() {
            let (path, target) = if let Some(path) = event_type.strip_prefix(topics::GENESIS_ARRAY_PREFIX) {
                (path.to_string(), GenesisTarget::Array)
            } else if let Some(path) = event_type.strip_prefix(topics::GENESIS_VALUE_PREFIX) {
                (path.to_string(), GenesisTarget::Value)
            } else {
                continue;
            };

            let (published, outcome) = self
                .publish_path(&path, target, |value| vec![(event_type.clone(), value)])
                .await
                .with_context(|| format!("failed to import genesis path {path}"))?;
            if !outcome.found {
                tracing::warn!(event_type = %event_type, path = %path, "genesis path not found; nothing published");
            }
            tracing::debug!(event_type = %event_type, published, "genesis path imported");
            summary.published += published;
        }

        let (gentx_messages, outcome) = self
            .publish_path(GEN_TXS_PATH, GenesisTarget::Array, split_gentx)
            .await
            .context("failed to import genesis transactions")?;
        if !outcome.found {
            tracing::debug!("genesis has no gen_txs");
        }
        summary.gentx_messages = gentx_messages;

        Ok(summary)
    }

    /// Streams `path` and publishes whatever `expand` makes of each value,
    /// waiting for every acknowledgment before taking the next value.
    async fn publish_path<X>(
        &self,
        path: &str,
        target: GenesisTarget,
        mut expand: X,
    ) -> Result<(usize, StreamOutcome)>
    where
        X: FnMut(Value) -> Vec<(String, Value)>,
    {
        let (mut values, reader) = self.spawn_stream(path, target);
        let mut published = 0;
        let mut failure = None;

        'stream: while let Some(value) = values.recv().await {
            for (event_type, payload) in expand(value) {
                let envelope = Envelope::new(event_type, EventPayload::Genesis(Arc::new(payload)));
                if let Err(err) = self.bus.publish_and_await(envelope).await {
                    failure = Some(err);
                    break 'stream;
                }
                published += 1;
            }
        }

        // Dropping the receiver stops a reader that is still parsing.
        drop(values);
        let outcome = join_reader(reader).await;
        if let Some(err) = failure {
            return Err(err);
        }
        Ok((published, outcome?))
    }

    fn spawn_stream(
        &self,
        path: &str,
        target: GenesisTarget,
    ) -> (mpsc::Receiver<Value>, JoinHandle<Result<StreamOutcome>>) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let file_path = self.path.clone();
        let segments = path_segments(path);

        let reader = tokio::task::spawn_blocking(move || {
            let file = File::open(&file_path)
                .with_context(|| format!("failed to open genesis file {}", file_path.display()))?;
            stream_path(BufReader::new(file), &segments, target, |value| {
                tx.blocking_send(value)
                    .map_err(|_| anyhow!("genesis consumer stopped"))
            })
        });
        (rx, reader)
    }

    fn fail(&self, source: anyhow::Error) -> GenesisImportError {
        GenesisImportError {
            path: self.path.clone(),
            source,
        }
    }
}

async fn join_reader(reader: JoinHandle<Result<StreamOutcome>>) -> Result<StreamOutcome> {
    reader.await.context("genesis reader task failed")?
}

/// Splits one genesis transaction into `gentx/<type url>` publishes.
fn split_gentx(gentx: Value) -> Vec<(String, Value)> {
    let Value::Object(mut gentx) = gentx else {
        return Vec::new();
    };
    let messages = gentx
        .get_mut("body")
        .and_then(|body| body.get_mut("messages"))
        .map(Value::take);

    let Some(Value::Array(messages)) = messages else {
        return Vec::new();
    };
    messages
        .into_iter()
        .filter_map(|message| {
            let type_url = message.get(TYPE_FIELD)?.as_str()?.to_string();
            Some((topics::gentx(&type_url), message))
        })
        .collect()
}
