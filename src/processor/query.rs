use crate::rpc::{ChainSource, RpcError};
use crate::runtime::health::{HealthState, HealthStatus};
use anyhow::Result;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// On-demand chain queries with a hard deadline. A timeout or an empty
/// answer flips the indexer health to [`HealthStatus::Failed`].
#[derive(Clone)]
pub struct ChainQuery {
    source: Arc<dyn ChainSource>,
    deadline: Duration,
    health: HealthState,
}

impl ChainQuery {
    pub fn new(source: Arc<dyn ChainSource>, deadline: Duration, health: HealthState) -> Self {
        Self {
            source,
            deadline,
            health,
        }
    }

    pub async fn latest_height(&self) -> Result<u64> {
        let height = self
            .guard("latest_height", self.source.latest_height())
            .await?;
        if height == 0 {
            return Err(self.empty("latest_height"));
        }
        Ok(height)
    }

    /// Runs an ABCI query, optionally pinned to `height`.
    pub async fn abci_query(&self, path: &str, data: &[u8], height: Option<u64>) -> Result<Bytes> {
        let value = self
            .guard("abci_query", self.source.query(path, data, height))
            .await?;
        if value.is_empty() {
            return Err(self.empty("abci_query"));
        }
        Ok(value)
    }

    async fn guard<T>(
        &self,
        method: &'static str,
        request: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match timeout(self.deadline, request).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    method,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "chain query timed out"
                );
                self.health.set(HealthStatus::Failed);
                Err(RpcError::Timeout { method }.into())
            }
        }
    }

    fn empty(&self, method: &'static str) -> anyhow::Error {
        tracing::warn!(method, "chain query returned an empty response");
        self.health.set(HealthStatus::Failed);
        RpcError::EmptyResponse { method }.into()
    }
}
