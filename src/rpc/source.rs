use crate::rpc::metrics::RpcMetricsSnapshot;
use crate::rpc::types::{BlockResponse, BlockResults, ValidatorSet};
use anyhow::Result;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::watch;

/// The chain surface the indexer consumes. [`AsyncRpcClient`] implements it
/// over HTTP; tests and embedders can supply their own.
///
/// [`AsyncRpcClient`]: crate::rpc::AsyncRpcClient
pub trait ChainSource: Send + Sync + 'static {
    fn latest_height(&self) -> BoxFuture<'_, Result<u64>>;

    fn fetch_block(&self, height: u64) -> BoxFuture<'_, Result<BlockResponse>>;

    fn fetch_block_results(&self, height: u64) -> BoxFuture<'_, Result<BlockResults>>;

    fn fetch_validators(&self, height: u64) -> BoxFuture<'_, Result<ValidatorSet>>;

    fn query<'a>(
        &'a self,
        path: &'a str,
        data: &'a [u8],
        height: Option<u64>,
    ) -> BoxFuture<'a, Result<Bytes>>;

    /// Push notifications of new chain heights. Sources that can only be
    /// polled return `None`.
    fn subscribe_heights(&self) -> Option<watch::Receiver<u64>> {
        None
    }

    /// Request counters, for sources that keep them.
    fn metrics(&self) -> Option<RpcMetricsSnapshot> {
        None
    }
}
