//! CometBFT JSON-RPC client over `jsonrpsee` HTTP. Wraps every endpoint the
//! indexer needs in a shared retry loop with metrics, exponential backoff and
//! consistent logging, and maps transport failures onto [`RpcError`].

use crate::rpc::auth::build_auth_headers;
use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::retry::{
    RetryContext, ABCI_QUERY_RETRY, BLOCK_RESULTS_RETRY, BLOCK_RETRY, STATUS_RETRY,
    VALIDATORS_RETRY,
};
use crate::rpc::source::ChainSource;
use crate::rpc::types::{
    AbciQueryResponse, BlockResponse, BlockResults, StatusResponse, ValidatorSet, ValidatorsPage,
};
use crate::runtime::config::{IndexerConfig, RpcCredentials};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use bytes::Bytes;
use futures::future::BoxFuture;
use jsonrpsee::core::{
    client::{ClientT, Error as JsonRpcError},
    http_helpers::HttpError,
    params::ObjectParams,
};
use jsonrpsee::http_client::transport::Error as HttpTransportError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::de::DeserializeOwned;
use std::{fmt, future::Future, sync::Arc};
use tokio::time::{sleep, timeout, Instant};

pub const VALIDATORS_PER_PAGE: u64 = 100;

const UNAVAILABLE_HEIGHT_MARKERS: [&str; 3] = [
    "must be less than or equal to the current blockchain height",
    "is not available",
    "could not find results for height",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    Timeout { method: &'static str },
    HeightUnavailable { method: &'static str, height: u64 },
    EmptyResponse { method: &'static str },
    QueryFailed { path: String, code: u32, log: String },
    ResponseTooLarge { method: &'static str },
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::HeightUnavailable { method, height } => {
                write!(f, "rpc {method}: height {height} is not available on the node")
            }
            RpcError::EmptyResponse { method } => write!(f, "rpc {method} returned an empty response"),
            RpcError::QueryFailed { path, code, log } => {
                write!(f, "abci query {path} failed with code {code}: {log}")
            }
            RpcError::ResponseTooLarge { method } => {
                write!(f, "rpc {method} response exceeded HTTP size limits")
            }
        }
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Clone)]
pub struct AsyncRpcClient {
    rpc_url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
}

impl AsyncRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, None, RpcClientOptions::default())
    }

    pub fn with_options(
        url: impl Into<String>,
        credentials: Option<&RpcCredentials>,
        options: RpcClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let headers = build_auth_headers(credentials)?;
        let max_request_body_size = options.max_request_body_bytes.min(u32::MAX as usize) as u32;
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_request_size(max_request_body_size)
            .max_response_size(max_response_body_size)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client: {err}"))?;

        Ok(Self {
            rpc_url: Arc::new(rpc_url),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
        })
    }

    pub fn from_config(config: &IndexerConfig) -> Result<Self> {
        config.validate()?;
        let options = RpcClientOptions {
            max_concurrent_requests: std::cmp::max(32, config.batch_size().saturating_mul(4)),
            request_timeout: config.rpc_timeout(),
            max_response_body_bytes: config.rpc_max_response_body_bytes(),
            ..RpcClientOptions::default()
        };
        Self::with_options(config.rpc_url(), config.rpc_credentials(), options)
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.retry(
            RetryContext::new(&STATUS_RETRY),
            || self.call("status", ObjectParams::new(), None),
            |attempt, status: &StatusResponse| {
                tracing::debug!(
                    attempt,
                    tip = status.sync_info.latest_block_height,
                    "refreshed node status"
                );
            },
        )
        .await
    }

    pub async fn latest_height(&self) -> Result<u64> {
        let status = self.status().await?;
        Ok(status.sync_info.latest_block_height)
    }

    pub async fn block(&self, height: u64) -> Result<BlockResponse> {
        self.retry(
            RetryContext::with_height(&BLOCK_RETRY, Some(height)),
            || async move { self.call("block", height_params(height)?, Some(height)).await },
            |attempt, block: &BlockResponse| {
                tracing::trace!(attempt, height, txs = block.txs().len(), "fetched block");
            },
        )
        .await
    }

    pub async fn block_results(&self, height: u64) -> Result<BlockResults> {
        self.retry(
            RetryContext::with_height(&BLOCK_RESULTS_RETRY, Some(height)),
            || async move {
                self.call("block_results", height_params(height)?, Some(height))
                    .await
            },
            |attempt, results: &BlockResults| {
                tracing::trace!(
                    attempt,
                    height,
                    txs = results.txs_results.len(),
                    "fetched block results"
                );
            },
        )
        .await
    }

    /// Fetches every page of the validator set active at `height`.
    pub async fn validators(&self, height: u64) -> Result<ValidatorSet> {
        let mut validators = Vec::new();
        let mut page = 1u64;

        loop {
            let result: ValidatorsPage = self
                .retry(
                    RetryContext::with_height(&VALIDATORS_RETRY, Some(height)),
                    || async move {
                        let mut params = height_params(height)?;
                        params.insert("page", page.to_string())?;
                        params.insert("per_page", VALIDATORS_PER_PAGE.to_string())?;
                        self.call("validators", params, Some(height)).await
                    },
                    |attempt, result: &ValidatorsPage| {
                        tracing::trace!(
                            attempt,
                            height,
                            page,
                            count = result.validators.len(),
                            "fetched validators page"
                        );
                    },
                )
                .await?;

            let received = result.validators.len();
            validators.extend(result.validators);
            let collected = validators.len() as u64;

            if collected >= result.total {
                return Ok(ValidatorSet {
                    block_height: result.block_height,
                    validators,
                });
            }
            if received == 0 {
                return Err(RpcError::EmptyResponse {
                    method: "validators",
                }
                .into());
            }
            page += 1;
        }
    }

    /// Runs an ABCI query and returns the decoded response value. A non-zero
    /// response code is reported as [`RpcError::QueryFailed`].
    pub async fn abci_query(&self, path: &str, data: &[u8], height: Option<u64>) -> Result<Bytes> {
        let data_hex = hex::encode(data);
        let data_hex = data_hex.as_str();

        let response: AbciQueryResponse = self
            .retry(
                RetryContext::with_height(&ABCI_QUERY_RETRY, height),
                || async move {
                    let mut params = ObjectParams::new();
                    params.insert("path", path)?;
                    params.insert("data", data_hex)?;
                    if let Some(height) = height {
                        params.insert("height", height.to_string())?;
                    }
                    params.insert("prove", false)?;
                    self.call("abci_query", params, height).await
                },
                |attempt, _| tracing::trace!(attempt, path, "abci_query completed"),
            )
            .await?;

        let result = response.response;
        if result.code != 0 {
            return Err(RpcError::QueryFailed {
                path: path.to_string(),
                code: result.code,
                log: result.log,
            }
            .into());
        }

        let value = match result.value {
            Some(encoded) => BASE64_STANDARD
                .decode(encoded)
                .with_context(|| format!("abci query {path} returned invalid base64"))?,
            None => Vec::new(),
        };
        Ok(Bytes::from(value))
    }

    /// Shared retry/backoff loop with metrics and consistent logging.
    async fn retry<T, F, Fut, S>(
        &self,
        context: RetryContext<'_>,
        mut operation: F,
        mut on_success: S,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        S: FnMut(usize, &T),
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let start = Instant::now();

            let err = match operation().await {
                Ok(value) => {
                    self.metrics.record_success(start.elapsed());
                    on_success(attempt, &value);
                    return Ok(value);
                }
                Err(err) => err,
            };

            let elapsed = start.elapsed();
            let backoff = self.options.backoff_delay(attempt);
            match err.downcast_ref::<RpcError>() {
                Some(RpcError::HeightUnavailable { .. }) | Some(RpcError::QueryFailed { .. }) => {
                    self.metrics.record_success(elapsed);
                    context.log_unavailable(attempt);
                    return Err(err);
                }
                Some(RpcError::ResponseTooLarge { method }) => {
                    self.metrics.record_failure(elapsed);
                    context.log_oversized(attempt, method);
                    return Err(err);
                }
                Some(RpcError::Timeout { method }) => {
                    self.metrics.record_timeout(elapsed);
                    if attempt < self.options.max_attempts {
                        context.log_timeout(attempt, method, backoff);
                    }
                }
                _ => self.metrics.record_failure(elapsed),
            }

            if attempt >= self.options.max_attempts {
                context.log_exhausted(attempt, &err);
                return Err(err);
            }

            context.log_retry(attempt, backoff, &err);
            sleep(backoff).await;
        }
    }

    async fn call<R>(&self, method: &'static str, params: ObjectParams, height: Option<u64>) -> Result<R>
    where
        R: DeserializeOwned,
    {
        timeout(
            self.options.request_timeout,
            self.client.request::<R, _>(method, params),
        )
        .await
        .map_err(|_| RpcError::Timeout { method })?
        .map_err(|err| map_rpc_error(method, height, err))
    }
}

impl ChainSource for AsyncRpcClient {
    fn latest_height(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.latest_height())
    }

    fn fetch_block(&self, height: u64) -> BoxFuture<'_, Result<BlockResponse>> {
        Box::pin(self.block(height))
    }

    fn fetch_block_results(&self, height: u64) -> BoxFuture<'_, Result<BlockResults>> {
        Box::pin(self.block_results(height))
    }

    fn fetch_validators(&self, height: u64) -> BoxFuture<'_, Result<ValidatorSet>> {
        Box::pin(self.validators(height))
    }

    fn query<'a>(
        &'a self,
        path: &'a str,
        data: &'a [u8],
        height: Option<u64>,
    ) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(self.abci_query(path, data, height))
    }

    fn metrics(&self) -> Option<RpcMetricsSnapshot> {
        Some(AsyncRpcClient::metrics(self))
    }
}

fn height_params(height: u64) -> Result<ObjectParams> {
    let mut params = ObjectParams::new();
    params
        .insert("height", height.to_string())
        .context("failed to serialize height param")?;
    Ok(params)
}

fn map_rpc_error(method: &'static str, height: Option<u64>, err: JsonRpcError) -> anyhow::Error {
    if response_too_large(&err) {
        return RpcError::ResponseTooLarge { method }.into();
    }
    if let (Some(height), JsonRpcError::Call(object)) = (height, &err) {
        let data = object.data().map(|raw| raw.get()).unwrap_or_default();
        let unavailable = UNAVAILABLE_HEIGHT_MARKERS
            .iter()
            .any(|marker| object.message().contains(marker) || data.contains(marker));
        if unavailable {
            return RpcError::HeightUnavailable { method, height }.into();
        }
    }
    anyhow!("rpc {method} call failed: {err}")
}

fn response_too_large(err: &JsonRpcError) -> bool {
    match err {
        JsonRpcError::Transport(inner) => match inner.downcast_ref::<HttpTransportError>() {
            Some(HttpTransportError::Http(http_err)) => matches!(http_err, HttpError::TooLarge),
            Some(HttpTransportError::RequestTooLarge) => true,
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::retry::RetryContext;
    use jsonrpsee::types::ErrorObjectOwned;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_client() -> AsyncRpcClient {
        let options = RpcClientOptions {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            request_timeout: Duration::from_millis(5),
            ..RpcClientOptions::default()
        };

        AsyncRpcClient::with_options("http://127.0.0.1:26657", None, options)
            .expect("test RPC client must build")
    }

    #[tokio::test]
    async fn retry_recovers_after_timeout() {
        let client = test_client();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_for_op = attempts.clone();

        let height = client
            .retry(
                RetryContext::new(&STATUS_RETRY),
                move || {
                    let attempts = attempts_for_op.clone();
                    async move {
                        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(RpcError::Timeout { method: "status" }.into())
                        } else {
                            Ok(42u64)
                        }
                    }
                },
                |_, _| {},
            )
            .await
            .expect("second attempt should succeed");

        assert_eq!(height, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(client.metrics().total_timeouts, 1);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let client = test_client();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_for_op = attempts.clone();

        let err = client
            .retry(
                RetryContext::new(&STATUS_RETRY),
                move || {
                    let attempts = attempts_for_op.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<u64, _>(anyhow!("connection refused"))
                    }
                },
                |_, _| {},
            )
            .await
            .expect_err("every attempt fails");

        assert!(err.to_string().contains("connection refused"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(client.metrics().total_errors, 3);
    }

    #[tokio::test]
    async fn unavailable_height_is_not_retried() {
        let client = test_client();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_for_op = attempts.clone();

        let err = client
            .retry(
                RetryContext::with_height(&BLOCK_RETRY, Some(9)),
                move || {
                    let attempts = attempts_for_op.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<u64, _>(
                            RpcError::HeightUnavailable {
                                method: "block",
                                height: 9,
                            }
                            .into(),
                        )
                    }
                },
                |_, _| {},
            )
            .await
            .expect_err("height is unavailable");

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(
            err.downcast_ref::<RpcError>(),
            Some(RpcError::HeightUnavailable { height: 9, .. })
        ));
    }

    #[test]
    fn map_error_detects_http_too_large() {
        let transport_error = HttpTransportError::Http(HttpError::TooLarge);
        let err = JsonRpcError::Transport(Box::new(transport_error));
        let mapped = map_rpc_error("block_results", Some(3), err);
        assert_eq!(
            mapped.downcast_ref::<RpcError>(),
            Some(&RpcError::ResponseTooLarge {
                method: "block_results"
            })
        );
    }

    #[test]
    fn map_error_detects_height_beyond_tip() {
        let object = ErrorObjectOwned::owned(
            -32603,
            "Internal error",
            Some("height 120 must be less than or equal to the current blockchain height 100"),
        );
        let mapped = map_rpc_error("block", Some(120), JsonRpcError::Call(object));
        assert_eq!(
            mapped.downcast_ref::<RpcError>(),
            Some(&RpcError::HeightUnavailable {
                method: "block",
                height: 120
            })
        );
    }
}
