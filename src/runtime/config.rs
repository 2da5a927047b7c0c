use crate::pipeline::QueueStorage;
use crate::rpc::options::DEFAULT_HTTP_BODY_LIMIT_BYTES;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_START_HEIGHT: u64 = 1;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RESTART_BACKOFF_INITIAL_MS: u64 = 500;
const DEFAULT_RESTART_BACKOFF_MAX_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCredentials {
    pub user: String,
    pub password: String,
}

/// How the indexer learns about new chain heights once it has caught up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipMode {
    /// Query the node's latest height on a fixed interval.
    Poll(Duration),
    /// Follow the source's height subscription.
    Push,
}

impl Default for TipMode {
    fn default() -> Self {
        TipMode::Poll(Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS))
    }
}

/// Delay between supervisor restarts: doubles per consecutive failure and is
/// capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RestartBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(DEFAULT_RESTART_BACKOFF_INITIAL_MS),
            max: Duration::from_secs(DEFAULT_RESTART_BACKOFF_MAX_SECS),
        }
    }
}

/// Runtime configuration for the indexer.
///
/// All instances must be constructed via [`IndexerConfig::builder`] or [`IndexerConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    rpc_url: String,
    rpc_credentials: Option<RpcCredentials>,
    batch_size: usize,
    tip_mode: TipMode,
    minimal: bool,
    genesis_path: Option<PathBuf>,
    log_level: String,
    start_height: u64,
    rpc_timeout: Duration,
    query_timeout: Duration,
    metrics_interval: Duration,
    queue_storage: QueueStorage,
    restart_backoff: RestartBackoff,
    max_consecutive_failures: Option<u32>,
    rpc_max_response_body_bytes: usize,
}

pub struct IndexerConfigParams {
    pub rpc_url: String,
    pub rpc_credentials: Option<RpcCredentials>,
    pub batch_size: usize,
    pub tip_mode: TipMode,
    pub minimal: bool,
    pub genesis_path: Option<PathBuf>,
    pub log_level: String,
    pub start_height: u64,
    pub rpc_timeout: Duration,
    pub query_timeout: Duration,
    pub metrics_interval: Duration,
    pub queue_storage: QueueStorage,
    pub restart_backoff: RestartBackoff,
    pub max_consecutive_failures: Option<u32>,
    pub rpc_max_response_body_bytes: usize,
}

impl IndexerConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: IndexerConfigParams) -> Result<Self> {
        let IndexerConfigParams {
            rpc_url,
            rpc_credentials,
            batch_size,
            tip_mode,
            minimal,
            genesis_path,
            log_level,
            start_height,
            rpc_timeout,
            query_timeout,
            metrics_interval,
            queue_storage,
            restart_backoff,
            max_consecutive_failures,
            rpc_max_response_body_bytes,
        } = params;

        let config = Self {
            rpc_url: rpc_url.trim().to_owned(),
            rpc_credentials: rpc_credentials.map(|credentials| RpcCredentials {
                user: credentials.user.trim().to_owned(),
                password: credentials.password.trim().to_owned(),
            }),
            batch_size,
            tip_mode,
            minimal,
            genesis_path,
            log_level: log_level.trim().to_owned(),
            start_height,
            rpc_timeout,
            query_timeout,
            metrics_interval,
            queue_storage,
            restart_backoff,
            max_consecutive_failures,
            rpc_max_response_body_bytes,
        };

        config.validate()?;
        Ok(config)
    }

    /// Full RPC URL (including scheme) of the CometBFT node.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn rpc_credentials(&self) -> Option<&RpcCredentials> {
        self.rpc_credentials.as_ref()
    }

    /// Heights allowed in flight ahead of the dispatch loop.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn tip_mode(&self) -> TipMode {
        self.tip_mode
    }

    /// Skip validator-set fetching.
    pub fn minimal(&self) -> bool {
        self.minimal
    }

    pub fn genesis_path(&self) -> Option<&PathBuf> {
        self.genesis_path.as_ref()
    }

    /// Fallback `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Chain height to start from when the store has no cursor yet.
    pub fn start_height(&self) -> u64 {
        self.start_height
    }

    /// Transport timeout applied to each JSON-RPC call.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Hard limit for direct chain queries and tip lookups.
    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn queue_storage(&self) -> QueueStorage {
        self.queue_storage
    }

    pub fn restart_backoff(&self) -> RestartBackoff {
        self.restart_backoff
    }

    /// Failures at the same height tolerated before the indexer gives up.
    /// `None` retries forever.
    pub fn max_consecutive_failures(&self) -> Option<u32> {
        self.max_consecutive_failures
    }

    pub fn rpc_max_response_body_bytes(&self) -> usize {
        self.rpc_max_response_body_bytes
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.rpc_url)?;

        if let Some(credentials) = &self.rpc_credentials {
            ensure_not_empty(&credentials.user, "rpc_user")?;
            ensure_not_empty(&credentials.password, "rpc_password")?;
        }

        if self.batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }

        if let TipMode::Poll(interval) = self.tip_mode {
            if interval.is_zero() {
                bail!("poll interval must be greater than 0");
            }
        }

        if let Some(path) = &self.genesis_path {
            if path.as_os_str().is_empty() {
                bail!("genesis_path cannot be empty");
            }
        }

        EnvFilter::try_new(&self.log_level)
            .with_context(|| format!("log_level {:?} is not a valid filter", self.log_level))?;

        if self.start_height == 0 {
            bail!("start_height must be greater than 0");
        }

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        if self.query_timeout.is_zero() {
            bail!("query_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.restart_backoff.initial.is_zero() {
            bail!("restart backoff must be greater than 0");
        }

        if self.restart_backoff.max < self.restart_backoff.initial {
            bail!("restart backoff cap must be at least the initial delay");
        }

        if self.max_consecutive_failures == Some(0) {
            bail!("max_consecutive_failures must be greater than 0");
        }

        if self.rpc_max_response_body_bytes == 0 {
            bail!("rpc_max_response_body_bytes must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct IndexerConfigBuilder {
    rpc_url: Option<String>,
    rpc_credentials: Option<RpcCredentials>,
    batch_size: Option<usize>,
    tip_mode: Option<TipMode>,
    minimal: bool,
    genesis_path: Option<PathBuf>,
    log_level: Option<String>,
    start_height: Option<u64>,
    rpc_timeout: Option<Duration>,
    query_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    queue_storage: Option<QueueStorage>,
    restart_backoff: Option<RestartBackoff>,
    max_consecutive_failures: Option<u32>,
    rpc_max_response_body_bytes: Option<usize>,
}

impl IndexerConfigBuilder {
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    pub fn rpc_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.rpc_credentials = Some(RpcCredentials {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.tip_mode = Some(TipMode::Poll(interval));
        self
    }

    pub fn push(mut self) -> Self {
        self.tip_mode = Some(TipMode::Push);
        self
    }

    pub fn minimal(mut self, minimal: bool) -> Self {
        self.minimal = minimal;
        self
    }

    pub fn genesis_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.genesis_path = Some(path.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn start_height(mut self, height: u64) -> Self {
        self.start_height = Some(height);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn queue_storage(mut self, storage: QueueStorage) -> Self {
        self.queue_storage = Some(storage);
        self
    }

    pub fn restart_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.restart_backoff = Some(RestartBackoff { initial, max });
        self
    }

    pub fn max_consecutive_failures(mut self, limit: u32) -> Self {
        self.max_consecutive_failures = Some(limit);
        self
    }

    pub fn rpc_max_response_body_bytes(mut self, bytes: usize) -> Self {
        self.rpc_max_response_body_bytes = Some(bytes);
        self
    }

    pub fn build(self) -> Result<IndexerConfig> {
        let params = IndexerConfigParams {
            rpc_url: self.rpc_url.context("rpc_url is required")?,
            rpc_credentials: self.rpc_credentials,
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            tip_mode: self.tip_mode.unwrap_or_default(),
            minimal: self.minimal,
            genesis_path: self.genesis_path,
            log_level: self
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            start_height: self.start_height.unwrap_or(DEFAULT_START_HEIGHT),
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            query_timeout: self
                .query_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            queue_storage: self.queue_storage.unwrap_or_default(),
            restart_backoff: self.restart_backoff.unwrap_or_default(),
            max_consecutive_failures: self.max_consecutive_failures,
            rpc_max_response_body_bytes: self
                .rpc_max_response_body_bytes
                .unwrap_or(DEFAULT_HTTP_BODY_LIMIT_BYTES),
        };

        IndexerConfig::new(params)
    }
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("rpc_url must start with http:// or https://");
    }
    Ok(())
}
