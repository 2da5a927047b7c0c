use std::env;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use cosmoblock::bus::topics;
use cosmoblock::{
    handler_fn, Envelope, EventBus, Indexer, IndexerConfig, IndexerConfigBuilder, MemoryStore,
    Runner,
};

const DEFAULT_RPC_URL: &str = "http://localhost:26657";
const DEFAULT_START_HEIGHT: u64 = 1;
const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_LOG_DIRECTIVE: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    let args = ExampleArgs::from_env()?;
    let config = args.to_config()?;
    cosmoblock::init_tracing(config.log_level());

    let stats = Arc::new(RunStats::default());
    let bus = EventBus::new();
    register_listeners(&bus, stats.clone());

    let store = Arc::new(MemoryStore::new());
    let indexer = Indexer::new(config, store.clone(), bus)?;
    let mut runner = Runner::new(indexer);

    let started = Instant::now();
    let result = runner.run_until_ctrl_c().await;

    let seconds = started.elapsed().as_secs_f64();
    let heights = stats.heights.load(Ordering::Relaxed);
    let rate = if seconds > 0.0 {
        heights as f64 / seconds
    } else {
        0.0
    };
    println!(
        "Indexed {heights} heights ({} txs) in {seconds:.2}s [{rate:.2} heights/s]; next height {}",
        stats.txs.load(Ordering::Relaxed),
        store
            .cursor()
            .map(|height| height.to_string())
            .unwrap_or_else(|| "<none>".to_owned()),
    );

    result
}

#[derive(Default)]
struct RunStats {
    heights: AtomicU64,
    txs: AtomicU64,
}

fn register_listeners(bus: &EventBus, stats: Arc<RunStats>) {
    let block_stats = stats.clone();
    bus.on(
        topics::BLOCK,
        handler_fn(move |envelope: Arc<Envelope>| {
            block_stats.heights.fetch_add(1, Ordering::Relaxed);
            if let Some(data) = envelope.payload.as_block() {
                tracing::debug!(
                    height = data.height(),
                    txs = data.txs().len(),
                    time = envelope.timestamp.as_deref().unwrap_or_default(),
                    "block"
                );
            }
            async { Ok(()) }
        }),
    );

    bus.on(
        topics::TX_EVENTS,
        handler_fn(move |envelope: Arc<Envelope>| {
            stats.txs.fetch_add(1, Ordering::Relaxed);
            if let Some(tx) = envelope.payload.as_tx_events() {
                if !tx.result.is_success() {
                    tracing::debug!(
                        height = envelope.height,
                        tx_hash = %tx.tx_hash,
                        code = tx.result.code,
                        "failed transaction"
                    );
                }
            }
            async { Ok(()) }
        }),
    );

    bus.on(
        topics::periodic(1000),
        handler_fn(|envelope: Arc<Envelope>| async move {
            tracing::info!(height = envelope.height, "checkpoint");
            Ok(())
        }),
    );
}

struct ExampleArgs {
    rpc_url: String,
    rpc_user: Option<String>,
    rpc_password: Option<String>,
    start_height: u64,
    batch_size: usize,
    minimal: bool,
    genesis_path: Option<String>,
    log_level: String,
}

impl ExampleArgs {
    fn from_env() -> Result<Self> {
        Ok(Self {
            rpc_url: read_env_or_default("COSMOBLOCK_RPC_URL", DEFAULT_RPC_URL),
            rpc_user: read_optional_env("COSMOBLOCK_RPC_USER"),
            rpc_password: read_optional_env("COSMOBLOCK_RPC_PASSWORD"),
            start_height: parse_env_with_default("COSMOBLOCK_START_HEIGHT", DEFAULT_START_HEIGHT)?,
            batch_size: parse_env_with_default("COSMOBLOCK_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            minimal: parse_env_with_default("COSMOBLOCK_MINIMAL", true)?,
            genesis_path: read_optional_env("COSMOBLOCK_GENESIS_PATH"),
            log_level: read_env_or_default("COSMOBLOCK_LOG_LEVEL", DEFAULT_LOG_DIRECTIVE),
        })
    }

    fn to_config(&self) -> Result<IndexerConfig> {
        let mut builder: IndexerConfigBuilder = IndexerConfig::builder()
            .rpc_url(&self.rpc_url)
            .start_height(self.start_height)
            .batch_size(self.batch_size)
            .minimal(self.minimal)
            .log_level(&self.log_level);
        if let (Some(user), Some(password)) = (&self.rpc_user, &self.rpc_password) {
            builder = builder.rpc_credentials(user, password);
        }
        if let Some(path) = &self.genesis_path {
            builder = builder.genesis_path(path);
        }
        builder.build()
    }
}

fn read_env_or_default(key: &str, default: &str) -> String {
    read_optional_env(key).unwrap_or_else(|| default.to_string())
}

fn read_optional_env(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}
