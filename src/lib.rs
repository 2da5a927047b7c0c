pub mod bus;
pub mod genesis;
pub mod pipeline;
pub mod processor;
pub mod rpc;
pub mod runtime;

pub use bus::{
    handler_fn, Ack, AckStatus, BusError, Envelope, EventBus, EventHandler, EventPayload,
    MessagePayload, TxEventsPayload, TxMemoPayload,
};
pub use genesis::{GenesisImportError, GenesisImporter, GenesisSummary};
pub use pipeline::{HeightData, PipelineQueue, QueueStorage, RingBuffer};
pub use processor::{ChainQuery, Indexer, MessageDecoders};
pub use rpc::{AsyncRpcClient, ChainSource, RpcClientOptions, RpcError, RpcMetricsSnapshot};
pub use runtime::config::{
    IndexerConfig, IndexerConfigBuilder, IndexerConfigParams, RestartBackoff, RpcCredentials,
    TipMode,
};
pub use runtime::health::{HealthState, HealthStatus};
pub use runtime::runner::Runner;
pub use runtime::storage::{IndexerStore, MemoryStore, StoreCall, TxScope};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
