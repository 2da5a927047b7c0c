//! Chain access: the `ChainSource` seam, the CometBFT JSON-RPC client with
//! its retry policy, metrics and auth, response types, and transaction
//! decoding.

pub mod auth;
pub mod client;
pub mod metrics;
pub mod options;
pub mod retry;
pub mod source;
pub mod tx;
pub mod types;

pub use client::{AsyncRpcClient, RpcError};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
pub use source::ChainSource;
pub use tx::{decode_tx, DecodedTx};
pub use types::{AbciEvent, BlockResponse, BlockResults, TxResult, ValidatorSet};
