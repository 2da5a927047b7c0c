//! Response shapes returned by the CometBFT JSON-RPC endpoints the indexer
//! consumes. CometBFT encodes 64-bit integers as strings, so numeric fields
//! accept either form on input.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

const MODE_ATTRIBUTE: &str = "mode";
const BEGIN_BLOCK_MODE: &str = "BeginBlock";
const END_BLOCK_MODE: &str = "EndBlock";

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString<T> {
    Number(T),
    String(String),
}

pub(crate) fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    match NumberOrString::<T>::deserialize(deserializer)? {
        NumberOrString::Number(value) => Ok(value),
        NumberOrString::String(raw) => raw.trim().parse().map_err(de::Error::custom),
    }
}

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default, deserialize_with = "null_default")]
    pub value: String,
    #[serde(default)]
    pub index: bool,
}

/// A typed ABCI event as emitted by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_default")]
    pub attributes: Vec<EventAttribute>,
}

impl AbciEvent {
    pub fn new<K, V>(kind: impl Into<String>, attributes: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind: kind.into(),
            attributes: attributes
                .into_iter()
                .map(|(key, value)| EventAttribute {
                    key: key.into(),
                    value: value.into(),
                    index: true,
                })
                .collect(),
        }
    }

    /// Value of the first attribute named `key`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.key == key)
            .map(|attr| attr.value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId {
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    #[serde(default)]
    pub chain_id: String,
    #[serde(deserialize_with = "number")]
    pub height: u64,
    /// RFC 3339 block time as reported by the node.
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub proposer_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    /// Base64-encoded raw transactions.
    #[serde(default, deserialize_with = "null_default")]
    pub txs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(default)]
    pub data: BlockData,
}

/// Result of the `block` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockResponse {
    #[serde(default)]
    pub block_id: BlockId,
    pub block: Block,
}

impl BlockResponse {
    pub fn height(&self) -> u64 {
        self.block.header.height
    }

    pub fn time(&self) -> &str {
        &self.block.header.time
    }

    pub fn txs(&self) -> &[String] {
        &self.block.data.txs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default, deserialize_with = "null_default")]
    pub codespace: String,
    #[serde(default, deserialize_with = "null_default")]
    pub log: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default, deserialize_with = "number")]
    pub gas_wanted: i64,
    #[serde(default, deserialize_with = "number")]
    pub gas_used: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub events: Vec<AbciEvent>,
}

impl TxResult {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Result of the `block_results` endpoint. Nodes before 0.38 report
/// begin/end block events separately; later nodes fold them into
/// `finalize_block_events` tagged with a `mode` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockResults {
    #[serde(deserialize_with = "number")]
    pub height: u64,
    #[serde(default, deserialize_with = "null_default")]
    pub txs_results: Vec<TxResult>,
    #[serde(default)]
    pub begin_block_events: Option<Vec<AbciEvent>>,
    #[serde(default)]
    pub end_block_events: Option<Vec<AbciEvent>>,
    #[serde(default)]
    pub finalize_block_events: Option<Vec<AbciEvent>>,
}

impl BlockResults {
    pub fn begin_events(&self) -> Vec<AbciEvent> {
        match &self.begin_block_events {
            Some(events) => events.clone(),
            None => self.finalize_events_in_mode(BEGIN_BLOCK_MODE),
        }
    }

    pub fn end_events(&self) -> Vec<AbciEvent> {
        match &self.end_block_events {
            Some(events) => events.clone(),
            None => self.finalize_events_in_mode(END_BLOCK_MODE),
        }
    }

    fn finalize_events_in_mode(&self, mode: &str) -> Vec<AbciEvent> {
        self.finalize_block_events
            .iter()
            .flatten()
            .filter(|event| event.attribute(MODE_ATTRIBUTE) == Some(mode))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKey {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: String,
    #[serde(default)]
    pub pub_key: PubKey,
    #[serde(deserialize_with = "number")]
    pub voting_power: i64,
    #[serde(default, deserialize_with = "number")]
    pub proposer_priority: i64,
}

/// One page of the `validators` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorsPage {
    #[serde(deserialize_with = "number")]
    pub block_height: u64,
    #[serde(default, deserialize_with = "null_default")]
    pub validators: Vec<Validator>,
    #[serde(default, deserialize_with = "number")]
    pub count: u64,
    #[serde(default, deserialize_with = "number")]
    pub total: u64,
}

/// The full active validator set at a height, assembled from every page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub block_height: u64,
    pub validators: Vec<Validator>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInfo {
    #[serde(deserialize_with = "number")]
    pub latest_block_height: u64,
    #[serde(default)]
    pub latest_block_time: String,
    #[serde(default)]
    pub catching_up: bool,
}

/// Result of the `status` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub node_info: NodeInfo,
    pub sync_info: SyncInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciQueryResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default, deserialize_with = "null_default")]
    pub log: String,
    #[serde(default, deserialize_with = "null_default")]
    pub codespace: String,
    /// Base64-encoded response bytes.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "number")]
    pub height: u64,
}

/// Result of the `abci_query` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciQueryResponse {
    pub response: AbciQueryResult,
}
