//! Cosmos SDK transaction decoding. Only the pieces the indexer needs are
//! modelled: the raw envelope, the body with its `Any` messages and memo, and
//! the authz exec wrapper.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use prost::Message;
use prost_types::Any;
use sha2::{Digest, Sha256};

pub const MSG_EXEC_TYPE_URL: &str = "/cosmos.authz.v1beta1.MsgExec";

/// Wire envelope of a signed transaction. `Tx` and `TxRaw` share field 1 as
/// length-delimited body bytes, so both encodings decode through this type.
#[derive(Clone, PartialEq, Message)]
pub struct TxRaw {
    #[prost(bytes = "vec", tag = "1")]
    pub body_bytes: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub auth_info_bytes: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub signatures: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TxBody {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<Any>,
    #[prost(string, tag = "2")]
    pub memo: String,
    #[prost(uint64, tag = "3")]
    pub timeout_height: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct MsgExec {
    #[prost(string, tag = "1")]
    pub grantee: String,
    #[prost(message, repeated, tag = "2")]
    pub msgs: Vec<Any>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTx {
    /// Uppercase hex SHA-256 of the raw transaction bytes.
    pub hash: String,
    pub memo: String,
    pub messages: Vec<Any>,
}

pub fn tx_hash(raw: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(raw))
}

/// Hash of a base64 transaction without decoding its body.
pub fn encoded_tx_hash(encoded: &str) -> Result<String> {
    Ok(tx_hash(&decode_base64(encoded)?))
}

/// Decodes a base64 transaction as carried in `block.data.txs`.
pub fn decode_tx(encoded: &str) -> Result<DecodedTx> {
    let raw = decode_base64(encoded)?;
    let envelope = TxRaw::decode(raw.as_slice()).context("failed to decode tx envelope")?;
    let body = TxBody::decode(envelope.body_bytes.as_slice()).context("failed to decode tx body")?;

    Ok(DecodedTx {
        hash: tx_hash(&raw),
        memo: body.memo,
        messages: body.messages,
    })
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD
        .decode(encoded.trim())
        .context("transaction is not valid base64")
}

/// Returns the inner messages when `message` is an authz exec wrapper.
pub fn unwrap_exec(message: &Any) -> Result<Option<Vec<Any>>> {
    if message.type_url != MSG_EXEC_TYPE_URL {
        return Ok(None);
    }
    let exec = MsgExec::decode(message.value.as_slice()).context("failed to decode MsgExec")?;
    Ok(Some(exec.msgs))
}

/// Encodes a body into the base64 form nodes return. Used to build fixtures.
pub fn encode_tx(body: &TxBody) -> String {
    let envelope = TxRaw {
        body_bytes: body.encode_to_vec(),
        auth_info_bytes: Vec::new(),
        signatures: vec![vec![0u8; 64]],
    };
    BASE64_STANDARD.encode(envelope.encode_to_vec())
}
