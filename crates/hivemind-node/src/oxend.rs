//! The Oxen daemon RPC client `SwarmTopology`/`BlockWatcher` poll for network state. Kept as a trait, mirroring `hivemind_network::transport`'s `SnodeConnector`, so
//! `BlockWatcher` and the coordinator's refresh path can be exercised against an in-memory fake
//! in tests without a real daemon; [`HttpOxendClient`] is the production JSON-RPC-over-HTTP
//! implementation.

use async_trait::async_trait;
use hivemind_network::RawNodeEntry;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OxendError>;

#[derive(Error, Debug)]
pub enum OxendError {
    #[error("oxend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("oxend returned an error: {0}")]
    Rpc(String),

    #[error("oxend reply did not match the expected shape: {0}")]
    Malformed(String),
}

/// Current chain head as reported by `get_info`.
#[derive(Clone, Debug)]
pub struct ChainInfo {
    pub height: u64,
    pub block_hash: String,
}

#[async_trait]
pub trait OxendClient: Send + Sync {
    async fn get_info(&self) -> Result<ChainInfo>;

    /// Fetches the current service-node list as `(x25519_pubkey, host, port, swarm_id)` tuples.
    /// `swarm_id == u64::MAX` ("no swarm") entries are passed through; the caller
    /// (`SwarmTopology::refresh`) is responsible for filtering them.
    async fn get_service_nodes(&self) -> Result<Vec<RawNodeEntry>>;
}

/// JSON-RPC-over-HTTP client for the real daemon.
pub struct HttpOxendClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpOxendClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), client: reqwest::Client::new() }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({ "jsonrpc": "2.0", "id": "0", "method": method, "params": params });
        let resp: JsonRpcReply = self
            .client
            .post(format!("{}/json_rpc", self.endpoint))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(err) = resp.error {
            return Err(OxendError::Rpc(err.message));
        }
        resp.result.ok_or_else(|| OxendError::Malformed(format!("{method} reply carried no result")))
    }
}

#[derive(Deserialize)]
struct JsonRpcReply {
    result: Option<Value>,
    error: Option<JsonRpcReplyError>,
}

#[derive(Deserialize)]
struct JsonRpcReplyError {
    message: String,
}

#[async_trait]
impl OxendClient for HttpOxendClient {
    async fn get_info(&self) -> Result<ChainInfo> {
        let result = self.call("get_info", json!({})).await?;
        let height = result.get("height").and_then(Value::as_u64).ok_or_else(|| OxendError::Malformed("missing height".into()))?;
        let block_hash = result
            .get("top_block_hash")
            .and_then(Value::as_str)
            .ok_or_else(|| OxendError::Malformed("missing top_block_hash".into()))?
            .to_string();
        Ok(ChainInfo { height, block_hash })
    }

    async fn get_service_nodes(&self) -> Result<Vec<RawNodeEntry>> {
        let result = self.call("get_service_nodes", json!({ "fields": { "pubkey_x25519": true, "service_node_pubkey": true, "public_ip": true, "storage_port": true, "swarm_id": true } })).await?;
        let entries = result
            .get("service_node_states")
            .and_then(Value::as_array)
            .ok_or_else(|| OxendError::Malformed("missing service_node_states".into()))?;

        entries.iter().map(parse_service_node).collect()
    }
}

fn parse_service_node(entry: &Value) -> Result<RawNodeEntry> {
    let pubkey_hex = entry
        .get("pubkey_x25519")
        .and_then(Value::as_str)
        .ok_or_else(|| OxendError::Malformed("service node entry missing pubkey_x25519".into()))?;
    let pubkey_bytes = hex::decode(pubkey_hex).map_err(|e| OxendError::Malformed(e.to_string()))?;
    let x25519_pubkey: [u8; 32] = pubkey_bytes
        .try_into()
        .map_err(|_| OxendError::Malformed("pubkey_x25519 was not 32 bytes".into()))?;

    let host = entry
        .get("public_ip")
        .and_then(Value::as_str)
        .ok_or_else(|| OxendError::Malformed("service node entry missing public_ip".into()))?
        .to_string();
    let port = entry.get("storage_port").and_then(Value::as_u64).unwrap_or(0) as u16;
    let swarm_id = entry.get("swarm_id").and_then(Value::as_u64).unwrap_or(u64::MAX);

    Ok(RawNodeEntry { x25519_pubkey, host, port, swarm_id })
}
