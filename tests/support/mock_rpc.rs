use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const CHAIN_ID: &str = "mock-1";

/// Transactions and their execution results at one height.
#[derive(Clone, Default)]
struct HeightFixture {
    txs: Vec<String>,
    results: Vec<Value>,
}

struct MockChainInner {
    heights: HashMap<u64, HeightFixture>,
    queries: HashMap<String, Vec<u8>>,
    failing: HashSet<(String, u64)>,
    validators: usize,
}

/// A CometBFT node that serves empty blocks up to its tip unless a height was
/// given explicit transactions.
#[derive(Clone)]
pub struct MockChain {
    inner: Arc<RwLock<MockChainInner>>,
    tip: Arc<AtomicU64>,
    requests: Arc<AtomicU64>,
}

impl MockChain {
    pub fn new(tip: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MockChainInner {
                heights: HashMap::new(),
                queries: HashMap::new(),
                failing: HashSet::new(),
                validators: 3,
            })),
            tip: Arc::new(AtomicU64::new(tip)),
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn tip(&self) -> u64 {
        self.tip.load(Ordering::SeqCst)
    }

    pub fn set_tip(&self, tip: u64) {
        self.tip.store(tip, Ordering::SeqCst);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Places `txs` at `height` with one `txs_results` entry per transaction.
    pub fn set_txs(&self, height: u64, txs: Vec<String>, results: Vec<Value>) {
        self.inner
            .write()
            .expect("mock chain lock poisoned")
            .heights
            .insert(height, HeightFixture { txs, results });
    }

    pub fn set_query(&self, path: &str, value: &[u8]) {
        self.inner
            .write()
            .expect("mock chain lock poisoned")
            .queries
            .insert(path.to_string(), value.to_vec());
    }

    pub fn set_validator_count(&self, count: usize) {
        self.inner.write().expect("mock chain lock poisoned").validators = count;
    }

    /// The next `method` call for `height` answers with an internal error.
    pub fn fail_once(&self, method: &str, height: u64) {
        self.inner
            .write()
            .expect("mock chain lock poisoned")
            .failing
            .insert((method.to_string(), height));
    }

    fn take_failure(&self, method: &str, height: u64) -> bool {
        self.inner
            .write()
            .expect("mock chain lock poisoned")
            .failing
            .remove(&(method.to_string(), height))
    }

    fn fixture(&self, height: u64) -> HeightFixture {
        self.inner
            .read()
            .expect("mock chain lock poisoned")
            .heights
            .get(&height)
            .cloned()
            .unwrap_or_default()
    }

    fn status(&self) -> Value {
        json!({
            "node_info": {"network": CHAIN_ID, "version": "0.38.0"},
            "sync_info": {
                "latest_block_height": self.tip().to_string(),
                "latest_block_time": block_time(self.tip()),
                "catching_up": false,
            },
        })
    }

    fn block(&self, height: u64) -> Value {
        let fixture = self.fixture(height);
        json!({
            "block_id": {"hash": format!("{height:064X}")},
            "block": {
                "header": {
                    "chain_id": CHAIN_ID,
                    "height": height.to_string(),
                    "time": block_time(height),
                    "proposer_address": "AA",
                },
                "data": {"txs": fixture.txs},
            },
        })
    }

    fn block_results(&self, height: u64) -> Value {
        let fixture = self.fixture(height);
        json!({
            "height": height.to_string(),
            "txs_results": fixture.results,
            "finalize_block_events": [
                {
                    "type": "mint",
                    "attributes": [
                        {"key": "amount", "value": "10", "index": true},
                        {"key": "mode", "value": "BeginBlock", "index": true},
                    ],
                },
                {
                    "type": "complete_unbonding",
                    "attributes": [{"key": "mode", "value": "EndBlock", "index": true}],
                },
            ],
        })
    }

    fn validators(&self, height: u64, page: usize, per_page: usize) -> Value {
        let total = self.inner.read().expect("mock chain lock poisoned").validators;
        let per_page = per_page.max(1);
        let first = page.saturating_sub(1).saturating_mul(per_page);
        let validators: Vec<Value> = (first..total.min(first + per_page))
            .map(|index| {
                json!({
                    "address": format!("{index:040X}"),
                    "pub_key": {"type": "tendermint/PubKeyEd25519", "value": ""},
                    "voting_power": "100",
                    "proposer_priority": "0",
                })
            })
            .collect();
        json!({
            "block_height": height.to_string(),
            "count": validators.len().to_string(),
            "total": total.to_string(),
            "validators": validators,
        })
    }

    fn abci_query(&self, path: &str) -> Value {
        let inner = self.inner.read().expect("mock chain lock poisoned");
        let response = match inner.queries.get(path) {
            Some(value) => json!({
                "code": 0,
                "log": "",
                "value": BASE64_STANDARD.encode(value),
                "height": self.tip().to_string(),
            }),
            None => json!({
                "code": 6,
                "log": format!("unknown query path {path}"),
                "codespace": "sdk",
                "value": null,
                "height": "0",
            }),
        };
        json!({ "response": response })
    }
}

fn block_time(height: u64) -> String {
    format!("2024-01-01T00:{:02}:{:02}Z", (height / 60) % 60, height % 60)
}

/// A successful `txs_results` entry with one message-scoped event.
pub fn ok_result(msg_type: &str) -> Value {
    json!({
        "code": 0,
        "log": "",
        "gas_wanted": "200000",
        "gas_used": "51234",
        "events": [
            {
                "type": "message",
                "attributes": [
                    {"key": "action", "value": msg_type, "index": true},
                    {"key": "msg_index", "value": "0", "index": true},
                ],
            },
        ],
    })
}

pub fn failed_result(code: u32) -> Value {
    json!({
        "code": code,
        "codespace": "sdk",
        "log": "insufficient funds",
        "gas_wanted": "200000",
        "gas_used": "30000",
        "events": null,
    })
}

pub struct MockRpcServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockRpcServer {
    pub async fn start(chain: MockChain) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock RPC listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let chain = chain.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(chain.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock RPC server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(chain: MockChain, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response_value = match payload {
        Value::Array(calls) => Value::Array(
            calls
                .into_iter()
                .map(|call| handle_call(&chain, call))
                .collect(),
        ),
        call => handle_call(&chain, call),
    };

    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(chain: &MockChain, call: Value) -> Value {
    chain.requests.fetch_add(1, Ordering::SeqCst);
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call.get("params").cloned().unwrap_or(Value::Null);

    if method == "status" {
        return success(id, chain.status());
    }
    if method == "abci_query" {
        let path = params.get("path").and_then(Value::as_str).unwrap_or_default();
        return success(id, chain.abci_query(path));
    }

    let Some(height) = numeric_param(&params, "height") else {
        return error(id, -32602, "height parameter is required");
    };
    let tip = chain.tip();
    if height > tip {
        return error_with_data(
            id,
            -32603,
            "Internal error",
            format!(
                "height {height} must be less than or equal to the current blockchain height {tip}"
            ),
        );
    }
    if chain.take_failure(&method, height) {
        return error(id, -32603, format!("injected {method} failure at {height}"));
    }

    match method.as_str() {
        "block" => success(id, chain.block(height)),
        "block_results" => success(id, chain.block_results(height)),
        "validators" => {
            let page = numeric_param(&params, "page").unwrap_or(1) as usize;
            let per_page = numeric_param(&params, "per_page").unwrap_or(30) as usize;
            success(id, chain.validators(height, page, per_page))
        }
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

fn numeric_param(params: &Value, key: &str) -> Option<u64> {
    match params.get(key)? {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => raw.parse().ok(),
        _ => None,
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}

fn error_with_data(id: Value, code: i64, message: &str, data: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message,
            "data": data,
        },
        "id": id,
    })
}
