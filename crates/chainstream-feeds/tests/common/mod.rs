//! In-process fixture node shared by the integration tests.
//!
//! Serves a synthetic chain (block `n` carries one transaction), answers the
//! filter and log methods, routes push subscriptions, and records every call
//! so tests can assert on exactly what reached the node.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chainstream_core::types::quantity;
use chainstream_core::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, PubSubTransport, PushReceiver, RpcClient, RpcTransport,
    SubscriptionId, TransportError,
};
use chainstream_feeds::{StreamConfig, StreamError, StreamHandle, StreamItem};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

pub const CONTRACT: &str = "0x00000000000000000000000000000000000000c0";

pub fn block_hash(n: u64) -> String {
    format!("0x{:064x}", 0xb000_0000_u64 + n)
}

pub fn tx_hash(n: u64) -> String {
    format!("0x{:064x}", 0x7000_0000_u64 + n)
}

pub fn tx_json(n: u64) -> Value {
    json!({
        "hash": tx_hash(n),
        "nonce": quantity::to_hex(n),
        "blockHash": block_hash(n),
        "blockNumber": quantity::to_hex(n),
        "transactionIndex": "0x0",
        "from": "0x0000000000000000000000000000000000000001",
        "to": "0x0000000000000000000000000000000000000002",
        "value": "0x1",
        "input": "0x"
    })
}

pub fn block_json(n: u64, full: bool) -> Value {
    let transactions = if full { json!([tx_json(n)]) } else { json!([tx_hash(n)]) };
    json!({
        "number": quantity::to_hex(n),
        "hash": block_hash(n),
        "parentHash": block_hash(n.saturating_sub(1)),
        "timestamp": quantity::to_hex(1_700_000_000 + n * 12),
        "transactions": transactions
    })
}

pub fn log_json(n: u64, address: &str, removed: bool) -> Value {
    json!({
        "address": address,
        "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
        "data": "0x",
        "blockNumber": quantity::to_hex(n),
        "blockHash": block_hash(n),
        "transactionHash": tx_hash(n),
        "transactionIndex": "0x0",
        "logIndex": "0x0",
        "removed": removed
    })
}

pub fn test_config() -> StreamConfig {
    StreamConfig::default().with_poll_interval(Duration::from_millis(10))
}

/// How a scripted call fails.
#[derive(Debug, Clone)]
pub enum Failure {
    Timeout,
    /// Non-2xx HTTP status from the endpoint.
    Status(u16),
    Rpc(i64, &'static str),
}

/// Parks the first call of one method until released.
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

struct HeldMethod {
    method: String,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

enum Filter {
    Blocks(Vec<Value>),
    Pending(Vec<Value>),
    Logs { addresses: Vec<String>, queue: Vec<Value> },
}

impl Filter {
    fn drain(&mut self) -> Vec<Value> {
        match self {
            Self::Blocks(q) | Self::Pending(q) | Self::Logs { queue: q, .. } => std::mem::take(q),
        }
    }
}

struct Subscription {
    kind: String,
    sender: mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
struct State {
    head: u64,
    pruned: HashSet<u64>,
    logs: Vec<Value>,
    pending_txs: HashMap<String, Value>,
    filters: HashMap<String, Filter>,
    subscriptions: HashMap<String, Subscription>,
    released: Vec<String>,
    next_id: u64,
    calls: Vec<(String, Vec<Value>)>,
    failures: HashMap<String, VecDeque<Failure>>,
}

pub struct FixtureNode {
    state: Mutex<State>,
    held: Mutex<Option<HeldMethod>>,
}

impl FixtureNode {
    /// A chain with blocks `0..=head`.
    pub fn new(head: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State { head, next_id: 1, ..State::default() }),
            held: Mutex::new(None),
        })
    }

    /// Client without push support: every live feed polls filters.
    pub fn client(self: &Arc<Self>) -> RpcClient {
        RpcClient::new(self.clone())
    }

    /// Client with push support.
    pub fn push_client(self: &Arc<Self>) -> RpcClient {
        RpcClient::with_pubsub(self.clone())
    }

    pub fn head(&self) -> u64 {
        self.state.lock().unwrap().head
    }

    /// Add a log to block `n`. Logs above the head surface when mined.
    pub fn add_log(&self, n: u64, address: &str) {
        self.state.lock().unwrap().logs.push(log_json(n, address, false));
    }

    /// Extend the chain by one block and feed block filters and log filters.
    pub fn mine(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.head += 1;
        let n = state.head;
        let logs: Vec<Value> = state
            .logs
            .iter()
            .filter(|l| l["blockNumber"] == quantity::to_hex(n))
            .cloned()
            .collect();
        for filter in state.filters.values_mut() {
            match filter {
                Filter::Blocks(queue) => queue.push(json!(block_hash(n))),
                Filter::Logs { addresses, queue } => queue.extend(
                    logs.iter()
                        .filter(|l| matches_address(addresses, l))
                        .cloned(),
                ),
                Filter::Pending(_) => {}
            }
        }
        n
    }

    /// Retract a previously delivered log, as after a re-org.
    pub fn retract_log(&self, n: u64, address: &str) {
        let mut state = self.state.lock().unwrap();
        let removed = log_json(n, address, true);
        for filter in state.filters.values_mut() {
            if let Filter::Logs { addresses, queue } = filter {
                if matches_address(addresses, &removed) {
                    queue.push(removed.clone());
                }
            }
        }
        for sub in state.subscriptions.values().filter(|s| s.kind == "logs") {
            let _ = sub.sender.send(removed.clone());
        }
    }

    /// Announce a mempool transaction. `known` controls whether a later
    /// `getTransactionByHash` finds it.
    pub fn add_pending(&self, hash: &str, known: bool) {
        let mut state = self.state.lock().unwrap();
        if known {
            let mut tx = tx_json(0);
            tx["hash"] = json!(hash);
            tx["blockHash"] = Value::Null;
            tx["blockNumber"] = Value::Null;
            tx["transactionIndex"] = Value::Null;
            state.pending_txs.insert(hash.to_string(), tx);
        }
        for filter in state.filters.values_mut() {
            if let Filter::Pending(queue) = filter {
                queue.push(json!(hash));
            }
        }
    }

    pub fn prune(&self, n: u64) {
        self.state.lock().unwrap().pruned.insert(n);
    }

    /// Forget every installed filter, as a node does after its timeout.
    pub fn expire_filters(&self) {
        self.state.lock().unwrap().filters.clear();
    }

    pub fn fail_next(&self, method: &str, failure: Failure) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(method.to_string())
            .or_default()
            .push_back(failure);
    }

    /// Park the next call of `method` until `gate.release` is notified.
    pub fn hold(&self, method: &str) -> Gate {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.held.lock().unwrap() = Some(HeldMethod {
            method: method.to_string(),
            entered: entered.clone(),
            release: release.clone(),
        });
        Gate { entered, release }
    }

    /// Push `value` to every subscription of `kind`.
    pub fn notify(&self, kind: &str, value: Value) {
        let state = self.state.lock().unwrap();
        for sub in state.subscriptions.values().filter(|s| s.kind == kind) {
            let _ = sub.sender.send(value.clone());
        }
    }

    /// Drop every push channel, as a transport does on disconnect.
    pub fn drop_subscriptions(&self) {
        self.state.lock().unwrap().subscriptions.clear();
    }

    pub fn subscriptions(&self) -> usize {
        self.state.lock().unwrap().subscriptions.len()
    }

    pub fn released(&self) -> Vec<String> {
        self.state.lock().unwrap().released.clone()
    }

    pub fn filters(&self) -> usize {
        self.state.lock().unwrap().filters.len()
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|(m, _)| m == method).count()
    }

    pub fn params_of(&self, method: &str) -> Vec<Vec<Value>> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn take_held(&self, method: &str) -> Option<HeldMethod> {
        let mut held = self.held.lock().unwrap();
        if held.as_ref().is_some_and(|h| h.method == method) {
            held.take()
        } else {
            None
        }
    }
}

fn matches_address(addresses: &[String], log: &Value) -> bool {
    addresses.is_empty()
        || log["address"]
            .as_str()
            .is_some_and(|a| addresses.iter().any(|x| x.eq_ignore_ascii_case(a)))
}

fn rpc_error(code: i64, message: impl Into<String>) -> JsonRpcError {
    JsonRpcError { code, message: message.into(), data: None }
}

fn param_str(params: &[Value], i: usize) -> String {
    params.get(i).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn addresses_of(filter: &Value) -> Vec<String> {
    match &filter["address"] {
        Value::String(a) => vec![a.clone()],
        Value::Array(list) => list.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => vec![],
    }
}

impl State {
    fn resolve(&self, tag: &Value) -> Result<u64, JsonRpcError> {
        match tag.as_str() {
            Some("latest") | Some("pending") => Ok(self.head),
            Some("earliest") => Ok(0),
            Some(hex) => quantity::parse(hex).map_err(|e| rpc_error(-32602, e)),
            None => Err(rpc_error(-32602, "missing block parameter")),
        }
    }

    fn block(&self, n: u64, full: bool) -> Value {
        if n > self.head || self.pruned.contains(&n) {
            Value::Null
        } else {
            block_json(n, full)
        }
    }

    fn install(&mut self, filter: Filter) -> Value {
        let id = format!("0x{:x}", self.next_id);
        self.next_id += 1;
        self.filters.insert(id.clone(), filter);
        json!(id)
    }

    fn handle(&mut self, method: &str, params: &[Value]) -> Result<Value, JsonRpcError> {
        match method {
            "eth_blockNumber" => Ok(json!(quantity::to_hex(self.head))),
            "eth_getBlockByNumber" => {
                let n = self.resolve(params.first().unwrap_or(&Value::Null))?;
                let full = params.get(1).and_then(Value::as_bool).unwrap_or(false);
                Ok(self.block(n, full))
            }
            "eth_getBlockByHash" => {
                let hash = param_str(params, 0);
                let full = params.get(1).and_then(Value::as_bool).unwrap_or(false);
                Ok((0..=self.head)
                    .find(|n| block_hash(*n) == hash)
                    .map_or(Value::Null, |n| self.block(n, full)))
            }
            "eth_getTransactionByHash" => {
                Ok(self.pending_txs.get(&param_str(params, 0)).cloned().unwrap_or(Value::Null))
            }
            "eth_getLogs" => {
                let filter = params.first().cloned().unwrap_or(Value::Null);
                let from = self.resolve(&filter["fromBlock"])?;
                let to = self.resolve(&filter["toBlock"])?;
                let addresses = addresses_of(&filter);
                let logs = self
                    .logs
                    .iter()
                    .filter(|l| {
                        let n = quantity::parse(l["blockNumber"].as_str().unwrap_or("0x0")).unwrap_or(0);
                        n >= from && n <= to && n <= self.head && matches_address(&addresses, l)
                    })
                    .cloned()
                    .collect();
                Ok(Value::Array(logs))
            }
            "eth_newFilter" => {
                let filter = params.first().cloned().unwrap_or(Value::Null);
                Ok(self.install(Filter::Logs {
                    addresses: addresses_of(&filter),
                    queue: vec![],
                }))
            }
            "eth_newBlockFilter" => Ok(self.install(Filter::Blocks(vec![]))),
            "eth_newPendingTransactionFilter" => Ok(self.install(Filter::Pending(vec![]))),
            "eth_getFilterChanges" => match self.filters.get_mut(&param_str(params, 0)) {
                Some(filter) => Ok(Value::Array(filter.drain())),
                None => Err(rpc_error(-32000, "filter not found")),
            },
            "eth_uninstallFilter" => Ok(json!(self.filters.remove(&param_str(params, 0)).is_some())),
            "eth_unsubscribe" => Ok(json!(self.subscriptions.remove(&param_str(params, 0)).is_some())),
            other => Err(rpc_error(-32601, format!("the method {other} does not exist/is not available"))),
        }
    }

    /// Record the call and pop a scripted failure, if any.
    fn enter(&mut self, req: &JsonRpcRequest) -> Option<Failure> {
        self.calls.push((req.method.clone(), req.params.clone()));
        self.failures.get_mut(&req.method).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl RpcTransport for FixtureNode {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        if let Some(held) = self.take_held(&req.method) {
            held.entered.notify_one();
            held.release.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        match state.enter(&req) {
            Some(Failure::Timeout) => return Err(TransportError::Timeout { ms: 10 }),
            Some(Failure::Status(status)) => {
                return Err(TransportError::HttpStatus {
                    status,
                    body: String::new(),
                })
            }
            Some(Failure::Rpc(code, message)) => {
                return Ok(JsonRpcResponse::failure(req.id, rpc_error(code, message)))
            }
            None => {}
        }
        Ok(match state.handle(&req.method, &req.params) {
            Ok(result) => JsonRpcResponse::success(req.id, result),
            Err(error) => JsonRpcResponse::failure(req.id, error),
        })
    }

    fn url(&self) -> &str {
        "fixture://node"
    }
}

#[async_trait]
impl PubSubTransport for FixtureNode {
    async fn subscribe(&self, req: JsonRpcRequest) -> Result<(SubscriptionId, PushReceiver), TransportError> {
        let mut state = self.state.lock().unwrap();
        match state.enter(&req) {
            Some(Failure::Timeout) => return Err(TransportError::Timeout { ms: 10 }),
            Some(Failure::Status(status)) => {
                return Err(TransportError::HttpStatus {
                    status,
                    body: String::new(),
                })
            }
            Some(Failure::Rpc(code, message)) => return Err(TransportError::Rpc(rpc_error(code, message))),
            None => {}
        }
        let id = format!("0xs{:x}", state.next_id);
        state.next_id += 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscriptions.insert(
            id.clone(),
            Subscription {
                kind: param_str(&req.params, 0),
                sender,
            },
        );
        Ok((SubscriptionId(id), receiver))
    }

    fn release(&self, id: &SubscriptionId) {
        self.state.lock().unwrap().released.push(id.0.clone());
    }
}

// ─── Stream helpers ───────────────────────────────────────────────────────────

/// Next delivery, failing the test if nothing arrives within two seconds.
pub async fn next<T: chainstream_core::ChainItem>(
    handle: &mut StreamHandle<T>,
) -> Option<Result<StreamItem<T>, StreamError>> {
    tokio::time::timeout(Duration::from_secs(2), handle.next())
        .await
        .expect("stream stalled")
}

/// Next delivery, which must be `Data`.
pub async fn next_data<T: chainstream_core::ChainItem + std::fmt::Debug>(handle: &mut StreamHandle<T>) -> T {
    match next(handle).await {
        Some(Ok(StreamItem::Data(item))) => item,
        other => panic!("expected data, got {other:?}"),
    }
}

/// Assert nothing is delivered for a few poll intervals.
pub async fn assert_quiet<T: chainstream_core::ChainItem + std::fmt::Debug>(handle: &mut StreamHandle<T>) {
    if let Ok(item) = tokio::time::timeout(Duration::from_millis(80), handle.next()).await {
        panic!("expected no delivery, got {item:?}");
    }
}

/// Wait until `condition` holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
