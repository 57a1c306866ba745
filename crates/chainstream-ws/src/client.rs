//! WebSocket JSON-RPC client with push routing and reconnect.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainstream_core::codec::decode_id;
use chainstream_core::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PubSubTransport, PushReceiver,
    RpcTransport, SubscriptionId, TransportError,
};

use crate::subscriptions::SubscriptionRouter;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply<T> = oneshot::Sender<Result<T, TransportError>>;

/// Configuration for the WebSocket client.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Reconnect backoff starting duration.
    pub reconnect_initial: Duration,
    /// Maximum reconnect backoff.
    pub reconnect_max: Duration,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Command sent from callers to the background WS task.
enum WsCommand {
    Send {
        req: JsonRpcRequest,
        tx: Reply<JsonRpcResponse>,
    },
    Subscribe {
        req: JsonRpcRequest,
        tx: Reply<(SubscriptionId, PushReceiver)>,
    },
    Close,
}

impl WsCommand {
    fn into_request(self) -> Option<(JsonRpcRequest, Pending)> {
        match self {
            Self::Send { req, tx } => Some((req, Pending::Call(tx))),
            Self::Subscribe { req, tx } => Some((req, Pending::Subscribe(tx))),
            Self::Close => None,
        }
    }
}

/// A request written to the socket and waiting for its response.
enum Pending {
    Call(Reply<JsonRpcResponse>),
    Subscribe(Reply<(SubscriptionId, PushReceiver)>),
}

impl Pending {
    fn fail(self, err: TransportError) {
        match self {
            Self::Call(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Subscribe(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }

    /// Hand the response to the caller. A subscribe response opens its push
    /// route here, before the socket task reads the next frame.
    fn complete(self, resp: JsonRpcResponse, router: &SubscriptionRouter) {
        match self {
            Self::Call(tx) => {
                let _ = tx.send(Ok(resp));
            }
            Self::Subscribe(tx) => {
                let opened = resp
                    .into_result()
                    .map_err(TransportError::Rpc)
                    .and_then(|raw| {
                        decode_id(raw).map_err(|e| {
                            TransportError::Other(format!("invalid subscription id: {e}"))
                        })
                    })
                    .map(|id| {
                        let id = SubscriptionId(id);
                        let rx = router.register(id.clone());
                        (id, rx)
                    });
                if let Err(Ok((id, _))) = tx.send(opened) {
                    tracing::debug!(subscription = %id, "subscriber gone before confirmation");
                    router.remove(&id);
                }
            }
        }
    }
}

/// Why a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    Closed,
    Lost,
}

/// WebSocket JSON-RPC client.
///
/// A background task owns the connection. Requests are correlated by id, so
/// any number of streams can share one client. When the connection drops,
/// in-flight requests fail with [`TransportError::WebSocket`], every push
/// channel is closed, and the task reconnects with capped exponential
/// backoff. Requests issued while disconnected fail immediately.
pub struct WsRpcClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    router: SubscriptionRouter,
}

impl WsRpcClient {
    /// Connect to `url` and start the background task.
    ///
    /// The first connection attempt is made here, so a bad URL or an
    /// unreachable node is reported to the caller.
    pub async fn connect(
        url: impl Into<String>,
        config: WsClientConfig,
    ) -> Result<Self, TransportError> {
        let url = url.into();
        tracing::info!(url = %url, "connecting via WebSocket");
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(format!("connect to {url} failed: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        let router = SubscriptionRouter::new();
        tokio::spawn(ws_task(url.clone(), socket, cmd_rx, router.clone(), config));

        Ok(Self { url, cmd_tx, router })
    }

    /// Number of subscriptions currently routed by this client.
    pub fn subscriptions(&self) -> usize {
        self.router.len()
    }

    async fn dispatch<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> WsCommand,
    ) -> Result<T, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(command(tx))
            .map_err(|_| TransportError::WebSocket("WS task closed".into()))?;
        rx.await
            .map_err(|_| TransportError::WebSocket("WS response dropped".into()))?
    }
}

impl Drop for WsRpcClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

impl std::fmt::Debug for WsRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRpcClient")
            .field("url", &self.url)
            .field("subscriptions", &self.router.len())
            .finish()
    }
}

#[async_trait]
impl RpcTransport for WsRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        self.dispatch(|tx| WsCommand::Send { req, tx }).await
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PubSubTransport for WsRpcClient {
    async fn subscribe(
        &self,
        req: JsonRpcRequest,
    ) -> Result<(SubscriptionId, PushReceiver), TransportError> {
        self.dispatch(|tx| WsCommand::Subscribe { req, tx }).await
    }

    fn release(&self, id: &SubscriptionId) {
        self.router.remove(id);
    }
}

/// Background task that owns the WebSocket connection.
async fn ws_task(
    url: String,
    socket: Socket,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    router: SubscriptionRouter,
    config: WsClientConfig,
) {
    let mut connected = Some(socket);
    let mut backoff = config.reconnect_initial;

    loop {
        let socket = match connected.take() {
            Some(socket) => socket,
            None => match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((socket, _)) => {
                    tracing::info!(url = %url, "WS reconnected");
                    socket
                }
                Err(e) => {
                    tracing::warn!(error = %e, url = %url, "WS connect failed, retrying in {backoff:?}");
                    if !reject_while_waiting(&mut cmd_rx, backoff).await {
                        return;
                    }
                    backoff = (backoff * 2).min(config.reconnect_max);
                    continue;
                }
            },
        };
        backoff = config.reconnect_initial;

        if run_session(socket, &mut cmd_rx, &router).await == Session::Closed {
            tracing::debug!(url = %url, "WS client closed");
            return;
        }

        tracing::warn!(url = %url, "WS disconnected, reconnecting in {backoff:?}");
        if !reject_while_waiting(&mut cmd_rx, backoff).await {
            return;
        }
        backoff = (backoff * 2).min(config.reconnect_max);
    }
}

/// Serve one connection until it drops or the client closes.
async fn run_session(
    socket: Socket,
    cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
    router: &SubscriptionRouter,
) -> Session {
    let (mut sink, mut stream) = socket.split();
    let mut pending: HashMap<u64, Pending> = HashMap::new();

    let outcome = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some((req, waiter)) = cmd.and_then(WsCommand::into_request) else {
                    let _ = sink.close().await;
                    break Session::Closed;
                };
                let Some(id) = req.id.as_number() else {
                    waiter.fail(TransportError::Other("WS requests need a numeric id".into()));
                    continue;
                };
                let text = match serde_json::to_string(&req) {
                    Ok(text) => text,
                    Err(e) => {
                        waiter.fail(e.into());
                        continue;
                    }
                };
                pending.insert(id, waiter);
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(error = %e, "WS send failed");
                    break Session::Lost;
                }
            }
            msg = stream.next() => match msg {
                None | Some(Ok(Message::Close(_))) => break Session::Lost,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WS receive error");
                    break Session::Lost;
                }
                Some(Ok(Message::Text(text))) => handle_message(&text, &mut pending, router),
                Some(Ok(_)) => {}
            }
        }
    };

    let reason = match outcome {
        Session::Closed => "client closed",
        Session::Lost => "connection lost",
    };
    for (_, waiter) in pending.drain() {
        waiter.fail(TransportError::WebSocket(reason.into()));
    }
    let closed = router.close_all();
    if closed > 0 {
        tracing::warn!(subscriptions = closed, reason, "closed push subscriptions");
    }
    outcome
}

/// Sleep for `delay`, failing every request that arrives meanwhile.
/// Returns `false` once the client is gone.
async fn reject_while_waiting(
    cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
    delay: Duration,
) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd.and_then(WsCommand::into_request) {
                None => return false,
                Some((_, waiter)) => waiter.fail(TransportError::WebSocket("not connected".into())),
            }
        }
    }
}

fn handle_message(text: &str, pending: &mut HashMap<u64, Pending>, router: &SubscriptionRouter) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("failed to parse WS message as JSON");
        return;
    };

    if val.get("method").is_some() {
        match serde_json::from_value::<JsonRpcNotification>(val) {
            Ok(note) if note.is_subscription() => {
                router.dispatch(&SubscriptionId(note.params.subscription), note.params.result);
            }
            Ok(note) => tracing::debug!(method = %note.method, "ignoring server message"),
            Err(e) => tracing::debug!(error = %e, "malformed notification"),
        }
        return;
    }

    let resp = match serde_json::from_value::<JsonRpcResponse>(val) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!(error = %e, "malformed response");
            return;
        }
    };
    let Some(id) = resp.id.as_number() else {
        tracing::debug!(id = %resp.id, "response without numeric id");
        return;
    };
    match pending.remove(&id) {
        Some(waiter) => waiter.complete(resp, router),
        None => tracing::debug!(id, "response for unknown request"),
    }
}
