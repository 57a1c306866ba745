//! Transport traits: the seam between the feeds and the wire.
//!
//! Every transport answers single requests ([`RpcTransport`]). Transports
//! that keep a connection open can additionally route server pushes
//! ([`PubSubTransport`]).

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// A subscription id returned by `<ns>_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pushed results for one subscription, in delivery order.
pub type PushReceiver = mpsc::UnboundedReceiver<Value>;

/// The central async trait every RPC transport implements.
///
/// Implementations must correlate responses with requests by
/// [`JsonRpcRequest::id`] so that many streams can share one transport.
/// The trait is object-safe and is stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single JSON-RPC request and return the response.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Return the transport's identifier (URL or name).
    fn url(&self) -> &str;
}

/// A transport that can deliver server-initiated pushes.
#[async_trait]
pub trait PubSubTransport: RpcTransport {
    /// Send a subscribe request and start routing its pushes.
    ///
    /// The push channel must be registered before any push for the returned
    /// id can be dispatched, so the first notification is never lost.
    async fn subscribe(
        &self,
        req: JsonRpcRequest,
    ) -> Result<(SubscriptionId, PushReceiver), TransportError>;

    /// Stop routing pushes for `id`. Does not talk to the node.
    fn release(&self, id: &SubscriptionId);
}
