//! `RpcClient`: request-id correlation and method namespacing over a
//! shared transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::JsonRpcRequest;
use crate::transport::{PubSubTransport, RpcTransport};

/// Default RPC method prefix.
pub const DEFAULT_NAMESPACE: &str = "eth";

/// Cheap-to-clone handle used by every stream to talk to the node.
///
/// All clones share one id counter, so concurrent streams never reuse a
/// request id on the same transport.
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    pubsub: Option<Arc<dyn PubSubTransport>>,
    ids: Arc<AtomicU64>,
    namespace: String,
}

impl RpcClient {
    /// Client over a request/response-only transport.
    pub fn new<T: RpcTransport>(transport: Arc<T>) -> Self {
        Self::from_parts(transport, None)
    }

    /// Client over a transport that can also deliver pushes.
    pub fn with_pubsub<T: PubSubTransport>(transport: Arc<T>) -> Self {
        let pubsub: Arc<dyn PubSubTransport> = transport.clone();
        Self::from_parts(transport, Some(pubsub))
    }

    /// Client from already type-erased transports.
    pub fn from_parts(
        transport: Arc<dyn RpcTransport>,
        pubsub: Option<Arc<dyn PubSubTransport>>,
    ) -> Self {
        Self {
            transport,
            pubsub,
            ids: Arc::new(AtomicU64::new(1)),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Use a different method prefix (`"eth"` → e.g. `"cfx"`).
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        if !namespace.trim().is_empty() {
            self.namespace = namespace;
        }
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Full method name for `suffix` in this client's namespace.
    pub fn method(&self, suffix: &str) -> String {
        format!("{}_{}", self.namespace, suffix)
    }

    /// Static capability check: can this client open push subscriptions?
    pub fn supports_push(&self) -> bool {
        self.pubsub.is_some()
    }

    pub fn pubsub(&self) -> Option<&Arc<dyn PubSubTransport>> {
        self.pubsub.as_ref()
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    /// Build a request with a fresh id.
    pub fn request(&self, method: impl Into<String>, params: Vec<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(self.ids.fetch_add(1, Ordering::Relaxed), method, params)
    }

    /// Call a fully-qualified method and return its raw result.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let req = self.request(method, params);
        tracing::trace!(method, id = %req.id, "rpc call");
        let resp = self.transport.send(req).await?;
        resp.into_result().map_err(TransportError::Rpc)
    }

    /// Call `<namespace>_<suffix>`.
    pub async fn call_ns(&self, suffix: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        self.call(&self.method(suffix), params).await
    }

    /// Call a fully-qualified method and deserialize its result.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let raw = self.call(method, params).await?;
        Ok(serde_json::from_value(raw)?)
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.transport.url())
            .field("namespace", &self.namespace)
            .field("push", &self.supports_push())
            .finish()
    }
}
