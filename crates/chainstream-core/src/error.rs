//! Transport and decoding error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Fragments nodes use when a filter id is no longer installed.
///
/// geth answers `filter not found`, others use `unknown filter` or
/// `filter id ... does not exist`.
const FILTER_NOT_FOUND_MARKERS: &[&str] = &["filter not found", "unknown filter", "filter does not exist"];

/// JSON-RPC "method not found". Never an expired filter, even though geth's
/// message for it also says "does not exist".
const METHOD_NOT_FOUND: i64 = -32601;

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, reset, body read).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The endpoint answered with a non-2xx status other than 429.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Rate limit exceeded. Back off before retrying.
    #[error("Rate limit exceeded (provider: {provider})")]
    RateLimited { provider: String },

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response envelope could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The transport dropped a push subscription (disconnect).
    #[error("Subscription {id} closed by transport")]
    SubscriptionClosed { id: String },

    /// A push subscription was requested from a request/response-only transport.
    #[error("Transport does not support push subscriptions")]
    PushUnsupported,

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is transient and the same call may
    /// succeed later.
    ///
    /// Server-side statuses (5xx) and 408 are transient. Any other 4xx means
    /// the request itself was rejected and repeating it cannot help.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 408,
            _ => matches!(
                self,
                Self::Http(_)
                    | Self::WebSocket(_)
                    | Self::Timeout { .. }
                    | Self::RateLimited { .. }
                    | Self::SubscriptionClosed { .. }
            ),
        }
    }

    /// Returns `true` if the node reported that the referenced filter id is
    /// unknown (evicted, expired, or the node restarted).
    pub fn is_filter_not_found(&self) -> bool {
        let Self::Rpc(err) = self else {
            return false;
        };
        if err.code == METHOD_NOT_FOUND {
            return false;
        }
        let message = err.message.to_ascii_lowercase();
        FILTER_NOT_FOUND_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
            || (message.contains("filter id") && message.contains("does not exist"))
    }
}

/// A raw result could not be decoded into the requested record.
///
/// Always permanent: it means the node speaks a shape this client does not.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot decode {target}: {source}")]
    Json {
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid quantity {0:?}")]
    Quantity(String),

    #[error("expected {expected}, found {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc(code: i64, message: &str) -> TransportError {
        TransportError::Rpc(JsonRpcError {
            code,
            message: message.into(),
            data: None,
        })
    }

    #[test]
    fn transient_classification() {
        assert!(TransportError::Timeout { ms: 10 }.is_transient());
        assert!(TransportError::RateLimited { provider: "x".into() }.is_transient());
        assert!(TransportError::Http("reset".into()).is_transient());
        assert!(!rpc(-32602, "invalid params").is_transient());
        assert!(!TransportError::PushUnsupported.is_transient());
    }

    #[test]
    fn http_status_transience_follows_status_class() {
        let status = |status| TransportError::HttpStatus { status, body: String::new() };
        assert!(status(502).is_transient());
        assert!(status(503).is_transient());
        assert!(status(408).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(413).is_transient());
    }

    #[test]
    fn recognizes_expired_filter() {
        assert!(rpc(-32000, "filter not found").is_filter_not_found());
        assert!(rpc(-32000, "Unknown filter ID").is_filter_not_found());
        assert!(rpc(-32000, "filter id 0x1f does not exist").is_filter_not_found());
        assert!(!rpc(-32000, "execution reverted").is_filter_not_found());
        assert!(!rpc(-32601, "the method eth_getFilterChanges does not exist/is not available")
            .is_filter_not_found());
        assert!(!rpc(-32000, "header for hash does not exist").is_filter_not_found());
        assert!(!TransportError::Timeout { ms: 1 }.is_filter_not_found());
    }
}
