//! Stream-level error taxonomy.

use chainstream_core::{DecodeError, TransportError};
use thiserror::Error;

/// Why a stream could not be opened, or why it terminated.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Transport failure. Transient ones are absorbed by polling streams and
    /// only reach the consumer from replay, bridges, or stream opening.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// The node answered with a shape this client cannot decode.
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    /// The node no longer knows a filter id. Recovered by reinstalling the
    /// filter; never delivered to a consumer.
    #[error("filter {filter_id} is no longer installed on the node")]
    FilterExpired { filter_id: String },

    /// A block inside a replay range is not available (pruned node).
    #[error("block {number} is missing on the node")]
    MissingBlock { number: u64 },

    /// Unsupported bound combination, raised before a stream exists.
    #[error("invalid block range: {0}")]
    InvalidRange(String),

    #[error("invalid filter criteria: {0}")]
    InvalidCriteria(String),
}

impl StreamError {
    /// Returns `true` if retrying on the next tick may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_transient())
    }
}
