//! chainstream-core: foundation traits and types for ChainStream.
//!
//! # Overview
//!
//! ChainStream turns a node's request/response JSON-RPC interface into
//! ordered, cancellable feeds of blocks, transactions and logs. The core
//! crate defines what every feed and transport shares:
//!
//! - [`RpcTransport`] / [`PubSubTransport`]: the transport seam
//! - [`RpcClient`]: request ids, method namespace, push capability
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`]: wire types
//! - [`TransportError`] / [`DecodeError`]: structured errors
//! - [`FilterCriteria`]: address/topic/range predicate
//! - [`types`]: `Block`, `Transaction`, `Log`, `BlockRef`, `BlockNumber`
//! - [`codec`]: raw result decoding
//! - [`policy`]: retry backoff used by transports

pub mod client;
pub mod codec;
pub mod criteria;
pub mod error;
pub mod policy;
pub mod request;
pub mod transport;
pub mod types;

pub use client::RpcClient;
pub use criteria::{FilterCriteria, TopicFilter};
pub use error::{DecodeError, TransportError};
pub use request::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::{PubSubTransport, PushReceiver, RpcTransport, SubscriptionId};
pub use types::{Block, BlockNumber, BlockRef, BlockTransactions, ChainItem, Log, Transaction};
