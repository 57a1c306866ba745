//! chainstream-ws: WebSocket JSON-RPC transport for ChainStream.
//!
//! One background task owns the socket. Requests are multiplexed over it
//! and correlated by id, `eth_subscription` pushes are routed to per
//! subscription channels, and a dropped connection is re-established with
//! capped exponential backoff.
//!
//! Subscriptions do not survive a reconnect. Their channels are closed so
//! the feeds above can surface the loss and the caller can resubscribe.

pub mod client;
pub mod subscriptions;

pub use client::{WsClientConfig, WsRpcClient};
pub use subscriptions::SubscriptionRouter;
