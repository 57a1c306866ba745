//! chainstream-http: request/response JSON-RPC over HTTP.
//!
//! HTTP has no server push, so a client built on this transport serves
//! every live feed by filter polling.

pub mod client;

pub use client::{HttpClientConfig, HttpRpcClient};
