//! Reliability policies shared by the transports.
//!
//! Streams never retry inside a tick; a transient failure simply waits for
//! the next poll. Transports apply [`RetryPolicy`] to individual requests.

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};
