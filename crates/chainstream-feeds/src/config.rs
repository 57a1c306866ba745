//! Stream configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::polling::PollSettings;

/// Settings shared by every stream a [`ChainStreams`](crate::ChainStreams)
/// opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Delay between filter polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Poll once immediately instead of waiting a full interval first.
    #[serde(default = "bool_true")]
    pub skip_first_wait: bool,
    /// Items buffered per stream before the producer waits for the consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Blocks per `eth_getLogs` request during log replay.
    #[serde(default = "default_log_chunk_size")]
    pub log_chunk_size: u64,
    /// RPC method prefix.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// Roughly one Ethereum mainnet slot.
fn default_poll_interval_ms() -> u64 { 15_000 }
fn default_channel_capacity() -> usize { 1_024 }
fn default_log_chunk_size() -> u64 { 1_000 }
fn default_namespace() -> String { chainstream_core::client::DEFAULT_NAMESPACE.into() }
fn bool_true() -> bool { true }

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            skip_first_wait: true,
            channel_capacity: default_channel_capacity(),
            log_chunk_size: default_log_chunk_size(),
            namespace: default_namespace(),
        }
    }
}

impl StreamConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.poll_interval(),
            skip_first_wait: self.skip_first_wait,
            capacity: self.channel_capacity,
        }
    }
}
