//! chainstream-feeds: ordered, cancellable feeds of chain data.
//!
//! # Overview
//!
//! - [`ChainStreams`]: one entry point for every feed
//! - [`StreamHandle`] / [`StreamItem`]: what a consumer holds and receives
//! - [`PollingEngine`]: interval fetch loop with transient-error absorption
//! - [`FilterLifecycleManager`]: install / poll / reinstall / uninstall
//! - [`BlockReplaySequencer`], [`LogReplay`], [`TransactionReplay`]: bounded history
//! - [`LiveTailCombinator`]: replay, then live, without duplicates at the seam
//! - [`NotificationBridge`]: push subscriptions as streams
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainstream_core::{BlockNumber, RpcClient, RpcTransport};
//! use chainstream_feeds::{ChainStreams, StreamConfig, StreamItem};
//! use futures::StreamExt;
//!
//! async fn follow<T: RpcTransport>(transport: Arc<T>) -> Result<(), chainstream_feeds::StreamError> {
//!     let streams = ChainStreams::new(RpcClient::new(transport), StreamConfig::default());
//!     let mut blocks = streams.blocks_from(BlockNumber::Number(19_000_000), false).await?;
//!     while let Some(item) = blocks.next().await {
//!         if let StreamItem::Data(block) = item? {
//!             println!("{} {}", block.number, block.hash);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod filter;
pub mod handle;
pub mod item;
pub mod polling;
pub mod replay;
pub mod streams;
pub mod tail;

pub use bridge::NotificationBridge;
pub use config::StreamConfig;
pub use error::StreamError;
pub use filter::{ActiveFilter, FilterKind, FilterLifecycleManager};
pub use handle::{Emitter, Lease, Release, StreamHandle, StreamResult};
pub use item::StreamItem;
pub use polling::{FnSource, PollSettings, PollSource, PollingEngine};
pub use replay::{BlockReplaySequencer, LogReplay, ReplayRange, TransactionReplay};
pub use streams::ChainStreams;
pub use tail::LiveTailCombinator;
