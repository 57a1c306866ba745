//! Periodic fetch loop behind every filter-backed stream.
//!
//! A [`PollSource`] knows how to fetch one batch; the [`PollingEngine`] runs
//! it on an interval, classifies each item, absorbs transient failures and
//! guarantees the source is closed exactly once when the loop ends.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use chainstream_core::ChainItem;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::StreamError;
use crate::handle::{channel, Emitter, Lease, Release, StreamHandle};
use crate::item::StreamItem;

/// One batch per tick.
#[async_trait]
pub trait PollSource: Release {
    type Item: ChainItem;

    /// Fetch everything new since the previous call, in node order.
    async fn fetch(&mut self) -> Result<Vec<Self::Item>, StreamError>;
}

/// Timing and buffering for a polling stream.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    /// Run the first fetch immediately.
    pub skip_first_wait: bool,
    /// Channel capacity between the loop and the consumer.
    pub capacity: usize,
}

impl PollSettings {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            skip_first_wait: true,
            capacity: 1_024,
        }
    }
}

/// Spawns polling loops.
pub struct PollingEngine;

impl PollingEngine {
    /// Run `source` on `settings.interval` until cancelled, a permanent error
    /// occurs, or the consumer goes away.
    ///
    /// Ticks never overlap: the next wait starts after the previous fetch and
    /// its deliveries complete.
    pub fn spawn<S: PollSource>(
        source: S,
        settings: PollSettings,
        token: CancellationToken,
    ) -> StreamHandle<S::Item> {
        let (emitter, handle) = channel(settings.capacity, token);
        tokio::spawn(run(Lease::new(source), settings, emitter));
        handle
    }

    /// Poll a closure. The closure owns nothing remote, so closing is a no-op.
    pub fn poll<T, F, Fut>(settings: PollSettings, fetch: F, token: CancellationToken) -> StreamHandle<T>
    where
        T: ChainItem,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<T>, StreamError>> + Send + 'static,
    {
        Self::spawn(FnSource::new(fetch), settings, token)
    }
}

async fn run<S: PollSource>(mut source: Lease<S>, settings: PollSettings, emitter: Emitter<S::Item>) {
    let mut tick: u64 = 0;

    'ticks: loop {
        if tick > 0 || !settings.skip_first_wait {
            tokio::select! {
                biased;
                _ = emitter.cancelled() => break,
                _ = tokio::time::sleep(settings.interval) => {}
            }
        }
        if emitter.is_cancelled() {
            break;
        }
        tick += 1;

        match source.fetch().await {
            Ok(items) => {
                if !items.is_empty() {
                    debug!(tick, items = items.len(), "poll delivered");
                }
                // The batch is complete even if cancel arrived mid-fetch.
                for item in items {
                    if !emitter.deliver(Ok(StreamItem::classify(item))).await {
                        break 'ticks;
                    }
                }
            }
            Err(e) if e.is_transient() => {
                warn!(tick, error = %e, "transient poll failure, skipping tick");
            }
            Err(e) => {
                error!(tick, error = %e, "poll failed, closing stream");
                emitter.deliver(Err(e)).await;
                break;
            }
        }
    }

    info!(ticks = tick, "polling stopped");
    source.release().await;
}

/// Adapter turning a closure into a [`PollSource`].
pub struct FnSource<F, T> {
    fetch: F,
    _item: PhantomData<fn() -> T>,
}

impl<F, T> FnSource<F, T> {
    pub fn new(fetch: F) -> Self {
        Self { fetch, _item: PhantomData }
    }
}

#[async_trait]
impl<F, T> Release for FnSource<F, T>
where
    F: Send + 'static,
    T: 'static,
{
    async fn release(&mut self) {}
}

#[async_trait]
impl<F, Fut, T> PollSource for FnSource<F, T>
where
    T: ChainItem,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>, StreamError>> + Send + 'static,
{
    type Item = T;

    async fn fetch(&mut self) -> Result<Vec<T>, StreamError> {
        (self.fetch)().await
    }
}
