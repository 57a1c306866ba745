//! Consumer-side stream handle, producer-side emitter, and the scoped lease
//! that guarantees remote cleanup.
//!
//! Every stream is a producer task writing into a bounded channel. The
//! consumer holds a [`StreamHandle`]; the producer holds the matching
//! [`Emitter`]. Both share a [`CancellationToken`]: cancelling the handle (or
//! dropping it) stops the producer at its next await point, and the producer
//! then releases whatever it acquired on the node through its [`Lease`].

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chainstream_core::{BlockRef, ChainItem};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::item::StreamItem;

/// One delivery as seen by the consumer.
pub type StreamResult<T> = Result<StreamItem<T>, StreamError>;

/// Create a connected emitter/handle pair buffering up to `capacity` results.
pub fn channel<T>(capacity: usize, token: CancellationToken) -> (Emitter<T>, StreamHandle<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let emitter = Emitter { tx, token: token.clone() };
    let handle = StreamHandle {
        rx,
        capacity,
        token,
        last_delivered: None,
        delivered: 0,
    };
    (emitter, handle)
}

// ─── Consumer side ────────────────────────────────────────────────────────────

/// A cancellable, ordered, backpressured feed of [`StreamItem`]s.
///
/// Implements [`Stream`]. The stream yields `None` once the producer has
/// finished: after `End`, after a terminal `Err`, or after cancellation.
/// Dropping the handle cancels the producer.
pub struct StreamHandle<T> {
    rx: mpsc::Receiver<StreamResult<T>>,
    capacity: usize,
    token: CancellationToken,
    last_delivered: Option<BlockRef>,
    delivered: u64,
}

impl<T> StreamHandle<T> {
    /// Stop the producer. Idempotent.
    ///
    /// Results already produced, including those of a call that was in flight
    /// when cancellation was requested, can still be read from the handle.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!("stream cancelled by consumer");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Results the handle buffers before the producer waits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block of the most recent `Data` item taken from this handle.
    pub fn last_delivered(&self) -> Option<&BlockRef> {
        self.last_delivered.as_ref()
    }

    /// Number of `Data` items taken from this handle.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl<T: ChainItem> StreamHandle<T> {
    /// Transform each carried item into zero or more items of another type,
    /// asynchronously and in order.
    ///
    /// `Data` maps to `Data`, `Removed` maps to `Removed`, `End` and errors
    /// pass through. An error returned by `f` terminates the new stream.
    /// Both handles share one cancellation token.
    pub fn then_items<U, F, Fut>(self, mut f: F) -> StreamHandle<U>
    where
        U: ChainItem,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<U>, StreamError>> + Send + 'static,
    {
        use futures::StreamExt;

        let token = self.token.clone();
        let capacity = self.capacity;
        let (emitter, handle) = channel(capacity, token);
        let mut upstream = self;

        tokio::spawn(async move {
            while let Some(next) = upstream.next().await {
                let (item, removed) = match next {
                    Ok(StreamItem::Data(item)) => (item, false),
                    Ok(StreamItem::Removed(item)) => (item, true),
                    Ok(StreamItem::End) => {
                        emitter.emit(Ok(StreamItem::End)).await;
                        return;
                    }
                    Err(e) => {
                        emitter.emit(Err(e)).await;
                        return;
                    }
                };
                match f(item).await {
                    Ok(mapped) => {
                        for out in mapped {
                            let out = if removed { StreamItem::Removed(out) } else { StreamItem::Data(out) };
                            if !emitter.deliver(Ok(out)).await {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "stream adapter failed");
                        emitter.emit(Err(e)).await;
                        return;
                    }
                }
            }
        });

        handle
    }

    /// Synchronous flat-map over carried items. See [`then_items`](Self::then_items).
    pub fn map_items<U, F>(self, mut f: F) -> StreamHandle<U>
    where
        U: ChainItem,
        F: FnMut(T) -> Vec<U> + Send + 'static,
    {
        self.then_items(move |item| futures::future::ready(Ok(f(item))))
    }

    /// Drain a bounded stream until `End`, returning the carried items.
    ///
    /// Returns the first error, if any. A stream that stops without `End`
    /// (it was cancelled) yields what was collected so far.
    pub async fn collect_until_end(mut self) -> Result<Vec<StreamItem<T>>, StreamError> {
        use futures::StreamExt;

        let mut items = Vec::new();
        while let Some(next) = self.next().await {
            match next? {
                StreamItem::End => break,
                item => items.push(item),
            }
        }
        Ok(items)
    }
}

impl<T: ChainItem> Stream for StreamHandle<T> {
    type Item = StreamResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.rx.poll_recv(cx);
        if let Poll::Ready(Some(Ok(StreamItem::Data(item)))) = &polled {
            this.delivered += 1;
            if let Some(block) = item.block_ref() {
                this.last_delivered = Some(block);
            }
        }
        polled
    }
}

impl<T> Drop for StreamHandle<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl<T> std::fmt::Debug for StreamHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("cancelled", &self.token.is_cancelled())
            .field("last_delivered", &self.last_delivered)
            .field("delivered", &self.delivered)
            .finish()
    }
}

// ─── Producer side ────────────────────────────────────────────────────────────

/// Producer half of a stream.
pub struct Emitter<T> {
    tx: mpsc::Sender<StreamResult<T>>,
    token: CancellationToken,
}

impl<T> Emitter<T> {
    /// Deliver one result, waiting while the consumer's buffer is full.
    ///
    /// Returns `false` when the producer should stop: the consumer is gone,
    /// or the stream was cancelled and the buffer had no room left.
    pub async fn emit(&self, result: StreamResult<T>) -> bool {
        tokio::select! {
            biased;
            sent = self.tx.send(result) => sent.is_ok(),
            _ = self.token.cancelled() => {
                debug!("stream cancelled with a full buffer, dropping result");
                false
            }
        }
    }

    /// Deliver a result the producer already holds, waiting for buffer room
    /// even after cancellation.
    ///
    /// Used for the output of a call that was in flight when the stream was
    /// cancelled. Returns `false` only when the consumer is gone.
    pub async fn deliver(&self, result: StreamResult<T>) -> bool {
        self.tx.send(result).await.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the stream is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

// ─── Lease ────────────────────────────────────────────────────────────────────

/// A resource held on the node (installed filter, push subscription).
#[async_trait]
pub trait Release: Send + 'static {
    /// Free the resource. Best-effort: implementations log failures and
    /// never retry.
    async fn release(&mut self);
}

/// Scoped ownership of a [`Release`] resource.
///
/// [`Lease::release`] frees the resource exactly once. A lease dropped
/// without being released (its task panicked or was aborted) spawns the
/// release onto the current runtime instead.
pub struct Lease<R: Release> {
    resource: Option<R>,
}

impl<R: Release> Lease<R> {
    pub fn new(resource: R) -> Self {
        Self { resource: Some(resource) }
    }

    pub async fn release(mut self) {
        if let Some(mut resource) = self.resource.take() {
            resource.release().await;
        }
    }
}

impl<R: Release> Deref for Lease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource.as_ref().expect("lease holds its resource until released")
    }
}

impl<R: Release> DerefMut for Lease<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().expect("lease holds its resource until released")
    }
}

impl<R: Release> Drop for Lease<R> {
    fn drop(&mut self) {
        let Some(mut resource) = self.resource.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("lease dropped without release, releasing in background");
                runtime.spawn(async move { resource.release().await });
            }
            Err(_) => warn!("lease dropped outside a runtime, remote resource leaked"),
        }
    }
}
