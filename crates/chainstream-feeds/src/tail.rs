//! Replay-then-live composition.

use std::future::Future;

use chainstream_core::{BlockRef, ChainItem};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::StreamError;
use crate::handle::{channel, Emitter, StreamHandle};
use crate::item::StreamItem;

/// Chains a bounded replay with a live stream started after it.
pub struct LiveTailCombinator;

impl LiveTailCombinator {
    /// Forward `replay` without its `End`, then open the live stream through
    /// `live` and forward it.
    ///
    /// `token` controls the combined stream and should be the parent of the
    /// token `replay` was opened with. `live` receives the last replayed
    /// block (`None` when the replay was empty) and a child token for the
    /// stream it opens; it is only invoked after the replay ended
    /// successfully. Live `Data` at or below the last replayed height is
    /// dropped. `Removed` always passes.
    pub fn combine<T, F, Fut>(token: CancellationToken, replay: StreamHandle<T>, live: F) -> StreamHandle<T>
    where
        T: ChainItem,
        F: FnOnce(Option<BlockRef>, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<StreamHandle<T>, StreamError>> + Send + 'static,
    {
        let (emitter, handle) = channel(replay.capacity(), token);
        tokio::spawn(run(replay, live, emitter));
        handle
    }
}

/// Where the replay stopped.
#[derive(Debug, Default)]
struct Seam {
    height: Option<u64>,
    block: Option<BlockRef>,
}

impl Seam {
    fn advance<T: ChainItem>(&mut self, item: &T) {
        if let Some(height) = item.block_number() {
            self.height = Some(height);
            self.block = item.block_ref();
        }
    }

    fn covers<T: ChainItem>(&self, item: &T) -> bool {
        match (self.height, item.block_number()) {
            (Some(seam), Some(height)) => height <= seam,
            _ => false,
        }
    }
}

async fn run<T, F, Fut>(mut replay: StreamHandle<T>, live: F, emitter: Emitter<T>)
where
    T: ChainItem,
    F: FnOnce(Option<BlockRef>, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<StreamHandle<T>, StreamError>> + Send + 'static,
{
    let mut seam = Seam::default();
    loop {
        match replay.next().await {
            Some(Ok(StreamItem::End)) => break,
            Some(Ok(item)) => {
                if let StreamItem::Data(data) = &item {
                    seam.advance(data);
                }
                if !emitter.emit(Ok(item)).await {
                    return;
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "replay failed, live tail not started");
                emitter.emit(Err(e)).await;
                return;
            }
            None => {
                debug!("replay stopped before its end");
                return;
            }
        }
    }
    drop(replay);

    if emitter.is_cancelled() {
        return;
    }
    let mut tail = match live(seam.block.clone(), emitter.token().child_token()).await {
        Ok(tail) => tail,
        Err(e) => {
            warn!(error = %e, "failed to open live tail");
            emitter.emit(Err(e)).await;
            return;
        }
    };
    info!(seam = ?seam.height, "replay complete, following live tail");

    while let Some(next) = tail.next().await {
        if let Ok(StreamItem::Data(item)) = &next {
            if seam.covers(item) {
                trace!(height = ?item.block_number(), "dropping live item already replayed");
                continue;
            }
        }
        let terminal = !matches!(next, Ok(StreamItem::Data(_)) | Ok(StreamItem::Removed(_)));
        if !emitter.emit(next).await || terminal {
            return;
        }
    }
}
