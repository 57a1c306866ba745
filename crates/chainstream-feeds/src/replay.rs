//! Bounded historical replay of blocks, transactions and logs.

use chainstream_core::{codec, Block, BlockNumber, FilterCriteria, Log, RpcClient, Transaction};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::handle::{channel, Emitter, StreamHandle};
use crate::item::StreamItem;

/// An inclusive range of concrete block heights.
///
/// `from > to` is a valid, empty range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayRange {
    pub from: u64,
    pub to: u64,
}

impl ReplayRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Resolve symbolic bounds against the node.
    ///
    /// `Earliest` is height 0. `Latest` costs one `blockNumber` query, shared
    /// by both bounds. `Pending` is rejected.
    pub async fn resolve(client: &RpcClient, from: BlockNumber, to: BlockNumber) -> Result<Self, StreamError> {
        reject_pending(from, to)?;
        let mut head: Option<u64> = None;
        let from = resolve_bound(client, from, &mut head).await?;
        let to = resolve_bound(client, to, &mut head).await?;
        Ok(Self { from, to })
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    /// Heights in delivery order.
    pub fn heights(&self, ascending: bool) -> Box<dyn Iterator<Item = u64> + Send> {
        if self.is_empty() {
            Box::new(std::iter::empty())
        } else if ascending {
            Box::new(self.from..=self.to)
        } else {
            Box::new((self.from..=self.to).rev())
        }
    }
}

/// Reject bounds no replay can honor.
pub fn reject_pending(from: BlockNumber, to: BlockNumber) -> Result<(), StreamError> {
    if from.is_pending() || to.is_pending() {
        return Err(StreamError::InvalidRange(format!(
            "pending is not a replayable bound (from {from}, to {to})"
        )));
    }
    Ok(())
}

async fn resolve_bound(client: &RpcClient, bound: BlockNumber, head: &mut Option<u64>) -> Result<u64, StreamError> {
    match bound {
        BlockNumber::Earliest => Ok(0),
        BlockNumber::Number(n) => Ok(n),
        BlockNumber::Latest => match *head {
            Some(n) => Ok(n),
            None => {
                let n = latest_height(client).await?;
                *head = Some(n);
                Ok(n)
            }
        },
        BlockNumber::Pending => Err(StreamError::InvalidRange("pending".into())),
    }
}

/// Current head height.
pub async fn latest_height(client: &RpcClient) -> Result<u64, StreamError> {
    let raw = client.call_ns("blockNumber", vec![]).await?;
    Ok(codec::decode_quantity(raw)?)
}

/// `getBlockByNumber`, `None` when the node does not have the block.
pub async fn block_by_number(client: &RpcClient, number: u64, full: bool) -> Result<Option<Block>, StreamError> {
    let params = vec![Value::String(BlockNumber::Number(number).to_string()), Value::Bool(full)];
    let raw = client.call_ns("getBlockByNumber", params).await?;
    Ok(codec::decode_optional(raw)?)
}

// ─── Blocks ───────────────────────────────────────────────────────────────────

/// Emits every block of a range exactly once, in order, then `End`.
pub struct BlockReplaySequencer;

impl BlockReplaySequencer {
    /// Resolve `from`/`to` and start replaying.
    ///
    /// Fails before any stream exists on a `Pending` bound or when `Latest`
    /// cannot be resolved.
    pub async fn open(
        client: &RpcClient,
        from: BlockNumber,
        to: BlockNumber,
        full_transactions: bool,
        ascending: bool,
        config: &StreamConfig,
        token: CancellationToken,
    ) -> Result<StreamHandle<Block>, StreamError> {
        let range = ReplayRange::resolve(client, from, to).await?;
        Ok(Self::spawn(client, range, full_transactions, ascending, config, token))
    }

    /// Replay an already resolved range.
    pub fn spawn(
        client: &RpcClient,
        range: ReplayRange,
        full_transactions: bool,
        ascending: bool,
        config: &StreamConfig,
        token: CancellationToken,
    ) -> StreamHandle<Block> {
        let (emitter, handle) = channel(config.channel_capacity, token);
        tokio::spawn(replay_blocks(client.clone(), range, full_transactions, ascending, emitter));
        handle
    }
}

async fn replay_blocks(client: RpcClient, range: ReplayRange, full: bool, ascending: bool, emitter: Emitter<Block>) {
    info!(from = range.from, to = range.to, ascending, "block replay started");
    for number in range.heights(ascending) {
        if emitter.is_cancelled() {
            debug!(number, "block replay cancelled");
            return;
        }
        let result = match block_by_number(&client, number, full).await {
            Ok(Some(block)) => Ok(StreamItem::Data(block)),
            Ok(None) => Err(StreamError::MissingBlock { number }),
            Err(e) => Err(e),
        };
        let failed = result.is_err();
        if let Err(e) = &result {
            error!(number, error = %e, "block replay failed");
        }
        if !emitter.deliver(result).await || failed {
            return;
        }
    }
    emitter.emit(Ok(StreamItem::End)).await;
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// Transactions of every block in a range, block order then index order,
/// then `End`.
pub struct TransactionReplay;

impl TransactionReplay {
    pub async fn open(
        client: &RpcClient,
        from: BlockNumber,
        to: BlockNumber,
        config: &StreamConfig,
        token: CancellationToken,
    ) -> Result<StreamHandle<Transaction>, StreamError> {
        let blocks = BlockReplaySequencer::open(client, from, to, true, true, config, token).await?;
        Ok(Self::flatten(blocks))
    }

    /// Full transactions of each block, in index order.
    pub fn flatten(blocks: StreamHandle<Block>) -> StreamHandle<Transaction> {
        blocks.map_items(|block| block.full_transactions().to_vec())
    }
}

// ─── Logs ─────────────────────────────────────────────────────────────────────

/// Historical logs via chunked `getLogs`, ascending, then `End`.
pub struct LogReplay;

impl LogReplay {
    pub async fn open(
        client: &RpcClient,
        criteria: FilterCriteria,
        config: &StreamConfig,
        token: CancellationToken,
    ) -> Result<StreamHandle<Log>, StreamError> {
        criteria.validate().map_err(StreamError::InvalidCriteria)?;
        let range = ReplayRange::resolve(client, criteria.from_block, criteria.to_block).await?;
        Ok(Self::spawn(client, criteria, range, config, token))
    }

    pub fn spawn(
        client: &RpcClient,
        criteria: FilterCriteria,
        range: ReplayRange,
        config: &StreamConfig,
        token: CancellationToken,
    ) -> StreamHandle<Log> {
        let (emitter, handle) = channel(config.channel_capacity, token);
        let chunk = config.log_chunk_size.max(1);
        tokio::spawn(replay_logs(client.clone(), criteria, range, chunk, emitter));
        handle
    }
}

async fn replay_logs(client: RpcClient, criteria: FilterCriteria, range: ReplayRange, chunk: u64, emitter: Emitter<Log>) {
    info!(from = range.from, to = range.to, chunk, "log replay started");
    let mut start = range.from;
    while !range.is_empty() && start <= range.to {
        if emitter.is_cancelled() {
            debug!(start, "log replay cancelled");
            return;
        }
        let end = start.saturating_add(chunk - 1).min(range.to);
        let params = criteria
            .with_range(BlockNumber::Number(start), BlockNumber::Number(end))
            .to_filter_params();

        let logs = match client.call_ns("getLogs", vec![params]).await {
            Ok(raw) => codec::decode_list::<Log>(raw).map_err(StreamError::from),
            Err(e) => Err(e.into()),
        };
        match logs {
            Ok(logs) => {
                debug!(start, end, logs = logs.len(), "log chunk fetched");
                for log in logs {
                    if !emitter.deliver(Ok(StreamItem::classify(log))).await {
                        return;
                    }
                }
            }
            Err(e) => {
                error!(start, end, error = %e, "log replay failed");
                emitter.deliver(Err(e)).await;
                return;
            }
        }
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    emitter.emit(Ok(StreamItem::End)).await;
}
