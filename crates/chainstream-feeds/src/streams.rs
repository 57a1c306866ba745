//! `ChainStreams`: every feed, opened against one client.
//!
//! Live feeds prefer push subscriptions when the client's transport supports
//! them and fall back to filter polling otherwise. Replay-then-live feeds
//! resolve the head once, replay up to it, then open the live feed and
//! replay whatever was mined in between before following it.

use chainstream_core::{codec, Block, BlockNumber, ChainItem, FilterCriteria, Log, RpcClient, Transaction};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bridge::NotificationBridge;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::filter::{FilterKind, FilterLifecycleManager};
use crate::handle::StreamHandle;
use crate::replay::{self, BlockReplaySequencer, LogReplay, ReplayRange, TransactionReplay};
use crate::tail::LiveTailCombinator;

/// Entry point for opening feeds.
#[derive(Debug, Clone)]
pub struct ChainStreams {
    client: RpcClient,
    config: StreamConfig,
}

impl ChainStreams {
    /// The client's method namespace is taken from `config.namespace`.
    pub fn new(client: RpcClient, config: StreamConfig) -> Self {
        let client = client.with_namespace(config.namespace.clone());
        Self { client, config }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Current head height.
    pub async fn head_number(&self) -> Result<u64, StreamError> {
        replay::latest_height(&self.client).await
    }

    // ─── Live ─────────────────────────────────────────────────────────────────

    /// Hashes of new blocks.
    pub async fn block_hashes(&self) -> Result<StreamHandle<String>, StreamError> {
        self.block_hashes_with(CancellationToken::new()).await
    }

    /// New blocks, with full transactions when `full_transactions` is set.
    pub async fn blocks(&self, full_transactions: bool) -> Result<StreamHandle<Block>, StreamError> {
        self.blocks_with(full_transactions, CancellationToken::new()).await
    }

    /// Transactions of new blocks, block order then index order.
    pub async fn transactions(&self) -> Result<StreamHandle<Transaction>, StreamError> {
        let blocks = self.blocks(true).await?;
        Ok(TransactionReplay::flatten(blocks))
    }

    /// Hashes of transactions entering the node's mempool.
    pub async fn pending_transaction_hashes(&self) -> Result<StreamHandle<String>, StreamError> {
        self.pending_hashes_with(CancellationToken::new()).await
    }

    /// Transactions entering the mempool. Hashes the node no longer knows by
    /// the time they are looked up are skipped.
    pub async fn pending_transactions(&self) -> Result<StreamHandle<Transaction>, StreamError> {
        let hashes = self.pending_hashes_with(CancellationToken::new()).await?;
        let client = self.client.clone();
        Ok(hashes.then_items(move |hash| {
            let client = client.clone();
            async move {
                let raw = client.call_ns("getTransactionByHash", vec![Value::String(hash.clone())]).await?;
                let tx = codec::decode_optional::<Transaction>(raw)?;
                if tx.is_none() {
                    debug!(hash = %hash, "pending transaction vanished before lookup");
                }
                Ok::<Vec<Transaction>, StreamError>(tx.into_iter().collect())
            }
        }))
    }

    /// Logs matching `criteria` as they are mined.
    pub async fn logs(&self, criteria: FilterCriteria) -> Result<StreamHandle<Log>, StreamError> {
        self.logs_with(criteria, CancellationToken::new()).await
    }

    /// `newHeads` push subscription. Requires a push-capable transport.
    pub async fn new_heads(&self) -> Result<StreamHandle<Block>, StreamError> {
        self.new_heads_with(CancellationToken::new()).await
    }

    /// `logs` push subscription. Requires a push-capable transport.
    pub async fn log_notifications(&self, criteria: FilterCriteria) -> Result<StreamHandle<Log>, StreamError> {
        self.log_notifications_with(criteria, CancellationToken::new()).await
    }

    // ─── Bounded ──────────────────────────────────────────────────────────────

    pub async fn replay_blocks(
        &self,
        from: BlockNumber,
        to: BlockNumber,
        full_transactions: bool,
        ascending: bool,
    ) -> Result<StreamHandle<Block>, StreamError> {
        BlockReplaySequencer::open(
            &self.client,
            from,
            to,
            full_transactions,
            ascending,
            &self.config,
            CancellationToken::new(),
        )
        .await
    }

    pub async fn replay_transactions(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<StreamHandle<Transaction>, StreamError> {
        TransactionReplay::open(&self.client, from, to, &self.config, CancellationToken::new()).await
    }

    /// Logs over `criteria`'s block range.
    pub async fn replay_logs(&self, criteria: FilterCriteria) -> Result<StreamHandle<Log>, StreamError> {
        LogReplay::open(&self.client, criteria, &self.config, CancellationToken::new()).await
    }

    // ─── Replay, then live ────────────────────────────────────────────────────

    /// Every block from `start` on: history up to the current head, then new
    /// blocks as they arrive, without gaps or duplicates at the seam.
    pub async fn blocks_from(&self, start: BlockNumber, full_transactions: bool) -> Result<StreamHandle<Block>, StreamError> {
        let range = ReplayRange::resolve(&self.client, start, BlockNumber::Latest).await?;
        info!(from = range.from, head = range.to, "block catch-up planned");

        let token = CancellationToken::new();
        let replay = BlockReplaySequencer::spawn(&self.client, range, full_transactions, true, &self.config, token.child_token());
        let this = self.clone();
        Ok(LiveTailCombinator::combine(token, replay, move |_, token| async move {
            let live = this.blocks_with(full_transactions, token.child_token()).await?;
            let gap_start = catch_up_start(range);
            let gap = BlockReplaySequencer::open(
                &this.client,
                BlockNumber::Number(gap_start),
                BlockNumber::Latest,
                full_transactions,
                true,
                &this.config,
                token.child_token(),
            )
            .await?;
            Ok::<_, StreamError>(LiveTailCombinator::combine(token, gap, move |_, _| async move { Ok(live) }))
        }))
    }

    /// Every transaction from block `start` on.
    pub async fn transactions_from(&self, start: BlockNumber) -> Result<StreamHandle<Transaction>, StreamError> {
        let blocks = self.blocks_from(start, true).await?;
        Ok(TransactionReplay::flatten(blocks))
    }

    /// Every log matching `criteria` from `criteria.from_block` on. The
    /// criteria's `to_block` is ignored.
    pub async fn logs_from(&self, criteria: FilterCriteria) -> Result<StreamHandle<Log>, StreamError> {
        criteria.validate().map_err(StreamError::InvalidCriteria)?;
        let range = ReplayRange::resolve(&self.client, criteria.from_block, BlockNumber::Latest).await?;
        info!(from = range.from, head = range.to, "log catch-up planned");

        let token = CancellationToken::new();
        let replay = LogReplay::spawn(&self.client, criteria.clone(), range, &self.config, token.child_token());
        let this = self.clone();
        Ok(LiveTailCombinator::combine(token, replay, move |_, token| async move {
            let live_criteria = criteria.with_range(BlockNumber::Latest, BlockNumber::Latest);
            let live = this.logs_with(live_criteria, token.child_token()).await?;
            let gap_criteria = criteria.with_range(BlockNumber::Number(catch_up_start(range)), BlockNumber::Latest);
            let gap = LogReplay::open(&this.client, gap_criteria, &this.config, token.child_token()).await?;
            Ok::<_, StreamError>(LiveTailCombinator::combine(token, gap, move |_, _| async move { Ok(live) }))
        }))
    }

    // ─── Token-aware openers ──────────────────────────────────────────────────

    async fn block_hashes_with(&self, token: CancellationToken) -> Result<StreamHandle<String>, StreamError> {
        if self.client.supports_push() {
            let heads = self.new_heads_with(token).await?;
            return Ok(heads.map_items(|head| vec![head.hash]));
        }
        FilterLifecycleManager::open(&self.client, FilterKind::Blocks, &self.config, token).await
    }

    async fn blocks_with(&self, full: bool, token: CancellationToken) -> Result<StreamHandle<Block>, StreamError> {
        let hashes = self.block_hashes_with(token).await?;
        let client = self.client.clone();
        Ok(hashes.then_items(move |hash| {
            let client = client.clone();
            async move {
                let raw = client.call_ns("getBlockByHash", vec![Value::String(hash.clone()), Value::Bool(full)]).await?;
                let block = codec::decode_optional::<Block>(raw)?;
                if block.is_none() {
                    debug!(hash = %hash, "announced block no longer available");
                }
                Ok::<Vec<Block>, StreamError>(block.into_iter().collect())
            }
        }))
    }

    async fn pending_hashes_with(&self, token: CancellationToken) -> Result<StreamHandle<String>, StreamError> {
        if self.client.supports_push() {
            return self.subscribe(vec![json!("newPendingTransactions")], token).await;
        }
        FilterLifecycleManager::open(&self.client, FilterKind::PendingTransactions, &self.config, token).await
    }

    async fn logs_with(&self, criteria: FilterCriteria, token: CancellationToken) -> Result<StreamHandle<Log>, StreamError> {
        if self.client.supports_push() {
            return self.log_notifications_with(criteria, token).await;
        }
        FilterLifecycleManager::open(&self.client, FilterKind::Logs(criteria), &self.config, token).await
    }

    async fn new_heads_with(&self, token: CancellationToken) -> Result<StreamHandle<Block>, StreamError> {
        self.subscribe(vec![json!("newHeads")], token).await
    }

    async fn log_notifications_with(
        &self,
        criteria: FilterCriteria,
        token: CancellationToken,
    ) -> Result<StreamHandle<Log>, StreamError> {
        criteria.validate().map_err(StreamError::InvalidCriteria)?;
        self.subscribe(vec![json!("logs"), criteria.to_subscription_params()], token).await
    }

    async fn subscribe<T>(&self, params: Vec<Value>, token: CancellationToken) -> Result<StreamHandle<T>, StreamError>
    where
        T: DeserializeOwned + ChainItem,
    {
        NotificationBridge::open(
            &self.client,
            &self.client.method("subscribe"),
            params,
            &self.client.method("unsubscribe"),
            &self.config,
            token,
        )
        .await
    }
}

/// First height the live-tail catch-up must replay.
fn catch_up_start(replayed: ReplayRange) -> u64 {
    replayed.to.saturating_add(1).max(replayed.from)
}
