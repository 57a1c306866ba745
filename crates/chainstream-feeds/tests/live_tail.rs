//! Replay-then-live feeds.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chainstream_core::{BlockNumber, BlockRef, FilterCriteria, Log};
use chainstream_feeds::handle::channel;
use chainstream_feeds::{ChainStreams, LiveTailCombinator, StreamError, StreamItem};
use common::*;
use tokio_util::sync::CancellationToken;

fn log_at(n: u64, removed: bool) -> Log {
    serde_json::from_value(log_json(n, CONTRACT, removed)).unwrap()
}

#[tokio::test]
async fn combined_drops_live_items_already_replayed() {
    let token = CancellationToken::new();
    let (replay_tx, replay) = channel::<Log>(8, token.child_token());
    replay_tx.emit(Ok(StreamItem::Data(log_at(4, false)))).await;
    replay_tx.emit(Ok(StreamItem::Data(log_at(5, false)))).await;
    replay_tx.emit(Ok(StreamItem::End)).await;

    let seen_seam = Arc::new(std::sync::Mutex::new(None::<BlockRef>));
    let seam = seen_seam.clone();
    let mut combined = LiveTailCombinator::combine(token, replay, move |after, token| async move {
        *seam.lock().unwrap() = after;
        let (live_tx, live) = channel::<Log>(8, token);
        live_tx.emit(Ok(StreamItem::Data(log_at(5, false)))).await;
        live_tx.emit(Ok(StreamItem::Removed(log_at(5, true)))).await;
        live_tx.emit(Ok(StreamItem::Data(log_at(6, false)))).await;
        tokio::spawn(async move {
            // Keep the live producer open like a real tail.
            live_tx.cancelled().await;
        });
        Ok(live)
    });

    assert_eq!(next_data(&mut combined).await.block_number, Some(4));
    assert_eq!(next_data(&mut combined).await.block_number, Some(5));
    assert!(matches!(next(&mut combined).await, Some(Ok(StreamItem::Removed(_)))));
    assert_eq!(next_data(&mut combined).await.block_number, Some(6));
    assert_eq!(seen_seam.lock().unwrap().as_ref().map(|b| b.number), Some(5));
}

#[tokio::test]
async fn replay_failure_never_starts_live() {
    let token = CancellationToken::new();
    let (replay_tx, replay) = channel::<Log>(8, token.child_token());
    replay_tx.emit(Ok(StreamItem::Data(log_at(4, false)))).await;
    replay_tx.emit(Err(StreamError::MissingBlock { number: 5 })).await;

    let started = Arc::new(AtomicBool::new(false));
    let flag = started.clone();
    let mut combined = LiveTailCombinator::combine(token, replay, move |_, token| async move {
        flag.store(true, Ordering::SeqCst);
        let (_tx, live) = channel::<Log>(8, token);
        Ok(live)
    });

    assert_eq!(next_data(&mut combined).await.block_number, Some(4));
    assert!(matches!(next(&mut combined).await, Some(Err(StreamError::MissingBlock { number: 5 }))));
    assert!(next(&mut combined).await.is_none());
    assert!(!started.load(Ordering::SeqCst));
}

#[tokio::test]
async fn empty_replay_hands_over_without_seam() {
    let token = CancellationToken::new();
    let (replay_tx, replay) = channel::<Log>(8, token.child_token());
    replay_tx.emit(Ok(StreamItem::End)).await;

    let mut combined = LiveTailCombinator::combine(token, replay, move |after, token| async move {
        assert!(after.is_none());
        let (live_tx, live) = channel::<Log>(8, token);
        live_tx.emit(Ok(StreamItem::Data(log_at(1, false)))).await;
        tokio::spawn(async move { live_tx.cancelled().await });
        Ok(live)
    });
    assert_eq!(next_data(&mut combined).await.block_number, Some(1));
}

#[tokio::test]
async fn cancelling_combined_cancels_both_halves() {
    let token = CancellationToken::new();
    let replay_token = token.child_token();
    let (replay_tx, replay) = channel::<Log>(8, replay_token.clone());
    replay_tx.emit(Ok(StreamItem::Data(log_at(1, false)))).await;

    let combined = LiveTailCombinator::combine(token, replay, |_, token| async move {
        let (_tx, live) = channel::<Log>(8, token);
        Ok(live)
    });
    combined.cancel();
    assert!(replay_token.is_cancelled());
}

#[tokio::test]
async fn blocks_from_catches_up_then_follows_without_gaps() {
    let node = FixtureNode::new(10);
    let streams = ChainStreams::new(node.client(), test_config());
    let mut blocks = streams.blocks_from(BlockNumber::Number(8), false).await.unwrap();

    for n in 8..=10 {
        assert_eq!(next_data(&mut blocks).await.number, n);
    }
    node.mine();
    node.mine();
    assert_eq!(next_data(&mut blocks).await.number, 11);
    assert_eq!(next_data(&mut blocks).await.number, 12);
    assert_quiet(&mut blocks).await;
    assert_eq!(node.calls("eth_newBlockFilter"), 1);
}

#[tokio::test]
async fn blocks_mined_during_handoff_are_not_lost() {
    let node = FixtureNode::new(10);
    // Park the head query of the catch-up replay so blocks land mid-handoff.
    let streams = ChainStreams::new(node.client(), test_config());
    let mut blocks = streams.blocks_from(BlockNumber::Number(9), false).await.unwrap();
    let gate = node.hold("eth_blockNumber");

    assert_eq!(next_data(&mut blocks).await.number, 9);
    assert_eq!(next_data(&mut blocks).await.number, 10);
    gate.entered.notified().await;
    node.mine();
    node.mine();
    gate.release.notify_one();

    assert_eq!(next_data(&mut blocks).await.number, 11);
    assert_eq!(next_data(&mut blocks).await.number, 12);
    assert_quiet(&mut blocks).await;
}

#[tokio::test]
async fn transactions_from_spans_history_and_live() {
    let node = FixtureNode::new(4);
    let streams = ChainStreams::new(node.client(), test_config());
    let mut txs = streams.transactions_from(BlockNumber::Number(3)).await.unwrap();

    assert_eq!(next_data(&mut txs).await.hash, tx_hash(3));
    assert_eq!(next_data(&mut txs).await.hash, tx_hash(4));
    node.mine();
    assert_eq!(next_data(&mut txs).await.hash, tx_hash(5));
}

#[tokio::test]
async fn logs_from_with_polling() {
    let node = FixtureNode::new(12);
    node.add_log(10, CONTRACT);
    node.add_log(12, CONTRACT);
    node.add_log(14, CONTRACT);
    let streams = ChainStreams::new(node.client(), test_config());
    let mut logs = streams
        .logs_from(FilterCriteria::address(CONTRACT).from_block(10u64))
        .await
        .unwrap();

    assert_eq!(next_data(&mut logs).await.block_number, Some(10));
    assert_eq!(next_data(&mut logs).await.block_number, Some(12));
    node.mine();
    node.mine();
    assert_eq!(next_data(&mut logs).await.block_number, Some(14));
    assert_quiet(&mut logs).await;
}

#[tokio::test]
async fn logs_from_with_push_skips_duplicate_seam_push() {
    let node = FixtureNode::new(5);
    node.add_log(5, CONTRACT);
    let streams = ChainStreams::new(node.push_client(), test_config());
    let mut logs = streams
        .logs_from(FilterCriteria::address(CONTRACT).from_block(5u64))
        .await
        .unwrap();

    assert_eq!(next_data(&mut logs).await.block_number, Some(5));
    eventually(|| node.subscriptions() == 1).await;

    node.notify("logs", log_json(5, CONTRACT, false));
    node.notify("logs", log_json(6, CONTRACT, false));
    assert_eq!(next_data(&mut logs).await.block_number, Some(6));
    assert_quiet(&mut logs).await;
}
