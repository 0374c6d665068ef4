use std::sync::Arc;
use std::time::Duration;

use stone_chain::BlockInfo;
use stone_indexer_testing::{InMemoryStore, MockChainAdapterBuilder};
use stone_pipeline::PushBus;
use stone_store::ProjectionStore;
use tokio::sync::watch;

#[path = "../src/loop_.rs"]
mod loop_;
use loop_::IndexerLoop;

fn block(height: u64, hash: &str, tx_hashes: Vec<&str>) -> BlockInfo {
    BlockInfo {
        height,
        hash: hash.to_string(),
        time: height as i64 * 1000,
        tx_hashes: tx_hashes.into_iter().map(String::from).collect(),
    }
}

#[tokio::test]
async fn cold_start_catches_up_to_the_tip_then_waits_for_shutdown() {
    let chain = Arc::new(
        MockChainAdapterBuilder::new()
            .with_block(block(1, "H1", vec![]))
            .with_block(block(2, "H2", vec![]))
            .with_block(block(3, "H3", vec![]))
            .with_latest_height(3)
            .build(),
    );
    let store = Arc::new(InMemoryStore::new());

    let indexer_loop = IndexerLoop::new(
        chain,
        store.clone(),
        PushBus::default(),
        "FACTORY".to_string(),
        "mock-chain".to_string(),
        1,
        100,
        Duration::from_millis(20),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { indexer_loop.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let mut tx = store.begin().await.unwrap();
    let state = tx.get_indexer_state().await.unwrap().unwrap();
    tx.commit().await.unwrap();
    assert_eq!(state.last_processed_block, 3);
    assert_eq!(state.last_processed_hash, "H3");
}

#[tokio::test]
async fn reorg_at_the_trailing_edge_rolls_the_checkpoint_back_and_recovers() {
    // Simulates waking up after a reorg: the checkpoint says block 1 had
    // hash "STALE", but the chain now reports "H1" for that height. The
    // loop must detect the mismatch on its first poll, roll the checkpoint
    // back to the safe height (clamped at `start_block_height`), and then
    // resume catching up to the tip on canonical history.
    let chain = Arc::new(
        MockChainAdapterBuilder::new()
            .with_block(block(1, "H1", vec![]))
            .with_block(block(2, "H2", vec![]))
            .with_latest_height(2)
            .build(),
    );
    let store = Arc::new(InMemoryStore::new());
    {
        let mut tx = store.begin().await.unwrap();
        tx.upsert_indexer_state(1, "STALE").await.unwrap();
        tx.commit().await.unwrap();
    }

    let indexer_loop = IndexerLoop::new(
        chain.clone(),
        store.clone(),
        PushBus::default(),
        "FACTORY".to_string(),
        "mock-chain".to_string(),
        1,
        100,
        Duration::from_millis(20),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { indexer_loop.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(80)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let mut tx = store.begin().await.unwrap();
    let state = tx.get_indexer_state().await.unwrap().unwrap();
    tx.commit().await.unwrap();
    assert_eq!(state.last_processed_block, 2);
    assert_eq!(state.last_processed_hash, "H2");
}

#[tokio::test]
async fn chain_id_mismatch_fails_fast_before_processing_any_block() {
    let chain = Arc::new(
        MockChainAdapterBuilder::new()
            .with_chain_id("real-chain-1")
            .with_block(block(1, "H1", vec![]))
            .with_latest_height(1)
            .build(),
    );
    let store = Arc::new(InMemoryStore::new());

    let indexer_loop = IndexerLoop::new(
        chain,
        store.clone(),
        PushBus::default(),
        "FACTORY".to_string(),
        "wrong-chain".to_string(),
        1,
        100,
        Duration::from_millis(20),
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let err = indexer_loop.run(shutdown_rx).await.unwrap_err();
    assert!(matches!(err, stone_pipeline::IndexerError::FatalConfig(_)));

    let mut tx = store.begin().await.unwrap();
    assert!(tx.get_indexer_state().await.unwrap().is_none());
}
