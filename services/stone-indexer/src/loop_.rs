//! Indexer Loop (C6, `spec.md` §4.6). Polls the chain tip, watches for
//! reorgs at the trailing edge, and drives the block processor in batches
//! until told to stop.

use std::cmp::{max, min};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::watch;

use stone_chain::ChainAdapter;
use stone_indexer_types::IndexerState;
use stone_pipeline::{BlockProcessor, IndexerError, KnownMarkets, PushBus};
use stone_store::ProjectionStore;

/// Blocks below `tip` a reorg is assumed not to reach past (`spec.md` §4.6.2).
pub const REORG_DEPTH: i64 = 10;

pub struct IndexerLoop<C: ChainAdapter, S: ProjectionStore> {
    chain: Arc<C>,
    store: Arc<S>,
    processor: BlockProcessor<C, S>,
    expected_chain_id: String,
    start_block_height: i64,
    batch_size: u32,
    poll_interval: Duration,
}

impl<C: ChainAdapter, S: ProjectionStore> IndexerLoop<C, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<C>,
        store: Arc<S>,
        push: PushBus,
        factory_address: String,
        expected_chain_id: String,
        start_block_height: i64,
        batch_size: u32,
        poll_interval: Duration,
    ) -> Self {
        let processor = BlockProcessor::new(
            chain.clone(),
            store.clone(),
            push,
            factory_address,
            KnownMarkets::new(),
        );
        Self {
            chain,
            store,
            processor,
            expected_chain_id,
            start_block_height,
            batch_size,
            poll_interval,
        }
    }

    /// Runs until `shutdown` carries `true`. Returns once the current
    /// block (if any was in flight) has committed and C1/C3 have been torn
    /// down.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), IndexerError> {
        self.store.open().await?;
        self.check_chain_id().await?;
        self.rebuild_known_markets().await?;

        let mut retry_backoff = ExponentialBackoff {
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        while !*shutdown.borrow() {
            let tip = self.chain.latest_height().await?;
            let state = self.load_state().await?;
            let last = state
                .as_ref()
                .map(|s| s.last_processed_block)
                .unwrap_or(self.start_block_height - 1);

            if last >= tip as i64 {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            if let Some(state) = &state {
                if self.detect_reorg(state, tip).await {
                    if let Err(err) = self.handle_reorg(state.last_processed_block).await {
                        tracing::error!(error = %err, "reorg rollback failed");
                        tokio::time::sleep(retry_backoff.next_backoff().unwrap_or(self.poll_interval)).await;
                    } else {
                        retry_backoff.reset();
                    }
                    continue;
                }
            }

            let to = min(last + self.batch_size as i64, tip as i64);
            let mut block_failed = false;
            for height in (last + 1)..=to {
                if *shutdown.borrow() {
                    break;
                }
                match self.processor.process_block(height as u64).await {
                    Ok(()) => {}
                    Err(err) => {
                        if err.is_transient() {
                            tracing::warn!(height, error = %err, "transient error processing block, will retry");
                        } else {
                            tracing::error!(height, error = %err, "block processing failed");
                        }
                        block_failed = true;
                        break;
                    }
                }
            }

            if block_failed {
                tokio::time::sleep(retry_backoff.next_backoff().unwrap_or(self.poll_interval)).await;
            } else {
                retry_backoff.reset();
                tokio::task::yield_now().await;
            }
        }

        self.chain.disconnect().await?;
        self.store.close().await?;
        Ok(())
    }

    /// `spec.md` §6. Catches a misconfigured `rpc_endpoint` pointed at the
    /// wrong network before any block is processed, rather than silently
    /// indexing it.
    async fn check_chain_id(&self) -> Result<(), IndexerError> {
        let actual = self.chain.chain_id().await?;
        if actual != self.expected_chain_id {
            return Err(IndexerError::FatalConfig(format!(
                "configured chain_id {:?} does not match connected chain {:?}",
                self.expected_chain_id, actual
            )));
        }
        Ok(())
    }

    async fn rebuild_known_markets(&self) -> Result<(), IndexerError> {
        let mut tx = self.store.begin().await?;
        self.processor.known_markets().rebuild_from(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load_state(&self) -> Result<Option<IndexerState>, IndexerError> {
        let mut tx = self.store.begin().await?;
        let state = tx.get_indexer_state().await?;
        tx.commit().await?;
        Ok(state)
    }

    /// `spec.md` §4.6.1. Any RPC failure is treated as "no reorg" — never
    /// falsely declare one.
    async fn detect_reorg(&self, state: &IndexerState, tip: u64) -> bool {
        if tip as i64 <= state.last_processed_block {
            return false;
        }
        match self.chain.block(state.last_processed_block as u64).await {
            Ok(block) => block.hash != state.last_processed_hash,
            Err(_) => false,
        }
    }

    /// `spec.md` §4.6.2. Only the event-log tables (transactions, interest
    /// accrual events, snapshots) are rolled back here; `markets` and
    /// `user_positions` are left as the orphaned branch last wrote them and
    /// self-heal on the next event for that market, since both are
    /// last-write-wins projections rather than append logs.
    async fn handle_reorg(&self, from_height: i64) -> Result<(), IndexerError> {
        let safe = max(self.start_block_height, from_height - REORG_DEPTH);
        let canonical = self.chain.block(safe as u64).await?;

        let mut tx = self.store.begin().await?;
        tx.delete_rows_from_height(safe).await?;
        tx.upsert_indexer_state(safe, &canonical.hash).await?;
        tx.commit().await?;

        tracing::warn!(from_height, safe, "reorg detected, checkpoint rolled back");
        Ok(())
    }
}
