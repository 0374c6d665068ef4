//! Block Processor (C5). Given a block height, loads it via the chain
//! adapter, dispatches every qualifying event to a handler inside its own
//! store transaction, and advances the checkpoint once the whole block has
//! committed cleanly.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use stone_chain::ChainAdapter;
use stone_decoder::{self, EventMeta};
use stone_store::{ProjectionStore, StoreTx};

use crate::error::IndexerError;
use crate::handlers::{self, HandlerEffects};
use crate::push::{PushBus, PushEvent};

/// The set of market contract addresses the processor currently tracks,
/// grown by `market_instantiated`. Process-wide, append-only during
/// normal operation (§5) — wrapped in an `RwLock` so a future sharded
/// processor can read it concurrently.
#[derive(Clone, Default)]
pub struct KnownMarkets(Arc<RwLock<HashSet<String>>>);

impl KnownMarkets {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, market_address: &str) -> bool {
        self.0.read().await.contains(market_address)
    }

    pub async fn insert(&self, market_address: String) {
        self.0.write().await.insert(market_address);
    }

    /// Rebuild from the store's `Market.market_address` column — called
    /// once at startup (§4.5).
    pub async fn rebuild_from(&self, tx: &mut dyn StoreTx) -> Result<(), IndexerError> {
        let addresses = tx.list_market_addresses().await?;
        let mut set = self.0.write().await;
        set.clear();
        set.extend(addresses.into_iter().map(|(_, address)| address));
        Ok(())
    }
}

pub struct BlockProcessor<C: ChainAdapter, S: ProjectionStore> {
    chain: Arc<C>,
    store: Arc<S>,
    push: PushBus,
    factory_address: String,
    known_markets: KnownMarkets,
}

impl<C: ChainAdapter, S: ProjectionStore> BlockProcessor<C, S> {
    pub fn new(
        chain: Arc<C>,
        store: Arc<S>,
        push: PushBus,
        factory_address: String,
        known_markets: KnownMarkets,
    ) -> Self {
        Self {
            chain,
            store,
            push,
            factory_address,
            known_markets,
        }
    }

    pub fn known_markets(&self) -> &KnownMarkets {
        &self.known_markets
    }

    /// §4.5. Returns once `height`'s checkpoint has durably advanced.
    pub async fn process_block(&self, height: u64) -> Result<(), IndexerError> {
        let block = self.chain.block(height).await?;

        if block.tx_hashes.is_empty() {
            let mut tx = self.store.begin().await?;
            tx.upsert_indexer_state(height as i64, &block.hash).await?;
            tx.commit().await?;
            return Ok(());
        }

        for tx_hash in &block.tx_hashes {
            let tx_info = self.chain.tx(tx_hash).await?;
            if !tx_info.succeeded() {
                continue;
            }
            for (log_index, event) in tx_info.events.iter().enumerate() {
                if event.event_type != "wasm" {
                    continue;
                }
                let Some(contract_address) = stone_decoder::contract_address(event) else {
                    continue;
                };
                let meta = EventMeta {
                    tx_hash: tx_info.hash.clone(),
                    log_index: log_index as i32,
                    block_height: height as i64,
                    block_time: block.time,
                    contract_address: contract_address.to_string(),
                };

                if contract_address == self.factory_address {
                    self.dispatch_factory_event(event, &meta).await?;
                } else if self.known_markets.contains(contract_address).await {
                    self.dispatch_market_event(event, &meta).await?;
                }
            }
        }

        let mut tx = self.store.begin().await?;
        tx.upsert_indexer_state(height as i64, &block.hash).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn dispatch_factory_event(
        &self,
        event: &stone_chain::WasmEvent,
        meta: &EventMeta,
    ) -> Result<(), IndexerError> {
        let decoded = match stone_decoder::decode_factory_event(event) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!(error = %err, tx_hash = %meta.tx_hash, "dropping malformed factory event");
                return Ok(());
            }
        };
        let Some(stone_decoder::DomainEvent::MarketInstantiated {
            market_id,
            market_address,
        }) = decoded
        else {
            return Ok(());
        };

        let mut store_tx = self.store.begin().await?;
        let effects = handlers::handle_market_instantiated(
            &mut *store_tx,
            self.chain.as_ref(),
            meta,
            &market_id,
            &market_address,
        )
        .await?;
        store_tx.commit().await?;

        self.known_markets.insert(market_address).await;
        self.publish(effects);
        Ok(())
    }

    async fn dispatch_market_event(
        &self,
        event: &stone_chain::WasmEvent,
        meta: &EventMeta,
    ) -> Result<(), IndexerError> {
        let decoded = match stone_decoder::decode_market_event(event) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!(error = %err, tx_hash = %meta.tx_hash, "dropping malformed market event");
                return Ok(());
            }
        };
        let Some(event) = decoded else {
            return Ok(());
        };

        let mut store_tx = self.store.begin().await?;
        let effects = handlers::handle_market_event(&mut *store_tx, meta, event).await?;
        store_tx.commit().await?;

        self.publish(effects);
        Ok(())
    }

    fn publish(&self, effects: HandlerEffects) {
        if let Some(market_id) = &effects.market_updated {
            self.push.publish(PushEvent::MarketUpdated {
                market_id: market_id.clone(),
            });
        }
        if let Some(user_address) = effects.position_updated {
            self.push
                .publish(PushEvent::PositionUpdated { user_address });
        }
        if let Some(market_id) = effects.new_transaction {
            self.push.publish(PushEvent::NewTransaction { market_id });
        }
    }
}
