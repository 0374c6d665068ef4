use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use stone_indexer_types::{
    IndexerState, InterestAccrualEvent, Market, MarketSnapshot, Transaction, UserPosition,
};
use stone_store::{ProjectionStore, StoreError, StoreTx};

/// The durable state a [`InMemoryStore`] holds, cloned into each open
/// transaction and swapped back in atomically on commit. Good enough for
/// single-process tests; it makes no attempt at the isolation levels the
/// Postgres store gets from the database.
#[derive(Default, Clone)]
struct State {
    indexer_state: Option<IndexerState>,
    markets: HashMap<String, Market>,
    positions: HashMap<(String, String), UserPosition>,
    transactions: HashMap<(String, i32), Transaction>,
    interest_accrual_events: HashMap<(String, i32), InterestAccrualEvent>,
    market_snapshots: HashMap<(String, i64), MarketSnapshot>,
}

/// In-process stand-in for [`stone_store::PgProjectionStore`].
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }
}

#[async_trait]
impl ProjectionStore for InMemoryStore {
    async fn open(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let snapshot = self.state.lock().await.clone();
        Ok(Box::new(InMemoryTx {
            shared: self.state.clone(),
            working: Some(snapshot),
        }))
    }
}

struct InMemoryTx {
    shared: Arc<Mutex<State>>,
    working: Option<State>,
}

impl InMemoryTx {
    fn state(&mut self) -> Result<&mut State, StoreError> {
        self.working.as_mut().ok_or(StoreError::TransactionFinished)
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let working = self.working.take().ok_or(StoreError::TransactionFinished)?;
        *self.shared.lock().await = working;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.working.take().ok_or(StoreError::TransactionFinished)?;
        Ok(())
    }

    async fn get_indexer_state(&mut self) -> Result<Option<IndexerState>, StoreError> {
        Ok(self.state()?.indexer_state.clone())
    }

    async fn upsert_indexer_state(&mut self, height: i64, hash: &str) -> Result<(), StoreError> {
        self.state()?.indexer_state = Some(IndexerState {
            last_processed_block: height,
            last_processed_hash: hash.to_string(),
        });
        Ok(())
    }

    async fn list_market_addresses(&mut self) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .state()?
            .markets
            .values()
            .map(|m| (m.id.clone(), m.market_address.clone()))
            .collect())
    }

    async fn get_market(&mut self, market_id: &str) -> Result<Option<Market>, StoreError> {
        Ok(self.state()?.markets.get(market_id).cloned())
    }

    async fn get_market_by_address(
        &mut self,
        market_address: &str,
    ) -> Result<Option<Market>, StoreError> {
        Ok(self
            .state()?
            .markets
            .values()
            .find(|m| m.market_address == market_address)
            .cloned())
    }

    async fn insert_market(&mut self, market: &Market) -> Result<bool, StoreError> {
        let state = self.state()?;
        if state.markets.contains_key(&market.id) {
            return Ok(false);
        }
        state.markets.insert(market.id.clone(), market.clone());
        Ok(true)
    }

    async fn update_market(&mut self, market: &Market) -> Result<(), StoreError> {
        self.state()?
            .markets
            .insert(market.id.clone(), market.clone());
        Ok(())
    }

    async fn get_position(
        &mut self,
        market_id: &str,
        user_address: &str,
    ) -> Result<Option<UserPosition>, StoreError> {
        Ok(self
            .state()?
            .positions
            .get(&(market_id.to_string(), user_address.to_string()))
            .cloned())
    }

    async fn upsert_position(&mut self, position: &UserPosition) -> Result<(), StoreError> {
        self.state()?.positions.insert(
            (position.market_id.clone(), position.user_address.clone()),
            position.clone(),
        );
        Ok(())
    }

    async fn transaction_exists(
        &mut self,
        tx_hash: &str,
        log_index: i32,
    ) -> Result<bool, StoreError> {
        Ok(self
            .state()?
            .transactions
            .contains_key(&(tx_hash.to_string(), log_index)))
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<bool, StoreError> {
        let state = self.state()?;
        let key = (tx.tx_hash.clone(), tx.log_index);
        if state.transactions.contains_key(&key) {
            return Ok(false);
        }
        state.transactions.insert(key, tx.clone());
        Ok(true)
    }

    async fn interest_accrual_event_exists(
        &mut self,
        tx_hash: &str,
        log_index: i32,
    ) -> Result<bool, StoreError> {
        Ok(self
            .state()?
            .interest_accrual_events
            .contains_key(&(tx_hash.to_string(), log_index)))
    }

    async fn insert_interest_accrual_event(
        &mut self,
        event: &InterestAccrualEvent,
    ) -> Result<bool, StoreError> {
        let state = self.state()?;
        let key = (event.tx_hash.clone(), event.log_index);
        if state.interest_accrual_events.contains_key(&key) {
            return Ok(false);
        }
        state.interest_accrual_events.insert(key, event.clone());
        Ok(true)
    }

    async fn insert_market_snapshot(
        &mut self,
        snapshot: &MarketSnapshot,
    ) -> Result<bool, StoreError> {
        let state = self.state()?;
        let key = (snapshot.market_id.clone(), snapshot.timestamp);
        if state.market_snapshots.contains_key(&key) {
            return Ok(false);
        }
        state.market_snapshots.insert(key, snapshot.clone());
        Ok(true)
    }

    async fn delete_rows_from_height(&mut self, safe_height: i64) -> Result<(), StoreError> {
        let state = self.state()?;
        state
            .transactions
            .retain(|_, tx| tx.block_height < safe_height);
        state
            .interest_accrual_events
            .retain(|_, event| event.block_height < safe_height);
        state
            .market_snapshots
            .retain(|_, snapshot| snapshot.block_height < safe_height);
        Ok(())
    }
}
