//! Projection Store (C3).
//!
//! The trait boundary event handlers run against — a single logical
//! transaction per handler, with entity reads/writes keyed the way `§3`
//! describes and idempotent upserts backed by unique constraints. A
//! Postgres implementation ([`pg::PgProjectionStore`]) is the only one
//! shipped here; `stone-indexer-testing` provides an in-memory one for
//! handler unit tests.

mod error;
mod pg;

pub use error::StoreError;
pub use pg::{PgProjectionStore, PgStoreTx};

use async_trait::async_trait;
use stone_indexer_types::{
    IndexerState, InterestAccrualEvent, Market, MarketSnapshot, Transaction, UserPosition,
};

/// Owns the connection lifecycle and hands out transactions. Implementors
/// must make `open`/`close` idempotent — the indexer loop calls `close`
/// unconditionally during shutdown regardless of whether `open` ran.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn open(&self) -> Result<(), StoreError>;
    async fn close(&self) -> Result<(), StoreError>;

    /// Start one transaction. Every entity read/write a handler performs
    /// must go through the returned handle; dropping it without calling
    /// `commit` rolls back.
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;
}

/// One in-flight transaction. `commit`/`rollback` consume `self` (via
/// `Box<Self>`) so a transaction cannot be reused after it ends — the
/// same discipline the teacher's `DepsMut` borrow enforces for a single
/// contract execution.
#[async_trait]
pub trait StoreTx: Send {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;

    async fn get_indexer_state(&mut self) -> Result<Option<IndexerState>, StoreError>;
    async fn upsert_indexer_state(&mut self, height: i64, hash: &str) -> Result<(), StoreError>;

    /// All market addresses known so far, for rebuilding the in-memory
    /// known-market-addresses set on startup.
    async fn list_market_addresses(&mut self) -> Result<Vec<(String, String)>, StoreError>;

    async fn get_market(&mut self, market_id: &str) -> Result<Option<Market>, StoreError>;
    async fn get_market_by_address(
        &mut self,
        market_address: &str,
    ) -> Result<Option<Market>, StoreError>;
    /// Insert a brand-new market. Returns `Ok(false)` without writing
    /// anything if `market.id` already exists (idempotent replay of
    /// `market_instantiated`).
    async fn insert_market(&mut self, market: &Market) -> Result<bool, StoreError>;
    /// Overwrite a market's mutable params/state. Callers must have read
    /// the row earlier in the same transaction.
    async fn update_market(&mut self, market: &Market) -> Result<(), StoreError>;

    async fn get_position(
        &mut self,
        market_id: &str,
        user_address: &str,
    ) -> Result<Option<UserPosition>, StoreError>;
    /// Insert-or-update a position by `(market_id, user_address)`.
    async fn upsert_position(&mut self, position: &UserPosition) -> Result<(), StoreError>;

    /// True if a `Transaction` row already exists for `(tx_hash,
    /// log_index)`. Handlers check this *before* mutating `market`/
    /// `position` state, so that replaying a block from its start after a
    /// later event's transient failure is a no-op on the events an earlier
    /// attempt already committed.
    async fn transaction_exists(
        &mut self,
        tx_hash: &str,
        log_index: i32,
    ) -> Result<bool, StoreError>;

    /// Insert a transaction row. Returns `Ok(false)` without writing if
    /// `(tx_hash, log_index)` already exists.
    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<bool, StoreError>;

    /// Same idempotence check as [`StoreTx::transaction_exists`], for
    /// `InterestAccrualEvent` rows.
    async fn interest_accrual_event_exists(
        &mut self,
        tx_hash: &str,
        log_index: i32,
    ) -> Result<bool, StoreError>;

    /// Insert an interest-accrual row. Returns `Ok(false)` if
    /// `(tx_hash, log_index)` already exists.
    async fn insert_interest_accrual_event(
        &mut self,
        event: &InterestAccrualEvent,
    ) -> Result<bool, StoreError>;

    /// Insert a market snapshot. Returns `Ok(false)` if
    /// `(market_id, timestamp)` already exists.
    async fn insert_market_snapshot(&mut self, snapshot: &MarketSnapshot)
        -> Result<bool, StoreError>;

    /// Delete `Transaction`/`InterestAccrualEvent`/`MarketSnapshot` rows
    /// with `block_height >= safe_height`, as part of reorg recovery.
    async fn delete_rows_from_height(&mut self, safe_height: i64) -> Result<(), StoreError>;
}
