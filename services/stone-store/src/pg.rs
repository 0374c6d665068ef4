use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, Postgres, Row};
use stone_indexer_types::{
    Decimal, IndexerState, InterestAccrualEvent, Market, MarketSnapshot, Transaction, UserPosition,
};

use crate::error::StoreError;
use crate::{ProjectionStore, StoreTx};

/// `Postgres`-backed [`ProjectionStore`]. Holds a lazily-connected pool;
/// `open` establishes it, `close` tears it down — both idempotent, per the
/// "explicit lifecycle object" design note.
pub struct PgProjectionStore {
    database_url: String,
    pool: tokio::sync::RwLock<Option<sqlx::PgPool>>,
}

impl PgProjectionStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            pool: tokio::sync::RwLock::new(None),
        }
    }

    async fn pool(&self) -> Result<sqlx::PgPool, StoreError> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&self.database_url)
            .await?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    /// Run pending migrations. Exposed separately from `open` so the CLI's
    /// `migrate` subcommand can run it without starting the indexer loop.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectionStore for PgProjectionStore {
    async fn open(&self) -> Result<(), StoreError> {
        self.pool().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let pool = self.pool().await?;
        let tx = pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx: Some(tx) }))
    }
}

/// One open Postgres transaction. `tx` is `Some` until `commit`/`rollback`
/// consumes it; every other method borrows it via `as_mut`.
pub struct PgStoreTx {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgStoreTx {
    fn conn(&mut self) -> Result<&mut sqlx::PgConnection, StoreError> {
        self.tx
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or(StoreError::TransactionFinished)
    }
}

fn decimal(row: &sqlx::postgres::PgRow, col: &str) -> Result<Decimal, sqlx::Error> {
    row.try_get::<Decimal, _>(col)
}

fn optional_decimal(row: &sqlx::postgres::PgRow, col: &str) -> Result<Option<Decimal>, sqlx::Error> {
    row.try_get::<Option<Decimal>, _>(col)
}

fn market_from_row(row: sqlx::postgres::PgRow) -> Result<Market, StoreError> {
    Ok(Market {
        id: row.try_get("id")?,
        market_address: row.try_get("market_address")?,
        curator: row.try_get("curator")?,
        collateral_denom: row.try_get("collateral_denom")?,
        debt_denom: row.try_get("debt_denom")?,
        oracle: row.try_get("oracle")?,
        created_at: row.try_get("created_at")?,
        created_at_block: row.try_get("created_at_block")?,
        loan_to_value: decimal(&row, "loan_to_value")?,
        liquidation_threshold: decimal(&row, "liquidation_threshold")?,
        liquidation_bonus: decimal(&row, "liquidation_bonus")?,
        liquidation_protocol_fee: decimal(&row, "liquidation_protocol_fee")?,
        close_factor: decimal(&row, "close_factor")?,
        protocol_fee: decimal(&row, "protocol_fee")?,
        curator_fee: decimal(&row, "curator_fee")?,
        supply_cap: optional_decimal(&row, "supply_cap")?,
        borrow_cap: optional_decimal(&row, "borrow_cap")?,
        enabled: row.try_get("enabled")?,
        is_mutable: row.try_get("is_mutable")?,
        interest_rate_model: row.try_get("interest_rate_model")?,
        borrow_index: decimal(&row, "borrow_index")?,
        liquidity_index: decimal(&row, "liquidity_index")?,
        borrow_rate: decimal(&row, "borrow_rate")?,
        liquidity_rate: decimal(&row, "liquidity_rate")?,
        total_supply_scaled: decimal(&row, "total_supply_scaled")?,
        total_debt_scaled: decimal(&row, "total_debt_scaled")?,
        total_collateral: decimal(&row, "total_collateral")?,
        utilization: decimal(&row, "utilization")?,
        available_liquidity: decimal(&row, "available_liquidity")?,
        last_update: row.try_get("last_update")?,
    })
}

fn position_from_row(row: sqlx::postgres::PgRow) -> Result<UserPosition, StoreError> {
    Ok(UserPosition {
        market_id: row.try_get("market_id")?,
        user_address: row.try_get("user_address")?,
        supply_scaled: decimal(&row, "supply_scaled")?,
        debt_scaled: decimal(&row, "debt_scaled")?,
        collateral: decimal(&row, "collateral")?,
        first_interaction: row.try_get("first_interaction")?,
        last_interaction: row.try_get("last_interaction")?,
    })
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(StoreError::TransactionFinished),
        }
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => Ok(tx.rollback().await?),
            None => Err(StoreError::TransactionFinished),
        }
    }

    async fn get_indexer_state(&mut self) -> Result<Option<IndexerState>, StoreError> {
        let row = sqlx::query(
            "SELECT last_processed_block, last_processed_hash FROM indexer_state WHERE id = 1",
        )
        .fetch_optional(self.conn()?)
        .await?;
        Ok(row
            .map(|row| {
                Ok::<_, sqlx::Error>(IndexerState {
                    last_processed_block: row.try_get("last_processed_block")?,
                    last_processed_hash: row.try_get("last_processed_hash")?,
                })
            })
            .transpose()?)
    }

    async fn upsert_indexer_state(&mut self, height: i64, hash: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO indexer_state (id, last_processed_block, last_processed_hash)
             VALUES (1, $1, $2)
             ON CONFLICT (id) DO UPDATE SET
                last_processed_block = EXCLUDED.last_processed_block,
                last_processed_hash = EXCLUDED.last_processed_hash",
        )
        .bind(height)
        .bind(hash)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn list_market_addresses(&mut self) -> Result<Vec<(String, String)>, StoreError> {
        let rows = sqlx::query("SELECT id, market_address FROM markets")
            .fetch_all(self.conn()?)
            .await?;
        rows.into_iter()
            .map(|row| Ok((row.try_get("id")?, row.try_get("market_address")?)))
            .collect::<Result<_, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn get_market(&mut self, market_id: &str) -> Result<Option<Market>, StoreError> {
        let row = sqlx::query("SELECT * FROM markets WHERE id = $1")
            .bind(market_id)
            .fetch_optional(self.conn()?)
            .await?;
        row.map(market_from_row).transpose()
    }

    async fn get_market_by_address(
        &mut self,
        market_address: &str,
    ) -> Result<Option<Market>, StoreError> {
        let row = sqlx::query("SELECT * FROM markets WHERE market_address = $1")
            .bind(market_address)
            .fetch_optional(self.conn()?)
            .await?;
        row.map(market_from_row).transpose()
    }

    async fn insert_market(&mut self, market: &Market) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO markets (
                id, market_address, curator, collateral_denom, debt_denom, oracle,
                created_at, created_at_block,
                loan_to_value, liquidation_threshold, liquidation_bonus,
                liquidation_protocol_fee, close_factor, protocol_fee, curator_fee,
                supply_cap, borrow_cap, enabled, is_mutable, interest_rate_model,
                borrow_index, liquidity_index, borrow_rate, liquidity_rate,
                total_supply_scaled, total_debt_scaled, total_collateral,
                utilization, available_liquidity, last_update
             ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30
             )
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&market.id)
        .bind(&market.market_address)
        .bind(&market.curator)
        .bind(&market.collateral_denom)
        .bind(&market.debt_denom)
        .bind(&market.oracle)
        .bind(market.created_at)
        .bind(market.created_at_block)
        .bind(&market.loan_to_value)
        .bind(&market.liquidation_threshold)
        .bind(&market.liquidation_bonus)
        .bind(&market.liquidation_protocol_fee)
        .bind(&market.close_factor)
        .bind(&market.protocol_fee)
        .bind(&market.curator_fee)
        .bind(&market.supply_cap)
        .bind(&market.borrow_cap)
        .bind(market.enabled)
        .bind(market.is_mutable)
        .bind(&market.interest_rate_model)
        .bind(&market.borrow_index)
        .bind(&market.liquidity_index)
        .bind(&market.borrow_rate)
        .bind(&market.liquidity_rate)
        .bind(&market.total_supply_scaled)
        .bind(&market.total_debt_scaled)
        .bind(&market.total_collateral)
        .bind(&market.utilization)
        .bind(&market.available_liquidity)
        .bind(market.last_update)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_market(&mut self, market: &Market) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE markets SET
                loan_to_value = $2, liquidation_threshold = $3, liquidation_bonus = $4,
                liquidation_protocol_fee = $5, close_factor = $6, protocol_fee = $7,
                curator_fee = $8, supply_cap = $9, borrow_cap = $10, enabled = $11,
                is_mutable = $12, interest_rate_model = $13,
                borrow_index = $14, liquidity_index = $15, borrow_rate = $16,
                liquidity_rate = $17, total_supply_scaled = $18, total_debt_scaled = $19,
                total_collateral = $20, utilization = $21, available_liquidity = $22,
                last_update = $23
             WHERE id = $1",
        )
        .bind(&market.id)
        .bind(&market.loan_to_value)
        .bind(&market.liquidation_threshold)
        .bind(&market.liquidation_bonus)
        .bind(&market.liquidation_protocol_fee)
        .bind(&market.close_factor)
        .bind(&market.protocol_fee)
        .bind(&market.curator_fee)
        .bind(&market.supply_cap)
        .bind(&market.borrow_cap)
        .bind(market.enabled)
        .bind(market.is_mutable)
        .bind(&market.interest_rate_model)
        .bind(&market.borrow_index)
        .bind(&market.liquidity_index)
        .bind(&market.borrow_rate)
        .bind(&market.liquidity_rate)
        .bind(&market.total_supply_scaled)
        .bind(&market.total_debt_scaled)
        .bind(&market.total_collateral)
        .bind(&market.utilization)
        .bind(&market.available_liquidity)
        .bind(market.last_update)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn get_position(
        &mut self,
        market_id: &str,
        user_address: &str,
    ) -> Result<Option<UserPosition>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM user_positions WHERE market_id = $1 AND user_address = $2",
        )
        .bind(market_id)
        .bind(user_address)
        .fetch_optional(self.conn()?)
        .await?;
        row.map(position_from_row).transpose()
    }

    async fn upsert_position(&mut self, position: &UserPosition) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO user_positions (
                market_id, user_address, supply_scaled, debt_scaled, collateral,
                first_interaction, last_interaction
             ) VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (market_id, user_address) DO UPDATE SET
                supply_scaled = EXCLUDED.supply_scaled,
                debt_scaled = EXCLUDED.debt_scaled,
                collateral = EXCLUDED.collateral,
                last_interaction = EXCLUDED.last_interaction",
        )
        .bind(&position.market_id)
        .bind(&position.user_address)
        .bind(&position.supply_scaled)
        .bind(&position.debt_scaled)
        .bind(&position.collateral)
        .bind(position.first_interaction)
        .bind(position.last_interaction)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn transaction_exists(
        &mut self,
        tx_hash: &str,
        log_index: i32,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE tx_hash = $1 AND log_index = $2)",
        )
        .bind(tx_hash)
        .bind(log_index)
        .fetch_one(self.conn()?)
        .await?;
        Ok(row.try_get::<bool, _>(0)?)
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO transactions (
                tx_hash, log_index, market_id, block_height, block_time, action,
                user_address, borrower, amount, scaled_amount, debt_repaid,
                collateral_seized, protocol_fee, total_supply, total_debt,
                total_collateral, utilization, borrow_rate, liquidity_rate
             ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19
             )
             ON CONFLICT (tx_hash, log_index) DO NOTHING",
        )
        .bind(&tx.tx_hash)
        .bind(tx.log_index)
        .bind(&tx.market_id)
        .bind(tx.block_height)
        .bind(tx.block_time)
        .bind(tx.action.as_str())
        .bind(&tx.user_address)
        .bind(&tx.borrower)
        .bind(&tx.amount)
        .bind(&tx.scaled_amount)
        .bind(&tx.debt_repaid)
        .bind(&tx.collateral_seized)
        .bind(&tx.protocol_fee)
        .bind(&tx.total_supply)
        .bind(&tx.total_debt)
        .bind(&tx.total_collateral)
        .bind(&tx.utilization)
        .bind(&tx.borrow_rate)
        .bind(&tx.liquidity_rate)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn interest_accrual_event_exists(
        &mut self,
        tx_hash: &str,
        log_index: i32,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM interest_accrual_events WHERE tx_hash = $1 AND log_index = $2)",
        )
        .bind(tx_hash)
        .bind(log_index)
        .fetch_one(self.conn()?)
        .await?;
        Ok(row.try_get::<bool, _>(0)?)
    }

    async fn insert_interest_accrual_event(
        &mut self,
        event: &InterestAccrualEvent,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO interest_accrual_events (
                tx_hash, log_index, market_id, borrow_index, liquidity_index,
                borrow_rate, liquidity_rate, timestamp, block_height
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (tx_hash, log_index) DO NOTHING",
        )
        .bind(&event.tx_hash)
        .bind(event.log_index)
        .bind(&event.market_id)
        .bind(&event.borrow_index)
        .bind(&event.liquidity_index)
        .bind(&event.borrow_rate)
        .bind(&event.liquidity_rate)
        .bind(event.timestamp)
        .bind(event.block_height)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_market_snapshot(
        &mut self,
        snapshot: &MarketSnapshot,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO market_snapshots (
                market_id, timestamp, block_height, total_supply, total_debt,
                total_collateral, utilization, borrow_index, liquidity_index,
                borrow_rate, liquidity_rate, loan_to_value, liquidation_threshold, enabled
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (market_id, timestamp) DO NOTHING",
        )
        .bind(&snapshot.market_id)
        .bind(snapshot.timestamp)
        .bind(snapshot.block_height)
        .bind(&snapshot.total_supply)
        .bind(&snapshot.total_debt)
        .bind(&snapshot.total_collateral)
        .bind(&snapshot.utilization)
        .bind(&snapshot.borrow_index)
        .bind(&snapshot.liquidity_index)
        .bind(&snapshot.borrow_rate)
        .bind(&snapshot.liquidity_rate)
        .bind(&snapshot.loan_to_value)
        .bind(&snapshot.liquidation_threshold)
        .bind(snapshot.enabled)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_rows_from_height(&mut self, safe_height: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            sqlx::query("DELETE FROM transactions WHERE block_height >= $1").bind(safe_height),
        )
        .await?;
        let conn = self.conn()?;
        conn.execute(
            sqlx::query("DELETE FROM interest_accrual_events WHERE block_height >= $1")
                .bind(safe_height),
        )
        .await?;
        let conn = self.conn()?;
        conn.execute(
            sqlx::query("DELETE FROM market_snapshots WHERE block_height >= $1")
                .bind(safe_height),
        )
        .await?;
        Ok(())
    }
}
