//! The projection's derived data model (`spec.md` §3).
//!
//! These are plain value types: the storage layer (`stone-store`) maps them
//! to rows, the pipeline (`stone-pipeline`) mutates them inside a
//! transaction, and `stone-indexer-testing` builds fixtures out of them.
//! None of them know how they are persisted.

use serde::{Deserialize, Serialize};

use crate::decimal::Decimal;

/// Singleton checkpoint: the durable frontier of projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerState {
    pub last_processed_block: i64,
    pub last_processed_hash: String,
}

/// One lending market, instantiated by the factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub market_address: String,

    // Immutable config
    pub curator: String,
    pub collateral_denom: String,
    pub debt_denom: String,
    pub oracle: String,
    pub created_at: i64,
    pub created_at_block: i64,

    // Mutable params
    pub loan_to_value: Decimal,
    pub liquidation_threshold: Decimal,
    pub liquidation_bonus: Decimal,
    pub liquidation_protocol_fee: Decimal,
    pub close_factor: Decimal,
    pub protocol_fee: Decimal,
    pub curator_fee: Decimal,
    pub supply_cap: Option<Decimal>,
    pub borrow_cap: Option<Decimal>,
    pub enabled: bool,
    pub is_mutable: bool,
    pub interest_rate_model: serde_json::Value,

    // State
    pub borrow_index: Decimal,
    pub liquidity_index: Decimal,
    pub borrow_rate: Decimal,
    pub liquidity_rate: Decimal,
    pub total_supply_scaled: Decimal,
    pub total_debt_scaled: Decimal,
    pub total_collateral: Decimal,
    pub utilization: Decimal,
    pub available_liquidity: Decimal,
    pub last_update: i64,
}

impl Market {
    /// Dereferenced total supply: `total_supply_scaled * liquidity_index`.
    pub fn total_supply(&self) -> Decimal {
        &self.total_supply_scaled * &self.liquidity_index
    }

    /// Dereferenced total debt: `total_debt_scaled * borrow_index`.
    pub fn total_debt(&self) -> Decimal {
        &self.total_debt_scaled * &self.borrow_index
    }

    /// Recompute `available_liquidity` from the dereferenced totals. Called
    /// by every handler that mutates supply or debt, mirroring the
    /// teacher's `MarketState::available_liquidity()` derivation.
    pub fn recompute_available_liquidity(&mut self) {
        let supply = self.total_supply();
        let debt = self.total_debt();
        self.available_liquidity = if supply > debt {
            supply - debt
        } else {
            Decimal::from(0)
        };
    }
}

/// A user's aggregate position within a single market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPosition {
    pub market_id: String,
    pub user_address: String,
    pub supply_scaled: Decimal,
    pub debt_scaled: Decimal,
    pub collateral: Decimal,
    pub first_interaction: i64,
    pub last_interaction: i64,
}

impl UserPosition {
    pub fn new_at(market_id: impl Into<String>, user_address: impl Into<String>, at: i64) -> Self {
        Self {
            market_id: market_id.into(),
            user_address: user_address.into(),
            supply_scaled: Decimal::from(0),
            debt_scaled: Decimal::from(0),
            collateral: Decimal::from(0),
            first_interaction: at,
            last_interaction: at,
        }
    }
}

/// The financial-event actions that produce a [`Transaction`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxAction {
    Supply,
    Withdraw,
    SupplyCollateral,
    WithdrawCollateral,
    Borrow,
    Repay,
    Liquidate,
}

impl TxAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxAction::Supply => "SUPPLY",
            TxAction::Withdraw => "WITHDRAW",
            TxAction::SupplyCollateral => "SUPPLY_COLLATERAL",
            TxAction::WithdrawCollateral => "WITHDRAW_COLLATERAL",
            TxAction::Borrow => "BORROW",
            TxAction::Repay => "REPAY",
            TxAction::Liquidate => "LIQUIDATE",
        }
    }
}

/// One financial event, keyed by `tx_hash:log_index`.
///
/// `user_address` is always the acting principal (never the recipient —
/// see `spec.md` §4.3's acting-principal table). `borrower` is only
/// populated for `Repay` and `Liquidate`, where the acting principal and
/// the affected position diverge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_hash: String,
    pub log_index: i32,
    pub market_id: String,
    pub block_height: i64,
    pub block_time: i64,
    pub action: TxAction,
    pub user_address: String,
    pub borrower: Option<String>,

    pub amount: Option<Decimal>,
    pub scaled_amount: Option<Decimal>,
    pub debt_repaid: Option<Decimal>,
    pub collateral_seized: Option<Decimal>,
    pub protocol_fee: Option<Decimal>,

    // Denormalized market-state snapshot, as reported by the event.
    pub total_supply: Decimal,
    pub total_debt: Decimal,
    pub total_collateral: Decimal,
    pub utilization: Decimal,
    pub borrow_rate: Decimal,
    pub liquidity_rate: Decimal,
}

/// One `accrue_interest` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestAccrualEvent {
    pub tx_hash: String,
    pub log_index: i32,
    pub market_id: String,
    pub borrow_index: Decimal,
    pub liquidity_index: Decimal,
    pub borrow_rate: Decimal,
    pub liquidity_rate: Decimal,
    pub timestamp: i64,
    pub block_height: i64,
}

/// A materialized point-in-time view of a market, identified by
/// `market_id:timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub market_id: String,
    pub timestamp: i64,
    pub block_height: i64,
    pub total_supply: Decimal,
    pub total_debt: Decimal,
    pub total_collateral: Decimal,
    pub utilization: Decimal,
    pub borrow_index: Decimal,
    pub liquidity_index: Decimal,
    pub borrow_rate: Decimal,
    pub liquidity_rate: Decimal,
    pub loan_to_value: Decimal,
    pub liquidation_threshold: Decimal,
    pub enabled: bool,
}

impl MarketSnapshot {
    /// Build the snapshot implied by a market's current state.
    pub fn from_market(market: &Market, timestamp: i64, block_height: i64) -> Self {
        Self {
            market_id: market.id.clone(),
            timestamp,
            block_height,
            total_supply: market.total_supply(),
            total_debt: market.total_debt(),
            total_collateral: market.total_collateral.clone(),
            utilization: market.utilization.clone(),
            borrow_index: market.borrow_index.clone(),
            liquidity_index: market.liquidity_index.clone(),
            borrow_rate: market.borrow_rate.clone(),
            liquidity_rate: market.liquidity_rate.clone(),
            loan_to_value: market.loan_to_value.clone(),
            liquidation_threshold: market.liquidation_threshold.clone(),
            enabled: market.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_market() -> Market {
        Market {
            id: "1".into(),
            market_address: "m1".into(),
            curator: "curator".into(),
            collateral_denom: "uatom".into(),
            debt_denom: "uusdc".into(),
            oracle: "oracle".into(),
            created_at: 0,
            created_at_block: 0,
            loan_to_value: "0.8".parse().unwrap(),
            liquidation_threshold: "0.85".parse().unwrap(),
            liquidation_bonus: "0.05".parse().unwrap(),
            liquidation_protocol_fee: "0.02".parse().unwrap(),
            close_factor: "0.5".parse().unwrap(),
            protocol_fee: "0.1".parse().unwrap(),
            curator_fee: "0.05".parse().unwrap(),
            supply_cap: None,
            borrow_cap: None,
            enabled: true,
            is_mutable: false,
            interest_rate_model: serde_json::json!({}),
            borrow_index: "1".parse().unwrap(),
            liquidity_index: "1".parse().unwrap(),
            borrow_rate: "0".parse().unwrap(),
            liquidity_rate: "0".parse().unwrap(),
            total_supply_scaled: "1000".parse().unwrap(),
            total_debt_scaled: "500".parse().unwrap(),
            total_collateral: "0".parse().unwrap(),
            utilization: "0.5".parse().unwrap(),
            available_liquidity: "0".parse().unwrap(),
            last_update: 0,
        }
    }

    #[test]
    fn dereferences_totals_via_indices() {
        let market = sample_market();
        assert_eq!(market.total_supply(), "1000".parse::<Decimal>().unwrap());
        assert_eq!(market.total_debt(), "500".parse::<Decimal>().unwrap());
    }

    #[test]
    fn available_liquidity_floors_at_zero() {
        let mut market = sample_market();
        market.total_debt_scaled = "1000".parse().unwrap();
        market.borrow_index = "2".parse().unwrap(); // total_debt = 2000 > total_supply = 1000
        market.recompute_available_liquidity();
        assert_eq!(market.available_liquidity, Decimal::from(0));
    }
}
