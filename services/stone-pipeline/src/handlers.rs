//! Event Handlers (C4). One function per recognized action; each runs
//! its reads and writes against a single open [`StoreTx`] and returns the
//! post-commit notifications the caller should publish on the push bus.

use serde::Deserialize;
use serde_json::json;
use stone_chain::ChainAdapter;
use stone_decoder::{DomainEvent, EventMeta};
use stone_indexer_types::{
    Decimal, InterestAccrualEvent, Market, MarketSnapshot, Transaction, TxAction, UserPosition,
};
use stone_store::StoreTx;

use crate::error::IndexerError;

/// What a handler touched, for the processor to publish after commit. All
/// fields default to "nothing happened" so a no-op replay publishes
/// nothing.
#[derive(Debug, Default, Clone)]
pub struct HandlerEffects {
    pub market_updated: Option<String>,
    pub position_updated: Option<String>,
    pub new_transaction: Option<String>,
}

fn zero() -> Decimal {
    Decimal::from(0)
}

/// Loads the market a market-event is addressed to. A missing market is a
/// data violation on the referencing event, but since every field the
/// handler would write depends on it, the whole block is aborted and
/// retried once the market's own `market_instantiated` event has been
/// processed.
async fn load_market(tx: &mut dyn StoreTx, market_address: &str) -> Result<Market, IndexerError> {
    tx.get_market_by_address(market_address)
        .await?
        .ok_or_else(|| {
            IndexerError::DataViolation(format!(
                "no market registered for address {market_address}"
            ))
        })
}

async fn lazy_create_position(
    tx: &mut dyn StoreTx,
    market_id: &str,
    user_address: &str,
    at: i64,
) -> Result<UserPosition, IndexerError> {
    match tx.get_position(market_id, user_address).await? {
        Some(position) => Ok(position),
        None => Ok(UserPosition::new_at(market_id, user_address, at)),
    }
}

/// Overwrites the indices/rates/utilization a market-state event reports,
/// per the "overwrite, never re-derive" rule in §4.3.2–§4.3.6.
fn overwrite_market_state(
    market: &mut Market,
    borrow_index: Decimal,
    liquidity_index: Decimal,
    borrow_rate: Decimal,
    liquidity_rate: Decimal,
    utilization: Decimal,
    at: i64,
) {
    market.borrow_index = borrow_index;
    market.liquidity_index = liquidity_index;
    market.borrow_rate = borrow_rate;
    market.liquidity_rate = liquidity_rate;
    market.utilization = utilization;
    market.last_update = at;
    market.recompute_available_liquidity();
}

fn snapshot(market: &Market, meta: &EventMeta) -> MarketSnapshot {
    MarketSnapshot::from_market(market, meta.block_time, meta.block_height)
}

/// §4.3.1 — `market_instantiated`. Queries the new market contract for its
/// config and params, then seeds the Market row and an initial snapshot.
pub async fn handle_market_instantiated(
    tx: &mut dyn StoreTx,
    chain: &dyn ChainAdapter,
    meta: &EventMeta,
    market_id: &str,
    market_address: &str,
) -> Result<HandlerEffects, IndexerError> {
    if tx.get_market(market_id).await?.is_some() {
        return Ok(HandlerEffects::default());
    }

    #[derive(Deserialize)]
    struct ConfigResponse {
        curator: String,
        collateral_denom: String,
        debt_denom: String,
        oracle: String,
        #[serde(default)]
        interest_rate_model: serde_json::Value,
    }

    #[derive(Deserialize)]
    struct ParamsResponse {
        loan_to_value: Decimal,
        liquidation_threshold: Decimal,
        liquidation_bonus: Decimal,
        liquidation_protocol_fee: Decimal,
        close_factor: Decimal,
        protocol_fee: Decimal,
        curator_fee: Decimal,
        supply_cap: Option<Decimal>,
        borrow_cap: Option<Decimal>,
        enabled: bool,
        is_mutable: bool,
    }

    let config_raw = chain
        .query_contract(market_address, &json!({"config": {}}))
        .await?;
    let config: ConfigResponse = serde_json::from_value(config_raw).map_err(|e| {
        IndexerError::DataViolation(format!(
            "malformed config response from {market_address}: {e}"
        ))
    })?;

    let params_raw = chain
        .query_contract(market_address, &json!({"params": {}}))
        .await?;
    let params: ParamsResponse = serde_json::from_value(params_raw).map_err(|e| {
        IndexerError::DataViolation(format!(
            "malformed params response from {market_address}: {e}"
        ))
    })?;

    let market = Market {
        id: market_id.to_string(),
        market_address: market_address.to_string(),
        curator: config.curator,
        collateral_denom: config.collateral_denom,
        debt_denom: config.debt_denom,
        oracle: config.oracle,
        created_at: meta.block_time,
        created_at_block: meta.block_height,
        loan_to_value: params.loan_to_value,
        liquidation_threshold: params.liquidation_threshold,
        liquidation_bonus: params.liquidation_bonus,
        liquidation_protocol_fee: params.liquidation_protocol_fee,
        close_factor: params.close_factor,
        protocol_fee: params.protocol_fee,
        curator_fee: params.curator_fee,
        supply_cap: params.supply_cap,
        borrow_cap: params.borrow_cap,
        enabled: params.enabled,
        is_mutable: params.is_mutable,
        interest_rate_model: config.interest_rate_model,
        borrow_index: Decimal::from(1),
        liquidity_index: Decimal::from(1),
        borrow_rate: zero(),
        liquidity_rate: zero(),
        total_supply_scaled: zero(),
        total_debt_scaled: zero(),
        total_collateral: zero(),
        utilization: zero(),
        available_liquidity: zero(),
        last_update: meta.block_time,
    };

    if !tx.insert_market(&market).await? {
        return Ok(HandlerEffects::default());
    }
    tx.insert_market_snapshot(&snapshot(&market, meta)).await?;

    Ok(HandlerEffects {
        market_updated: Some(market.id),
        ..Default::default()
    })
}

/// §4.3.2 — `supply` and `borrow` share the monotone-increasing-scaled
/// shape; dispatched from [`handle_market_event`] with the right field set.
async fn handle_increase(
    tx: &mut dyn StoreTx,
    meta: &EventMeta,
    action: TxAction,
    actor: String,
    beneficiary: String,
    amount: Decimal,
    scaled_amount: Decimal,
    borrow_index: Decimal,
    liquidity_index: Decimal,
    utilization: Decimal,
) -> Result<HandlerEffects, IndexerError> {
    if tx.transaction_exists(&meta.tx_hash, meta.log_index).await? {
        return Ok(HandlerEffects::default());
    }

    let mut market = load_market(tx, &meta.contract_address).await?;
    let (borrow_rate, liquidity_rate) = (market.borrow_rate.clone(), market.liquidity_rate.clone());
    match action {
        TxAction::Supply => {
            market.total_supply_scaled = &market.total_supply_scaled + &scaled_amount
        }
        TxAction::Borrow => market.total_debt_scaled = &market.total_debt_scaled + &scaled_amount,
        _ => unreachable!("handle_increase only serves Supply/Borrow"),
    }
    overwrite_market_state(
        &mut market,
        borrow_index,
        liquidity_index,
        borrow_rate,
        liquidity_rate,
        utilization,
        meta.block_time,
    );
    tx.update_market(&market).await?;

    let mut position = lazy_create_position(tx, &market.id, &beneficiary, meta.block_time).await?;
    match action {
        TxAction::Supply => position.supply_scaled = &position.supply_scaled + &scaled_amount,
        TxAction::Borrow => position.debt_scaled = &position.debt_scaled + &scaled_amount,
        _ => unreachable!(),
    }
    position.last_interaction = meta.block_time;
    tx.upsert_position(&position).await?;

    let transaction = Transaction {
        tx_hash: meta.tx_hash.clone(),
        log_index: meta.log_index,
        market_id: market.id.clone(),
        block_height: meta.block_height,
        block_time: meta.block_time,
        action,
        user_address: actor,
        borrower: None,
        amount: Some(amount),
        scaled_amount: Some(scaled_amount),
        debt_repaid: None,
        collateral_seized: None,
        protocol_fee: None,
        total_supply: market.total_supply(),
        total_debt: market.total_debt(),
        total_collateral: market.total_collateral.clone(),
        utilization: market.utilization.clone(),
        borrow_rate: market.borrow_rate.clone(),
        liquidity_rate: market.liquidity_rate.clone(),
    };
    let created = tx.insert_transaction(&transaction).await?;
    tx.insert_market_snapshot(&snapshot(&market, meta)).await?;

    Ok(HandlerEffects {
        market_updated: Some(market.id.clone()),
        position_updated: Some(position.user_address),
        new_transaction: created.then_some(market.id),
    })
}

/// §4.3.3 — `withdraw` and `repay` share the monotone-decreasing-scaled
/// shape, including the position dust-clamp and the market-level fatal
/// check on would-be negative totals.
#[allow(clippy::too_many_arguments)]
async fn handle_decrease(
    tx: &mut dyn StoreTx,
    meta: &EventMeta,
    action: TxAction,
    actor: String,
    position_owner: String,
    borrower_field: Option<String>,
    amount: Decimal,
    scaled_decrease: Decimal,
    borrow_index: Decimal,
    liquidity_index: Decimal,
    utilization: Decimal,
) -> Result<HandlerEffects, IndexerError> {
    if tx.transaction_exists(&meta.tx_hash, meta.log_index).await? {
        return Ok(HandlerEffects::default());
    }

    let mut market = load_market(tx, &meta.contract_address).await?;
    let (borrow_rate, liquidity_rate) = (market.borrow_rate.clone(), market.liquidity_rate.clone());

    let new_total = match action {
        TxAction::Withdraw => &market.total_supply_scaled - &scaled_decrease,
        TxAction::Repay => &market.total_debt_scaled - &scaled_decrease,
        _ => unreachable!("handle_decrease only serves Withdraw/Repay"),
    };
    if new_total < zero() {
        return Err(IndexerError::InvariantViolation(format!(
            "{action:?} on market {} would drive its total negative",
            market.id
        )));
    }
    match action {
        TxAction::Withdraw => market.total_supply_scaled = new_total,
        TxAction::Repay => market.total_debt_scaled = new_total,
        _ => unreachable!(),
    }
    overwrite_market_state(
        &mut market,
        borrow_index,
        liquidity_index,
        borrow_rate,
        liquidity_rate,
        utilization,
        meta.block_time,
    );
    tx.update_market(&market).await?;

    let position = tx.get_position(&market.id, &position_owner).await?;
    let position_updated = if let Some(mut position) = position {
        match action {
            TxAction::Withdraw => {
                position.supply_scaled = clamp_floor(&position.supply_scaled, &scaled_decrease)
            }
            TxAction::Repay => {
                position.debt_scaled = clamp_floor(&position.debt_scaled, &scaled_decrease)
            }
            _ => unreachable!(),
        }
        position.last_interaction = meta.block_time;
        tx.upsert_position(&position).await?;
        Some(position.user_address)
    } else {
        None
    };

    let transaction = Transaction {
        tx_hash: meta.tx_hash.clone(),
        log_index: meta.log_index,
        market_id: market.id.clone(),
        block_height: meta.block_height,
        block_time: meta.block_time,
        action,
        user_address: actor,
        borrower: borrower_field,
        amount: Some(amount),
        scaled_amount: Some(scaled_decrease),
        debt_repaid: None,
        collateral_seized: None,
        protocol_fee: None,
        total_supply: market.total_supply(),
        total_debt: market.total_debt(),
        total_collateral: market.total_collateral.clone(),
        utilization: market.utilization.clone(),
        borrow_rate: market.borrow_rate.clone(),
        liquidity_rate: market.liquidity_rate.clone(),
    };
    let created = tx.insert_transaction(&transaction).await?;
    tx.insert_market_snapshot(&snapshot(&market, meta)).await?;

    Ok(HandlerEffects {
        market_updated: Some(market.id.clone()),
        position_updated,
        new_transaction: created.then_some(market.id),
    })
}

/// Subtracts `delta` from `base`, flooring at zero to absorb scaling-
/// conversion dust between the event and the stored balance (§4.3.3).
fn clamp_floor(base: &Decimal, delta: &Decimal) -> Decimal {
    let result = base - delta;
    if result < zero() {
        zero()
    } else {
        result
    }
}

/// §4.3.4 — `supply_collateral` / `withdraw_collateral`. Collateral is
/// tracked in raw units and recomputed locally; the event's own totals (it
/// reports none) are never trusted.
async fn handle_collateral(
    tx: &mut dyn StoreTx,
    meta: &EventMeta,
    action: TxAction,
    actor: String,
    beneficiary: String,
    amount: Decimal,
) -> Result<HandlerEffects, IndexerError> {
    if tx.transaction_exists(&meta.tx_hash, meta.log_index).await? {
        return Ok(HandlerEffects::default());
    }

    let mut market = load_market(tx, &meta.contract_address).await?;
    let sign_is_supply = matches!(action, TxAction::SupplyCollateral);

    if sign_is_supply {
        market.total_collateral = &market.total_collateral + &amount;
    } else {
        let new_total = &market.total_collateral - &amount;
        if new_total < zero() {
            return Err(IndexerError::InvariantViolation(format!(
                "withdraw_collateral on market {} would drive total_collateral negative",
                market.id
            )));
        }
        market.total_collateral = new_total;
    }
    market.last_update = meta.block_time;
    tx.update_market(&market).await?;

    let existing = if sign_is_supply {
        Some(lazy_create_position(tx, &market.id, &beneficiary, meta.block_time).await?)
    } else {
        tx.get_position(&market.id, &beneficiary).await?
    };
    let position_updated = if let Some(mut position) = existing {
        position.collateral = if sign_is_supply {
            &position.collateral + &amount
        } else {
            let new_collateral = &position.collateral - &amount;
            if new_collateral < zero() {
                return Err(IndexerError::InvariantViolation(format!(
                    "withdraw_collateral for {beneficiary} on market {} would drive their collateral negative",
                    market.id
                )));
            }
            new_collateral
        };
        position.last_interaction = meta.block_time;
        tx.upsert_position(&position).await?;
        Some(position.user_address)
    } else {
        None
    };

    let transaction = Transaction {
        tx_hash: meta.tx_hash.clone(),
        log_index: meta.log_index,
        market_id: market.id.clone(),
        block_height: meta.block_height,
        block_time: meta.block_time,
        action,
        user_address: actor,
        borrower: None,
        amount: Some(amount),
        scaled_amount: None,
        debt_repaid: None,
        collateral_seized: None,
        protocol_fee: None,
        total_supply: market.total_supply(),
        total_debt: market.total_debt(),
        total_collateral: market.total_collateral.clone(),
        utilization: market.utilization.clone(),
        borrow_rate: market.borrow_rate.clone(),
        liquidity_rate: market.liquidity_rate.clone(),
    };
    let created = tx.insert_transaction(&transaction).await?;
    tx.insert_market_snapshot(&snapshot(&market, meta)).await?;

    Ok(HandlerEffects {
        market_updated: Some(market.id.clone()),
        position_updated,
        new_transaction: created.then_some(market.id),
    })
}

/// §4.3.5 — `liquidate`.
#[allow(clippy::too_many_arguments)]
async fn handle_liquidate(
    tx: &mut dyn StoreTx,
    meta: &EventMeta,
    liquidator: String,
    borrower: String,
    debt_repaid: Decimal,
    collateral_seized: Decimal,
    protocol_fee: Decimal,
    scaled_debt_decrease: Decimal,
    borrow_index: Decimal,
    liquidity_index: Decimal,
    total_collateral: Decimal,
    utilization: Decimal,
) -> Result<HandlerEffects, IndexerError> {
    if tx.transaction_exists(&meta.tx_hash, meta.log_index).await? {
        return Ok(HandlerEffects::default());
    }

    let mut market = load_market(tx, &meta.contract_address).await?;
    let (borrow_rate, liquidity_rate) = (market.borrow_rate.clone(), market.liquidity_rate.clone());

    let new_total_debt = &market.total_debt_scaled - &scaled_debt_decrease;
    if new_total_debt < zero() {
        return Err(IndexerError::InvariantViolation(format!(
            "liquidate on market {} would drive total_debt_scaled negative",
            market.id
        )));
    }
    market.total_debt_scaled = new_total_debt;
    // total_collateral is set absolutely: the event carries the
    // authoritative post-liquidation value (§4.3.5).
    market.total_collateral = total_collateral;
    overwrite_market_state(
        &mut market,
        borrow_index,
        liquidity_index,
        borrow_rate,
        liquidity_rate,
        utilization,
        meta.block_time,
    );
    tx.update_market(&market).await?;

    let position_updated = if let Some(mut position) = tx.get_position(&market.id, &borrower).await? {
        position.debt_scaled = clamp_floor(&position.debt_scaled, &scaled_debt_decrease);
        position.collateral = clamp_floor(&position.collateral, &collateral_seized);
        position.last_interaction = meta.block_time;
        tx.upsert_position(&position).await?;
        Some(position.user_address)
    } else {
        None
    };

    let transaction = Transaction {
        tx_hash: meta.tx_hash.clone(),
        log_index: meta.log_index,
        market_id: market.id.clone(),
        block_height: meta.block_height,
        block_time: meta.block_time,
        action: TxAction::Liquidate,
        user_address: liquidator,
        borrower: Some(borrower),
        amount: None,
        scaled_amount: Some(scaled_debt_decrease),
        debt_repaid: Some(debt_repaid),
        collateral_seized: Some(collateral_seized),
        protocol_fee: Some(protocol_fee),
        total_supply: market.total_supply(),
        total_debt: market.total_debt(),
        total_collateral: market.total_collateral.clone(),
        utilization: market.utilization.clone(),
        borrow_rate: market.borrow_rate.clone(),
        liquidity_rate: market.liquidity_rate.clone(),
    };
    let created = tx.insert_transaction(&transaction).await?;
    tx.insert_market_snapshot(&snapshot(&market, meta)).await?;

    Ok(HandlerEffects {
        market_updated: Some(market.id.clone()),
        position_updated,
        new_transaction: created.then_some(market.id),
    })
}

/// §4.3.6 — `accrue_interest`. No Transaction row; writes an
/// `InterestAccrualEvent` and a snapshot instead.
async fn handle_accrue_interest(
    tx: &mut dyn StoreTx,
    meta: &EventMeta,
    borrow_index: Decimal,
    liquidity_index: Decimal,
    borrow_rate: Decimal,
    liquidity_rate: Decimal,
    last_update: i64,
) -> Result<HandlerEffects, IndexerError> {
    if tx
        .interest_accrual_event_exists(&meta.tx_hash, meta.log_index)
        .await?
    {
        return Ok(HandlerEffects::default());
    }

    let mut market = load_market(tx, &meta.contract_address).await?;

    if borrow_index < market.borrow_index {
        return Err(IndexerError::InvariantViolation(format!(
            "accrue_interest on market {} reported a borrow_index lower than the stored value",
            market.id
        )));
    }
    if liquidity_index < market.liquidity_index {
        return Err(IndexerError::InvariantViolation(format!(
            "accrue_interest on market {} reported a liquidity_index lower than the stored value",
            market.id
        )));
    }

    let utilization = market.utilization.clone();
    overwrite_market_state(
        &mut market,
        borrow_index.clone(),
        liquidity_index.clone(),
        borrow_rate.clone(),
        liquidity_rate.clone(),
        utilization,
        last_update,
    );
    tx.update_market(&market).await?;

    tx.insert_interest_accrual_event(&InterestAccrualEvent {
        tx_hash: meta.tx_hash.clone(),
        log_index: meta.log_index,
        market_id: market.id.clone(),
        borrow_index,
        liquidity_index,
        borrow_rate,
        liquidity_rate,
        timestamp: meta.block_time,
        block_height: meta.block_height,
    })
    .await?;
    tx.insert_market_snapshot(&snapshot(&market, meta)).await?;

    Ok(HandlerEffects {
        market_updated: Some(market.id),
        ..Default::default()
    })
}

/// §4.3.7 — `update_params`. Parameter-only update; no Transaction row.
#[allow(clippy::too_many_arguments)]
async fn handle_update_params(
    tx: &mut dyn StoreTx,
    meta: &EventMeta,
    final_ltv: Decimal,
    final_liquidation_threshold: Decimal,
    final_liquidation_bonus: Decimal,
    final_liquidation_protocol_fee: Decimal,
    final_close_factor: Decimal,
    final_protocol_fee: Decimal,
    final_curator_fee: Decimal,
    final_supply_cap: Option<Decimal>,
    final_borrow_cap: Option<Decimal>,
    final_enabled: bool,
    final_is_mutable: bool,
) -> Result<HandlerEffects, IndexerError> {
    let mut market = load_market(tx, &meta.contract_address).await?;
    market.loan_to_value = final_ltv;
    market.liquidation_threshold = final_liquidation_threshold;
    market.liquidation_bonus = final_liquidation_bonus;
    market.liquidation_protocol_fee = final_liquidation_protocol_fee;
    market.close_factor = final_close_factor;
    market.protocol_fee = final_protocol_fee;
    market.curator_fee = final_curator_fee;
    market.supply_cap = final_supply_cap;
    market.borrow_cap = final_borrow_cap;
    market.enabled = final_enabled;
    market.is_mutable = final_is_mutable;
    tx.update_market(&market).await?;
    tx.insert_market_snapshot(&snapshot(&market, meta)).await?;

    Ok(HandlerEffects {
        market_updated: Some(market.id),
        ..Default::default()
    })
}

/// Dispatches a decoded market event to its handler. `MarketInstantiated`
/// is excluded — it is a factory event and goes through
/// [`handle_market_instantiated`] instead.
pub async fn handle_market_event(
    tx: &mut dyn StoreTx,
    meta: &EventMeta,
    event: DomainEvent,
) -> Result<HandlerEffects, IndexerError> {
    match event {
        DomainEvent::MarketInstantiated { .. } => unreachable!(
            "MarketInstantiated must be routed through handle_market_instantiated"
        ),
        DomainEvent::Supply {
            supplier,
            recipient,
            amount,
            scaled_amount,
            borrow_index,
            liquidity_index,
            utilization,
            ..
        } => {
            handle_increase(
                tx,
                meta,
                TxAction::Supply,
                supplier,
                recipient,
                amount,
                scaled_amount,
                borrow_index,
                liquidity_index,
                utilization,
            )
            .await
        }
        DomainEvent::Borrow {
            borrower,
            recipient,
            amount,
            scaled_amount,
            borrow_index,
            liquidity_index,
            utilization,
            ..
        } => {
            handle_increase(
                tx,
                meta,
                TxAction::Borrow,
                borrower,
                recipient,
                amount,
                scaled_amount,
                borrow_index,
                liquidity_index,
                utilization,
            )
            .await
        }
        DomainEvent::Withdraw {
            withdrawer,
            recipient,
            amount,
            scaled_decrease,
            borrow_index,
            liquidity_index,
            utilization,
            ..
        } => {
            handle_decrease(
                tx,
                meta,
                TxAction::Withdraw,
                withdrawer,
                recipient,
                None,
                amount,
                scaled_decrease,
                borrow_index,
                liquidity_index,
                utilization,
            )
            .await
        }
        DomainEvent::Repay {
            repayer,
            borrower,
            amount,
            scaled_decrease,
            borrow_index,
            liquidity_index,
            utilization,
            ..
        } => {
            handle_decrease(
                tx,
                meta,
                TxAction::Repay,
                repayer.clone(),
                borrower.clone(),
                Some(borrower),
                amount,
                scaled_decrease,
                borrow_index,
                liquidity_index,
                utilization,
            )
            .await
        }
        DomainEvent::SupplyCollateral {
            supplier,
            recipient,
            amount,
        } => {
            handle_collateral(
                tx,
                meta,
                TxAction::SupplyCollateral,
                supplier,
                recipient,
                amount,
            )
            .await
        }
        DomainEvent::WithdrawCollateral {
            withdrawer,
            recipient,
            amount,
        } => {
            handle_collateral(
                tx,
                meta,
                TxAction::WithdrawCollateral,
                withdrawer,
                recipient,
                amount,
            )
            .await
        }
        DomainEvent::Liquidate {
            liquidator,
            borrower,
            debt_repaid,
            collateral_seized,
            protocol_fee,
            scaled_debt_decrease,
            borrow_index,
            liquidity_index,
            total_collateral,
            utilization,
            ..
        } => {
            handle_liquidate(
                tx,
                meta,
                liquidator,
                borrower,
                debt_repaid,
                collateral_seized,
                protocol_fee,
                scaled_debt_decrease,
                borrow_index,
                liquidity_index,
                total_collateral,
                utilization,
            )
            .await
        }
        DomainEvent::AccrueInterest {
            borrow_index,
            liquidity_index,
            borrow_rate,
            liquidity_rate,
            last_update,
        } => {
            handle_accrue_interest(
                tx,
                meta,
                borrow_index,
                liquidity_index,
                borrow_rate,
                liquidity_rate,
                last_update,
            )
            .await
        }
        DomainEvent::UpdateParams {
            final_ltv,
            final_liquidation_threshold,
            final_liquidation_bonus,
            final_liquidation_protocol_fee,
            final_close_factor,
            final_protocol_fee,
            final_curator_fee,
            final_supply_cap,
            final_borrow_cap,
            final_enabled,
            final_is_mutable,
        } => {
            handle_update_params(
                tx,
                meta,
                final_ltv,
                final_liquidation_threshold,
                final_liquidation_bonus,
                final_liquidation_protocol_fee,
                final_close_factor,
                final_protocol_fee,
                final_curator_fee,
                final_supply_cap,
                final_borrow_cap,
                final_enabled,
                final_is_mutable,
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stone_indexer_testing::{fixtures, InMemoryStore, MockChainAdapterBuilder};
    use stone_store::ProjectionStore;

    const MARKET_ADDRESS: &str = "M1";

    fn meta(tx_hash: &str, log_index: i32) -> EventMeta {
        EventMeta {
            tx_hash: tx_hash.to_string(),
            log_index,
            block_height: 10,
            block_time: 10_000,
            contract_address: MARKET_ADDRESS.to_string(),
        }
    }

    async fn store_with_fresh_market() -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_market(&fixtures::fresh_market("1", MARKET_ADDRESS))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        store
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn market_instantiated_seeds_a_fresh_market_and_snapshot() {
        let store = InMemoryStore::new();
        let chain = MockChainAdapterBuilder::new()
            .with_market_config(
                MARKET_ADDRESS,
                json!({
                    "curator": "curator1",
                    "collateral_denom": "uatom",
                    "debt_denom": "uusdc",
                    "oracle": "oracle1",
                    "interest_rate_model": {}
                }),
            )
            .with_market_params(
                MARKET_ADDRESS,
                json!({
                    "loan_to_value": "0.8",
                    "liquidation_threshold": "0.85",
                    "liquidation_bonus": "0.05",
                    "liquidation_protocol_fee": "0.02",
                    "close_factor": "0.5",
                    "protocol_fee": "0.1",
                    "curator_fee": "0.05",
                    "supply_cap": null,
                    "borrow_cap": null,
                    "enabled": true,
                    "is_mutable": false
                }),
            )
            .build();

        let mut tx = store.begin().await.unwrap();
        let effects =
            handle_market_instantiated(&mut *tx, &chain, &meta("tx1", 0), "1", MARKET_ADDRESS)
                .await
                .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(effects.market_updated, Some("1".to_string()));
        let mut tx = store.begin().await.unwrap();
        let market = tx.get_market("1").await.unwrap().unwrap();
        assert_eq!(market.market_address, MARKET_ADDRESS);
        assert_eq!(market.borrow_index, Decimal::from(1));
    }

    #[tokio::test]
    async fn market_instantiated_twice_is_a_no_op_on_the_second_call() {
        let store = store_with_fresh_market().await;
        let chain = MockChainAdapterBuilder::new().build();

        let mut tx = store.begin().await.unwrap();
        let effects =
            handle_market_instantiated(&mut *tx, &chain, &meta("tx1", 0), "1", MARKET_ADDRESS)
                .await
                .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(effects.market_updated, None);
    }

    #[tokio::test]
    async fn supply_increases_market_and_position_scaled_totals() {
        let store = store_with_fresh_market().await;
        let mut tx = store.begin().await.unwrap();
        let effects = handle_increase(
            &mut *tx,
            &meta("tx1", 0),
            TxAction::Supply,
            "U1".to_string(),
            "U1".to_string(),
            dec("100"),
            dec("100"),
            dec("1"),
            dec("1"),
            dec("0.1"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(effects.new_transaction, Some("1".to_string()));
        let mut tx = store.begin().await.unwrap();
        let market = tx.get_market("1").await.unwrap().unwrap();
        let position = tx.get_position("1", "U1").await.unwrap().unwrap();
        assert_eq!(market.total_supply_scaled, dec("100"));
        assert_eq!(position.supply_scaled, dec("100"));
    }

    #[tokio::test]
    async fn borrow_increases_market_and_position_debt() {
        let store = store_with_fresh_market().await;
        let mut tx = store.begin().await.unwrap();
        handle_increase(
            &mut *tx,
            &meta("tx1", 0),
            TxAction::Borrow,
            "U1".to_string(),
            "U1".to_string(),
            dec("50"),
            dec("50"),
            dec("1"),
            dec("1"),
            dec("0.2"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let market = tx.get_market("1").await.unwrap().unwrap();
        let position = tx.get_position("1", "U1").await.unwrap().unwrap();
        assert_eq!(market.total_debt_scaled, dec("50"));
        assert_eq!(position.debt_scaled, dec("50"));
    }

    #[tokio::test]
    async fn replaying_the_same_supply_event_does_not_double_count_it() {
        let store = store_with_fresh_market().await;

        // First attempt: commits fine.
        let mut tx = store.begin().await.unwrap();
        handle_increase(
            &mut *tx,
            &meta("tx1", 0),
            TxAction::Supply,
            "U1".to_string(),
            "U1".to_string(),
            dec("100"),
            dec("100"),
            dec("1"),
            dec("1"),
            dec("0.1"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        // A block retry (e.g. after a later event in the same block failed)
        // replays this same event from scratch. It must be a no-op.
        let mut tx = store.begin().await.unwrap();
        let effects = handle_increase(
            &mut *tx,
            &meta("tx1", 0),
            TxAction::Supply,
            "U1".to_string(),
            "U1".to_string(),
            dec("100"),
            dec("100"),
            dec("1"),
            dec("1"),
            dec("0.1"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(effects.market_updated, None);
        assert_eq!(effects.new_transaction, None);

        let mut tx = store.begin().await.unwrap();
        let market = tx.get_market("1").await.unwrap().unwrap();
        let position = tx.get_position("1", "U1").await.unwrap().unwrap();
        assert_eq!(market.total_supply_scaled, dec("100"));
        assert_eq!(position.supply_scaled, dec("100"));
    }

    #[tokio::test]
    async fn retrying_a_block_after_a_later_events_failure_only_reapplies_the_failed_event() {
        // Models a two-event block where event 0 (supply) committed, then
        // event 1 (a withdraw referencing an unregistered market) failed
        // and the whole block was retried from event 0.
        let store = store_with_fresh_market().await;

        for attempt in 0..2 {
            let mut tx = store.begin().await.unwrap();
            handle_increase(
                &mut *tx,
                &meta("tx1", 0),
                TxAction::Supply,
                "U1".to_string(),
                "U1".to_string(),
                dec("100"),
                dec("100"),
                dec("1"),
                dec("1"),
                dec("0.1"),
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();

            if attempt == 0 {
                let mut tx = store.begin().await.unwrap();
                let err = load_market(&mut *tx, "UNREGISTERED").await.unwrap_err();
                assert!(matches!(err, IndexerError::DataViolation(_)));
                tx.rollback().await.unwrap();
            }
        }

        let mut tx = store.begin().await.unwrap();
        let market = tx.get_market("1").await.unwrap().unwrap();
        assert_eq!(market.total_supply_scaled, dec("100"));
    }

    #[tokio::test]
    async fn withdraw_clamps_position_dust_but_floors_at_zero() {
        // U2's supply gives the market-level total enough slack that U1's
        // dust-sized over-withdrawal doesn't trip the market-total guard —
        // only U1's own position balance goes slightly negative before the
        // floor clamp.
        let store = store_with_fresh_market().await;
        for (hash, user, amount) in [("tx1", "U1", "100"), ("tx2", "U2", "50")] {
            let mut tx = store.begin().await.unwrap();
            handle_increase(
                &mut *tx,
                &meta(hash, 0),
                TxAction::Supply,
                user.to_string(),
                user.to_string(),
                dec(amount),
                dec(amount),
                dec("1"),
                dec("1"),
                dec("0.1"),
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let effects = handle_decrease(
            &mut *tx,
            &meta("tx3", 0),
            TxAction::Withdraw,
            "U1".to_string(),
            "U1".to_string(),
            None,
            dec("100.0000001"),
            dec("100.0000001"),
            dec("1"),
            dec("1"),
            dec("0"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(effects.position_updated, Some("U1".to_string()));
        let mut tx = store.begin().await.unwrap();
        let position = tx.get_position("1", "U1").await.unwrap().unwrap();
        assert_eq!(position.supply_scaled, zero());
    }

    #[tokio::test]
    async fn withdraw_past_the_market_total_is_an_invariant_violation() {
        let store = store_with_fresh_market().await;
        let mut tx = store.begin().await.unwrap();
        let err = handle_decrease(
            &mut *tx,
            &meta("tx1", 0),
            TxAction::Withdraw,
            "U1".to_string(),
            "U1".to_string(),
            None,
            dec("1"),
            dec("1"),
            dec("1"),
            dec("1"),
            dec("0"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IndexerError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn repay_decreases_market_and_position_debt() {
        let store = store_with_fresh_market().await;
        {
            let mut tx = store.begin().await.unwrap();
            handle_increase(
                &mut *tx,
                &meta("tx1", 0),
                TxAction::Borrow,
                "U1".to_string(),
                "U1".to_string(),
                dec("50"),
                dec("50"),
                dec("1"),
                dec("1"),
                dec("0.2"),
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        handle_decrease(
            &mut *tx,
            &meta("tx2", 0),
            TxAction::Repay,
            "U1".to_string(),
            "U1".to_string(),
            Some("U1".to_string()),
            dec("20"),
            dec("20"),
            dec("1"),
            dec("1"),
            dec("0.1"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let market = tx.get_market("1").await.unwrap().unwrap();
        assert_eq!(market.total_debt_scaled, dec("30"));
    }

    #[tokio::test]
    async fn supply_collateral_credits_market_and_position() {
        let store = store_with_fresh_market().await;
        let mut tx = store.begin().await.unwrap();
        handle_collateral(
            &mut *tx,
            &meta("tx1", 0),
            TxAction::SupplyCollateral,
            "U1".to_string(),
            "U1".to_string(),
            dec("10"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let market = tx.get_market("1").await.unwrap().unwrap();
        let position = tx.get_position("1", "U1").await.unwrap().unwrap();
        assert_eq!(market.total_collateral, dec("10"));
        assert_eq!(position.collateral, dec("10"));
    }

    #[tokio::test]
    async fn withdraw_collateral_past_the_position_balance_is_an_invariant_violation() {
        // U2's collateral keeps the market-level total comfortably positive
        // so this exercises the position-level guard specifically, not the
        // market-level one a few lines above it.
        let store = store_with_fresh_market().await;
        for (hash, user, amount) in [("tx1", "U1", "10"), ("tx2", "U2", "100")] {
            let mut tx = store.begin().await.unwrap();
            handle_collateral(
                &mut *tx,
                &meta(hash, 0),
                TxAction::SupplyCollateral,
                user.to_string(),
                user.to_string(),
                dec(amount),
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let err = handle_collateral(
            &mut *tx,
            &meta("tx3", 0),
            TxAction::WithdrawCollateral,
            "U1".to_string(),
            "U1".to_string(),
            dec("10.0000001"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IndexerError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn liquidate_reduces_debt_and_seizes_collateral() {
        let store = store_with_fresh_market().await;
        {
            let mut tx = store.begin().await.unwrap();
            handle_increase(
                &mut *tx,
                &meta("tx1", 0),
                TxAction::Borrow,
                "U1".to_string(),
                "U1".to_string(),
                dec("100"),
                dec("100"),
                dec("1"),
                dec("1"),
                dec("0.5"),
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }
        {
            let mut tx = store.begin().await.unwrap();
            handle_collateral(
                &mut *tx,
                &meta("tx2", 0),
                TxAction::SupplyCollateral,
                "U1".to_string(),
                "U1".to_string(),
                dec("200"),
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let effects = handle_liquidate(
            &mut *tx,
            &meta("tx3", 0),
            "LIQUIDATOR".to_string(),
            "U1".to_string(),
            dec("50"),
            dec("55"),
            dec("2"),
            dec("50"),
            dec("1"),
            dec("1"),
            dec("145"),
            dec("0.3"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(effects.position_updated, Some("U1".to_string()));
        let mut tx = store.begin().await.unwrap();
        let market = tx.get_market("1").await.unwrap().unwrap();
        let position = tx.get_position("1", "U1").await.unwrap().unwrap();
        assert_eq!(market.total_debt_scaled, dec("50"));
        assert_eq!(market.total_collateral, dec("145"));
        assert_eq!(position.debt_scaled, dec("50"));
        assert_eq!(position.collateral, dec("145"));
    }

    #[tokio::test]
    async fn accrue_interest_overwrites_indices_and_records_the_event_once() {
        let store = store_with_fresh_market().await;
        let mut tx = store.begin().await.unwrap();
        let effects = handle_accrue_interest(
            &mut *tx,
            &meta("tx1", 0),
            dec("1.05"),
            dec("1.03"),
            dec("0.08"),
            dec("0.06"),
            20_000,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(effects.market_updated, Some("1".to_string()));
        let mut tx = store.begin().await.unwrap();
        let market = tx.get_market("1").await.unwrap().unwrap();
        assert_eq!(market.borrow_index, dec("1.05"));
        assert_eq!(market.liquidity_index, dec("1.03"));
        assert_eq!(market.last_update, 20_000);

        // Replaying the same accrual event is a no-op.
        let mut tx = store.begin().await.unwrap();
        let effects = handle_accrue_interest(
            &mut *tx,
            &meta("tx1", 0),
            dec("1.05"),
            dec("1.03"),
            dec("0.08"),
            dec("0.06"),
            20_000,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(effects.market_updated, None);
    }

    #[tokio::test]
    async fn accrue_interest_rejects_a_borrow_index_that_goes_backwards() {
        let store = store_with_fresh_market().await;
        {
            let mut tx = store.begin().await.unwrap();
            handle_accrue_interest(
                &mut *tx,
                &meta("tx1", 0),
                dec("1.05"),
                dec("1.03"),
                dec("0.08"),
                dec("0.06"),
                20_000,
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let err = handle_accrue_interest(
            &mut *tx,
            &meta("tx2", 1),
            dec("1.0"),
            dec("1.03"),
            dec("0.08"),
            dec("0.06"),
            21_000,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IndexerError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn update_params_overwrites_the_risk_parameters() {
        let store = store_with_fresh_market().await;
        let mut tx = store.begin().await.unwrap();
        let effects = handle_update_params(
            &mut *tx,
            &meta("tx1", 0),
            dec("0.75"),
            dec("0.8"),
            dec("0.1"),
            dec("0.03"),
            dec("0.4"),
            dec("0.12"),
            dec("0.06"),
            Some(dec("1000000")),
            Some(dec("500000")),
            false,
            true,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(effects.market_updated, Some("1".to_string()));
        let mut tx = store.begin().await.unwrap();
        let market = tx.get_market("1").await.unwrap().unwrap();
        assert_eq!(market.loan_to_value, dec("0.75"));
        assert!(!market.enabled);
        assert!(market.is_mutable);
        assert_eq!(market.supply_cap, Some(dec("1000000")));
    }
}
