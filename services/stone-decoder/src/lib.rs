//! Event Decoder (C2, `spec.md` §4.2).
//!
//! Turns a wasm event's string-keyed attribute bag into one of a closed
//! set of typed variants. Downstream code (the handlers in
//! `stone-pipeline`) never sees a raw attribute map again — the same
//! "dynamic bag in, tagged type out" boundary the teacher draws between
//! `cosmwasm_std::Response::add_attribute` calls (string in) and the typed
//! `MarketParamsUpdate`/`CreateMarketParams` structs contracts exchange.

mod error;
mod event;

pub use error::DecodeError;
pub use event::{DomainEvent, EventMeta};

use stone_chain::WasmEvent;
use stone_indexer_types::decimal::{parse_decimal, parse_non_negative_decimal};
use stone_indexer_types::Decimal;

/// Reads the emitting contract's address off an event. CosmWasm-style
/// chains attach it as `_contract_address`; some gateways normalize it to
/// `contract_address`. Either satisfies `spec.md` §4.2.
pub fn contract_address(event: &WasmEvent) -> Option<&str> {
    event
        .attribute("_contract_address")
        .or_else(|| event.attribute("contract_address"))
}

fn action(event: &WasmEvent) -> Option<&str> {
    event.attribute("action")
}

fn require<'a>(event: &'a WasmEvent, action: &str, key: &str) -> Result<&'a str, DecodeError> {
    event
        .attribute(key)
        .ok_or_else(|| DecodeError::MissingAttribute {
            action: action.to_string(),
            field: key.to_string(),
        })
}

fn require_decimal(event: &WasmEvent, action: &str, key: &str) -> Result<Decimal, DecodeError> {
    let raw = require(event, action, key)?;
    parse_non_negative_decimal(raw).map_err(|_| DecodeError::InvalidDecimal {
        action: action.to_string(),
        field: key.to_string(),
        value: raw.to_string(),
    })
}

/// Rates/ratios/indices may legitimately be expressed with either sign
/// only in principle (they never are on this chain, but we don't want a
/// decoder bug to reject a valid index by over-constraining it the way
/// amounts are constrained).
fn require_ratio(event: &WasmEvent, action: &str, key: &str) -> Result<Decimal, DecodeError> {
    let raw = require(event, action, key)?;
    parse_decimal(raw).map_err(|_| DecodeError::InvalidDecimal {
        action: action.to_string(),
        field: key.to_string(),
        value: raw.to_string(),
    })
}

fn optional_decimal(
    event: &WasmEvent,
    action: &str,
    key: &str,
) -> Result<Option<Decimal>, DecodeError> {
    match event.attribute(key) {
        None => Ok(None),
        Some(raw) => parse_non_negative_decimal(raw)
            .map(Some)
            .map_err(|_| DecodeError::InvalidDecimal {
                action: action.to_string(),
                field: key.to_string(),
                value: raw.to_string(),
            }),
    }
}

fn require_bool(event: &WasmEvent, action: &str, key: &str) -> Result<bool, DecodeError> {
    let raw = require(event, action, key)?;
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(DecodeError::InvalidBool {
            action: action.to_string(),
            field: key.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Decode a `type="wasm"` event emitted by the factory contract. Returns
/// `Ok(None)` for unrecognized actions (silently skipped per §4.2); returns
/// `Err` for a recognized action with a missing/malformed required
/// attribute, which the caller logs as a warning and drops.
pub fn decode_factory_event(event: &WasmEvent) -> Result<Option<DomainEvent>, DecodeError> {
    let Some(action) = action(event) else {
        return Ok(None);
    };
    match action {
        "market_instantiated" => Ok(Some(DomainEvent::MarketInstantiated {
            market_id: require(event, action, "market_id")?.to_string(),
            market_address: require(event, action, "market_address")?.to_string(),
        })),
        _ => Ok(None),
    }
}

/// Decode a `type="wasm"` event emitted by a known market contract.
pub fn decode_market_event(event: &WasmEvent) -> Result<Option<DomainEvent>, DecodeError> {
    let Some(action) = action(event) else {
        return Ok(None);
    };
    let ev = match action {
        "supply" => DomainEvent::Supply {
            supplier: require(event, action, "supplier")?.to_string(),
            recipient: require(event, action, "recipient")?.to_string(),
            amount: require_decimal(event, action, "amount")?,
            scaled_amount: require_decimal(event, action, "scaled_amount")?,
            borrow_index: require_ratio(event, action, "borrow_index")?,
            liquidity_index: require_ratio(event, action, "liquidity_index")?,
            total_supply: require_decimal(event, action, "total_supply")?,
            total_debt: require_decimal(event, action, "total_debt")?,
            utilization: require_ratio(event, action, "utilization")?,
        },
        "withdraw" => DomainEvent::Withdraw {
            withdrawer: require(event, action, "withdrawer")?.to_string(),
            recipient: require(event, action, "recipient")?.to_string(),
            amount: require_decimal(event, action, "amount")?,
            scaled_decrease: require_decimal(event, action, "scaled_decrease")?,
            borrow_index: require_ratio(event, action, "borrow_index")?,
            liquidity_index: require_ratio(event, action, "liquidity_index")?,
            total_supply: require_decimal(event, action, "total_supply")?,
            total_debt: require_decimal(event, action, "total_debt")?,
            utilization: require_ratio(event, action, "utilization")?,
        },
        "supply_collateral" => DomainEvent::SupplyCollateral {
            supplier: require(event, action, "supplier")?.to_string(),
            recipient: require(event, action, "recipient")?.to_string(),
            amount: require_decimal(event, action, "amount")?,
        },
        "withdraw_collateral" => DomainEvent::WithdrawCollateral {
            withdrawer: require(event, action, "withdrawer")?.to_string(),
            recipient: require(event, action, "recipient")?.to_string(),
            amount: require_decimal(event, action, "amount")?,
        },
        "borrow" => DomainEvent::Borrow {
            borrower: require(event, action, "borrower")?.to_string(),
            recipient: require(event, action, "recipient")?.to_string(),
            amount: require_decimal(event, action, "amount")?,
            scaled_amount: require_decimal(event, action, "scaled_amount")?,
            borrow_index: require_ratio(event, action, "borrow_index")?,
            liquidity_index: require_ratio(event, action, "liquidity_index")?,
            total_supply: require_decimal(event, action, "total_supply")?,
            total_debt: require_decimal(event, action, "total_debt")?,
            utilization: require_ratio(event, action, "utilization")?,
        },
        "repay" => DomainEvent::Repay {
            repayer: require(event, action, "repayer")?.to_string(),
            borrower: require(event, action, "borrower")?.to_string(),
            amount: require_decimal(event, action, "amount")?,
            scaled_decrease: require_decimal(event, action, "scaled_decrease")?,
            borrow_index: require_ratio(event, action, "borrow_index")?,
            liquidity_index: require_ratio(event, action, "liquidity_index")?,
            total_supply: require_decimal(event, action, "total_supply")?,
            total_debt: require_decimal(event, action, "total_debt")?,
            utilization: require_ratio(event, action, "utilization")?,
        },
        "liquidate" => DomainEvent::Liquidate {
            liquidator: require(event, action, "liquidator")?.to_string(),
            borrower: require(event, action, "borrower")?.to_string(),
            debt_repaid: require_decimal(event, action, "debt_repaid")?,
            collateral_seized: require_decimal(event, action, "collateral_seized")?,
            protocol_fee: require_decimal(event, action, "protocol_fee")?,
            scaled_debt_decrease: require_decimal(event, action, "scaled_debt_decrease")?,
            borrow_index: require_ratio(event, action, "borrow_index")?,
            liquidity_index: require_ratio(event, action, "liquidity_index")?,
            total_supply: require_decimal(event, action, "total_supply")?,
            total_debt: require_decimal(event, action, "total_debt")?,
            total_collateral: require_decimal(event, action, "total_collateral")?,
            utilization: require_ratio(event, action, "utilization")?,
        },
        "accrue_interest" => DomainEvent::AccrueInterest {
            borrow_index: require_ratio(event, action, "borrow_index")?,
            liquidity_index: require_ratio(event, action, "liquidity_index")?,
            borrow_rate: require_ratio(event, action, "borrow_rate")?,
            liquidity_rate: require_ratio(event, action, "liquidity_rate")?,
            last_update: {
                let raw = require(event, action, "last_update")?;
                raw.parse::<i64>().map_err(|_| DecodeError::InvalidDecimal {
                    action: action.to_string(),
                    field: "last_update".to_string(),
                    value: raw.to_string(),
                })?
            },
        },
        "update_params" => DomainEvent::UpdateParams {
            final_ltv: require_ratio(event, action, "final_ltv")?,
            final_liquidation_threshold: require_ratio(event, action, "final_liquidation_threshold")?,
            final_liquidation_bonus: require_ratio(event, action, "final_liquidation_bonus")?,
            final_liquidation_protocol_fee: require_ratio(
                event,
                action,
                "final_liquidation_protocol_fee",
            )?,
            final_close_factor: require_ratio(event, action, "final_close_factor")?,
            final_protocol_fee: require_ratio(event, action, "final_protocol_fee")?,
            final_curator_fee: require_ratio(event, action, "final_curator_fee")?,
            final_supply_cap: optional_decimal(event, action, "final_supply_cap")?,
            final_borrow_cap: optional_decimal(event, action, "final_borrow_cap")?,
            final_enabled: require_bool(event, action, "final_enabled")?,
            final_is_mutable: require_bool(event, action, "final_is_mutable")?,
        },
        _ => return Ok(None),
    };
    Ok(Some(ev))
}
