use stone_indexer_types::{Decimal, Market};

pub const FACTORY_ADDRESS: &str = "factory1";
pub const CURATOR: &str = "curator1";
pub const ORACLE: &str = "oracle1";
pub const COLLATERAL_DENOM: &str = "uatom";
pub const DEBT_DENOM: &str = "uusdc";

/// A just-instantiated market: default risk params, zero totals, indices
/// seeded at one — the state a fresh `market_instantiated` handler run
/// would have written.
pub fn fresh_market(market_id: &str, market_address: &str) -> Market {
    Market {
        id: market_id.to_string(),
        market_address: market_address.to_string(),
        curator: CURATOR.to_string(),
        collateral_denom: COLLATERAL_DENOM.to_string(),
        debt_denom: DEBT_DENOM.to_string(),
        oracle: ORACLE.to_string(),
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
        borrow_index: Decimal::from(1),
        liquidity_index: Decimal::from(1),
        borrow_rate: Decimal::from(0),
        liquidity_rate: Decimal::from(0),
        total_supply_scaled: Decimal::from(0),
        total_debt_scaled: Decimal::from(0),
        total_collateral: Decimal::from(0),
        utilization: Decimal::from(0),
        available_liquidity: Decimal::from(0),
        last_update: 0,
    }
}
