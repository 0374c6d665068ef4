use stone_indexer_types::Decimal;

/// Where an event came from, independent of what it says. The block
/// processor (`stone-pipeline`) attaches this before handing a
/// [`DomainEvent`] to a handler; the decoder itself never sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMeta {
    pub tx_hash: String,
    pub log_index: i32,
    pub block_height: i64,
    pub block_time: i64,
    pub contract_address: String,
}

/// Every financial and administrative fact a market or the factory can
/// emit, per `spec.md` §4.2's attribute table. Handlers match on this
/// instead of a raw attribute bag.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    MarketInstantiated {
        market_id: String,
        market_address: String,
    },
    Supply {
        supplier: String,
        recipient: String,
        amount: Decimal,
        scaled_amount: Decimal,
        borrow_index: Decimal,
        liquidity_index: Decimal,
        total_supply: Decimal,
        total_debt: Decimal,
        utilization: Decimal,
    },
    Withdraw {
        withdrawer: String,
        recipient: String,
        amount: Decimal,
        scaled_decrease: Decimal,
        borrow_index: Decimal,
        liquidity_index: Decimal,
        total_supply: Decimal,
        total_debt: Decimal,
        utilization: Decimal,
    },
    SupplyCollateral {
        supplier: String,
        recipient: String,
        amount: Decimal,
    },
    WithdrawCollateral {
        withdrawer: String,
        recipient: String,
        amount: Decimal,
    },
    Borrow {
        borrower: String,
        recipient: String,
        amount: Decimal,
        scaled_amount: Decimal,
        borrow_index: Decimal,
        liquidity_index: Decimal,
        total_supply: Decimal,
        total_debt: Decimal,
        utilization: Decimal,
    },
    Repay {
        repayer: String,
        borrower: String,
        amount: Decimal,
        scaled_decrease: Decimal,
        borrow_index: Decimal,
        liquidity_index: Decimal,
        total_supply: Decimal,
        total_debt: Decimal,
        utilization: Decimal,
    },
    Liquidate {
        liquidator: String,
        borrower: String,
        debt_repaid: Decimal,
        collateral_seized: Decimal,
        protocol_fee: Decimal,
        scaled_debt_decrease: Decimal,
        borrow_index: Decimal,
        liquidity_index: Decimal,
        total_supply: Decimal,
        total_debt: Decimal,
        total_collateral: Decimal,
        utilization: Decimal,
    },
    AccrueInterest {
        borrow_index: Decimal,
        liquidity_index: Decimal,
        borrow_rate: Decimal,
        liquidity_rate: Decimal,
        last_update: i64,
    },
    UpdateParams {
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
    },
}
