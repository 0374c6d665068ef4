//! Shared domain types for the Stone Finance market indexer.
//!
//! Mirrors the role `stone-types` plays for the on-chain contracts: a
//! dependency-light package that every other crate in the workspace can
//! import without pulling in chain, storage, or pipeline concerns.

pub mod decimal;
pub mod entities;

pub use decimal::{parse_decimal, Decimal, ParseDecimalError};
pub use entities::{
    IndexerState, InterestAccrualEvent, Market, MarketSnapshot, Transaction, TxAction,
    UserPosition,
};
