//! Chain Adapter (C1, `spec.md` §4.1).
//!
//! Wraps the chain RPC endpoint behind a small trait so the rest of the
//! pipeline never deals with wire formats or transport retries directly —
//! the same separation the teacher draws between a market contract's
//! `execute::*` handlers and the oracle query it calls through
//! `health::query_price` rather than talking to the querier inline.

mod error;
mod rpc;
mod types;

pub use error::RpcError;
pub use rpc::{RpcChainAdapter, RpcChainAdapterConfig};
pub use types::{BlockInfo, TxInfo, WasmEvent};

use async_trait::async_trait;

/// Operations the rest of the pipeline needs from the chain. All of them
/// may fail with a retryable [`RpcError`].
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// The connected chain's own identifier, checked once at startup
    /// against the configured `chain_id` (`spec.md` §6) so a misconfigured
    /// `rpc_endpoint` fails fast instead of silently indexing the wrong
    /// chain.
    async fn chain_id(&self) -> Result<String, RpcError>;
    async fn latest_height(&self) -> Result<u64, RpcError>;
    async fn block(&self, height: u64) -> Result<BlockInfo, RpcError>;
    async fn tx(&self, tx_hash: &str) -> Result<TxInfo, RpcError>;

    /// Synchronous smart query against a contract. Returns an untyped JSON
    /// value; callers decode into the shape they expect (kept this way so
    /// the trait stays object-safe and can be stored behind `Arc<dyn
    /// ChainAdapter>`).
    async fn query_contract(
        &self,
        address: &str,
        query: &serde_json::Value,
    ) -> Result<serde_json::Value, RpcError>;

    /// Idempotent teardown, called once by the indexer loop on shutdown.
    async fn disconnect(&self) -> Result<(), RpcError>;
}
