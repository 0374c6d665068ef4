//! Test doubles for the indexer pipeline: a scriptable chain adapter and an
//! in-memory projection store, so handler and block-processor tests never
//! need a live RPC endpoint or a running Postgres instance.

pub mod fixtures;
mod in_memory_store;
mod mock_chain;

pub use in_memory_store::InMemoryStore;
pub use mock_chain::{MockChainAdapter, MockChainAdapterBuilder};
