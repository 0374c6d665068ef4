//! Event handlers, block processor, and push bus — the stateful heart of
//! the indexer pipeline (C3 is adjacent, in `stone-store`; C6 wraps this
//! crate's [`processor::BlockProcessor`] in a polling loop in
//! `stone-indexer`).

mod error;
pub mod handlers;
mod processor;
mod push;

pub use error::IndexerError;
pub use handlers::HandlerEffects;
pub use processor::{BlockProcessor, KnownMarkets};
pub use push::{PushBus, PushEvent};
