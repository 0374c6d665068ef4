use thiserror::Error;

/// Error taxonomy shared by the block processor and the indexer loop.
/// Each variant carries its own retry semantics: `TransientRpc` and
/// `TransientStore` are recovered by retrying the current block;
/// `DataViolation` drops the offending event but lets the block continue
/// or abort depending on whether a downstream write depended on it;
/// `InvariantViolation` and `FatalConfig` stop forward progress.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("transient rpc error: {0}")]
    TransientRpc(#[from] stone_chain::RpcError),

    #[error("transient store error: {0}")]
    TransientStore(#[source] stone_store::StoreError),

    #[error("data violation: {0}")]
    DataViolation(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

impl IndexerError {
    /// True if the outer loop should retry the current block after a
    /// backoff instead of halting. `DataViolation` is deliberately not
    /// transient here: a data violation means the event itself can never
    /// be decoded, so retrying verbatim would fail identically.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IndexerError::TransientRpc(_) | IndexerError::TransientStore(_)
        )
    }
}

impl From<stone_decoder::DecodeError> for IndexerError {
    fn from(err: stone_decoder::DecodeError) -> Self {
        IndexerError::DataViolation(err.to_string())
    }
}

impl From<stone_store::StoreError> for IndexerError {
    fn from(err: stone_store::StoreError) -> Self {
        use stone_store::StoreError::*;
        match err {
            Connection(_) | Conflict => IndexerError::TransientStore(err),
            Migration(_) => IndexerError::FatalConfig(err.to_string()),
            NotFound { .. } => IndexerError::DataViolation(err.to_string()),
            Invariant(_) | TransactionFinished => IndexerError::InvariantViolation(err.to_string()),
        }
    }
}
