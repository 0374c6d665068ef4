use thiserror::Error;

/// Everything that can go wrong talking to the chain. All variants are
/// treated as `TransientRpc` by the caller (`spec.md` §7) — retryable, and
/// never fatal to the pipeline on their own.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc call to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("rpc returned malformed response: {0}")]
    Decode(String),

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("transaction {0} not found")]
    TxNotFound(String),

    #[error("contract query against {address} failed: {message}")]
    QueryFailed { address: String, message: String },
}
