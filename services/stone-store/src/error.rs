use thiserror::Error;

/// Everything the projection store can fail with. Connection drops and
/// serialization conflicts are `Conflict`/`Connection` — the caller
/// (`stone-pipeline`) treats both as transient and retries the current
/// block; `NotFound` and `Invariant` are not.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("serialization conflict, retry the transaction")]
    Conflict,

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("store invariant violated: {0}")]
    Invariant(String),

    #[error("transaction already finished")]
    TransactionFinished,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // Unique-key collisions are the idempotence signal handlers expect,
        // not a hard failure.
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Connection(err),
        }
    }
}
