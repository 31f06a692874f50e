use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of the persistence layer. Never treated as success by callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("corrupt {table} row {id}: {detail}")]
    Corrupt {
        table: &'static str,
        id: i64,
        detail: String,
    },
}

impl StoreError {
    /// True when the store could not be reached at all, as opposed to rejecting the write.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StoreError::Database(
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}
