use thiserror::Error;

/// Error returned by every store trait in the core.
///
/// Infra implementations flatten their driver errors into these variants so the
/// core never depends on sqlx, reqwest or the filesystem directly.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}
