use thiserror::Error;

/// Errors produced by the generic persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("record already exists: {collection}/{id}")]
    Conflict { collection: String, id: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
