use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
