use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot batch too large: {size} (max: {max})")]
    BatchTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, StoreError>;
