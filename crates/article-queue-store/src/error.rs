use article_queue_core::JobError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] JobError),

    #[error("Malformed entry in {bucket}: {reason}")]
    MalformedEntry { bucket: &'static str, reason: String },

    #[error("Invalid clear scope: {0}")]
    InvalidScope(String),
}

impl StoreError {
    /// True when retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Redis(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
