use article_queue_core::ArticleId;
use article_queue_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    /// Queue or ledger unreachable, or an undecodable entry; feeds the circuit breaker
    #[error("Coordination store error: {0}")]
    TransientStore(#[from] StoreError),

    #[error("Result store error: {0}")]
    ResultStore(StoreError),

    #[error("Processing failed for article {article_id}: {reason}")]
    Processing { article_id: ArticleId, reason: String },

    #[error("Article {article_id} dead-lettered after {retry_count} retries: {reason}")]
    RetryExhausted {
        article_id: ArticleId,
        retry_count: u32,
        reason: String,
    },

    #[error("Worker task failed: {0}")]
    TaskFailed(String),

    /// Fatal for this worker's registration only
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl WorkerError {
    /// Counted by the circuit breaker rather than against a job's retry budget
    pub fn is_loop_level(&self) -> bool {
        matches!(self, WorkerError::TransientStore(_) | WorkerError::ResultStore(_))
    }
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;
