mod error;
mod job;
mod metrics;
mod record;
mod retry;

pub use error::{JobError, Result};
pub use job::{ArticleId, ArticlePayload, Job, JOB_SCHEMA_VERSION};
pub use metrics::ArticleMetrics;
pub use record::{CompletedRecord, DeadLetterRecord, ProcessingRecord, WorkerRecord};
pub use retry::{RetryDecision, RetryPolicy};

/// Attempts allowed after the first failure before a job is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
