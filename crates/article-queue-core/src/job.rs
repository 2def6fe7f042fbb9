use crate::{JobError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of the article a job processes
pub type ArticleId = i64;

/// Layout version written into every serialized job.
/// Bump when a field changes meaning; adding a defaulted field does not need a bump.
pub const JOB_SCHEMA_VERSION: u16 = 1;

fn legacy_version() -> u16 {
    1
}

/// Raw article text handed to the processing function
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticlePayload {
    pub title: String,
    /// Possibly malformed HTML
    pub content: String,
    pub url: String,
}

impl ArticlePayload {
    pub fn new(title: impl Into<String>, content: impl Into<String>, url: impl Into<String>) -> Self {
        ArticlePayload {
            title: title.into(),
            content: content.into(),
            url: url.into(),
        }
    }
}

/// One article awaiting processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Serialized layout version
    #[serde(rename = "v", default = "legacy_version")]
    pub version: u16,

    /// Submission identifier; every job of a batch shares it
    pub job_id: String,

    /// Article this job processes, also the ledger key
    pub article_id: ArticleId,

    /// 0 goes to the FIFO path, anything higher to the priority path
    #[serde(default)]
    pub priority: u32,

    /// Number of times this job has been requeued after a failure
    #[serde(default)]
    pub retry_count: u32,

    /// When the job last entered the queue
    #[serde(default = "Utc::now")]
    pub enqueued_at: DateTime<Utc>,

    #[serde(default)]
    pub payload: ArticlePayload,
}

impl Job {
    /// Create a job with a fresh job id
    pub fn new(article_id: ArticleId, payload: ArticlePayload) -> Self {
        Job {
            version: JOB_SCHEMA_VERSION,
            job_id: Uuid::new_v4().to_string(),
            article_id,
            priority: 0,
            retry_count: 0,
            enqueued_at: Utc::now(),
            payload,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Key under which the job appears in the ledger and the failed bucket
    pub fn key(&self) -> String {
        self.article_id.to_string()
    }

    /// 1-based attempt number of the next execution
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    /// Copy of this job for its next attempt
    pub fn next_attempt(&self) -> Job {
        Job {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(JobError::from)
    }

    /// Decode a job, rejecting layouts newer than this build understands
    pub fn from_json(raw: &str) -> Result<Self> {
        let job: Job = serde_json::from_str(raw)?;
        if job.version > JOB_SCHEMA_VERSION {
            return Err(JobError::UnsupportedVersion {
                found: job.version,
                supported: JOB_SCHEMA_VERSION,
            });
        }
        Ok(job)
    }
}
