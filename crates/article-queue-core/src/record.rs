use crate::{ArticleId, ArticleMetrics, Job, JobError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Ledger entry for a job between dequeue and ack/requeue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    #[serde(flatten)]
    pub job: Job,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl ProcessingRecord {
    pub fn new(job: Job, worker_id: Option<String>) -> Self {
        ProcessingRecord {
            job,
            started_at: Utc::now(),
            worker_id,
        }
    }

    /// Time spent in flight as of `now`
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.started_at
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(JobError::from)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(JobError::from)
    }
}

/// Entry of the failed bucket; kept until an operator clears it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    #[serde(flatten)]
    pub job: Job,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl DeadLetterRecord {
    pub fn new(job: Job, error: impl Into<String>, worker_id: Option<String>) -> Self {
        DeadLetterRecord {
            job,
            error: error.into(),
            failed_at: Utc::now(),
            worker_id,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(JobError::from)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(JobError::from)
    }
}

/// Summary kept in the completed bucket for a bounded retention window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRecord {
    pub article_id: ArticleId,
    pub job_id: String,
    pub retry_count: u32,
    pub word_count: usize,
    pub sentiment_score: f64,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl CompletedRecord {
    pub fn new(job: &Job, metrics: &ArticleMetrics, worker_id: Option<String>) -> Self {
        CompletedRecord {
            article_id: job.article_id,
            job_id: job.job_id.clone(),
            retry_count: job.retry_count,
            word_count: metrics.word_count,
            sentiment_score: metrics.sentiment_score,
            completed_at: Utc::now(),
            worker_id,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(JobError::from)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(JobError::from)
    }
}

/// Liveness record a worker publishes into the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub articles_processed: u64,
    pub errors: u64,
    pub is_running: bool,
}

impl WorkerRecord {
    pub fn new(worker_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        let now = Utc::now();
        WorkerRecord {
            worker_id: worker_id.into(),
            hostname: hostname.into(),
            started_at: now,
            last_heartbeat: now,
            articles_processed: 0,
            errors: 0,
            is_running: false,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(JobError::from)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(JobError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArticlePayload;

    #[test]
    fn test_processing_record_flattens_job() {
        let job = Job::new(9, ArticlePayload::new("title", "body", "url")).with_priority(3);
        let record = ProcessingRecord::new(job.clone(), Some("w-1".to_string()));

        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(value["article_id"], 9);
        assert_eq!(value["priority"], 3);
        assert_eq!(value["v"], 1);
        assert!(value.get("started_at").is_some());

        let decoded = ProcessingRecord::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(decoded.job, job);
        assert_eq!(decoded.worker_id.as_deref(), Some("w-1"));
    }

    #[test]
    fn test_processing_record_age() {
        let record = ProcessingRecord::new(Job::new(1, ArticlePayload::default()), None);
        let later = record.started_at + Duration::seconds(90);

        assert_eq!(record.age(later), Duration::seconds(90));
    }

    #[test]
    fn test_dead_letter_record_keeps_error() {
        let job = Job::new(5, ArticlePayload::default()).next_attempt();
        let record = DeadLetterRecord::new(job, "empty content", None);
        let decoded = DeadLetterRecord::from_json(&record.to_json().unwrap()).unwrap();

        assert_eq!(decoded.error, "empty content");
        assert_eq!(decoded.job.retry_count, 1);
    }
}
