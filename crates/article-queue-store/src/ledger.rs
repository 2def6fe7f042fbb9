//! In-flight ledger keyed by article id.
//!
//! An entry exists from the moment a worker claims a job until the job is
//! completed, requeued or dead-lettered. Each of those exits removes the entry
//! in the same transaction that writes the job's next location.

use crate::backend::{Bucket, CoordinationStore, Settlement};
use crate::queue::placement;
use crate::StoreResult;
use article_queue_core::{CompletedRecord, DeadLetterRecord, Job, ProcessingRecord};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default time completed summaries stay visible
pub const DEFAULT_COMPLETED_RETENTION: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct ProcessingLedger {
    store: Arc<dyn CoordinationStore>,
    completed_retention: Duration,
}

impl ProcessingLedger {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            completed_retention: DEFAULT_COMPLETED_RETENTION,
        }
    }

    pub fn with_completed_retention(mut self, retention: Duration) -> Self {
        self.completed_retention = retention;
        self
    }

    /// Claim a freshly dequeued job
    pub async fn record(&self, job: &Job, worker_id: Option<&str>) -> StoreResult<ProcessingRecord> {
        let record = ProcessingRecord::new(job.clone(), worker_id.map(str::to_string));
        self.store
            .hash_put(Bucket::Processing, &job.key(), record.to_json()?)
            .await?;
        debug!(article_id = job.article_id, "Recorded in-flight job");
        Ok(record)
    }

    /// Drop the ledger entry and keep a completion summary
    pub async fn complete(&self, job: &Job, summary: &CompletedRecord) -> StoreResult<()> {
        self.store
            .settle(
                &job.key(),
                Settlement::Complete {
                    record: summary.to_json()?,
                    retention: self.completed_retention,
                },
            )
            .await
    }

    /// Drop the ledger entry and put `job` back in the pending queue as-is.
    /// The caller decides whether the retry count moves.
    pub async fn requeue(&self, job: &Job) -> StoreResult<()> {
        let mut job = job.clone();
        job.enqueued_at = Utc::now();
        self.store.settle(&job.key(), Settlement::Requeue(placement(&job)?)).await?;
        info!(
            article_id = job.article_id,
            retry_count = job.retry_count,
            "Requeued job"
        );
        Ok(())
    }

    /// Drop the ledger entry and park the job in the failed bucket
    pub async fn dead_letter(&self, record: &DeadLetterRecord) -> StoreResult<()> {
        self.store
            .settle(
                &record.job.key(),
                Settlement::DeadLetter {
                    record: record.to_json()?,
                },
            )
            .await?;
        warn!(
            article_id = record.job.article_id,
            retry_count = record.job.retry_count,
            error = %record.error,
            "Dead-lettered job"
        );
        Ok(())
    }

    /// Every decodable ledger entry, ordered by article key
    pub async fn entries(&self) -> StoreResult<Vec<ProcessingRecord>> {
        let raw = self.store.hash_entries(Bucket::Processing).await?;
        let mut records = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            match ProcessingRecord::from_json(&value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed ledger entry"),
            }
        }
        Ok(records)
    }

    /// Entries that have been in flight longer than `older_than`
    pub async fn stuck(&self, older_than: chrono::Duration) -> StoreResult<Vec<ProcessingRecord>> {
        let now = Utc::now();
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|record| record.age(now) > older_than)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, TaskQueue};
    use article_queue_core::{ArticleMetrics, ArticlePayload};

    fn setup() -> (Arc<MemoryStore>, TaskQueue, ProcessingLedger) {
        let store = Arc::new(MemoryStore::new());
        (
            store.clone(),
            TaskQueue::new(store.clone()),
            ProcessingLedger::new(store),
        )
    }

    #[tokio::test]
    async fn test_record_then_complete() {
        let (store, _, ledger) = setup();
        let job = Job::new(11, ArticlePayload::default());

        ledger.record(&job, Some("w-1")).await.unwrap();
        let entries = ledger.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].worker_id.as_deref(), Some("w-1"));

        let summary = CompletedRecord::new(&job, &ArticleMetrics::default(), None);
        ledger.complete(&job, &summary).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.processing, 0);
        assert_eq!(counts.completed, 1);
    }

    #[tokio::test]
    async fn test_requeue_returns_job_to_queue() {
        let (store, queue, ledger) = setup();
        let job = Job::new(12, ArticlePayload::default()).with_priority(2);
        ledger.record(&job, None).await.unwrap();

        ledger.requeue(&job.next_attempt()).await.unwrap();

        assert_eq!(store.counts().await.unwrap().processing, 0);
        let back = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(back.article_id, 12);
        assert_eq!(back.retry_count, 1);
        assert_eq!(back.priority, 2);
    }

    #[tokio::test]
    async fn test_dead_letter_leaves_queue_empty() {
        let (store, queue, ledger) = setup();
        let job = Job::new(13, ArticlePayload::default());
        ledger.record(&job, None).await.unwrap();

        ledger
            .dead_letter(&DeadLetterRecord::new(job, "boom", None))
            .await
            .unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.processing, 0);
        assert_eq!(counts.dead_lettered, 1);
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stuck_filters_by_age() {
        let (store, _, ledger) = setup();
        let mut old = ProcessingRecord::new(Job::new(1, ArticlePayload::default()), None);
        old.started_at = Utc::now() - chrono::Duration::minutes(30);
        store
            .hash_put(Bucket::Processing, "1", old.to_json().unwrap())
            .await
            .unwrap();
        ledger
            .record(&Job::new(2, ArticlePayload::default()), None)
            .await
            .unwrap();

        let stuck = ledger.stuck(chrono::Duration::minutes(10)).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].job.article_id, 1);
    }

    #[tokio::test]
    async fn test_malformed_ledger_entry_is_skipped() {
        let (store, _, ledger) = setup();
        store
            .hash_put(Bucket::Processing, "99", "garbage".to_string())
            .await
            .unwrap();

        assert!(ledger.entries().await.unwrap().is_empty());
    }
}
