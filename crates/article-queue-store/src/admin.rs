//! Operator-facing queries and bulk operations.

use crate::backend::{ClearScope, CoordinationStore, QueueCounts};
use crate::queue::MalformedEntry;
use crate::{ProcessingLedger, StoreResult, TaskQueue, WorkerRegistry};
use article_queue_core::{ArticleId, ArticlePayload, DeadLetterRecord, Job, ProcessingRecord, WorkerRecord};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Outcome of a batch submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    /// Shared by every job of the batch
    pub job_id: String,
    pub enqueued: usize,
}

/// Entry of the failed bucket as seen by an operator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailedEntry {
    /// A job that exhausted its retries
    Job(DeadLetterRecord),
    /// Queue content that could not be decoded, with the decoder's complaint
    /// when it was parked by the queue
    Malformed {
        key: String,
        raw: String,
        error: Option<String>,
    },
}

impl FailedEntry {
    pub fn key(&self) -> String {
        match self {
            FailedEntry::Job(record) => record.job.key(),
            FailedEntry::Malformed { key, .. } => key.clone(),
        }
    }
}

fn failed_entry(key: String, raw: String) -> FailedEntry {
    if let Ok(record) = DeadLetterRecord::from_json(&raw) {
        return FailedEntry::Job(record);
    }
    match serde_json::from_str::<MalformedEntry>(&raw) {
        Ok(parked) => FailedEntry::Malformed {
            key,
            raw: parked.raw,
            error: Some(parked.error),
        },
        Err(_) => FailedEntry::Malformed { key, raw, error: None },
    }
}

fn batch_job_id() -> String {
    format!("batch_{}", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Read-mostly view over the whole coordination store
#[derive(Clone)]
pub struct QueueAdmin {
    store: Arc<dyn CoordinationStore>,
    queue: TaskQueue,
    ledger: ProcessingLedger,
    registry: WorkerRegistry,
}

impl QueueAdmin {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            queue: TaskQueue::new(store.clone()),
            ledger: ProcessingLedger::new(store.clone()),
            registry: WorkerRegistry::new(store.clone()),
            store,
        }
    }

    pub async fn enqueue(&self, job: Job, priority: u32) -> StoreResult<()> {
        self.queue.enqueue(job, priority).await
    }

    /// Enqueue one job per article id with empty payloads.
    ///
    /// Only useful with a processing function that resolves articles by id;
    /// the text processor rejects empty articles, so those jobs dead-letter.
    pub async fn batch_enqueue(&self, article_ids: &[ArticleId], priority: u32) -> StoreResult<BatchReceipt> {
        let articles = article_ids
            .iter()
            .map(|id| (*id, ArticlePayload::default()))
            .collect();
        self.enqueue_articles(articles, priority).await
    }

    /// Enqueue one job per article, all sharing a `batch_<timestamp>` job id
    pub async fn enqueue_articles(
        &self,
        articles: Vec<(ArticleId, ArticlePayload)>,
        priority: u32,
    ) -> StoreResult<BatchReceipt> {
        let job_id = batch_job_id();
        let mut enqueued = 0;
        for (article_id, payload) in articles {
            let job = Job::new(article_id, payload).with_job_id(job_id.clone());
            self.queue.enqueue(job, priority).await?;
            enqueued += 1;
        }

        info!(job_id = %job_id, enqueued, priority, "Enqueued batch");
        Ok(BatchReceipt { job_id, enqueued })
    }

    pub async fn get_queue_stats(&self) -> StoreResult<QueueCounts> {
        self.queue.stats().await
    }

    /// Best effort: a worker may expire between listing and use
    pub async fn get_active_workers(&self) -> StoreResult<Vec<WorkerRecord>> {
        self.registry.active_workers().await
    }

    pub async fn dead_letters(&self) -> StoreResult<Vec<FailedEntry>> {
        Ok(self
            .queue
            .failed_entries()
            .await?
            .into_iter()
            .map(|(key, raw)| failed_entry(key, raw))
            .collect())
    }

    /// Ledger entries, optionally only those in flight longer than `older_than`
    pub async fn in_flight(&self, older_than: Option<chrono::Duration>) -> StoreResult<Vec<ProcessingRecord>> {
        match older_than {
            Some(age) => self.ledger.stuck(age).await,
            None => self.ledger.entries().await,
        }
    }

    pub async fn clear(&self, scope: ClearScope) -> StoreResult<()> {
        self.queue.clear(scope).await
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.store.ping().await
    }
}
