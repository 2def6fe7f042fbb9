//! Pending queue with a priority path and a FIFO path.
//!
//! Jobs with `priority > 0` live in a sorted structure scored `-priority`, so
//! the highest priority pops first. Everything else is appended to a FIFO
//! sequence. `dequeue` always drains the priority path before touching the
//! FIFO path, which means a steady stream of priority work starves FIFO work.

use crate::backend::{Bucket, ClearScope, CoordinationStore, Placement, QueueCounts, Settlement};
use crate::{StoreError, StoreResult};
use article_queue_core::Job;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Failed-bucket value for a queue entry that could not be decoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedEntry {
    pub raw: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Placement of an encoded job according to its priority
pub fn placement(job: &Job) -> StoreResult<Placement> {
    let member = job.to_json()?;
    Ok(if job.priority > 0 {
        Placement::Priority {
            member,
            score: -i64::from(job.priority),
        }
    } else {
        Placement::Fifo { member }
    })
}

/// Shared pending queue
#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn CoordinationStore>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Enqueue a job with the given priority. The job's priority and
    /// enqueue timestamp are overwritten.
    pub async fn enqueue(&self, mut job: Job, priority: u32) -> StoreResult<()> {
        job.priority = priority;
        job.enqueued_at = Utc::now();

        self.store.push(placement(&job)?).await?;
        debug!(
            article_id = job.article_id,
            job_id = %job.job_id,
            priority,
            "Enqueued job"
        );
        Ok(())
    }

    /// Take the next job, waiting up to `timeout` on the FIFO path.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. An entry that does not
    /// decode is moved to the failed bucket and reported as
    /// [`StoreError::MalformedEntry`].
    pub async fn dequeue(&self, timeout: Duration) -> StoreResult<Option<Job>> {
        let raw = match self.store.pop_priority().await? {
            Some(raw) => raw,
            None => match self.store.pop_fifo(timeout).await? {
                Some(raw) => raw,
                None => return Ok(None),
            },
        };

        match Job::from_json(&raw) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                let reason = e.to_string();
                self.park_malformed(raw, &reason).await?;
                Err(StoreError::MalformedEntry {
                    bucket: "pending",
                    reason,
                })
            }
        }
    }

    async fn park_malformed(&self, raw: String, reason: &str) -> StoreResult<()> {
        let field = format!("malformed:{}", Uuid::new_v4());
        warn!(field = %field, error = %reason, "Parking undecodable queue entry");

        let record = MalformedEntry {
            raw,
            error: reason.to_string(),
            failed_at: Utc::now(),
        };
        let record = serde_json::to_string(&record).map_err(|e| StoreError::Encoding(e.into()))?;
        self.store
            .settle(&field, Settlement::DeadLetter { record })
            .await
    }

    pub async fn stats(&self) -> StoreResult<QueueCounts> {
        self.store.counts().await
    }

    pub async fn clear(&self, scope: ClearScope) -> StoreResult<()> {
        self.store.clear(scope).await?;
        warn!(scope = scope.as_str(), "Cleared queue data");
        Ok(())
    }

    /// Raw contents of the failed bucket
    pub(crate) async fn failed_entries(&self) -> StoreResult<Vec<(String, String)>> {
        self.store.hash_entries(Bucket::Failed).await
    }
}
