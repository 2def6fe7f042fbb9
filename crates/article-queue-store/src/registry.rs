//! Worker liveness registry.
//!
//! Records are never deleted explicitly. A worker that stops refreshing its
//! record simply drops out once the TTL lapses.

use crate::backend::CoordinationStore;
use crate::StoreResult;
use article_queue_core::WorkerRecord;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// TTL of a worker record: enough to survive `missed_beats` lost heartbeats
/// plus `slack` for clock and network jitter.
pub fn heartbeat_ttl(interval: Duration, missed_beats: u32, slack: Duration) -> Duration {
    interval.saturating_mul(missed_beats).saturating_add(slack)
}

#[derive(Clone)]
pub struct WorkerRegistry {
    store: Arc<dyn CoordinationStore>,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub async fn publish(&self, record: &WorkerRecord, ttl: Duration) -> StoreResult<()> {
        self.store
            .put_worker(&record.worker_id, record.to_json()?, ttl)
            .await?;
        debug!(worker_id = %record.worker_id, ttl_secs = ttl.as_secs(), "Published heartbeat");
        Ok(())
    }

    /// Workers whose record is still inside its TTL, ordered by id
    pub async fn active_workers(&self) -> StoreResult<Vec<WorkerRecord>> {
        let mut workers: Vec<WorkerRecord> = self
            .store
            .workers()
            .await?
            .into_iter()
            .filter_map(|raw| match WorkerRecord::from_json(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed worker record");
                    None
                }
            })
            .collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(workers)
    }

    pub async fn get(&self, worker_id: &str) -> StoreResult<Option<WorkerRecord>> {
        Ok(self
            .active_workers()
            .await?
            .into_iter()
            .find(|w| w.worker_id == worker_id))
    }
}
