//! Periodic liveness publishing, independent of job throughput.

use crate::metrics::WorkerMetrics;
use article_queue_core::WorkerRecord;
use article_queue_store::{StoreResult, WorkerRegistry};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct HeartbeatPublisher {
    registry: WorkerRegistry,
    snapshots: watch::Receiver<WorkerRecord>,
    interval: Duration,
    ttl: Duration,
    metrics: Arc<WorkerMetrics>,
}

/// Shortest interval the ticker accepts
const MIN_INTERVAL: Duration = Duration::from_millis(1);

impl HeartbeatPublisher {
    pub fn new(
        registry: WorkerRegistry,
        snapshots: watch::Receiver<WorkerRecord>,
        interval: Duration,
        ttl: Duration,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            registry,
            snapshots,
            interval: interval.max(MIN_INTERVAL),
            ttl,
            metrics,
        }
    }

    /// Write the latest snapshot stamped with the current time
    pub async fn beat(&self) -> StoreResult<()> {
        let mut record = self.snapshots.borrow().clone();
        record.last_heartbeat = Utc::now();
        self.registry.publish(&record, self.ttl).await
    }

    /// Beat immediately, then once per interval until cancelled. Failed
    /// writes are logged and the loop carries on.
    pub async fn run(self, cancel: CancellationToken) -> Self {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.beat().await {
                        self.metrics.heartbeat_failures_total.inc();
                        warn!(
                            worker_id = %self.snapshots.borrow().worker_id,
                            error = %e,
                            "Heartbeat write failed"
                        );
                    }
                }
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkerContext;
    use article_queue_store::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_survives_store_outage() {
        let store = Arc::new(MemoryStore::new());
        let registry = WorkerRegistry::new(store.clone());
        let context = WorkerContext::new("w-hb", "host");
        let metrics = Arc::new(WorkerMetrics::new().unwrap());
        let publisher = HeartbeatPublisher::new(
            registry.clone(),
            context.subscribe(),
            Duration::from_secs(10),
            Duration::from_secs(40),
            metrics.clone(),
        );

        store.set_available(false);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(publisher.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(metrics.heartbeat_failures_total.get() >= 2);

        store.set_available(true);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(registry.get("w-hb").await.unwrap().is_some());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_publishes() {
        let store = Arc::new(MemoryStore::new());
        let registry = WorkerRegistry::new(store);
        let context = WorkerContext::new("w-zero", "host");
        let publisher = HeartbeatPublisher::new(
            registry.clone(),
            context.subscribe(),
            Duration::ZERO,
            Duration::from_secs(40),
            Arc::new(WorkerMetrics::new().unwrap()),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(publisher.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(registry.get("w-zero").await.unwrap().is_some());

        cancel.cancel();
        assert!(task.await.is_ok());
    }
}
