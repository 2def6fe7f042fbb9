//! Per-worker counters.
//!
//! The loop owns the context and mutates it directly. Every change is
//! published as a [`WorkerRecord`] snapshot on a watch channel, which is all
//! the heartbeat and the supervisor ever see.

use article_queue_core::WorkerRecord;
use chrono::Utc;
use tokio::sync::watch;

pub struct WorkerContext {
    record: WorkerRecord,
    tx: watch::Sender<WorkerRecord>,
}

impl WorkerContext {
    pub fn new(worker_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        let record = WorkerRecord::new(worker_id, hostname);
        let (tx, _) = watch::channel(record.clone());
        Self { record, tx }
    }

    pub fn worker_id(&self) -> &str {
        &self.record.worker_id
    }

    pub fn snapshot(&self) -> &WorkerRecord {
        &self.record
    }

    /// Receiver that always holds the latest snapshot
    pub fn subscribe(&self) -> watch::Receiver<WorkerRecord> {
        self.tx.subscribe()
    }

    pub fn set_running(&mut self, running: bool) {
        self.record.is_running = running;
        self.publish();
    }

    pub fn record_processed(&mut self) {
        self.record.articles_processed += 1;
        self.publish();
    }

    pub fn record_error(&mut self) {
        self.record.errors += 1;
        self.publish();
    }

    fn publish(&mut self) {
        self.record.last_heartbeat = Utc::now();
        // No receivers left only means nobody is watching
        self.tx.send_replace(self.record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshots_follow_counters() {
        let mut context = WorkerContext::new("w-1", "host");
        let rx = context.subscribe();

        context.set_running(true);
        context.record_processed();
        context.record_processed();
        context.record_error();

        let seen = rx.borrow().clone();
        assert!(seen.is_running);
        assert_eq!(seen.articles_processed, 2);
        assert_eq!(seen.errors, 1);
        assert_eq!(seen, *context.snapshot());
    }
}
