//! In-process coordination store.
//!
//! Mirrors the Redis layout (sorted set, list, hashes, expiring worker keys)
//! behind a single mutex so every operation is atomic. Used by tests and by
//! single-host deployments that run several workers in one process.
//! Expiry runs on `tokio::time::Instant`, so paused-clock tests can advance it.

use crate::backend::{Bucket, ClearScope, CoordinationStore, Placement, QueueCounts, Settlement};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct State {
    /// (score, insertion sequence) -> member; equal scores pop in insertion order
    priority: BTreeMap<(i64, u64), String>,
    priority_index: HashMap<String, (i64, u64)>,
    fifo: VecDeque<String>,
    processing: HashMap<String, String>,
    completed: HashMap<String, String>,
    completed_expires_at: Option<Instant>,
    failed: HashMap<String, String>,
    workers: HashMap<String, (String, Instant)>,
    next_seq: u64,
}

impl State {
    fn push(&mut self, placement: Placement) {
        match placement {
            Placement::Priority { member, score } => {
                // Same member re-added only moves its score
                if let Some(old) = self.priority_index.remove(&member) {
                    self.priority.remove(&old);
                }
                let key = (score, self.next_seq);
                self.next_seq += 1;
                self.priority.insert(key, member.clone());
                self.priority_index.insert(member, key);
            }
            Placement::Fifo { member } => self.fifo.push_back(member),
        }
    }

    fn expire(&mut self, now: Instant) {
        if matches!(self.completed_expires_at, Some(at) if at <= now) {
            self.completed.clear();
            self.completed_expires_at = None;
        }
        self.workers.retain(|_, (_, expires_at)| *expires_at > now);
    }

    fn bucket(&mut self, bucket: Bucket) -> &mut HashMap<String, String> {
        match bucket {
            Bucket::Processing => &mut self.processing,
            Bucket::Completed => &mut self.completed,
            Bucket::Failed => &mut self.failed,
        }
    }
}

/// Coordination store held in process memory
pub struct MemoryStore {
    state: Mutex<State>,
    fifo_ready: Notify,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            state: Mutex::new(State::default()),
            fifo_ready: Notify::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (or coming back). While unavailable every
    /// operation fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        }
    }

    fn try_pop_fifo(&self) -> Option<String> {
        self.state.lock().fifo.pop_front()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn push(&self, placement: Placement) -> StoreResult<()> {
        self.check_available()?;
        let is_fifo = matches!(placement, Placement::Fifo { .. });
        self.state.lock().push(placement);
        if is_fifo {
            self.fifo_ready.notify_one();
        }
        Ok(())
    }

    async fn pop_priority(&self) -> StoreResult<Option<String>> {
        self.check_available()?;
        let mut state = self.state.lock();
        let Some((_, member)) = state.priority.pop_first() else {
            return Ok(None);
        };
        state.priority_index.remove(&member);
        Ok(Some(member))
    }

    async fn pop_fifo(&self, timeout: Duration) -> StoreResult<Option<String>> {
        self.check_available()?;
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a push between the check and
            // the wait still wakes us
            let mut notified = pin!(self.fifo_ready.notified());
            notified.as_mut().enable();

            if let Some(member) = self.try_pop_fifo() {
                return Ok(Some(member));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.try_pop_fifo());
            }
            self.check_available()?;
        }
    }

    async fn hash_put(&self, bucket: Bucket, field: &str, value: String) -> StoreResult<()> {
        self.check_available()?;
        self.state.lock().bucket(bucket).insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_entries(&self, bucket: Bucket) -> StoreResult<Vec<(String, String)>> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.expire(Instant::now());
        let mut entries: Vec<(String, String)> = state
            .bucket(bucket)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn settle(&self, field: &str, settlement: Settlement) -> StoreResult<()> {
        self.check_available()?;
        let mut notify_fifo = false;
        {
            let mut state = self.state.lock();
            state.processing.remove(field);
            match settlement {
                Settlement::Requeue(placement) => {
                    notify_fifo = matches!(placement, Placement::Fifo { .. });
                    state.push(placement);
                }
                Settlement::Complete { record, retention } => {
                    state.completed.insert(field.to_string(), record);
                    state.completed_expires_at = Some(Instant::now() + retention);
                }
                Settlement::DeadLetter { record } => {
                    state.failed.insert(field.to_string(), record);
                }
            }
        }
        if notify_fifo {
            self.fifo_ready.notify_one();
        }
        Ok(())
    }

    async fn put_worker(&self, worker_id: &str, record: String, ttl: Duration) -> StoreResult<()> {
        self.check_available()?;
        let expires_at = Instant::now() + ttl;
        self.state
            .lock()
            .workers
            .insert(worker_id.to_string(), (record, expires_at));
        Ok(())
    }

    async fn workers(&self) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.expire(Instant::now());
        let mut ids: Vec<&String> = state.workers.keys().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|id| state.workers[id].0.clone())
            .collect())
    }

    async fn counts(&self) -> StoreResult<QueueCounts> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.expire(Instant::now());
        Ok(QueueCounts {
            pending_priority: state.priority.len(),
            pending_fifo: state.fifo.len(),
            processing: state.processing.len(),
            completed: state.completed.len(),
            dead_lettered: state.failed.len(),
        })
    }

    async fn clear(&self, scope: ClearScope) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        match scope {
            ClearScope::Pending => {
                state.priority.clear();
                state.priority_index.clear();
                state.fifo.clear();
            }
            ClearScope::Processing => state.processing.clear(),
            ClearScope::Completed => {
                state.completed.clear();
                state.completed_expires_at = None;
            }
            ClearScope::Failed => state.failed.clear(),
            ClearScope::Workers => state.workers.clear(),
            ClearScope::All => *state = State::default(),
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn prio(member: &str, score: i64) -> Placement {
        Placement::Priority {
            member: member.to_string(),
            score,
        }
    }

    fn fifo(member: &str) -> Placement {
        Placement::Fifo {
            member: member.to_string(),
        }
    }

    #[tokio::test]
    async fn test_priority_pops_lowest_score_first() {
        let store = MemoryStore::new();
        store.push(prio("a", -5)).await.unwrap();
        store.push(prio("b", -8)).await.unwrap();
        store.push(prio("c", -1)).await.unwrap();

        assert_eq!(store.pop_priority().await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop_priority().await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop_priority().await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.pop_priority().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_priority_readd_updates_score() {
        let store = MemoryStore::new();
        store.push(prio("a", -1)).await.unwrap();
        store.push(prio("b", -2)).await.unwrap();
        store.push(prio("a", -3)).await.unwrap();

        assert_eq!(store.counts().await.unwrap().pending_priority, 2);
        assert_eq!(store.pop_priority().await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_fifo_preserves_order() {
        let store = MemoryStore::new();
        for m in ["1", "2", "3"] {
            store.push(fifo(m)).await.unwrap();
        }

        for m in ["1", "2", "3"] {
            assert_eq!(store.pop_fifo(Duration::ZERO).await.unwrap().as_deref(), Some(m));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_pop_times_out() {
        let store = MemoryStore::new();
        let started = Instant::now();

        let popped = store.pop_fifo(Duration::from_secs(5)).await.unwrap();

        assert_eq!(popped, None);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_pop_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.pop_fifo(Duration::from_secs(30)).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        store.push(fifo("late")).await.unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_settle_moves_entry_out_of_ledger() {
        let store = MemoryStore::new();
        store
            .hash_put(Bucket::Processing, "7", "job".to_string())
            .await
            .unwrap();

        store
            .settle("7", Settlement::Requeue(fifo("job-retry")))
            .await
            .unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.processing, 0);
        assert_eq!(counts.pending_fifo, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_bucket_expires_after_retention() {
        let store = MemoryStore::new();
        store
            .settle(
                "1",
                Settlement::Complete {
                    record: "done".to_string(),
                    retention: Duration::from_secs(60),
                },
            )
            .await
            .unwrap();
        assert_eq!(store.counts().await.unwrap().completed, 1);

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(store.counts().await.unwrap().completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_expires_without_refresh() {
        let store = MemoryStore::new();
        store
            .put_worker("w-1", "record".to_string(), Duration::from_secs(40))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(39)).await;
        assert_eq!(store.workers().await.unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(matches!(
            store.pop_priority().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.ping().await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_scopes() {
        let store = MemoryStore::new();
        store.push(prio("a", -1)).await.unwrap();
        store.push(fifo("b")).await.unwrap();
        store
            .settle("9", Settlement::DeadLetter { record: "x".to_string() })
            .await
            .unwrap();

        store.clear(ClearScope::Pending).await.unwrap();
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending(), 0);
        assert_eq!(counts.dead_lettered, 1);

        store.clear(ClearScope::All).await.unwrap();
        assert_eq!(store.counts().await.unwrap(), QueueCounts::default());
    }
}
