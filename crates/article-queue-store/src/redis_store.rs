//! Redis-backed coordination store.
//!
//! Layout under a namespace `ns`:
//!
//! - `{ns}:priority` sorted set, score = -priority
//! - `{ns}:fifo` list, RPUSH / BLPOP
//! - `{ns}:processing`, `{ns}:completed`, `{ns}:failed` hashes keyed by article id
//! - `{ns}:workers:{worker_id}` string per worker, written with SETEX
//!
//! Blocking pops run on their own connection so a worker's heartbeat and
//! ledger writes are never stuck behind a pending BLPOP.

use crate::backend::{Bucket, ClearScope, CoordinationStore, Placement, QueueCounts, Settlement};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Number of keys requested per SCAN round trip
const SCAN_BATCH: usize = 100;

/// Redis key names for one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub priority: String,
    pub fifo: String,
    pub processing: String,
    pub completed: String,
    pub failed: String,
    worker_prefix: String,
}

impl QueueKeys {
    pub fn new(namespace: &str) -> Self {
        QueueKeys {
            priority: format!("{}:priority", namespace),
            fifo: format!("{}:fifo", namespace),
            processing: format!("{}:processing", namespace),
            completed: format!("{}:completed", namespace),
            failed: format!("{}:failed", namespace),
            worker_prefix: format!("{}:workers:", namespace),
        }
    }

    pub fn bucket(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Processing => &self.processing,
            Bucket::Completed => &self.completed,
            Bucket::Failed => &self.failed,
        }
    }

    pub fn worker(&self, worker_id: &str) -> String {
        format!("{}{}", self.worker_prefix, worker_id)
    }

    pub fn worker_pattern(&self) -> String {
        format!("{}*", self.worker_prefix)
    }
}

/// Coordination store on a shared Redis instance
pub struct RedisStore {
    conn: ConnectionManager,
    blocking: ConnectionManager,
    keys: QueueKeys,
}

impl RedisStore {
    /// Connect and verify the server answers.
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379/0")
    /// * `namespace` - Prefix for every key this store touches
    pub async fn connect(redis_url: &str, namespace: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("Invalid Redis URL {}: {}", redis_url, e)))?;

        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::Unavailable(format!("Redis connection error: {}", e)))?;
        let blocking = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Redis connection error: {}", e)))?;

        let store = RedisStore {
            conn,
            blocking,
            keys: QueueKeys::new(namespace),
        };
        store.ping().await?;

        info!("Connected to Redis at {} (namespace {})", redis_url, namespace);
        Ok(store)
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    async fn worker_keys(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = self.keys.worker_pattern();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

impl Clone for RedisStore {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            blocking: self.blocking.clone(),
            keys: self.keys.clone(),
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn push(&self, placement: Placement) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        match placement {
            Placement::Priority { member, score } => {
                let _: () = conn.zadd(&self.keys.priority, member, score).await?;
            }
            Placement::Fifo { member } => {
                let _: () = conn.rpush(&self.keys.fifo, member).await?;
            }
        }
        Ok(())
    }

    async fn pop_priority(&self) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = conn.zpopmin(&self.keys.priority, 1).await?;
        Ok(popped.into_iter().next().map(|(member, _)| member))
    }

    async fn pop_fifo(&self, timeout: Duration) -> StoreResult<Option<String>> {
        let mut conn = self.blocking.clone();

        // BLPOP treats 0 as "wait forever"
        if timeout.is_zero() {
            let popped: Option<String> = conn.lpop(&self.keys.fifo, None).await?;
            return Ok(popped);
        }

        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&self.keys.fifo)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, member)| member))
    }

    async fn hash_put(&self, bucket: Bucket, field: &str, value: String) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(self.keys.bucket(bucket), field, value).await?;
        Ok(())
    }

    async fn hash_entries(&self, bucket: Bucket) -> StoreResult<Vec<(String, String)>> {
        let mut conn = self.conn.clone();
        let entries: HashMap<String, String> = conn.hgetall(self.keys.bucket(bucket)).await?;
        let mut entries: Vec<(String, String)> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn settle(&self, field: &str, settlement: Settlement) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().hdel(&self.keys.processing, field);

        match settlement {
            Settlement::Requeue(Placement::Priority { member, score }) => {
                pipe.zadd(&self.keys.priority, member, score);
            }
            Settlement::Requeue(Placement::Fifo { member }) => {
                pipe.rpush(&self.keys.fifo, member);
            }
            Settlement::Complete { record, retention } => {
                pipe.hset(&self.keys.completed, field, record)
                    .expire(&self.keys.completed, retention.as_secs().max(1) as i64);
            }
            Settlement::DeadLetter { record } => {
                pipe.hset(&self.keys.failed, field, record);
            }
        }

        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn put_worker(&self, worker_id: &str, record: String, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.keys.worker(worker_id), record, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn workers(&self) -> StoreResult<Vec<String>> {
        let keys = self.worker_keys().await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // Explicit MGET: a single-key call through the typed helper becomes GET
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        // Keys that expired between SCAN and MGET come back as nil
        Ok(values.into_iter().flatten().collect())
    }

    async fn counts(&self) -> StoreResult<QueueCounts> {
        let mut conn = self.conn.clone();
        let (pending_priority, pending_fifo, processing, completed, dead_lettered): (
            usize,
            usize,
            usize,
            usize,
            usize,
        ) = redis::pipe()
            .zcard(&self.keys.priority)
            .llen(&self.keys.fifo)
            .hlen(&self.keys.processing)
            .hlen(&self.keys.completed)
            .hlen(&self.keys.failed)
            .query_async(&mut conn)
            .await?;

        Ok(QueueCounts {
            pending_priority,
            pending_fifo,
            processing,
            completed,
            dead_lettered,
        })
    }

    async fn clear(&self, scope: ClearScope) -> StoreResult<()> {
        let mut keys: Vec<String> = match scope {
            ClearScope::Pending => vec![self.keys.priority.clone(), self.keys.fifo.clone()],
            ClearScope::Processing => vec![self.keys.processing.clone()],
            ClearScope::Completed => vec![self.keys.completed.clone()],
            ClearScope::Failed => vec![self.keys.failed.clone()],
            ClearScope::Workers => Vec::new(),
            ClearScope::All => vec![
                self.keys.priority.clone(),
                self.keys.fifo.clone(),
                self.keys.processing.clone(),
                self.keys.completed.clone(),
                self.keys.failed.clone(),
            ],
        };
        if matches!(scope, ClearScope::Workers | ClearScope::All) {
            keys.extend(self.worker_keys().await?);
        }
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let removed: usize = conn.del(&keys).await?;
        debug!("Cleared {} keys for scope {}", removed, scope.as_str());
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = QueueKeys::new("tasks:text_processor");

        assert_eq!(keys.priority, "tasks:text_processor:priority");
        assert_eq!(keys.fifo, "tasks:text_processor:fifo");
        assert_eq!(keys.bucket(Bucket::Processing), "tasks:text_processor:processing");
        assert_eq!(keys.bucket(Bucket::Failed), "tasks:text_processor:failed");
        assert_eq!(keys.worker("host-1a2b3c4d"), "tasks:text_processor:workers:host-1a2b3c4d");
        assert_eq!(keys.worker_pattern(), "tasks:text_processor:workers:*");
    }

    #[test]
    fn test_priority_and_fifo_keys_differ() {
        // Sharing one key between a sorted set and a list fails with WRONGTYPE
        let keys = QueueKeys::new("ns");
        assert_ne!(keys.priority, keys.fifo);
    }
}
