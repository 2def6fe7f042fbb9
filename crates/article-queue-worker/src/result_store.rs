//! Persistence of processed article metrics.

use article_queue_core::{ArticleId, ArticleMetrics, JobError};
use article_queue_store::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Idempotent sink for processed output; writing the same article twice
/// leaves one entry holding the latest metrics.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn upsert(&self, article_id: ArticleId, metrics: &ArticleMetrics) -> StoreResult<()>;

    async fn health(&self) -> StoreResult<()>;
}

/// Results kept in a Redis hash `{namespace}:results`, one field per article
pub struct RedisResultStore {
    conn: ConnectionManager,
    key: String,
}

impl RedisResultStore {
    pub async fn connect(redis_url: &str, namespace: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("Invalid Redis URL {}: {}", redis_url, e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Redis connection error: {}", e)))?;

        Ok(Self {
            conn,
            key: format!("{}:results", namespace),
        })
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn upsert(&self, article_id: ArticleId, metrics: &ArticleMetrics) -> StoreResult<()> {
        let value = serde_json::to_string(metrics).map_err(JobError::from)?;
        let mut conn = self.conn.clone();
        let _: () = conn.hset(&self.key, article_id, value).await?;
        Ok(())
    }

    async fn health(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Results held in process memory
#[derive(Default)]
pub struct MemoryResultStore {
    results: Mutex<HashMap<ArticleId, ArticleMetrics>>,
    writes: Mutex<u64>,
    unavailable: AtomicBool,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable, every call fails with [`StoreError::Unavailable`]
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn get(&self, article_id: ArticleId) -> Option<ArticleMetrics> {
        self.results.lock().get(&article_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    /// Number of successful upserts, repeats included
    pub fn writes(&self) -> u64 {
        *self.writes.lock()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("result store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn upsert(&self, article_id: ArticleId, metrics: &ArticleMetrics) -> StoreResult<()> {
        self.check_available()?;
        self.results.lock().insert(article_id, metrics.clone());
        *self.writes.lock() += 1;
        Ok(())
    }

    async fn health(&self) -> StoreResult<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryResultStore::new();
        let mut metrics = ArticleMetrics {
            word_count: 10,
            ..Default::default()
        };

        store.upsert(1, &metrics).await.unwrap();
        metrics.word_count = 12;
        store.upsert(1, &metrics).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.writes(), 2);
        assert_eq!(store.get(1).unwrap().word_count, 12);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryResultStore::new();
        store.set_available(false);

        assert!(store.health().await.is_err());
        assert!(store.upsert(1, &ArticleMetrics::default()).await.is_err());
        assert!(store.is_empty());
    }
}
