//! Storage primitives the coordination layer is built on.
//!
//! Backends only move opaque strings around; typed encoding lives in
//! [`crate::TaskQueue`], [`crate::ProcessingLedger`] and [`crate::WorkerRegistry`].
//! The only atomicity required from a backend is: pop-minimum on the priority
//! structure, pop-front on the FIFO sequence, and [`CoordinationStore::settle`]
//! applied as a single transaction.

use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Keyed buckets holding one entry per article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// In-flight ledger
    Processing,
    /// Recently completed jobs, expiring as a whole after the retention window
    Completed,
    /// Dead-lettered jobs, kept until cleared
    Failed,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Processing => "processing",
            Bucket::Completed => "completed",
            Bucket::Failed => "failed",
        }
    }
}

/// Where an encoded job goes when it enters the pending queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Sorted structure; lowest score pops first
    Priority { member: String, score: i64 },
    /// Plain FIFO sequence
    Fifo { member: String },
}

/// Terminal move of a ledger entry. The ledger field is removed in the same
/// transaction as the write below.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Requeue(Placement),
    Complete { record: String, retention: Duration },
    DeadLetter { record: String },
}

/// Entry counts across every bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending_priority: usize,
    pub pending_fifo: usize,
    pub processing: usize,
    pub completed: usize,
    pub dead_lettered: usize,
}

impl QueueCounts {
    pub fn pending(&self) -> usize {
        self.pending_priority + self.pending_fifo
    }

    pub fn total(&self) -> usize {
        self.pending() + self.processing + self.completed + self.dead_lettered
    }
}

/// Target of an administrative purge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Pending,
    Processing,
    Completed,
    Failed,
    Workers,
    All,
}

impl ClearScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearScope::Pending => "pending",
            ClearScope::Processing => "processing",
            ClearScope::Completed => "completed",
            ClearScope::Failed => "failed",
            ClearScope::Workers => "workers",
            ClearScope::All => "all",
        }
    }
}

impl FromStr for ClearScope {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClearScope::Pending),
            "processing" => Ok(ClearScope::Processing),
            "completed" => Ok(ClearScope::Completed),
            "failed" | "dead_letter" => Ok(ClearScope::Failed),
            "workers" => Ok(ClearScope::Workers),
            "all" => Ok(ClearScope::All),
            other => Err(StoreError::InvalidScope(other.to_string())),
        }
    }
}

/// Shared external store acting as queue, ledger and liveness registry
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Add an entry to the pending queue
    async fn push(&self, placement: Placement) -> StoreResult<()>;

    /// Non-blocking pop of the lowest-scored priority entry
    async fn pop_priority(&self) -> StoreResult<Option<String>>;

    /// Pop the head of the FIFO sequence, waiting at most `timeout`.
    /// A zero timeout never waits.
    async fn pop_fifo(&self, timeout: Duration) -> StoreResult<Option<String>>;

    async fn hash_put(&self, bucket: Bucket, field: &str, value: String) -> StoreResult<()>;

    /// Every (field, value) pair of a bucket, ordered by field
    async fn hash_entries(&self, bucket: Bucket) -> StoreResult<Vec<(String, String)>>;

    /// Atomically drop `field` from the ledger and apply `settlement`
    async fn settle(&self, field: &str, settlement: Settlement) -> StoreResult<()>;

    /// Write a worker record that disappears unless rewritten within `ttl`
    async fn put_worker(&self, worker_id: &str, record: String, ttl: Duration) -> StoreResult<()>;

    /// Every worker record still inside its TTL
    async fn workers(&self) -> StoreResult<Vec<String>>;

    async fn counts(&self) -> StoreResult<QueueCounts>;

    async fn clear(&self, scope: ClearScope) -> StoreResult<()>;

    /// Liveness probe
    async fn ping(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_scope_parsing() {
        assert_eq!("all".parse::<ClearScope>().unwrap(), ClearScope::All);
        assert_eq!("dead_letter".parse::<ClearScope>().unwrap(), ClearScope::Failed);
        assert!(matches!(
            "everything".parse::<ClearScope>(),
            Err(StoreError::InvalidScope(_))
        ));
    }

    #[test]
    fn test_counts_totals() {
        let counts = QueueCounts {
            pending_priority: 2,
            pending_fifo: 3,
            processing: 1,
            completed: 4,
            dead_lettered: 1,
        };

        assert_eq!(counts.pending(), 5);
        assert_eq!(counts.total(), 11);
    }
}
