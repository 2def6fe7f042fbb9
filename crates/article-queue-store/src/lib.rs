//! Shared coordination store: pending queue, in-flight ledger, result buckets
//! and worker liveness registry.

pub mod admin;
pub mod backend;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod queue;
pub mod redis_store;
pub mod registry;

pub use admin::{BatchReceipt, FailedEntry, QueueAdmin};
pub use backend::{Bucket, ClearScope, CoordinationStore, Placement, QueueCounts, Settlement};
pub use error::{StoreError, StoreResult};
pub use ledger::{ProcessingLedger, DEFAULT_COMPLETED_RETENTION};
pub use memory::MemoryStore;
pub use queue::{MalformedEntry, TaskQueue};
pub use redis_store::{QueueKeys, RedisStore};
pub use registry::{heartbeat_ttl, WorkerRegistry};

/// Key namespace shared by every worker of the text processor
pub const DEFAULT_NAMESPACE: &str = "tasks:text_processor";
