//! Worker side of the article queue: the consumer loop, its heartbeat, and
//! the processing and result-store seams they call into.

pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod metrics;
pub mod processor;
pub mod result_store;
pub mod supervisor;
pub mod worker;

pub use config::WorkerConfig;
pub use context::WorkerContext;
pub use error::{WorkerError, WorkerResult};
pub use health::{probe, HealthReport};
pub use heartbeat::HeartbeatPublisher;
pub use metrics::WorkerMetrics;
pub use processor::{ProcessingFunction, TextProcessor};
pub use result_store::{MemoryResultStore, RedisResultStore, ResultStore};
pub use supervisor::Supervisor;
pub use worker::{CircuitBreaker, LoopSettings, LoopState, TickOutcome, WorkerLoop};
