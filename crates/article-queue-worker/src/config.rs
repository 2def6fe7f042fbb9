use crate::error::{WorkerError, WorkerResult};
use article_queue_core::DEFAULT_MAX_RETRIES;
use article_queue_store::{heartbeat_ttl, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub redis_url: String,
    /// Key prefix shared by every worker of one deployment
    pub namespace: String,
    pub worker_id: Option<String>,

    /// Longest blocking wait on the FIFO path
    pub dequeue_timeout_secs: u64,
    /// Pause after an empty dequeue
    pub idle_sleep_ms: u64,
    /// Pause after a loop-level failure
    pub error_backoff_ms: u64,
    /// Consecutive loop-level failures before the long pause
    pub circuit_breaker_threshold: u32,
    /// Long pause = error backoff x this
    pub circuit_breaker_multiplier: u32,
    pub max_retries: u32,

    pub heartbeat_interval_secs: u64,
    pub heartbeat_missed_beats: u32,
    pub heartbeat_slack_secs: u64,

    pub completed_retention_secs: u64,

    /// Start consuming as soon as the process is up
    pub auto_start: bool,
    pub metrics_port: Option<u16>,
    pub log_level: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            worker_id: None,
            dequeue_timeout_secs: 5,
            idle_sleep_ms: 1000,
            error_backoff_ms: 1000,
            circuit_breaker_threshold: 5,
            circuit_breaker_multiplier: 10,
            max_retries: DEFAULT_MAX_RETRIES,
            heartbeat_interval_secs: 10,
            heartbeat_missed_beats: 3,
            heartbeat_slack_secs: 10,
            completed_retention_secs: 3600,
            auto_start: true,
            metrics_port: None,
            log_level: "info".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Reject values that would stop the worker from registering
    pub fn validate(&self) -> WorkerResult<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(WorkerError::Configuration(
                "heartbeat_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_missed_beats == 0 {
            return Err(WorkerError::Configuration(
                "heartbeat_missed_beats must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(WorkerError::Configuration(
                "circuit_breaker_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured id, or `<hostname>-<8 hex chars>`
    pub fn generate_worker_id(&self) -> String {
        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", local_hostname(), &random[..8])
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_secs)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        heartbeat_ttl(
            self.heartbeat_interval(),
            self.heartbeat_missed_beats,
            Duration::from_secs(self.heartbeat_slack_secs),
        )
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }
}

pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();

        assert_eq!(config.dequeue_timeout(), Duration::from_secs(5));
        assert_eq!(config.idle_sleep(), Duration::from_secs(1));
        assert_eq!(config.circuit_breaker_threshold, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.heartbeat_ttl(), Duration::from_secs(40));
        assert_eq!(config.namespace, "tasks:text_processor");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "redis_url: redis://cache:6379/2\nheartbeat_interval_secs: 5\nmetrics_port: 9105\n";
        let config: WorkerConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.redis_url, "redis://cache:6379/2");
        assert_eq!(config.metrics_port, Some(9105));
        assert_eq!(config.heartbeat_ttl(), Duration::from_secs(25));
        assert_eq!(config.error_backoff_ms, 1000);
    }

    #[test]
    fn test_defaults_validate() {
        assert!(WorkerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_heartbeat_settings_are_rejected() {
        let config: WorkerConfig = serde_yaml::from_str("heartbeat_interval_secs: 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, WorkerError::Configuration(ref m) if m.contains("heartbeat_interval_secs")));

        let config: WorkerConfig = serde_yaml::from_str("heartbeat_missed_beats: 0\n").unwrap();
        assert!(matches!(config.validate(), Err(WorkerError::Configuration(_))));
    }

    #[test]
    fn test_generated_worker_id_shape() {
        let config = WorkerConfig::default();
        let id = config.generate_worker_id();
        let (host, suffix) = id.rsplit_once('-').unwrap();

        assert!(!host.is_empty());
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_configured_worker_id_wins() {
        let config = WorkerConfig {
            worker_id: Some("worker-7".to_string()),
            ..Default::default()
        };
        assert_eq!(config.generate_worker_id(), "worker-7");
    }
}
