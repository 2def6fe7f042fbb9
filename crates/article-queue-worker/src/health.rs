use crate::result_store::ResultStore;
use article_queue_store::CoordinationStore;
use serde::Serialize;

/// Reachability of the two stores a worker depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub store: Option<String>,
    pub result_store: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.store.is_none() && self.result_store.is_none()
    }
}

/// Ping both stores; each field holds the error, if any
pub async fn probe(store: &dyn CoordinationStore, results: &dyn ResultStore) -> HealthReport {
    HealthReport {
        store: store.ping().await.err().map(|e| e.to_string()),
        result_store: results.health().await.err().map(|e| e.to_string()),
    }
}
