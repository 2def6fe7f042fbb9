use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metrics derived from one article
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleMetrics {
    pub cleaned_content: String,
    pub word_count: usize,
    pub keyword_counts: BTreeMap<String, u32>,
    /// In [-1, 1]
    pub sentiment_score: f64,
    pub entities: Vec<String>,
    /// Set when the transform could not run; the other fields are zeroed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArticleMetrics {
    /// Zeroed result carrying an error indicator
    pub fn failed(error: impl Into<String>) -> Self {
        ArticleMetrics {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_metrics_are_zeroed() {
        let metrics = ArticleMetrics::failed("no text");

        assert!(metrics.is_failure());
        assert_eq!(metrics.word_count, 0);
        assert_eq!(metrics.sentiment_score, 0.0);
        assert!(metrics.keyword_counts.is_empty());
        assert!(metrics.entities.is_empty());
    }

    #[test]
    fn test_error_field_omitted_on_success() {
        let json = serde_json::to_string(&ArticleMetrics::default()).unwrap();
        assert!(!json.contains("error"));
    }
}
