//! Retry policy for jobs whose processing failed.

use crate::{Job, DEFAULT_MAX_RETRIES};

/// What to do with a job after a processing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put it back in the queue carrying this retry count
    Requeue { retry_count: u32 },
    /// Retry budget exhausted; park it in the failed bucket
    DeadLetter,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of requeues before a job is dead-lettered
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Check if a job with this retry count may be requeued.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Decide the fate of a job that just failed.
    pub fn decide(&self, job: &Job) -> RetryDecision {
        if self.should_retry(job.retry_count) {
            RetryDecision::Requeue {
                retry_count: job.retry_count + 1,
            }
        } else {
            RetryDecision::DeadLetter
        }
    }
}
