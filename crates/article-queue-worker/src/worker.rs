//! Consumer loop: dequeue, process, then complete, requeue or dead-letter.

use crate::config::WorkerConfig;
use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics::WorkerMetrics;
use crate::processor::ProcessingFunction;
use crate::result_store::ResultStore;
use article_queue_core::{
    ArticleId, ArticleMetrics, CompletedRecord, DeadLetterRecord, Job, RetryDecision, RetryPolicy,
    WorkerRecord,
};
use article_queue_store::{CoordinationStore, ProcessingLedger, TaskQueue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Dequeuing,
    Processing,
    Completed,
    Requeued,
    DeadLettered,
}

/// Result of one pass through the loop
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing arrived before the dequeue timeout
    Empty,
    Completed { article_id: ArticleId, retry_count: u32 },
    Requeued { article_id: ArticleId, retry_count: u32 },
    DeadLettered { article_id: ArticleId, retry_count: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub dequeue_timeout: Duration,
    pub idle_sleep: Duration,
    pub error_backoff: Duration,
    pub breaker_threshold: u32,
    pub breaker_multiplier: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for LoopSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            dequeue_timeout: config.dequeue_timeout(),
            idle_sleep: config.idle_sleep(),
            error_backoff: config.error_backoff(),
            breaker_threshold: config.circuit_breaker_threshold,
            breaker_multiplier: config.circuit_breaker_multiplier,
        }
    }
}

/// Counts consecutive loop-level failures and picks the pause after each
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    multiplier: u32,
    backoff: Duration,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, multiplier: u32, backoff: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            multiplier: multiplier.max(1),
            backoff,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Pause to take after a failure, and whether it tripped the breaker.
    /// Tripping resets the counter.
    pub fn record_failure(&mut self) -> (Duration, bool) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold {
            self.consecutive_failures = 0;
            (self.backoff.saturating_mul(self.multiplier), true)
        } else {
            (self.backoff, false)
        }
    }
}

/// One worker's consumer state machine
pub struct WorkerLoop {
    context: WorkerContext,
    queue: TaskQueue,
    ledger: ProcessingLedger,
    processor: Arc<dyn ProcessingFunction>,
    results: Arc<dyn ResultStore>,
    metrics: Arc<WorkerMetrics>,
    policy: RetryPolicy,
    settings: LoopSettings,
    breaker: CircuitBreaker,
    state: LoopState,
}

impl WorkerLoop {
    pub fn new(
        context: WorkerContext,
        store: Arc<dyn CoordinationStore>,
        processor: Arc<dyn ProcessingFunction>,
        results: Arc<dyn ResultStore>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        let settings = LoopSettings::default();
        Self {
            context,
            queue: TaskQueue::new(store.clone()),
            ledger: ProcessingLedger::new(store),
            processor,
            results,
            metrics,
            policy: RetryPolicy::default(),
            breaker: breaker_for(&settings),
            settings,
            state: LoopState::Idle,
        }
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.breaker = breaker_for(&settings);
        self.settings = settings;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_completed_retention(mut self, retention: Duration) -> Self {
        self.ledger = self.ledger.with_completed_retention(retention);
        self
    }

    pub fn worker_id(&self) -> &str {
        self.context.worker_id()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn snapshot(&self) -> &WorkerRecord {
        self.context.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerRecord> {
        self.context.subscribe()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run until `cancel` fires. A job already in processing always finishes
    /// first. Returns the loop so it can be started again.
    pub async fn run(mut self, cancel: CancellationToken) -> Self {
        self.context.set_running(true);
        info!(worker_id = %self.worker_id(), "Worker loop started");

        loop {
            self.state = LoopState::Idle;
            if cancel.is_cancelled() {
                break;
            }

            let pause = match self.tick().await {
                Ok(TickOutcome::Empty) => {
                    self.breaker.record_success();
                    Some(self.settings.idle_sleep)
                }
                Ok(_) => {
                    self.breaker.record_success();
                    None
                }
                Err(e) => Some(self.on_loop_failure(&e)),
            };

            if let Some(pause) = pause {
                if !sleep_unless_cancelled(pause, &cancel).await {
                    break;
                }
            }
        }

        self.state = LoopState::Idle;
        self.context.set_running(false);
        info!(
            worker_id = %self.worker_id(),
            processed = self.snapshot().articles_processed,
            errors = self.snapshot().errors,
            "Worker loop stopped"
        );
        self
    }

    fn on_loop_failure(&mut self, e: &WorkerError) -> Duration {
        self.metrics.loop_failures_total.inc();
        let (pause, tripped) = self.breaker.record_failure();
        if tripped {
            self.metrics.circuit_breaker_trips_total.inc();
            error!(
                worker_id = %self.worker_id(),
                error = %e,
                pause_ms = pause.as_millis() as u64,
                "Circuit breaker tripped, backing off"
            );
        } else {
            error!(
                worker_id = %self.worker_id(),
                error = %e,
                consecutive = self.breaker.consecutive_failures(),
                "Worker loop iteration failed"
            );
        }
        pause
    }

    /// One pass: dequeue, then process whatever arrived.
    ///
    /// Per-job failures are handled here and come back as `Requeued` or
    /// `DeadLettered`. Errors are loop-level only.
    pub async fn tick(&mut self) -> WorkerResult<TickOutcome> {
        self.state = LoopState::Dequeuing;
        let Some(job) = self.queue.dequeue(self.settings.dequeue_timeout).await? else {
            self.state = LoopState::Idle;
            return Ok(TickOutcome::Empty);
        };

        if let Err(e) = self.ledger.record(&job, Some(self.context.worker_id())).await {
            // The job left the queue but never reached the ledger
            self.return_to_queue(&job).await;
            return Err(e.into());
        }

        self.state = LoopState::Processing;
        debug!(
            worker_id = %self.worker_id(),
            article_id = job.article_id,
            attempt = job.attempt(),
            "Processing article"
        );

        let metrics = self.process(&job).await;
        if let Some(reason) = &metrics.error {
            return self.handle_failure(job, reason.clone()).await;
        }

        if let Err(e) = self.results.upsert(job.article_id, &metrics).await {
            // Infrastructure fault: keep the retry budget intact
            self.return_to_queue(&job).await;
            self.state = LoopState::Requeued;
            return Err(WorkerError::ResultStore(e));
        }

        let summary = CompletedRecord::new(&job, &metrics, Some(self.worker_id().to_string()));
        self.ledger.complete(&job, &summary).await?;

        self.context.record_processed();
        self.metrics.inc_jobs_total("completed");
        self.state = LoopState::Completed;
        info!(
            worker_id = %self.worker_id(),
            article_id = job.article_id,
            retry_count = job.retry_count,
            word_count = metrics.word_count,
            sentiment = metrics.sentiment_score,
            "Article processed"
        );

        Ok(TickOutcome::Completed {
            article_id: job.article_id,
            retry_count: job.retry_count,
        })
    }

    /// Run the processing function off the async threads. A panic counts as
    /// a failed attempt.
    async fn process(&self, job: &Job) -> ArticleMetrics {
        let processor = self.processor.clone();
        let payload = job.payload.clone();
        let started = Instant::now();

        let metrics = match tokio::task::spawn_blocking(move || processor.process(&payload)).await {
            Ok(metrics) => metrics,
            Err(e) => ArticleMetrics::failed(format!("processing task failed: {}", e)),
        };

        self.metrics
            .job_processing_duration
            .observe(started.elapsed().as_secs_f64());
        metrics
    }

    async fn handle_failure(&mut self, job: Job, reason: String) -> WorkerResult<TickOutcome> {
        self.context.record_error();
        let failure = WorkerError::Processing {
            article_id: job.article_id,
            reason: reason.clone(),
        };

        match self.policy.decide(&job) {
            RetryDecision::Requeue { retry_count } => {
                self.ledger.requeue(&job.next_attempt()).await?;
                self.metrics.inc_jobs_total("requeued");
                self.state = LoopState::Requeued;
                warn!(
                    worker_id = %self.worker_id(),
                    error = %failure,
                    retry_count,
                    "Attempt failed, job requeued"
                );
                Ok(TickOutcome::Requeued {
                    article_id: job.article_id,
                    retry_count,
                })
            }
            RetryDecision::DeadLetter => {
                let exhausted = WorkerError::RetryExhausted {
                    article_id: job.article_id,
                    retry_count: job.retry_count,
                    reason: reason.clone(),
                };
                let article_id = job.article_id;
                let retry_count = job.retry_count;
                let record = DeadLetterRecord::new(job, reason, Some(self.worker_id().to_string()));
                self.ledger.dead_letter(&record).await?;
                self.metrics.inc_jobs_total("dead_lettered");
                self.state = LoopState::DeadLettered;
                error!(worker_id = %self.worker_id(), error = %exhausted, "Job dead-lettered");
                Ok(TickOutcome::DeadLettered {
                    article_id,
                    retry_count,
                })
            }
        }
    }

    /// Best-effort requeue of `job` unchanged
    async fn return_to_queue(&self, job: &Job) {
        if let Err(e) = self.ledger.requeue(job).await {
            error!(
                worker_id = %self.worker_id(),
                article_id = job.article_id,
                error = %e,
                "Could not return job to the queue"
            );
        }
    }
}

fn breaker_for(settings: &LoopSettings) -> CircuitBreaker {
    CircuitBreaker::new(
        settings.breaker_threshold,
        settings.breaker_multiplier,
        settings.error_backoff,
    )
}

/// Sleep for `duration`; false if cancelled first
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::TextProcessor;
    use crate::result_store::MemoryResultStore;
    use article_queue_core::ArticlePayload;
    use article_queue_store::MemoryStore;

    fn worker(store: Arc<MemoryStore>, results: Arc<MemoryResultStore>) -> WorkerLoop {
        WorkerLoop::new(
            WorkerContext::new("w-test", "host"),
            store,
            Arc::new(TextProcessor::new()),
            results,
            Arc::new(WorkerMetrics::new().unwrap()),
        )
        .with_settings(LoopSettings {
            dequeue_timeout: Duration::ZERO,
            ..LoopSettings::default()
        })
    }

    #[test]
    fn test_breaker_trips_at_threshold() {
        let mut breaker = CircuitBreaker::new(5, 10, Duration::from_secs(1));

        for _ in 0..4 {
            assert_eq!(breaker.record_failure(), (Duration::from_secs(1), false));
        }
        assert_eq!(breaker.record_failure(), (Duration::from_secs(10), true));
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_breaker_success_resets() {
        let mut breaker = CircuitBreaker::new(3, 10, Duration::from_secs(1));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        assert_eq!(breaker.record_failure(), (Duration::from_secs(1), false));
    }

    #[test]
    fn test_breaker_long_pause_saturates() {
        let mut breaker = CircuitBreaker::new(1, u32::MAX, Duration::MAX / 2);
        assert_eq!(breaker.record_failure(), (Duration::MAX, true));
    }

    #[tokio::test]
    async fn test_tick_on_empty_queue() {
        let mut worker = worker(Arc::new(MemoryStore::new()), Arc::new(MemoryResultStore::new()));

        assert_eq!(worker.tick().await.unwrap(), TickOutcome::Empty);
        assert_eq!(worker.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_tick_completes_article() {
        let store = Arc::new(MemoryStore::new());
        let results = Arc::new(MemoryResultStore::new());
        TaskQueue::new(store.clone())
            .enqueue(
                Job::new(5, ArticlePayload::new("Bolsa", "<p>El mercado sube con optimismo</p>", "")),
                0,
            )
            .await
            .unwrap();
        let mut worker = worker(store.clone(), results.clone());

        let outcome = worker.tick().await.unwrap();

        assert_eq!(
            outcome,
            TickOutcome::Completed {
                article_id: 5,
                retry_count: 0
            }
        );
        assert_eq!(worker.state(), LoopState::Completed);
        assert_eq!(worker.snapshot().articles_processed, 1);
        assert!(results.get(5).is_some());
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.processing, 0);
        assert_eq!(counts.completed, 1);
    }

    #[tokio::test]
    async fn test_result_store_outage_requeues_without_spending_retry() {
        let store = Arc::new(MemoryStore::new());
        let results = Arc::new(MemoryResultStore::new());
        results.set_available(false);
        let queue = TaskQueue::new(store.clone());
        queue
            .enqueue(Job::new(6, ArticlePayload::new("t", "<p>texto</p>", "")), 0)
            .await
            .unwrap();
        let mut worker = worker(store.clone(), results);

        let err = worker.tick().await.unwrap_err();

        assert!(matches!(err, WorkerError::ResultStore(_)));
        assert!(err.is_loop_level());
        assert_eq!(worker.snapshot().errors, 0);
        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.article_id, 6);
        assert_eq!(job.retry_count, 0);
        assert_eq!(store.counts().await.unwrap().processing, 0);
    }

    #[tokio::test]
    async fn test_empty_article_is_retried() {
        let store = Arc::new(MemoryStore::new());
        TaskQueue::new(store.clone())
            .enqueue(Job::new(7, ArticlePayload::default()), 3)
            .await
            .unwrap();
        let mut worker = worker(store, Arc::new(MemoryResultStore::new()));

        let outcome = worker.tick().await.unwrap();

        assert_eq!(
            outcome,
            TickOutcome::Requeued {
                article_id: 7,
                retry_count: 1
            }
        );
        assert_eq!(worker.snapshot().errors, 1);
    }
}
