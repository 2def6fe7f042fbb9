use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Prometheus metrics for one worker process
pub struct WorkerMetrics {
    pub registry: Registry,

    /// Finished attempts by outcome: completed, requeued, dead_lettered
    pub jobs_total: IntCounterVec,

    pub job_processing_duration: Histogram,

    pub loop_failures_total: IntCounter,
    pub circuit_breaker_trips_total: IntCounter,
    pub heartbeat_failures_total: IntCounter,
}

impl WorkerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let jobs_total = IntCounterVec::new(
            Opts::new("aq_jobs_total", "Total number of finished job attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(jobs_total.clone()))?;

        let job_processing_duration = Histogram::with_opts(HistogramOpts::new(
            "aq_job_processing_seconds",
            "Time spent in the processing function per attempt",
        ))?;
        registry.register(Box::new(job_processing_duration.clone()))?;

        let loop_failures_total = IntCounter::new(
            "aq_loop_failures_total",
            "Loop-level failures (store or result store unreachable, undecodable entries)",
        )?;
        registry.register(Box::new(loop_failures_total.clone()))?;

        let circuit_breaker_trips_total = IntCounter::new(
            "aq_circuit_breaker_trips_total",
            "Times the worker loop entered the long backoff",
        )?;
        registry.register(Box::new(circuit_breaker_trips_total.clone()))?;

        let heartbeat_failures_total =
            IntCounter::new("aq_heartbeat_failures_total", "Failed heartbeat writes")?;
        registry.register(Box::new(heartbeat_failures_total.clone()))?;

        Ok(WorkerMetrics {
            registry,
            jobs_total,
            job_processing_duration,
            loop_failures_total,
            circuit_breaker_trips_total,
            heartbeat_failures_total,
        })
    }

    pub fn inc_jobs_total(&self, outcome: &str) {
        self.jobs_total.with_label_values(&[outcome]).inc();
    }

    pub fn jobs_with_outcome(&self, outcome: &str) -> u64 {
        self.jobs_total.with_label_values(&[outcome]).get()
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
