use article_queue_core::RetryPolicy;
use article_queue_store::{RedisStore, WorkerRegistry};
use article_queue_worker::config::local_hostname;
use article_queue_worker::{
    probe, HeartbeatPublisher, LoopSettings, RedisResultStore, Supervisor, TextProcessor,
    WorkerConfig, WorkerContext, WorkerError, WorkerLoop, WorkerMetrics,
};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "aq-worker")]
#[command(about = "Article queue worker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, env = "AQ_CONFIG")]
    config: Option<String>,

    /// Redis connection URL
    #[arg(long, env = "AQ_REDIS_URL")]
    redis_url: Option<String>,

    /// Key namespace
    #[arg(long, env = "AQ_NAMESPACE")]
    namespace: Option<String>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long, env = "AQ_WORKER_ID")]
    worker_id: Option<String>,

    #[arg(long, env = "AQ_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "AQ_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[arg(long, env = "AQ_LOG_LEVEL")]
    log_level: Option<String>,

    /// Register without consuming; SIGUSR1 starts the loop, SIGUSR2 stops it
    #[arg(long)]
    no_auto_start: bool,

    /// Log as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    // Override with CLI args
    if let Some(redis_url) = args.redis_url {
        config.redis_url = redis_url;
    }
    if let Some(namespace) = args.namespace {
        config.namespace = namespace;
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = Some(worker_id);
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(port) = args.metrics_port {
        config.metrics_port = Some(port);
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if args.no_auto_start {
        config.auto_start = false;
    }

    init_tracing(&config.log_level, args.json);
    config.validate()?;

    let worker_id = config.generate_worker_id();
    info!(worker_id = %worker_id, namespace = %config.namespace, "Starting worker");

    let store = match RedisStore::connect(&config.redis_url, &config.namespace).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            let err = WorkerError::Configuration(format!("coordination store unreachable: {}", e));
            error!(worker_id = %worker_id, "{}", err);
            return Err(err.into());
        }
    };
    let results = RedisResultStore::connect(&config.redis_url, &config.namespace)
        .await
        .map_err(|e| WorkerError::Configuration(format!("result store unreachable: {}", e)))?;

    let report = probe(store.as_ref(), &results).await;
    if !report.is_healthy() {
        warn!(?report, "Starting with degraded dependencies");
    }

    let metrics = Arc::new(WorkerMetrics::new()?);
    if let Some(port) = config.metrics_port {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let context = WorkerContext::new(worker_id.clone(), local_hostname());
    let worker = WorkerLoop::new(
        context,
        store.clone(),
        Arc::new(TextProcessor::new()),
        Arc::new(results),
        metrics.clone(),
    )
    .with_settings(LoopSettings::from(&config))
    .with_policy(RetryPolicy::new(config.max_retries))
    .with_completed_retention(config.completed_retention());

    let heartbeat = HeartbeatPublisher::new(
        WorkerRegistry::new(store),
        worker.subscribe(),
        config.heartbeat_interval(),
        config.heartbeat_ttl(),
        metrics,
    );

    let mut supervisor = Supervisor::new(worker, heartbeat);
    if config.auto_start {
        supervisor.start();
    } else {
        info!(worker_id = %worker_id, "Auto start disabled, waiting for a start signal");
    }

    wait_for_shutdown(&mut supervisor).await?;
    info!("Received shutdown signal");

    let record = supervisor.shutdown().await?;
    info!(
        worker_id = %record.worker_id,
        processed = record.articles_processed,
        errors = record.errors,
        "Worker exited"
    );
    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(supervisor: &mut Supervisor) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut start = signal(SignalKind::user_defined1())?;
    let mut stop = signal(SignalKind::user_defined2())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = terminate.recv() => break,
            _ = start.recv() => {
                if !supervisor.start() {
                    info!(worker_id = %supervisor.worker_id(), "Worker already running");
                }
            }
            _ = stop.recv() => supervisor.stop().await?,
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_supervisor: &mut Supervisor) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn start_metrics_server(metrics: Arc<WorkerMetrics>, port: u16) -> anyhow::Result<()> {
    use axum::{extract::State, http::StatusCode, routing::get, Router};

    async fn metrics_handler(
        State(metrics): State<Arc<WorkerMetrics>>,
    ) -> Result<String, (StatusCode, String)> {
        metrics
            .render()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
