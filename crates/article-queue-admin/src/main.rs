use article_queue_core::{ArticleId, ArticlePayload};
use article_queue_store::{ClearScope, FailedEntry, QueueAdmin, RedisStore, DEFAULT_NAMESPACE};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "aq-admin")]
#[command(about = "Article Queue Admin CLI", long_about = None)]
struct Args {
    /// Redis connection URL
    #[arg(long, env = "AQ_REDIS_URL", default_value = "redis://127.0.0.1:6379/0")]
    redis_url: String,

    /// Key namespace
    #[arg(long, env = "AQ_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Output format (json, table, yaml)
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enqueue a batch of articles
    Enqueue {
        /// JSON file with an array of {article_id, title, content, url}
        #[arg(long)]
        file: String,

        /// Only enqueue these article IDs from the file
        article_ids: Vec<ArticleId>,

        /// Priority (0 = FIFO)
        #[arg(short = 'P', long, default_value = "0")]
        priority: u32,
    },

    /// Show queue statistics
    Stats,

    /// List live workers
    Workers,

    /// List dead-lettered jobs
    DeadLetters,

    /// List jobs currently in flight
    InFlight {
        /// Only jobs in flight longer than this many seconds
        #[arg(long)]
        stuck_after_secs: Option<i64>,
    },

    /// Purge a bucket (pending, processing, completed, failed, workers, all)
    Clear {
        scope: String,

        /// Skip the confirmation guard
        #[arg(long)]
        yes: bool,
    },

    /// Check that the store answers
    Ping,
}

#[derive(Debug, Deserialize)]
struct ArticleInput {
    article_id: ArticleId,
    #[serde(flatten)]
    payload: ArticlePayload,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let store = RedisStore::connect(&args.redis_url, &args.namespace).await?;
    let admin = QueueAdmin::new(Arc::new(store));
    let format = args.format.as_str();

    match args.command {
        Commands::Enqueue {
            article_ids,
            file,
            priority,
        } => {
            let inputs: Vec<ArticleInput> = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let articles = select_articles(inputs, &article_ids)?;

            let receipt = admin.enqueue_articles(articles, priority).await?;
            render(format, &receipt, || {
                format!("Enqueued {} articles as {}", receipt.enqueued, receipt.job_id)
            })?;
        }

        Commands::Stats => {
            let stats = admin.get_queue_stats().await?;
            render(format, &stats, || {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Metric", "Value"]);
                table.add_row(vec!["Pending (priority)", &stats.pending_priority.to_string()]);
                table.add_row(vec!["Pending (FIFO)", &stats.pending_fifo.to_string()]);
                table.add_row(vec!["In Flight", &stats.processing.to_string()]);
                table.add_row(vec!["Completed", &stats.completed.to_string()]);
                table.add_row(vec!["Dead-lettered", &stats.dead_lettered.to_string()]);
                table.to_string()
            })?;
        }

        Commands::Workers => {
            let workers = admin.get_active_workers().await?;
            render(format, &workers, || {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Worker ID", "Host", "Running", "Processed", "Errors", "Last Heartbeat"]);
                for worker in &workers {
                    table.add_row(vec![
                        worker.worker_id.clone(),
                        worker.hostname.clone(),
                        worker.is_running.to_string(),
                        worker.articles_processed.to_string(),
                        worker.errors.to_string(),
                        worker.last_heartbeat.to_rfc3339(),
                    ]);
                }
                table.to_string()
            })?;
        }

        Commands::DeadLetters => {
            let entries = admin.dead_letters().await?;
            render(format, &entries, || {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Key", "Job ID", "Retries", "Failed At", "Error"]);
                for entry in &entries {
                    match entry {
                        FailedEntry::Job(record) => table.add_row(vec![
                            entry.key(),
                            record.job.job_id.clone(),
                            record.job.retry_count.to_string(),
                            record.failed_at.to_rfc3339(),
                            record.error.clone(),
                        ]),
                        FailedEntry::Malformed { key, raw, error } => table.add_row(vec![
                            key.clone(),
                            String::new(),
                            String::new(),
                            String::new(),
                            match error {
                                Some(error) => format!("undecodable ({}): {}", error, raw),
                                None => format!("undecodable: {}", raw),
                            },
                        ]),
                    };
                }
                table.to_string()
            })?;
        }

        Commands::InFlight { stuck_after_secs } => {
            let records = admin
                .in_flight(stuck_after_secs.map(chrono::Duration::seconds))
                .await?;
            let now = chrono::Utc::now();
            render(format, &records, || {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Article", "Job ID", "Retries", "Worker", "Started", "Age (s)"]);
                for record in &records {
                    table.add_row(vec![
                        record.job.article_id.to_string(),
                        record.job.job_id.clone(),
                        record.job.retry_count.to_string(),
                        record.worker_id.clone().unwrap_or_default(),
                        record.started_at.to_rfc3339(),
                        record.age(now).num_seconds().to_string(),
                    ]);
                }
                table.to_string()
            })?;
        }

        Commands::Clear { scope, yes } => {
            let scope: ClearScope = scope.parse()?;
            if !yes {
                anyhow::bail!("Refusing to clear '{}' without --yes", scope.as_str());
            }
            admin.clear(scope).await?;
            println!("Cleared {}", scope.as_str());
        }

        Commands::Ping => {
            admin.ping().await?;
            println!("PONG");
        }
    }

    Ok(())
}

/// Articles to enqueue: the whole file, or the listed IDs looked up in it.
/// Articles without text never complete, so they are refused up front.
fn select_articles(
    inputs: Vec<ArticleInput>,
    article_ids: &[ArticleId],
) -> anyhow::Result<Vec<(ArticleId, ArticlePayload)>> {
    let mut articles: Vec<(ArticleId, ArticlePayload)> = inputs
        .into_iter()
        .map(|a| (a.article_id, a.payload))
        .collect();

    if !article_ids.is_empty() {
        let missing: Vec<String> = article_ids
            .iter()
            .filter(|id| !articles.iter().any(|(a, _)| a == *id))
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("Articles not found in file: {}", missing.join(", "));
        }
        articles.retain(|(id, _)| article_ids.contains(id));
    }

    let empty: Vec<String> = articles
        .iter()
        .filter(|(_, p)| p.title.trim().is_empty() && p.content.trim().is_empty())
        .map(|(id, _)| id.to_string())
        .collect();
    if !empty.is_empty() {
        anyhow::bail!("Articles without title or content: {}", empty.join(", "));
    }
    if articles.is_empty() {
        anyhow::bail!("Nothing to enqueue");
    }
    Ok(articles)
}

/// Print `value` as JSON or YAML, or the table built by `table` otherwise
fn render<T: Serialize>(format: &str, value: &T, table: impl FnOnce() -> String) -> anyhow::Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(value)?),
        "yaml" => println!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", table()),
    }
    Ok(())
}
