//! Telegram Recall CLI - main entry point
//!
//! Indexes a JSON chat export and answers questions or builds timelines
//! from it. Providers come from `OPENAI_API_KEY`; the store is in-memory,
//! so each invocation indexes before querying.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use telegram_recall::integrations::{OpenAiCompleter, OpenAiEmbedder};
use telegram_recall::store::memory::MemoryStore;
use telegram_recall::telegram::ExportFetcher;
use telegram_recall::{Config, Error, RecallService, SearchFilters};

#[derive(Parser)]
#[command(name = "telegram_recall")]
#[command(about = "Index Telegram chat history and ask questions about it", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.yml (defaults used when absent)
    #[arg(long, env = "RECALL_CONFIG")]
    config: Option<PathBuf>,

    /// JSON chat export: {"chats": [...], "messages": [...]}
    #[arg(long, env = "RECALL_EXPORT")]
    export: PathBuf,

    /// Tenant (Telegram user) id the data belongs to
    #[arg(long, default_value = "1")]
    tenant: i64,

    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question and print the cited answer
    Answer {
        /// The question to ask
        query: String,

        /// Restrict to these chat ids
        #[arg(short, long)]
        chats: Vec<i64>,
    },

    /// Build a chronological timeline for a query
    Timeline {
        /// The query describing the events
        query: String,

        /// Save the timeline under this title
        #[arg(short, long)]
        title: Option<String>,

        /// Restrict to these chat ids
        #[arg(short, long)]
        chats: Vec<i64>,
    },

    /// Index the export and print the finished job record
    Index {
        /// Restrict to these chat ids (default: every chat in the export)
        #[arg(short, long)]
        chats: Vec<i64>,
    },

    /// List the chats known for the tenant after indexing
    Chats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    if let Some(addr) = &cli.metrics_addr {
        let addr = addr.parse().context("invalid metrics address")?;
        tokio::spawn(async move {
            if let Err(err) = telegram_recall::metrics::serve(addr).await {
                warn!("metrics server stopped: {err}");
            }
        });
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?,
        None => Config::load(),
    };

    let fetcher = ExportFetcher::from_path(&cli.export)
        .map_err(|e| anyhow::anyhow!("failed to load export: {e}"))?;
    let store = Arc::new(MemoryStore::new(config.embedding_dimension));
    let embedder = OpenAiEmbedder::from_env(
        config.embedding_model.clone(),
        config.embedding_dimension,
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    let llm = OpenAiCompleter::from_env(config.answer_model.clone())
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let service = RecallService::new(
        config,
        store,
        Arc::new(fetcher),
        Arc::new(embedder),
        Arc::new(llm),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let tenant = cli.tenant;

    match cli.command {
        Commands::Index { chats } => {
            let job = index(&service, tenant, chats).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::Chats => {
            index(&service, tenant, Vec::new()).await?;
            let chats = service
                .list_chats(tenant)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&chats)?);
        }
        Commands::Answer { query, chats } => {
            index(&service, tenant, chats.clone()).await?;
            let filters = filters_for(chats);
            match service.query_answer(tenant, &query, filters).await {
                Ok(response) => {
                    println!("{}", response.answer);
                    if response.degraded {
                        eprintln!("(answer model unavailable; sources only)");
                    }
                    for source in &response.sources {
                        println!("  {} ({})", source.url, source.chat_title);
                    }
                }
                Err(Error::SuspiciousQuery { .. }) => {
                    // Soft-fail: generic refusal, no model call happened.
                    println!(
                        "I can only answer questions about your message history. \
                         Please rephrase your question."
                    );
                }
                Err(err) => return Err(anyhow::anyhow!("{err}")),
            }
        }
        Commands::Timeline { query, title, chats } => {
            index(&service, tenant, chats.clone()).await?;
            let filters = filters_for(chats);
            let timeline = service
                .query_timeline(tenant, &query, title, filters)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&timeline.items)?);
        }
    }

    Ok(())
}

fn filters_for(chats: Vec<i64>) -> SearchFilters {
    if chats.is_empty() {
        SearchFilters::default()
    } else {
        SearchFilters::chats(chats)
    }
}

async fn index(
    service: &RecallService,
    tenant: i64,
    chats: Vec<i64>,
) -> Result<telegram_recall::IndexingJob> {
    let job_id = service
        .submit_indexing(tenant, chats)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let job = service
        .coordinator()
        .wait(tenant, job_id, Duration::from_secs(600))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    if let Some(error) = &job.last_error {
        warn!("indexing finished with error: {error}");
    }
    Ok(job)
}
