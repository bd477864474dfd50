use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use meridian_ingest::api;
use meridian_ingest::classify::ChatCompletionsClassifier;
use meridian_ingest::config::Config;
use meridian_ingest::content::{ArticleFetcher, DisabledRenderer, HttpRenderer, Renderer};
use meridian_ingest::http::build_client;
use meridian_ingest::storage::{Database, DatabaseError};
use meridian_ingest::util::validate_url;
use meridian_ingest::workflow::{Engine, Pipeline, RunParams, RunReport, WorkflowKind};

#[derive(Parser, Debug)]
#[command(
    name = "meridian-ingest",
    about = "News feed ingestion with article extraction and LLM classification"
)]
struct Args {
    /// Path to the TOML configuration file (optional; defaults apply when missing)
    #[arg(long, default_value = "meridian.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker, the scrape scheduler and the trigger API
    Serve,
    /// Scrape due feeds now and process the resulting articles
    Scrape {
        /// Scrape every feed regardless of its tier schedule
        #[arg(long)]
        force: bool,
    },
    /// Process pending articles now
    Enrich,
    /// Manage feed sources
    Sources {
        #[command(subcommand)]
        command: SourcesCommand,
    },
}

#[derive(Subcommand, Debug)]
enum SourcesCommand {
    /// Register a feed
    Add {
        url: String,
        #[arg(long)]
        name: String,
        /// Scrape tier: 1 hourly, 2 every 4h, 3 every 6h, 4 daily
        #[arg(long, default_value_t = 2)]
        tier: i64,
    },
    /// List registered feeds
    List,
}

async fn open_database(path: &str) -> Result<Database> {
    match Database::open(path).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            anyhow::bail!("Database '{path}' is locked by another process")
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

fn build_engine(config: &Config, db: Database) -> Result<Engine> {
    let client = build_client().context("Failed to build HTTP client")?;

    let renderer: Arc<dyn Renderer> = match &config.render.endpoint {
        Some(endpoint) => Arc::new(HttpRenderer::new(
            client.clone(),
            endpoint.clone(),
            config.render_secret(),
        )),
        None => {
            tracing::warn!("No render endpoint configured, pages that need a browser will fail");
            Arc::new(DisabledRenderer)
        }
    };

    let mut articles = ArticleFetcher::new(client.clone(), renderer);
    if let Some(domains) = &config.tricky_domains {
        articles = articles.with_tricky_domains(domains.clone());
    }

    if config.llm.api_key.is_none() {
        tracing::warn!("No LLM API key configured");
    }
    let classifier = Arc::new(ChatCompletionsClassifier::new(
        client.clone(),
        config.llm.endpoint.clone(),
        config.llm_secret(),
        config.llm.model.clone(),
    ));

    Ok(Engine::new(Pipeline::new(db, client, articles, classifier)))
}

fn print_reports(reports: &[RunReport]) {
    for report in reports {
        match &report.error {
            Some(error) => println!("{} {} {}: {}", report.run_id, report.kind, report.status.as_str(), error),
            None => println!("{} {} {}", report.run_id, report.kind, report.status.as_str()),
        }
    }
}

async fn serve(config: &Config, engine: Engine) -> Result<()> {
    engine
        .resume_interrupted()
        .await
        .context("Failed to requeue interrupted runs")?;

    let _scheduler =
        engine.spawn_scheduler(Duration::from_secs(config.scrape_interval_minutes.max(1) * 60));

    let worker = engine.clone();
    let poll = Duration::from_secs(config.worker_poll_seconds.max(1));
    tokio::spawn(async move { worker.run_worker(poll).await });

    if config.trigger_token.is_none() {
        tracing::warn!("No trigger token configured, /trigger-rss will reject every request");
    }
    let app = api::router(engine, config.trigger_secret());
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "Listening");

    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    tracing::debug!(config = ?config, "Configuration loaded");

    let db = open_database(&config.database_path).await?;

    match args.command {
        Command::Serve => {
            let engine = build_engine(&config, db)?;
            serve(&config, engine).await?;
        }
        Command::Scrape { force } => {
            let engine = build_engine(&config, db)?;
            engine
                .enqueue(WorkflowKind::ScrapeFeeds, RunParams { force })
                .await?;
            print_reports(&engine.drain().await?);
        }
        Command::Enrich => {
            let engine = build_engine(&config, db)?;
            engine
                .enqueue(WorkflowKind::ProcessArticles, RunParams::default())
                .await?;
            print_reports(&engine.drain().await?);
        }
        Command::Sources { command } => match command {
            SourcesCommand::Add { url, name, tier } => {
                validate_url(&url).with_context(|| format!("Rejected feed URL '{url}'"))?;
                let id = db.add_source(&url, &name, tier).await?;
                println!("Added source {id}: {name} ({url}), tier {tier}");
            }
            SourcesCommand::List => {
                for source in db.list_sources().await? {
                    let checked = source
                        .last_checked
                        .and_then(|at| chrono::DateTime::from_timestamp(at, 0))
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{:>4}  tier {}  {:<24}  {}  last checked {}",
                        source.id, source.scrape_frequency, source.name, source.url, checked
                    );
                }
            }
        },
    }

    Ok(())
}
