use anyhow::Result;
use awful_news_events::config::EngineConfig;
use awful_news_events::embed::HashingEmbedder;
use awful_news_events::engine::Engine;
use awful_news_events::ingest::{load_articles, load_interactions};
use awful_news_events::orchestrator::run_batch;
use awful_news_events::titles::build_provider;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Awful News Events - event clustering and blindspot report
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Articles as a JSON array or JSON lines
    #[arg(short, long)]
    input: PathBuf,

    /// Optional user interactions (JSON array or JSON lines)
    #[arg(long)]
    interactions: Option<PathBuf>,

    /// Engine config YAML; defaults apply when omitted
    #[arg(short, long, env = "NEWS_EVENTS_CONFIG")]
    config: Option<PathBuf>,

    /// Output directory for generated files (default: "out")
    #[arg(short, long, default_value = "out")]
    output_dir: PathBuf,

    /// Score blindspots against this user's personal prior
    #[arg(short, long)]
    user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(true)
        .init();

    info!("Starting awful_news_events");
    let args = Args::parse();

    let cfg = match args.config {
        Some(ref path) => {
            debug!("Using engine config from: {}", path.display());
            EngineConfig::load(path)?
        }
        None => {
            debug!("No engine config given, using defaults");
            EngineConfig::default()
        }
    };

    let articles = load_articles(&args.input)?;
    let interactions = match args.interactions {
        Some(ref p) => load_interactions(p)?,
        None => Vec::new(),
    };

    let titler = build_provider(&cfg.titles).await?;
    let embedder = Arc::new(HashingEmbedder::new(cfg.embedding_dim));
    let engine = Engine::new(cfg, embedder)?;

    info!(
        "Run configured - articles={}, interactions={}, user={}, titles={}, output_dir={}",
        articles.len(),
        interactions.len(),
        args.user.as_deref().unwrap_or("-"),
        titler.name(),
        args.output_dir.display()
    );

    run_batch(&engine, articles, &interactions, args.user.as_deref(), titler.as_ref(), &args.output_dir).await?;
    Ok(())
}
