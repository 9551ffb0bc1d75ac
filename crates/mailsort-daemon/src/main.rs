//! mailsort
//!
//! Command line entrypoint: runs the indexing pipeline or the dispatch
//! workflow once against the configured mailbox.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mailsort_core::config::Config;
use mailsort_core::embedding::OpenAiEmbedder;
use mailsort_core::indexer::EmailIndexer;
use mailsort_core::llm::OpenAiChat;
use mailsort_core::mail::ImapMailSource;
use mailsort_core::vector::LanceVectorIndex;
use mailsort_core::workflow::{DispatchProgress, DispatchWorkflow};
use mailsort_core::EMBEDDING_DIMENSION;

#[derive(Parser)]
#[command(name = "mailsort")]
#[command(about = "Index and sort a mailbox with embeddings and an LLM", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/mailsort/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print run summaries as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed new mail into the vector index
    Index,
    /// Classify unread mail and move it or draft a reply
    Dispatch,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_from(&config_path).context("failed to load configuration")?;

    init_logging(&config)?;
    info!("{}", config_source(&config_path));

    let result = match cli.command {
        Commands::Index => run_index(&config, cli.json).await,
        Commands::Dispatch => run_dispatch(&config, cli.json).await,
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

/// Console logging to stderr, plus a daily rolling file when configured
fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.general.log_level))
        .context("invalid log level")?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = match &config.general.log_file {
        Some(path) => {
            let (dir, prefix) = split_log_path(path);
            std::fs::create_dir_all(&dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, prefix);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(appender)
                    .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Where the configuration came from, for the startup log line
fn config_source(path: &Path) -> String {
    if path.exists() {
        format!("Loaded configuration from {}", path.display())
    } else {
        format!("No config file found at {}, using defaults", path.display())
    }
}

/// Directory and file name prefix for the rolling appender
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let prefix = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mailsort.log".to_string());
    (dir, prefix)
}

async fn run_index(config: &Config, json: bool) -> Result<()> {
    config.validate()?;

    let mail = Arc::new(ImapMailSource::from_config(&config.mail)?);
    let embedder = Arc::new(OpenAiEmbedder::from_config(
        &config.embedding,
        EMBEDDING_DIMENSION,
    )?);
    let index = Arc::new(LanceVectorIndex::open(&config.lancedb_uri()).await?);

    info!("Starting indexing run for {}", config.mail.username);
    let indexer = EmailIndexer::new(mail, embedder, index, &config.index);
    let report = indexer.run().await?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Indexed {} of {} emails ({} vectors), {} empty, {} failed",
            report.indexed,
            report.fetched,
            report.vectors_upserted,
            report.skipped_empty,
            report.failed
        );
        if let Some(id) = &report.stopped_at_watermark {
            println!("Stopped at previously indexed email {}", id);
        }
    }
    Ok(())
}

async fn run_dispatch(config: &Config, json: bool) -> Result<()> {
    config.validate()?;

    let mail = Arc::new(ImapMailSource::from_config(&config.mail)?);
    let chat = Arc::new(OpenAiChat::from_config(&config.llm)?);

    info!("Starting dispatch run for {}", config.mail.username);
    let workflow = DispatchWorkflow::new(mail, chat.clone(), chat);

    let (tx, mut rx) = mpsc::channel::<DispatchProgress>(32);
    let printer = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            if json {
                if let Ok(line) = serde_json::to_string(&progress) {
                    println!("{}", line);
                }
            } else {
                println!(
                    "{:<12} {:<20} {}",
                    progress.email_id, progress.category, progress.subject
                );
            }
        }
    });

    let report = workflow.run(tx).await;
    printer.await?;
    let report = report?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Processed {} unread emails: {} actioned, {} skipped, {} failed",
            report.seen, report.actioned, report.skipped, report.failed
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
