//! `fullpage`: administrative actions for the page cache.
//!
//! Logs go to stderr as JSON; human-readable results go to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use fullpage_cli::{init_tracing, load_directory};
use fullpage_client::{LogRecord, PrecacheCrawler};
use fullpage_client::precache::LOG_HEADER;
use fullpage_core::{AppConfig, Backend, Error};
use fullpage_server::{ClearOutcome, InvalidationEngine};

#[derive(Debug, Parser)]
#[command(name = "fullpage", version, about = "Full-page cache administration")]
struct Cli {
    /// Optional path to a TOML configuration file.
    #[arg(long = "config-file", env = "FULLPAGE_CONFIG_FILE", value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Host whose cache configuration applies.
    #[arg(long, default_value = "localhost")]
    host: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report reachability of every configured storage server.
    Status,
    /// Empty the whole cache namespace.
    Flush,
    /// Invalidate the entries of one content item.
    Clear {
        /// Content id.
        id: u64,
        /// Flush everything regardless of the invalidation method.
        #[arg(long)]
        force: bool,
    },
    /// Background cache warming.
    Precache {
        #[command(subcommand)]
        action: PrecacheAction,
    },
}

#[derive(Debug, Subcommand)]
enum PrecacheAction {
    /// Enumerate URLs and start a detached worker.
    Start {
        /// Crawl every active site, not only the configured one.
        #[arg(long)]
        network: bool,
    },
    /// Terminate the running worker.
    Stop,
    /// Print the log of the current or last run.
    Log {
        /// Emit JSON instead of tab-separated rows.
        #[arg(long)]
        json: bool,
    },
    /// Start a run every `precache.schedule_secs`, forever.
    Watch {
        #[arg(long)]
        network: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load_from(cli.config_file.as_deref())?;

    match cli.command {
        Command::Status => status(&config, &cli.host).await,
        Command::Flush => flush(&config, &cli.host).await,
        Command::Clear { id, force } => clear(&config, &cli.host, id, force).await,
        Command::Precache { action } => precache(&config, action).await,
    }
}

async fn status(config: &AppConfig, host: &str) -> Result<()> {
    let backend = Backend::connect(config.require(host)?).await;
    let Some(servers) = backend.status().await else {
        bail!("{} backend is not active", backend.kind().as_str());
    };

    for (server, alive) in servers {
        println!("{server}\t{}", if alive { "up" } else { "down" });
    }
    Ok(())
}

async fn flush(config: &AppConfig, host: &str) -> Result<()> {
    let backend = Backend::connect(config.require(host)?).await;
    if !backend.flush().await {
        bail!("failed to empty cache");
    }
    println!("cache flushed");
    Ok(())
}

async fn clear(config: &AppConfig, host: &str, id: u64, force: bool) -> Result<()> {
    let cache = config.require(host)?.clone();
    let backend = Arc::new(Backend::connect(&cache).await);
    let directory = load_directory(config).await?;

    let engine = InvalidationEngine::new(Arc::new(cache), backend, directory, config.precache.site_id)
        .with_default_transformers();

    match engine.clear(Some(id), force).await? {
        ClearOutcome::Offline => bail!("backend is not active"),
        ClearOutcome::Skipped => println!("nothing to clear"),
        ClearOutcome::Flushed(true) => println!("cache flushed"),
        ClearOutcome::Flushed(false) => bail!("failed to empty cache"),
        ClearOutcome::Cleared(keys) => println!("cleared {} keys for content {id}", keys.len()),
    }
    Ok(())
}

async fn precache(config: &AppConfig, action: PrecacheAction) -> Result<()> {
    let network = matches!(action, PrecacheAction::Start { network: true } | PrecacheAction::Watch { network: true });
    let directory = load_directory(config).await?;
    let crawler = PrecacheCrawler::new(config.precache.clone(), directory, network);

    match action {
        PrecacheAction::Start { .. } => match crawler.start().await {
            Ok(outcome) => println!("precache started: {} URLs, worker pid {}", outcome.urls, outcome.pid),
            Err(Error::PrecacheRunning) => println!("precache is already running"),
            Err(Error::NoContent(_)) => println!("no content to precache"),
            Err(e) => return Err(e.into()),
        },
        PrecacheAction::Stop => {
            if crawler.stop().await? {
                println!("precache stopped");
            } else {
                println!("no precache worker was running");
            }
        }
        PrecacheAction::Log { json } => print_log(&crawler.read_log().await?, json)?,
        PrecacheAction::Watch { .. } => {
            let every = config.precache.schedule().context("precache.schedule_secs is not set")?;
            crawler.run_schedule(every).await;
        }
    }
    Ok(())
}

fn print_log(records: &[LogRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    println!("{LOG_HEADER}");
    for record in records {
        println!("{}", record.to_line());
    }
    Ok(())
}
