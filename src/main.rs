//! news-relay — binary entrypoint.
//! Loads configuration, initialises telemetry and dispatches the subcommand.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use news_relay::config::{self, AppConfig};
use news_relay::engage::followback::{
    load_handles, run_follow_back, JsonFileCandidates, LogFollowAction,
};
use news_relay::http::HttpTransport;
use news_relay::pipeline::{spawn_daily_scheduler, spawn_scheduler, Pipeline};
use news_relay::publish::LogPublisher;
use news_relay::telemetry::{self, LogFormat, LogSettings};

#[derive(Parser)]
#[command(name = "news-relay", about = "Fetch news feeds, enrich articles, decide follow-backs")]
struct Cli {
    /// Config file (TOML or JSON). Defaults to $NEWS_RELAY_CONFIG, then config/news_relay.{toml,json}
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// One pipeline run
    Run {
        /// Write enriched articles as JSON here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Hand selected articles to the logging publisher
        #[arg(long)]
        dry_run: bool,
    },
    /// Run on the configured schedule until Ctrl-C
    Schedule {
        #[arg(long)]
        dry_run: bool,
    },
    /// Evaluate candidate accounts from a JSON file
    FollowBack {
        #[arg(long)]
        candidates: PathBuf,
        /// JSON array of handles that are already followed
        #[arg(long)]
        following: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(p) => config::load_from(p),
        None => config::load_default(),
    }
}

/// Token that fires on Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(target: "pipeline", "ctrl-c received, cancelling");
            t.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let _log_guard = telemetry::init_tracing(LogSettings {
        format: cli.log_format,
        file: cli.log_file.clone(),
        ..LogSettings::default()
    })?;
    telemetry::ensure_metrics_described();
    if let Some(addr) = cli.metrics_addr {
        telemetry::install_prometheus(addr)?;
    }

    let cfg = load_config(cli.config.as_deref())?;
    let cancel = ctrl_c_token();

    match cli.command {
        Command::Run { out, dry_run } => {
            let transport = Arc::new(HttpTransport::new()?);
            let mut pipeline = Pipeline::from_config(&cfg, transport)?;
            if dry_run {
                pipeline = pipeline.with_publisher(Box::new(LogPublisher::default()));
            }

            if let Some(t) = cfg.schedule.run_timeout() {
                let c = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(t).await;
                    tracing::warn!(target: "pipeline", timeout_secs = t.as_secs(), "run timeout reached");
                    c.cancel();
                });
            }

            let report = pipeline.run_once(&cancel).await;
            let json = serde_json::to_string_pretty(&report.articles)?;
            match out {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{json}"),
            }
        }
        Command::Schedule { dry_run } => {
            let transport = Arc::new(HttpTransport::new()?);
            let mut pipeline = Pipeline::from_config(&cfg, transport)?;
            if dry_run {
                pipeline = pipeline.with_publisher(Box::new(LogPublisher::default()));
            }
            let slots = cfg.schedule.daily_slots()?;
            let pipeline = Arc::new(pipeline);
            let handle = if slots.is_empty() {
                tracing::info!(
                    target: "pipeline",
                    interval_secs = cfg.schedule.interval().as_secs(),
                    sources = pipeline.sources().len(),
                    "scheduler starting"
                );
                spawn_scheduler(pipeline, cfg.schedule.interval(), cfg.schedule.run_timeout(), cancel)
            } else {
                tracing::info!(
                    target: "pipeline",
                    slots = slots.len(),
                    sources = pipeline.sources().len(),
                    "daily scheduler starting"
                );
                spawn_daily_scheduler(pipeline, slots, cfg.schedule.run_timeout(), cancel)
            };
            handle.await.context("scheduler task")?;
        }
        Command::FollowBack {
            candidates,
            following,
        } => {
            let thresholds = cfg.require_thresholds()?;
            let source = JsonFileCandidates::from_path(&candidates)?;
            let already = match following {
                Some(p) => load_handles(&p)?,
                None => Default::default(),
            };
            let report =
                run_follow_back(&source, &LogFollowAction, &thresholds, &already, &cancel).await;
            for v in &report.verdicts {
                println!("{}", serde_json::to_string(v)?);
            }
            if let Some(e) = report.error {
                anyhow::bail!("follow-back stopped early: {e}");
            }
        }
    }

    Ok(())
}
