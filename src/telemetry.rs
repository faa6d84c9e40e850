// src/telemetry.rs
//! Process-wide observability: the tracing subscriber and the metrics recorder.
//!
//! Call [`init_tracing`] once near process start and keep the returned guard
//! alive for as long as file logging should keep flushing.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Also append events to this file (no rotation).
    pub file: Option<PathBuf>,
    /// Used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            file: None,
            default_filter: "info".to_string(),
        }
    }
}

/// Install the global subscriber: stderr always, plus an optional file sink.
pub fn init_tracing(settings: LogSettings) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.default_filter));

    let (file_writer, guard) = match settings.file.as_deref() {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let res = match (settings.format, file_writer) {
        (LogFormat::Text, None) => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        (LogFormat::Text, Some(w)) => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(fmt::layer().with_writer(w).with_ansi(false))
            .try_init(),
        (LogFormat::Json, None) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (LogFormat::Json, Some(w)) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(fmt::layer().json().with_writer(w))
            .try_init(),
    };
    res.map_err(|e| anyhow!("tracing setup failed: {e}"))?;

    Ok(guard)
}

fn split_log_path(path: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("log file path has no file name: {}", path.display()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(name)))
}

/// Serve `/metrics` on `addr`. Must run inside a tokio runtime.
pub fn install_prometheus(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow!("prometheus exporter on {addr}: {e}"))?;
    ensure_metrics_described();
    tracing::info!(target: "pipeline", %addr, "prometheus exporter listening");
    Ok(())
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "fetch_attempts_total",
            "HTTP fetch attempts by component and outcome."
        );
        describe_counter!(
            "feed_fetch_failures_total",
            "Feeds that failed after the retry budget."
        );
        describe_histogram!("feed_parse_ms", "Feed parse time in milliseconds.");
        describe_counter!(
            "aggregate_source_failures_total",
            "Sources skipped during aggregation."
        );
        describe_counter!(
            "aggregate_articles_total",
            "Articles kept after deduplication."
        );
        describe_counter!(
            "aggregate_dedup_total",
            "Articles dropped as duplicate URLs."
        );
        describe_counter!(
            "extract_failed_total",
            "Articles whose body could not be extracted."
        );
        describe_counter!(
            "extract_image_fallback_total",
            "Image candidates rejected before one was accepted."
        );
        describe_counter!("image_rejected_total", "Rejected image URLs by reason.");
        describe_counter!(
            "engage_verdicts_total",
            "Engagement verdicts by decision and reason code."
        );
        describe_counter!(
            "followback_follows_total",
            "Follow actions by outcome."
        );
        describe_counter!(
            "publish_outcomes_total",
            "Publish hand-offs by publisher and outcome."
        );
        describe_counter!("pipeline_runs_total", "Completed pipeline runs.");
        describe_histogram!("pipeline_run_ms", "Pipeline run time in milliseconds.");
        describe_gauge!(
            "pipeline_last_run_ts",
            "Unix ts when the pipeline last finished a run."
        );
    });
}
