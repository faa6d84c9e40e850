// src/ingest/mod.rs
pub mod feed;
pub mod parse;
pub mod types;

use std::collections::HashSet;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use metrics::counter;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, RetryError};
use crate::ingest::feed::FeedFetcher;
use crate::ingest::types::{ParsedFeed, RawArticle, Source};
use crate::retry::{Fetched, RetryPolicy};

/// Normalize feed text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 4) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// Knobs for the feed side of a run.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub policy: RetryPolicy,
    /// Concurrent source fetches; 1 means strictly sequential.
    pub workers: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            policy: RetryPolicy::default(),
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Fetched {
        attempts: u32,
        entries: usize,
        kept: usize,
        skipped: usize,
    },
    Failed {
        attempts: u32,
        transient: bool,
        error: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SourceReport {
    pub source: String,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

/// Everything one aggregation produced.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub articles: Vec<RawArticle>,
    pub reports: Vec<SourceReport>,
    pub duplicates: usize,
}

impl Collection {
    pub fn failed_sources(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, SourceOutcome::Failed { .. }))
            .count()
    }
}

enum SourceFetch {
    Done(Result<Fetched<ParsedFeed>, RetryError<FetchError>>),
    Cancelled,
}

/// Fans the feed fetcher out over all configured sources.
#[derive(Clone)]
pub struct SourceAggregator {
    fetcher: FeedFetcher,
    settings: FetchSettings,
}

impl SourceAggregator {
    pub fn new(fetcher: FeedFetcher, settings: FetchSettings) -> Self {
        Self { fetcher, settings }
    }

    /// Articles from every source that could be fetched, deduplicated by URL,
    /// in configured source order.
    pub async fn collect(&self, sources: &[Source]) -> Vec<RawArticle> {
        self.collect_with_report(sources, &CancellationToken::new())
            .await
            .articles
    }

    /// Like [`collect`](Self::collect), with a per-source report. `cancel` is
    /// checked before each source starts; a fetch already in flight finishes.
    pub async fn collect_with_report(
        &self,
        sources: &[Source],
        cancel: &CancellationToken,
    ) -> Collection {
        crate::telemetry::ensure_metrics_described();

        let workers = self.settings.workers.max(1);
        let timeout = self.settings.timeout;

        // Each future owns its state so the stream stays `Send` inside spawned tasks.
        let mut results: Vec<(usize, SourceFetch)> = stream::iter(sources.iter().cloned().enumerate())
            .map(|(idx, source)| {
                let fetcher = self.fetcher.clone();
                let policy = self.settings.policy.clone();
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return (idx, SourceFetch::Cancelled);
                    }
                    let res = fetcher.fetch_with_retry(&source, timeout, &policy).await;
                    (idx, SourceFetch::Done(res))
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        // Completion order is arbitrary; priority order is not.
        results.sort_by_key(|(idx, _)| *idx);

        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Collection::default();

        for (idx, fetch) in results {
            let source = &sources[idx];
            let outcome = match fetch {
                SourceFetch::Cancelled => {
                    tracing::warn!(
                        target: "aggregate",
                        source = %source.name,
                        "run cancelled before source was fetched"
                    );
                    SourceOutcome::Cancelled
                }
                SourceFetch::Done(Err(e)) => {
                    counter!("aggregate_source_failures_total").increment(1);
                    tracing::error!(
                        target: "aggregate",
                        source = %source.name,
                        url = %source.url,
                        attempts = e.attempts(),
                        error = %e,
                        "skipping source after fetch failure"
                    );
                    SourceOutcome::Failed {
                        attempts: e.attempts(),
                        transient: e.cause().is_transient(),
                        error: e.cause().to_string(),
                    }
                }
                SourceFetch::Done(Ok(fetched)) => {
                    let feed = fetched.value;
                    let entries = feed.entries.len();
                    let mut kept = 0usize;
                    for entry in feed.entries {
                        let article = RawArticle::from_entry(source, entry);
                        if seen.insert(article.url.clone()) {
                            out.articles.push(article);
                            kept += 1;
                        } else {
                            out.duplicates += 1;
                        }
                    }
                    tracing::info!(
                        target: "aggregate",
                        source = %source.name,
                        entries,
                        kept,
                        "added articles from source"
                    );
                    SourceOutcome::Fetched {
                        attempts: fetched.attempts.len() as u32,
                        entries,
                        kept,
                        skipped: feed.skipped,
                    }
                }
            };
            out.reports.push(SourceReport {
                source: source.name.clone(),
                outcome,
            });
        }

        counter!("aggregate_articles_total").increment(out.articles.len() as u64);
        counter!("aggregate_dedup_total").increment(out.duplicates as u64);

        tracing::info!(
            target: "aggregate",
            sources = sources.len(),
            failed = out.failed_sources(),
            articles = out.articles.len(),
            duplicates = out.duplicates,
            "aggregation finished"
        );
        out
    }
}
