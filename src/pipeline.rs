// src/pipeline.rs
//! One run = aggregate feeds, enrich articles, hand a random pick to the
//! publishers. [`spawn_scheduler`] repeats runs on a fixed interval,
//! [`spawn_daily_scheduler`] at local wall-clock times.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::extract::{ContentExtractor, EnrichedArticle};
use crate::http::Transport;
use crate::image::ImageValidator;
use crate::ingest::feed::FeedFetcher;
use crate::ingest::types::Source;
use crate::ingest::{SourceAggregator, SourceReport};
use crate::publish::{publish_to_all, select, PostStyle, PublishOutcome, Publisher};

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub sources: Vec<SourceReport>,
    pub duplicates: usize,
    pub articles: Vec<EnrichedArticle>,
    pub extraction_failures: usize,
    pub published: Vec<PublishOutcome>,
    pub cancelled: bool,
}

pub struct Pipeline {
    sources: Vec<Source>,
    aggregator: SourceAggregator,
    extractor: ContentExtractor,
    publishers: Vec<Box<dyn Publisher>>,
    style: PostStyle,
    max_posts: usize,
}

impl Pipeline {
    /// Wire every component from `cfg`. Fails when no source is active.
    pub fn from_config(cfg: &AppConfig, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let sources = cfg.require_sources()?;
        let aggregator = SourceAggregator::new(
            FeedFetcher::new(transport.clone()),
            cfg.fetch.settings(),
        );
        let validator = ImageValidator::new(transport.clone(), cfg.extract.image_settings());
        let extractor = ContentExtractor::new(transport, validator, cfg.extract.settings());

        Ok(Self {
            sources,
            aggregator,
            extractor,
            publishers: Vec::new(),
            style: PostStyle::from(&cfg.publish),
            max_posts: cfg.publish.max_posts_per_run,
        })
    }

    pub fn with_publisher(mut self, p: Box<dyn Publisher>) -> Self {
        self.publishers.push(p);
        self
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// A cancelled run still returns whatever the aggregation produced, but
    /// skips extraction and publishing.
    pub async fn run_once(&self, cancel: &CancellationToken) -> RunReport {
        let t0 = Instant::now();
        let started_at = chrono::Utc::now();
        tracing::info!(target: "pipeline", sources = self.sources.len(), "run started");

        let collection = self
            .aggregator
            .collect_with_report(&self.sources, cancel)
            .await;

        let mut report = RunReport {
            started_at,
            sources: collection.reports,
            duplicates: collection.duplicates,
            articles: Vec::new(),
            extraction_failures: 0,
            published: Vec::new(),
            cancelled: cancel.is_cancelled(),
        };

        if report.cancelled {
            tracing::warn!(
                target: "pipeline",
                collected = collection.articles.len(),
                "run cancelled after aggregation"
            );
            return report;
        }

        report.articles = self.extractor.extract_all(collection.articles).await;
        report.extraction_failures = report.articles.iter().filter(|a| !a.is_ok()).count();

        if !self.publishers.is_empty() {
            let picked = select(&report.articles, self.max_posts);
            if picked.is_empty() {
                tracing::info!(target: "pipeline", "no publishable article this run");
            }
            for article in picked {
                tracing::info!(
                    target: "pipeline",
                    article = %article.article.id,
                    title = %article.article.title,
                    "selected article for posting"
                );
                let outcomes = publish_to_all(article, &self.style, &self.publishers).await;
                report.published.extend(outcomes);
            }
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("pipeline_run_ms").record(ms);
        counter!("pipeline_runs_total").increment(1);
        gauge!("pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        tracing::info!(
            target: "pipeline",
            articles = report.articles.len(),
            extraction_failures = report.extraction_failures,
            published = report.published.iter().filter(|p| p.ok).count(),
            elapsed_ms = ms as u64,
            "run finished"
        );
        report
    }
}

/// A local time of day in a named zone, e.g. 07:00 Europe/London.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySlot {
    pub tz: Tz,
    pub time: NaiveTime,
}

/// Earliest slot strictly after `after`. Local times skipped by a DST jump
/// are skipped too; repeated ones fire at their first occurrence.
pub fn next_slot(slots: &[DailySlot], after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    slots
        .iter()
        .flat_map(|slot| {
            let today = after.with_timezone(&slot.tz).date_naive();
            (0..=2u64).filter_map(move |d| {
                let day = today.checked_add_days(Days::new(d))?;
                slot.tz
                    .from_local_datetime(&day.and_time(slot.time))
                    .earliest()
                    .map(|t| t.with_timezone(&Utc))
            })
        })
        .filter(|t| *t > after)
        .min()
}

/// One scheduled run under a child token that also fires after `run_timeout`.
async fn scheduled_run(pipeline: &Pipeline, run_timeout: Option<Duration>, cancel: &CancellationToken) {
    let run_cancel = cancel.child_token();
    let timer = run_timeout.map(|t| {
        let c = run_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(t).await;
            tracing::warn!(target: "pipeline", timeout_secs = t.as_secs(), "run timeout reached");
            c.cancel();
        })
    });

    let report = pipeline.run_once(&run_cancel).await;
    if let Some(h) = timer {
        h.abort();
    }
    tracing::info!(
        target: "pipeline",
        cancelled = report.cancelled,
        articles = report.articles.len(),
        "scheduled run complete"
    );
}

/// Run immediately, then every `interval`, until `cancel` fires. Each run gets
/// a child token that also fires after `run_timeout`.
pub fn spawn_scheduler(
    pipeline: Arc<Pipeline>,
    interval: Duration,
    run_timeout: Option<Duration>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            scheduled_run(&pipeline, run_timeout, &cancel).await;
        }
        tracing::info!(target: "pipeline", "scheduler stopped");
    })
}

/// Run at every slot until `cancel` fires. Nothing runs at start-up.
pub fn spawn_daily_scheduler(
    pipeline: Arc<Pipeline>,
    slots: Vec<DailySlot>,
    run_timeout: Option<Duration>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = next_slot(&slots, now) else {
                tracing::warn!(target: "pipeline", "no daily slot configured");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::info!(target: "pipeline", next = %next, wait_secs = wait.as_secs(), "next scheduled run");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            scheduled_run(&pipeline, run_timeout, &cancel).await;
        }
        tracing::info!(target: "pipeline", "scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(tz: Tz, h: u32, m: u32) -> DailySlot {
        DailySlot {
            tz,
            time: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn picks_the_earliest_slot_across_zones() {
        let slots = [
            slot(chrono_tz::Europe::London, 7, 0),
            slot(chrono_tz::Europe::London, 12, 0),
            slot(chrono_tz::America::New_York, 7, 0),
        ];
        // London is UTC+1 and New York UTC-4 in July
        let after = utc(2025, 7, 1, 6, 30);
        assert_eq!(next_slot(&slots, after), Some(utc(2025, 7, 1, 11, 0)));
        // strictly after: a slot equal to `after` is not due again
        assert_eq!(
            next_slot(&slots, utc(2025, 7, 1, 11, 0)),
            Some(utc(2025, 7, 2, 6, 0))
        );
        assert_eq!(next_slot(&[], after), None);
    }

    #[test]
    fn local_time_missing_on_dst_day_is_skipped() {
        // 01:30 does not exist in London on 2025-03-30
        let slots = [slot(chrono_tz::Europe::London, 1, 30)];
        assert_eq!(
            next_slot(&slots, utc(2025, 3, 29, 12, 0)),
            Some(utc(2025, 3, 31, 0, 30))
        );
    }
}
