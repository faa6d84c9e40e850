// src/ingest/feed.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;

use crate::error::{FetchError, RetryError};
use crate::http::Transport;
use crate::ingest::parse::parse_feed;
use crate::ingest::types::{ParsedFeed, Source};
use crate::retry::{self, AttemptContext, Fetched, RetryPolicy};

/// Fetches and parses single feeds over a shared [`Transport`].
#[derive(Clone)]
pub struct FeedFetcher {
    transport: Arc<dyn Transport>,
}

impl FeedFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// One attempt: GET, check status, parse.
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<ParsedFeed, FetchError> {
        let resp = self.transport.get(url, timeout).await?;
        if !resp.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status,
            });
        }
        if resp.body.is_empty() {
            return Err(FetchError::Malformed {
                url: url.to_string(),
                message: "empty body".to_string(),
            });
        }

        let feed = parse_feed(&resp.text()).map_err(|message| FetchError::Malformed {
            url: url.to_string(),
            message,
        })?;

        tracing::debug!(
            target: "feed",
            url,
            entries = feed.entries.len(),
            skipped = feed.skipped,
            "feed parsed"
        );
        Ok(feed)
    }

    /// Fetch `source` under `policy`. Transient failures are retried,
    /// permanent ones stop immediately; either way the caller gets a value back.
    pub async fn fetch_with_retry(
        &self,
        source: &Source,
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<Fetched<ParsedFeed>, RetryError<FetchError>> {
        let ctx = AttemptContext {
            component: "feed",
            source: &source.name,
            url: &source.url,
        };
        let (result, attempts) =
            retry::run(policy, ctx, |_| self.fetch(&source.url, timeout)).await;

        match result {
            Ok(feed) => {
                tracing::info!(
                    target: "feed",
                    source = %source.name,
                    attempts = attempts.len(),
                    entries = feed.entries.len(),
                    outcome = "success",
                    "feed fetched"
                );
                Ok(Fetched {
                    value: feed,
                    attempts,
                })
            }
            Err(e) => {
                counter!("feed_fetch_failures_total").increment(1);
                Err(e)
            }
        }
    }
}
