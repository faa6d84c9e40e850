// src/extract/mod.rs
//! Article enrichment: page body, a validated image and a sentiment score.
//!
//! Extraction never drops an article. Anything that goes wrong degrades the
//! record (`status = extraction_failed`, missing body or image) instead.

pub mod html;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;
use url::Url;

use crate::error::FetchError;
use crate::extract::html::{digest, PageDigest};
use crate::http::Transport;
use crate::image::ImageValidator;
use crate::ingest::types::RawArticle;
use crate::retry::{self, AttemptContext, RetryPolicy};
use crate::sentiment::SentimentAnalyzer;

#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub page_timeout: Duration,
    pub page_policy: RetryPolicy,
    /// Pages larger than this are not read past the limit.
    pub page_max_bytes: usize,
    /// Shorter bodies mark the article as failed (the text is still kept).
    pub min_body_chars: usize,
    /// Cap on `<img>` candidates tried after the primary image tags.
    pub max_image_candidates: usize,
    pub placeholder_image_url: Option<String>,
    pub workers: usize,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(5),
            page_policy: RetryPolicy::fixed(1, Duration::from_secs(1)),
            page_max_bytes: 4 * 1024 * 1024,
            min_body_chars: 80,
            max_image_candidates: 5,
            placeholder_image_url: None,
            workers: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Ok,
    ExtractionFailed,
}

/// Where the accepted image came from in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    PrimaryTag,
    Content,
    Placeholder,
}

impl ImageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageOrigin::PrimaryTag => "primary_tag",
            ImageOrigin::Content => "content",
            ImageOrigin::Placeholder => "placeholder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedArticle {
    #[serde(flatten)]
    pub article: RawArticle,
    pub body: Option<String>,
    pub image: Option<String>,
    pub image_origin: Option<ImageOrigin>,
    pub sentiment: f64,
    pub status: ExtractionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl EnrichedArticle {
    pub fn is_ok(&self) -> bool {
        self.status == ExtractionStatus::Ok
    }
}

#[derive(Clone)]
pub struct ContentExtractor {
    transport: Arc<dyn Transport>,
    validator: ImageValidator,
    analyzer: SentimentAnalyzer,
    settings: ExtractSettings,
}

impl ContentExtractor {
    pub fn new(
        transport: Arc<dyn Transport>,
        validator: ImageValidator,
        settings: ExtractSettings,
    ) -> Self {
        Self {
            transport,
            validator,
            analyzer: SentimentAnalyzer::new(),
            settings,
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .transport
            .get_limited(url, self.settings.page_timeout, self.settings.page_max_bytes)
            .await?;
        if !resp.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status,
            });
        }
        if resp.body.is_empty() {
            return Err(FetchError::Malformed {
                url: url.to_string(),
                message: "empty page".to_string(),
            });
        }
        Ok(resp.text())
    }

    /// Enrich one article. Always returns a record.
    pub async fn extract(&self, article: RawArticle) -> EnrichedArticle {
        let ctx = AttemptContext {
            component: "extract",
            source: &article.source,
            url: &article.url,
        };
        let (page, _attempts) = retry::run(&self.settings.page_policy, ctx, |_| {
            self.fetch_page(&article.url)
        })
        .await;

        let mut failure = None;
        let page: PageDigest = match page {
            Ok(html) => {
                let base = Url::parse(&article.url).ok();
                match tokio::task::spawn_blocking(move || digest(&html, base.as_ref())).await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::error!(
                            target: "extract",
                            article = %article.id,
                            error = %e,
                            "page parse task failed"
                        );
                        failure = Some(format!("page parse failed: {e}"));
                        PageDigest::default()
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    target: "extract",
                    article = %article.id,
                    url = %article.url,
                    error = %e,
                    "article page unavailable"
                );
                failure = Some(format!("page fetch failed: {}", e.cause()));
                PageDigest::default()
            }
        };

        let body = (!page.body.is_empty()).then(|| page.body.clone());
        if failure.is_none() {
            let chars = page.body.chars().count();
            if chars < self.settings.min_body_chars {
                tracing::warn!(
                    target: "extract",
                    article = %article.id,
                    url = %article.url,
                    chars,
                    min = self.settings.min_body_chars,
                    "body text too short"
                );
                failure = Some(format!("body too short ({chars} chars)"));
            }
        }

        let (image, image_origin) = match self.resolve_image(&article, &page).await {
            Some((url, origin)) => (Some(url), Some(origin)),
            None => (None, None),
        };

        let sentiment = match body.as_deref() {
            Some(b) => self.analyzer.compound(&format!("{} {}", article.title, b)),
            None => self.analyzer.compound(&article.title),
        };

        let status = if failure.is_some() {
            counter!("extract_failed_total").increment(1);
            ExtractionStatus::ExtractionFailed
        } else {
            ExtractionStatus::Ok
        };

        tracing::debug!(
            target: "extract",
            article = %article.id,
            status = ?status,
            image_origin = image_origin.map(|o| o.as_str()).unwrap_or("none"),
            sentiment,
            "article enriched"
        );

        EnrichedArticle {
            article,
            body,
            image,
            image_origin,
            sentiment,
            status,
            failure,
        }
    }

    /// Walk the fallback chain; the first candidate that validates wins.
    async fn resolve_image(
        &self,
        article: &RawArticle,
        page: &PageDigest,
    ) -> Option<(String, ImageOrigin)> {
        let mut seen = HashSet::new();
        let chain = page
            .meta_images
            .iter()
            .map(|u| (u.as_str(), ImageOrigin::PrimaryTag))
            .chain(
                page.content_images
                    .iter()
                    .take(self.settings.max_image_candidates)
                    .map(|u| (u.as_str(), ImageOrigin::Content)),
            )
            .chain(
                self.settings
                    .placeholder_image_url
                    .as_deref()
                    .map(|u| (u, ImageOrigin::Placeholder)),
            )
            .filter(|(u, _)| seen.insert(*u))
            .collect::<Vec<_>>();

        for (url, origin) in chain {
            match self.validator.inspect(url).await {
                Ok(_) => {
                    if origin != ImageOrigin::PrimaryTag {
                        tracing::info!(
                            target: "extract",
                            article = %article.id,
                            image = url,
                            origin = origin.as_str(),
                            "using fallback image"
                        );
                    }
                    return Some((url.to_string(), origin));
                }
                Err(rej) => {
                    counter!("extract_image_fallback_total").increment(1);
                    tracing::warn!(
                        target: "extract",
                        article = %article.id,
                        image = url,
                        origin = origin.as_str(),
                        reason = rej.reason(),
                        error = %rej,
                        "image candidate rejected, trying next"
                    );
                }
            }
        }

        tracing::warn!(
            target: "extract",
            article = %article.id,
            "no valid image for article"
        );
        None
    }

    /// Enrich every article on a bounded worker pool; output keeps input order.
    pub async fn extract_all(&self, articles: Vec<RawArticle>) -> Vec<EnrichedArticle> {
        let workers = self.settings.workers.max(1);
        let mut out: Vec<(usize, EnrichedArticle)> = stream::iter(articles.into_iter().enumerate())
            .map(|(idx, a)| {
                let this = self.clone();
                async move { (idx, this.extract(a).await) }
            })
            .buffer_unordered(workers)
            .collect()
            .await;
        out.sort_by_key(|(idx, _)| *idx);
        out.into_iter().map(|(_, a)| a).collect()
    }
}
