// src/publish.rs
//! Hand-off to posting platforms. Platform clients live behind [`Publisher`]
//! and own their credentials; this module only composes text and records
//! outcomes. Nothing here retries.

use std::collections::HashMap;

use async_trait::async_trait;
use metrics::counter;
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::PublishConfig;
use crate::extract::EnrichedArticle;

pub const DEFAULT_MAX_TAGS: usize = 3;
pub const DEFAULT_MIN_TAG_LEN: usize = 4;

static STOP_WORDS: &[&str] = &[
    "the", "and", "or", "but", "if", "in", "on", "to", "of", "a", "an", "can", "for", "with",
    "at", "by", "from", "about", "as", "into", "like", "through", "after", "over", "between",
    "out", "against", "during", "without", "before", "under", "around", "among", "is", "are",
    "was", "were", "be", "been", "being", "this", "that", "these", "those", "it", "its", "my",
    "your", "their", "his", "her", "our", "me", "you", "them", "he", "she", "we", "they", "i",
    "says", "said", "will", "what", "when", "have", "has",
];

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-z][a-z0-9_-]*\b").unwrap());

#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;
    /// Character limit of a post on this platform.
    fn max_chars(&self) -> usize;
    async fn publish(&self, article: &EnrichedArticle, text: &str) -> anyhow::Result<()>;
}

/// Dry-run publisher: logs the composed post.
#[derive(Debug, Clone)]
pub struct LogPublisher {
    name: String,
    max_chars: usize,
}

impl LogPublisher {
    pub fn new(name: impl Into<String>, max_chars: usize) -> Self {
        Self {
            name: name.into(),
            max_chars,
        }
    }
}

impl Default for LogPublisher {
    fn default() -> Self {
        Self::new("dry-run", 300)
    }
}

#[async_trait]
impl Publisher for LogPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_chars(&self) -> usize {
        self.max_chars
    }

    async fn publish(&self, article: &EnrichedArticle, text: &str) -> anyhow::Result<()> {
        tracing::info!(
            target: "publish",
            publisher = %self.name,
            article = %article.article.id,
            image = article.image.as_deref().unwrap_or(""),
            chars = text.chars().count(),
            text,
            "dry run: would post"
        );
        Ok(())
    }
}

/// Caption pool and hashtag knobs for composing posts.
#[derive(Debug, Clone)]
pub struct PostStyle {
    pub captions: Vec<String>,
    pub max_hashtags: usize,
    pub min_hashtag_len: usize,
}

impl From<&PublishConfig> for PostStyle {
    fn from(c: &PublishConfig) -> Self {
        Self {
            captions: c.captions.clone(),
            max_hashtags: c.max_hashtags,
            min_hashtag_len: c.min_hashtag_len,
        }
    }
}

impl Default for PostStyle {
    fn default() -> Self {
        Self::from(&PublishConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub publisher: String,
    pub article_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Frequency-ranked keywords as `#Capitalized` tags; ties break alphabetically.
pub fn hashtags(text: &str, max_tags: usize, min_len: usize) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut freq: HashMap<&str, usize> = HashMap::new();
    for m in RE_WORD.find_iter(&lower) {
        let w = m.as_str();
        if w.chars().count() < min_len || STOP_WORDS.contains(&w) {
            continue;
        }
        *freq.entry(w).or_default() += 1;
    }
    let mut words: Vec<(&str, usize)> = freq.into_iter().collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    words
        .into_iter()
        .take(max_tags)
        .map(|(w, _)| format!("#{}", capitalize(w)))
        .collect()
}

fn capitalize(w: &str) -> String {
    let mut cs = w.chars();
    match cs.next() {
        Some(first) => first.to_uppercase().chain(cs).collect(),
        None => String::new(),
    }
}

/// `"{caption}{title}\n{url}\n{tags}"`, cut to `limit` user-perceived
/// characters (grapheme clusters). When too long, caption and title are
/// shortened with `...`; URL and tags stay whole.
pub fn compose_post(article: &EnrichedArticle, caption: &str, tags: &[String], limit: usize) -> String {
    let head = format!("{caption}{}", article.article.title);
    let mut tail = format!("\n{}", article.article.url);
    if !tags.is_empty() {
        tail.push('\n');
        tail.push_str(&tags.join(" "));
    }

    let head_len = head.graphemes(true).count();
    let tail_len = tail.graphemes(true).count();
    if head_len + tail_len <= limit {
        return head + &tail;
    }

    let ellipsis = "...";
    match limit.checked_sub(tail_len + ellipsis.len()) {
        Some(budget) if budget > 0 => {
            let cut: String = head.graphemes(true).take(budget).collect();
            format!("{}{ellipsis}{tail}", cut.trim_end())
        }
        // Not even the link fits with a title; keep the prefix that does.
        _ => (head + &tail).graphemes(true).take(limit).collect(),
    }
}

fn pick_caption(captions: &[String]) -> String {
    captions.choose(&mut rand::rng()).cloned().unwrap_or_default()
}

/// Hand `article` to every publisher once, in order. Failures are logged
/// and reported, never retried.
pub async fn publish_to_all(
    article: &EnrichedArticle,
    style: &PostStyle,
    publishers: &[Box<dyn Publisher>],
) -> Vec<PublishOutcome> {
    let tags = hashtags(&article.article.title, style.max_hashtags, style.min_hashtag_len);
    let mut out = Vec::with_capacity(publishers.len());

    for p in publishers {
        let caption = pick_caption(&style.captions);
        let text = compose_post(article, &caption, &tags, p.max_chars());
        let res = p.publish(article, &text).await;

        let outcome = match res {
            Ok(()) => {
                tracing::info!(
                    target: "publish",
                    publisher = p.name(),
                    article = %article.article.id,
                    title = %article.article.title,
                    "posted"
                );
                PublishOutcome {
                    publisher: p.name().to_string(),
                    article_id: article.article.id.clone(),
                    ok: true,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(
                    target: "publish",
                    publisher = p.name(),
                    article = %article.article.id,
                    error = %e,
                    "publish failed"
                );
                PublishOutcome {
                    publisher: p.name().to_string(),
                    article_id: article.article.id.clone(),
                    ok: false,
                    error: Some(format!("{e:#}")),
                }
            }
        };
        counter!(
            "publish_outcomes_total",
            "publisher" => p.name().to_string(),
            "outcome" => if outcome.ok { "success" } else { "failure" }
        )
        .increment(1);
        out.push(outcome);
    }
    out
}

/// Articles eligible for posting: extraction ok and an accepted image.
pub fn publishable(articles: &[EnrichedArticle]) -> Vec<&EnrichedArticle> {
    articles
        .iter()
        .filter(|a| a.is_ok() && a.image.is_some())
        .collect()
}

/// Up to `n` publishable articles, chosen uniformly at random.
pub fn select_with_rng<'a, R: Rng + ?Sized>(
    articles: &'a [EnrichedArticle],
    n: usize,
    rng: &mut R,
) -> Vec<&'a EnrichedArticle> {
    publishable(articles)
        .choose_multiple(rng, n)
        .copied()
        .collect()
}

pub fn select(articles: &[EnrichedArticle], n: usize) -> Vec<&EnrichedArticle> {
    select_with_rng(articles, n, &mut rand::rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractionStatus, ImageOrigin};
    use crate::ingest::types::RawArticle;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn article(title: &str, url: &str) -> EnrichedArticle {
        EnrichedArticle {
            article: RawArticle {
                id: crate::ingest::types::article_id(url),
                title: title.into(),
                url: url.into(),
                source: "Test".into(),
                published_at: None,
                summary: None,
            },
            body: Some("body".into()),
            image: Some("https://img.example/a.png".into()),
            image_origin: Some(ImageOrigin::PrimaryTag),
            sentiment: 0.0,
            status: ExtractionStatus::Ok,
            failure: None,
        }
    }

    #[test]
    fn hashtags_rank_by_frequency_then_alphabet() {
        let tags = hashtags(
            "Budget row: the budget vote and the council vote on transport",
            3,
            4,
        );
        assert_eq!(tags, vec!["#Budget", "#Vote", "#Council"]);
        assert!(hashtags("a an the of", 3, 4).is_empty());
    }

    #[test]
    fn short_posts_are_left_alone() {
        let a = article("Council approves budget", "https://n.example/1");
        let text = compose_post(&a, "Your thoughts?\n", &["#Budget".into()], 300);
        assert_eq!(
            text,
            "Your thoughts?\nCouncil approves budget\nhttps://n.example/1\n#Budget"
        );
    }

    #[test]
    fn long_titles_are_cut_but_link_and_tags_survive() {
        let a = article(&"word ".repeat(100), "https://n.example/long");
        let tags = vec!["#Word".to_string()];
        let text = compose_post(&a, "Discuss:\n", &tags, 120);
        assert!(text.chars().count() <= 120);
        assert!(text.ends_with("...\nhttps://n.example/long\n#Word"));
        assert!(text.starts_with("Discuss:\nword"));
    }

    #[test]
    fn limit_counts_graphemes_and_never_splits_them() {
        // family emoji: one grapheme, seven chars
        let family = "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}\u{200D}\u{1F466}";
        let title = format!("{} vote{}", family.repeat(3), family.repeat(40));
        let a = article(&title, "https://n.example/x");

        let text = compose_post(&a, "", &[], 40);
        assert_eq!(text.graphemes(true).count(), 40);
        assert!(text.ends_with("...\nhttps://n.example/x"));
        let head = text.split("...").next().unwrap();
        assert!(head.graphemes(true).all(|g| g == family || g == " " || g.is_ascii()));

        let fits = compose_post(&article(&family.repeat(5), "https://n.example/y"), "", &[], 30);
        assert_eq!(fits, format!("{}\nhttps://n.example/y", family.repeat(5)));
    }

    #[test]
    fn selection_only_takes_publishable_articles() {
        let mut items = vec![
            article("One", "https://n.example/1"),
            article("Two", "https://n.example/2"),
            article("Three", "https://n.example/3"),
        ];
        items[0].status = ExtractionStatus::ExtractionFailed;
        items[1].image = None;

        let mut rng = StdRng::seed_from_u64(7);
        let picked = select_with_rng(&items, 5, &mut rng);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].article.title, "Three");
    }

    struct Broken;

    #[async_trait]
    impl Publisher for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn max_chars(&self) -> usize {
            280
        }
        async fn publish(&self, _a: &EnrichedArticle, _t: &str) -> anyhow::Result<()> {
            anyhow::bail!("401 unauthorized")
        }
    }

    #[tokio::test]
    async fn every_publisher_gets_one_attempt() {
        let a = article("Council approves budget", "https://n.example/1");
        let pubs: Vec<Box<dyn Publisher>> = vec![Box::new(Broken), Box::new(LogPublisher::default())];
        let out = publish_to_all(&a, &PostStyle::default(), &pubs).await;
        assert_eq!(out.len(), 2);
        assert!(!out[0].ok);
        assert!(out[0].error.as_deref().unwrap().contains("401"));
        assert!(out[1].ok);
    }
}
