// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One configured feed. Position in the configured list is its priority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub url: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "global".to_string()
}

impl Source {
    pub fn new(name: impl Into<String>, url: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            region: region.into(),
        }
    }
}

/// An entry exactly as the feed described it, after normalisation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// Result of parsing one feed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
    /// Entries dropped because they had no link or no title.
    pub skipped: usize,
}

/// Article reference produced by the aggregator. Deduplicated by `url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawArticle {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl RawArticle {
    pub fn from_entry(source: &Source, entry: FeedEntry) -> Self {
        Self {
            id: article_id(&entry.link),
            title: entry.title,
            url: entry.link,
            source: source.name.clone(),
            published_at: entry.published_at,
            summary: entry.summary,
        }
    }
}

/// Short stable identifier derived from the article URL (first 8 bytes of SHA-256, hex).
pub fn article_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_id_is_stable_and_short() {
        let a = article_id("https://example.com/a");
        let b = article_id("https://example.com/a");
        let c = article_id("https://example.com/b");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn source_region_defaults_to_global() {
        let s: Source = serde_json::from_str(r#"{"name":"X","url":"http://x"}"#).unwrap();
        assert_eq!(s.region, "global");
    }
}
