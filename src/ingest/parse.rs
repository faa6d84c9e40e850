// src/ingest/parse.rs
//! RSS 2.0 / Atom parsing into the explicit [`ParsedFeed`] schema.

use chrono::{DateTime, Utc};
use metrics::histogram;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::normalize_text;
use crate::ingest::types::{FeedEntry, ParsedFeed};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<Text>,
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<Text>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Element text, ignoring any attributes (`<title type="html">`, `<guid isPermaLink>`).
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
}

/// Parse a feed document. The error string describes why the document is unusable.
pub fn parse_feed(xml: &str) -> Result<ParsedFeed, String> {
    let t0 = std::time::Instant::now();
    let clean = scrub_html_entities_for_xml(xml);

    let parsed = match detect_format(&clean) {
        Some(FeedFormat::Rss) => parse_rss(&clean),
        Some(FeedFormat::Atom) => parse_atom(&clean),
        None => Err("document is neither RSS nor Atom".to_string()),
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("feed_parse_ms").record(ms);
    parsed
}

/// Look at the root element name.
pub fn detect_format(xml: &str) -> Option<FeedFormat> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                return match name.as_ref() {
                    b"rss" => Some(FeedFormat::Rss),
                    b"feed" => Some(FeedFormat::Atom),
                    _ => None,
                };
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

fn parse_rss(xml: &str) -> Result<ParsedFeed, String> {
    let rss: Rss = from_str(xml).map_err(|e| format!("rss: {e}"))?;
    let mut out = ParsedFeed {
        title: rss.channel.title.map(|t| normalize_text(&t)),
        ..ParsedFeed::default()
    };

    for it in rss.channel.item {
        let link = it
            .link
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .or_else(|| {
                it.guid
                    .map(|g| g.value.trim().to_string())
                    .filter(|g| g.starts_with("http://") || g.starts_with("https://"))
            });
        let title = it
            .title
            .as_deref()
            .map(normalize_text)
            .filter(|t| !t.is_empty());

        let (Some(link), Some(title)) = (link, title) else {
            out.skipped += 1;
            continue;
        };

        out.entries.push(FeedEntry {
            title,
            link,
            published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
            summary: it
                .description
                .as_deref()
                .map(normalize_text)
                .filter(|s| !s.is_empty()),
        });
    }
    Ok(out)
}

fn parse_atom(xml: &str) -> Result<ParsedFeed, String> {
    let feed: AtomFeed = from_str(xml).map_err(|e| format!("atom: {e}"))?;
    let mut out = ParsedFeed {
        title: feed.title.map(|t| normalize_text(&t.value)),
        ..ParsedFeed::default()
    };

    for e in feed.entry {
        // rel defaults to "alternate" when absent
        let link = e
            .link
            .iter()
            .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
            .or_else(|| e.link.first())
            .and_then(|l| l.href.as_deref())
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());
        let title = e
            .title
            .map(|t| normalize_text(&t.value))
            .filter(|t| !t.is_empty());

        let (Some(link), Some(title)) = (link, title) else {
            out.skipped += 1;
            continue;
        };

        out.entries.push(FeedEntry {
            title,
            link,
            published_at: e
                .published
                .as_deref()
                .or(e.updated.as_deref())
                .and_then(parse_rfc3339),
            summary: e
                .summary
                .map(|s| normalize_text(&s.value))
                .filter(|s| !s.is_empty()),
        });
    }
    Ok(out)
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::from_timestamp(dt.unix_timestamp(), 0)
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// HTML entities are not legal XML; feeds emit them anyway.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Politics</title>
    <item>
      <title>Budget vote passes&nbsp;narrowly</title>
      <link>https://news.example/a</link>
      <pubDate>Tue, 10 Jun 2025 09:30:00 +0100</pubDate>
      <description><![CDATA[<p>MPs <b>approved</b> the plan.</p>]]></description>
    </item>
    <item>
      <title>No link here</title>
    </item>
    <item>
      <title>Guid fallback</title>
      <guid isPermaLink="true">https://news.example/b</guid>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="text">Example Atom</title>
  <entry>
    <title type="html">Council &amp; mayor clash</title>
    <link rel="alternate" href="https://atom.example/1"/>
    <link rel="self" href="https://atom.example/1.xml"/>
    <updated>2025-06-10T08:00:00Z</updated>
    <summary>Short summary</summary>
  </entry>
  <entry>
    <title>Untitled link</title>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items_and_skips_linkless_entries() {
        let feed = parse_feed(RSS).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Politics"));
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.skipped, 1);

        let first = &feed.entries[0];
        assert_eq!(first.title, "Budget vote passes narrowly");
        assert_eq!(first.link, "https://news.example/a");
        assert_eq!(first.summary.as_deref(), Some("MPs approved the plan."));
        let ts = first.published_at.unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-06-10T08:30:00+00:00");

        assert_eq!(feed.entries[1].link, "https://news.example/b");
        assert!(feed.entries[1].published_at.is_none());
    }

    #[test]
    fn parses_atom_alternate_links() {
        let feed = parse_feed(ATOM).unwrap();
        assert_eq!(feed.entries.len(), 1);
        assert_eq!(feed.skipped, 1);
        let e = &feed.entries[0];
        assert_eq!(e.title, "Council & mayor clash");
        assert_eq!(e.link, "https://atom.example/1");
        assert!(e.published_at.is_some());
    }

    #[test]
    fn html_pages_are_rejected() {
        let err = parse_feed("<html><body>Service unavailable</body></html>").unwrap_err();
        assert!(err.contains("neither RSS nor Atom"));
        assert!(parse_feed("").is_err());
    }

    #[test]
    fn truncated_rss_is_an_error() {
        let cut = &RSS[..RSS.len() / 2];
        assert!(parse_feed(cut).is_err());
    }
}
