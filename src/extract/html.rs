// src/extract/html.rs
//! Synchronous HTML analysis. `scraper::Html` is not `Send`, so everything the
//! extractor needs is copied out into a [`PageDigest`] before any await.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use url::Url;

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

static SEL_P: Lazy<Selector> = Lazy::new(|| selector("p"));
static SEL_ARTICLE: Lazy<Selector> = Lazy::new(|| selector("article"));
static SEL_BODY: Lazy<Selector> = Lazy::new(|| selector("body"));
static SEL_IMG: Lazy<Selector> = Lazy::new(|| selector("img"));

/// Primary image tags, in priority order.
static SEL_META_IMAGES: Lazy<Vec<(Selector, &'static str)>> = Lazy::new(|| {
    vec![
        (selector(r#"meta[property="og:image"]"#), "content"),
        (selector(r#"meta[name="og:image"]"#), "content"),
        (selector(r#"meta[property="og:image:url"]"#), "content"),
        (selector(r#"meta[name="twitter:image"]"#), "content"),
        (selector(r#"meta[property="twitter:image"]"#), "content"),
        (selector(r#"meta[name="twitter:image:src"]"#), "content"),
        (selector(r#"link[rel="image_src"]"#), "href"),
    ]
});

/// Which structure the body text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BodySource {
    Paragraphs,
    Article,
    Body,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageDigest {
    pub body: String,
    pub body_source: Option<BodySource>,
    /// `og:image` / `twitter:image` / `image_src`, resolved and deduplicated.
    pub meta_images: Vec<String>,
    /// `<img>` inside the body container first, then the rest of the page.
    pub content_images: Vec<String>,
}

/// Analyse `html`. `base` resolves relative image URLs; without it only
/// absolute http(s) URLs are kept.
pub fn digest(html: &str, base: Option<&Url>) -> PageDigest {
    let doc = Html::parse_document(html);

    let (body, body_source, container) = extract_body(&doc);

    let mut seen = HashSet::new();
    let mut meta_images = Vec::new();
    for (sel, attr) in SEL_META_IMAGES.iter() {
        for el in doc.select(sel) {
            if let Some(u) = el.value().attr(attr).and_then(|v| resolve(v, base)) {
                if seen.insert(u.clone()) {
                    meta_images.push(u);
                }
            }
        }
    }

    let mut content_images = Vec::new();
    let mut push_imgs = |root: ElementRef<'_>, out: &mut Vec<String>| {
        for img in root.select(&SEL_IMG) {
            let src = img
                .value()
                .attr("src")
                .filter(|s| !s.trim().is_empty())
                .or_else(|| img.value().attr("data-src"));
            if let Some(u) = src.and_then(|v| resolve(v, base)) {
                if seen.insert(u.clone()) {
                    out.push(u);
                }
            }
        }
    };
    if let Some(c) = container {
        push_imgs(c, &mut content_images);
    }
    push_imgs(doc.root_element(), &mut content_images);

    PageDigest {
        body,
        body_source: Some(body_source),
        meta_images,
        content_images,
    }
}

/// Paragraph-density heuristic: the parent whose direct `<p>` children carry
/// the most text wins; then `<article>`; then all visible body text.
fn extract_body(doc: &Html) -> (String, BodySource, Option<ElementRef<'_>>) {
    let mut weight: HashMap<_, usize> = HashMap::new();
    let mut order = Vec::new();
    for p in doc.select(&SEL_P) {
        let Some(parent) = p.parent() else { continue };
        let len = visible_text(p).len();
        if len == 0 {
            continue;
        }
        let id = parent.id();
        let w = weight.entry(id).or_insert_with(|| {
            order.push(id);
            0
        });
        *w += len;
    }

    // First container wins ties.
    let mut best = None;
    let mut best_w = 0usize;
    for id in order {
        let w = weight[&id];
        if w > best_w {
            best = Some(id);
            best_w = w;
        }
    }

    if let Some(parent) = best.and_then(|id| doc.tree.get(id)).and_then(ElementRef::wrap) {
        let paragraphs: Vec<String> = parent
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|e| e.value().name() == "p")
            .map(visible_text)
            .filter(|t| !t.is_empty())
            .collect();
        return (paragraphs.join("\n\n"), BodySource::Paragraphs, Some(parent));
    }

    if let Some(article) = doc.select(&SEL_ARTICLE).next() {
        let t = visible_text(article);
        if !t.is_empty() {
            return (t, BodySource::Article, Some(article));
        }
    }

    if let Some(body) = doc.select(&SEL_BODY).next() {
        let t = visible_text(body);
        if !t.is_empty() {
            return (t, BodySource::Body, Some(body));
        }
    }

    (String::new(), BodySource::None, None)
}

/// Text of `el` minus script/style content, whitespace collapsed.
pub fn visible_text(el: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in el.descendants() {
        let Some(t) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().filter_map(ElementRef::wrap).any(|a| {
            matches!(
                a.value().name(),
                "script" | "style" | "noscript" | "template"
            )
        });
        if !hidden {
            parts.push(t);
        }
    }
    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve a candidate URL. `data:` and non-http(s) schemes are dropped.
fn resolve(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let url = match base {
        Some(b) => b.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
<meta property="og:image" content="/img/lead.jpg">
<meta name="twitter:image" content="https://cdn.example/lead.jpg">
<script>var x = "<p>not text</p>";</script>
</head><body>
<nav><p>Home</p><p>World</p></nav>
<div class="story">
  <p>The council voted on Monday to approve the new transport budget.</p>
  <img src="data:image/gif;base64,R0lGOD">
  <img data-src="photos/one.png" src="">
  <p>Opponents said the plan ignored rural routes.</p>
</div>
<aside><img src="https://ads.example/banner.gif"></aside>
</body></html>"#;

    fn base() -> Url {
        Url::parse("https://news.example/politics/story.html").unwrap()
    }

    #[test]
    fn densest_paragraph_block_wins() {
        let d = digest(PAGE, Some(&base()));
        assert_eq!(d.body_source, Some(BodySource::Paragraphs));
        assert!(d.body.starts_with("The council voted"));
        assert!(d.body.contains("rural routes."));
        assert!(!d.body.contains("Home"));
    }

    #[test]
    fn images_are_resolved_in_chain_order() {
        let d = digest(PAGE, Some(&base()));
        assert_eq!(
            d.meta_images,
            vec![
                "https://news.example/img/lead.jpg".to_string(),
                "https://cdn.example/lead.jpg".to_string()
            ]
        );
        assert_eq!(
            d.content_images,
            vec![
                "https://news.example/politics/photos/one.png".to_string(),
                "https://ads.example/banner.gif".to_string()
            ]
        );
    }

    #[test]
    fn falls_back_to_article_then_body() {
        let d = digest(
            "<html><body><article><h1>Title</h1><div>Plain text story</div></article></body></html>",
            None,
        );
        assert_eq!(d.body_source, Some(BodySource::Article));
        assert_eq!(d.body, "Title Plain text story");

        let d = digest(
            "<html><body><div>Just words</div><style>.a{}</style></body></html>",
            None,
        );
        assert_eq!(d.body_source, Some(BodySource::Body));
        assert_eq!(d.body, "Just words");

        let d = digest("<html><body></body></html>", None);
        assert_eq!(d.body_source, Some(BodySource::None));
        assert!(d.body.is_empty());
    }
}
