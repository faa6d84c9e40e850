//! Thin HTTP seam used by the feed fetcher, the page extractor and the image
//! validator.
//!
//! [`Transport`] returns every HTTP status as a response and leaves the
//! success/failure decision to the caller; only network-level problems become
//! a [`FetchError`]. Tests substitute scripted transports or point
//! [`HttpTransport`] at a mock server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::error::FetchError;

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; NewsBot/1.0)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Lossy UTF-8 view of the body.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Media type without parameters, lower-cased (`text/html; charset=utf-8` → `text/html`).
    pub fn media_type(&self) -> Option<String> {
        self.content_type.as_deref().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, FetchError>;

    /// [`get`](Self::get) that refuses bodies larger than `max_bytes`.
    /// The default buffers first; [`HttpTransport`] stops reading at the limit.
    async fn get_limited(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<HttpResponse, FetchError> {
        let resp = self.get(url, timeout).await?;
        if resp.body.len() > max_bytes {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                limit: max_bytes,
            });
        }
        Ok(resp)
    }
}

/// `reqwest`-backed transport shared by all components of a run.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: Option<usize>,
    ) -> Result<HttpResponse, FetchError> {
        let parsed = parse_http_url(url)?;

        let mut resp = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, &e))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let too_large = |limit| FetchError::TooLarge {
            url: url.to_string(),
            limit,
        };
        if let (Some(limit), Some(len)) = (max_bytes, resp.content_length()) {
            if len > limit as u64 {
                return Err(too_large(limit));
            }
        }

        // Content-Length may be absent or wrong; count what actually arrives.
        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| body_error(url, &e))? {
            body.extend_from_slice(&chunk);
            if let Some(limit) = max_bytes {
                if body.len() > limit {
                    return Err(too_large(limit));
                }
            }
        }

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, FetchError> {
        self.fetch(url, timeout, None).await
    }

    async fn get_limited(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<HttpResponse, FetchError> {
        self.fetch(url, timeout, Some(max_bytes)).await
    }
}

fn body_error(url: &str, e: &reqwest::Error) -> FetchError {
    match map_reqwest_error(url, e) {
        FetchError::Timeout { url } => FetchError::Timeout { url },
        _ => FetchError::Body {
            url: url.to_string(),
            message: e.to_string(),
        },
    }
}

/// Only absolute http(s) URLs are fetchable.
pub fn parse_http_url(url: &str) -> Result<url::Url, FetchError> {
    let trimmed = url.trim();
    let parsed = url::Url::parse(trimmed).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

fn map_reqwest_error(url: &str, e: &reqwest::Error) -> FetchError {
    let url = url.to_string();
    if e.is_timeout() {
        return FetchError::Timeout { url };
    }
    if e.is_builder() {
        return FetchError::InvalidUrl {
            url,
            reason: e.to_string(),
        };
    }
    let chain = error_chain(e);
    if e.is_connect() {
        if looks_like_dns_failure(&chain) {
            return FetchError::Dns {
                url,
                message: chain,
            };
        }
        return FetchError::Connect {
            url,
            message: chain,
        };
    }
    if e.is_body() || e.is_decode() {
        return FetchError::Body {
            url,
            message: chain,
        };
    }
    FetchError::Connect {
        url,
        message: chain,
    }
}

fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![e.to_string()];
    let mut cur = e.source();
    while let Some(inner) = cur {
        parts.push(inner.to_string());
        cur = inner.source();
    }
    parts.join(": ")
}

fn looks_like_dns_failure(chain: &str) -> bool {
    let lower = chain.to_ascii_lowercase();
    lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        let err = parse_http_url("ftp://example.com/feed.xml").unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
        assert!(!err.is_transient());

        let err = parse_http_url("not a url").unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));

        assert!(parse_http_url(" https://example.com/a ").is_ok());
    }

    #[test]
    fn media_type_strips_parameters() {
        let r = HttpResponse {
            status: 200,
            content_type: Some("Image/PNG; charset=binary".into()),
            body: vec![],
        };
        assert_eq!(r.media_type().as_deref(), Some("image/png"));
        assert!(r.is_success());
    }

    #[test]
    fn dns_detection_matches_resolver_messages() {
        assert!(looks_like_dns_failure(
            "error sending request: client error (Connect): dns error: failed to lookup address information"
        ));
        assert!(!looks_like_dns_failure("connection refused"));
    }
}
