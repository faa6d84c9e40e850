// tests/extract_fallback.rs
use std::sync::Arc;
use std::time::Duration;

use news_relay::extract::{ExtractSettings, ImageOrigin};
use news_relay::http::{HttpTransport, Transport};
use news_relay::image::{ImageRejection, ImageSettings};
use news_relay::ingest::types::article_id;
use news_relay::{ContentExtractor, ExtractionStatus, ImageValidator, RawArticle, RetryPolicy};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = include_str!("fixtures/article.html");

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut b = b"\x89PNG\r\n\x1a\n".to_vec();
    b.extend_from_slice(&13u32.to_be_bytes());
    b.extend_from_slice(b"IHDR");
    b.extend_from_slice(&width.to_be_bytes());
    b.extend_from_slice(&height.to_be_bytes());
    b.extend_from_slice(&[8, 6, 0, 0, 0]);
    b
}

fn transport() -> Arc<dyn Transport> {
    Arc::new(HttpTransport::new().unwrap())
}

fn extractor(placeholder: Option<String>) -> ContentExtractor {
    let t = transport();
    ContentExtractor::new(
        t.clone(),
        ImageValidator::new(t, ImageSettings::default()),
        ExtractSettings {
            page_timeout: Duration::from_secs(2),
            page_policy: RetryPolicy::fixed(1, Duration::ZERO),
            placeholder_image_url: placeholder,
            ..ExtractSettings::default()
        },
    )
}

fn raw(url: String) -> RawArticle {
    RawArticle {
        id: article_id(&url),
        title: "Peace talks resume in Geneva".into(),
        url,
        source: "World".into(),
        published_at: None,
        summary: None,
    }
}

#[tokio::test]
async fn primary_image_rejected_secondary_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/world/geneva"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PAGE, "text/html"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/missing-lead.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/inline.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png(800, 600), "image/png"))
        .mount(&server)
        .await;

    let out = extractor(None)
        .extract(raw(format!("{}/world/geneva", server.uri())))
        .await;

    assert_eq!(out.status, ExtractionStatus::Ok);
    assert_eq!(out.image, Some(format!("{}/media/inline.png", server.uri())));
    assert_eq!(out.image_origin, Some(ImageOrigin::Content));

    let body = out.body.unwrap();
    assert!(body.starts_with("Delegations returned to Geneva"));
    assert!(body.contains("still some way off."));
    assert!(!body.contains("Menu"));
    assert!(!body.contains("ignored"));
    assert!(out.sentiment > 0.0);
}

#[tokio::test]
async fn every_candidate_failing_falls_through_to_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/world/geneva"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PAGE, "text/html"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/inline.png"))
        // served as an HTML error page with 200
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>login</html>", "text/html"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/placeholder.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png(768, 768), "image/png"))
        .mount(&server)
        .await;

    let placeholder = format!("{}/placeholder.png", server.uri());
    let out = extractor(Some(placeholder.clone()))
        .extract(raw(format!("{}/world/geneva", server.uri())))
        .await;

    assert_eq!(out.image, Some(placeholder));
    assert_eq!(out.image_origin, Some(ImageOrigin::Placeholder));
}

#[tokio::test]
async fn no_valid_candidate_leaves_image_null_and_article_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/world/geneva"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let out = extractor(Some(format!("{}/nothing.png", server.uri())))
        .extract(raw(format!("{}/world/geneva", server.uri())))
        .await;

    assert_eq!(out.status, ExtractionStatus::ExtractionFailed);
    assert!(out.failure.as_deref().unwrap().contains("503"));
    assert!(out.image.is_none());
    assert!(out.body.is_none());
    assert_eq!(out.article.title, "Peace talks resume in Geneva");
}

#[tokio::test]
async fn image_served_as_html_is_rejected_even_if_bytes_decode() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lead.png"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(png(1200, 630), "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let v = ImageValidator::new(transport(), ImageSettings::default());
    let url = format!("{}/lead.png", server.uri());
    assert!(!v.validate(Some(&url)).await);
    assert_eq!(v.inspect(&url).await.unwrap_err().reason(), "unsupported");
}

#[tokio::test]
async fn oversized_page_stops_at_the_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/world/geneva"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PAGE, "text/html"))
        .mount(&server)
        .await;

    let t = transport();
    let err = t
        .get_limited(&format!("{}/world/geneva", server.uri()), Duration::from_secs(2), 128)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "too_large");
    assert!(!err.is_transient());

    let ok = t
        .get_limited(&format!("{}/world/geneva", server.uri()), Duration::from_secs(2), 1 << 20)
        .await
        .unwrap();
    assert_eq!(ok.body.len(), PAGE.len());
}

#[tokio::test]
async fn validator_enforces_size_and_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png(10, 10), "image/png"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(png(10, 10), "image/png")
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    let v = ImageValidator::new(
        transport(),
        ImageSettings {
            timeout: Duration::from_millis(100),
            max_bytes: 16,
        },
    );
    let err = v.inspect(&format!("{}/big.png", server.uri())).await.unwrap_err();
    assert!(matches!(err, ImageRejection::TooLarge { .. }));

    let err = v.inspect(&format!("{}/slow.png", server.uri())).await.unwrap_err();
    assert_eq!(err.reason(), "timeout");
}
