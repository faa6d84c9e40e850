// tests/aggregate.rs
use std::sync::Arc;
use std::time::Duration;

use news_relay::http::HttpTransport;
use news_relay::ingest::feed::FeedFetcher;
use news_relay::ingest::SourceOutcome;
use news_relay::{FetchSettings, RetryPolicy, Source, SourceAggregator};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RSS: &str = include_str!("fixtures/politics_rss.xml");
const ATOM: &str = include_str!("fixtures/world_atom.xml");

fn aggregator(workers: usize) -> SourceAggregator {
    SourceAggregator::new(
        FeedFetcher::new(Arc::new(HttpTransport::new().unwrap())),
        FetchSettings {
            timeout: Duration::from_secs(2),
            policy: RetryPolicy::fixed(2, Duration::ZERO),
            workers,
        },
    )
}

async fn server_with_three_feeds() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/politics.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(RSS)
                // finish last so completion order differs from source order
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/world.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ATOM))
        .mount(&server)
        .await;
    server
}

fn sources(base: &str) -> Vec<Source> {
    vec![
        Source::new("Politics", format!("{base}/politics.xml"), "uk"),
        Source::new("Broken", format!("{base}/broken.xml"), "global"),
        Source::new("World", format!("{base}/world.xml"), "global"),
    ]
}

#[tokio::test]
async fn failing_source_is_skipped_and_the_rest_are_kept() {
    let server = server_with_three_feeds().await;
    let agg = aggregator(3);

    let out = agg
        .collect_with_report(&sources(&server.uri()), &CancellationToken::new())
        .await;

    assert_eq!(out.failed_sources(), 1);
    match &out.reports[1].outcome {
        SourceOutcome::Failed {
            attempts,
            transient,
            ..
        } => {
            assert_eq!(*attempts, 3);
            assert!(*transient);
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let urls: Vec<&str> = out.articles.iter().map(|a| a.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://politics.example/budget-vote",
            "https://politics.example/transport-clash",
            "https://world.example/geneva-talks",
        ]
    );
    assert_eq!(out.duplicates, 1);
    assert_eq!(out.articles[2].source, "World");
    assert_eq!(out.articles[0].source, "Politics");
}

#[tokio::test]
async fn order_is_the_same_sequentially_and_concurrently() {
    let server = server_with_three_feeds().await;
    let srcs = sources(&server.uri());

    let seq = aggregator(1).collect(&srcs).await;
    let par = aggregator(8).collect(&srcs).await;
    assert_eq!(seq, par);
}

#[tokio::test]
async fn duplicate_urls_across_sources_yield_one_article() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
        .mount(&server)
        .await;

    let srcs = vec![
        Source::new("Mirror A", format!("{}/a.xml", server.uri()), "global"),
        Source::new("Mirror B", format!("{}/b.xml", server.uri()), "global"),
    ];
    let out = aggregator(2)
        .collect_with_report(&srcs, &CancellationToken::new())
        .await;

    assert_eq!(out.articles.len(), 2);
    assert_eq!(out.duplicates, 2);
    assert!(out.articles.iter().all(|a| a.source == "Mirror A"));
}

#[tokio::test]
async fn cancelled_run_makes_no_requests() {
    let server = server_with_three_feeds().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let out = aggregator(3)
        .collect_with_report(&sources(&server.uri()), &cancel)
        .await;

    assert!(out.articles.is_empty());
    assert_eq!(out.reports.len(), 3);
    assert!(out
        .reports
        .iter()
        .all(|r| r.outcome == SourceOutcome::Cancelled));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_source_list_is_an_empty_collection() {
    let out = aggregator(2).collect(&[]).await;
    assert!(out.is_empty());
}
