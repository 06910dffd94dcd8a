//! Classifier over a real HTTP redirect resolver, with the shortener mocked.

use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fetchgram::download::classifier::{Classification, ClassifierSettings, UrlClassifier};
use fetchgram::download::error::RejectReason;

async fn shortener() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/good"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "https://www.youtube.com/watch?v=abc"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "https://evil.example/payload"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("location", "https://youtube.com/watch?v=late")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    server
}

fn classifier() -> UrlClassifier {
    UrlClassifier::with_http_resolver(ClassifierSettings {
        allowed_domains: vec!["youtube.com".into()],
        shortener_domains: vec!["127.0.0.1".into()],
        max_redirect_hops: 3,
        hop_timeout: Duration::from_millis(500),
    })
    .unwrap()
}

#[tokio::test]
async fn test_short_link_to_allowed_host_is_valid() {
    let server = shortener().await;
    let result = classifier().classify(&format!("{}/good", server.uri())).await;
    assert_eq!(
        result.into_result().unwrap().as_str(),
        "https://www.youtube.com/watch?v=abc"
    );
}

#[tokio::test]
async fn test_short_link_to_other_host_is_unsupported() {
    let server = shortener().await;
    match classifier().classify(&format!("{}/bad", server.uri())).await {
        Classification::Rejected(e) => assert_eq!(e.reason, RejectReason::UnsupportedDomain),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_shortener_is_redirect_timeout() {
    let server = shortener().await;
    match classifier().classify(&format!("{}/slow", server.uri())).await {
        Classification::Rejected(e) => assert_eq!(e.reason, RejectReason::RedirectTimeout),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_direct_allowed_link_makes_no_request() {
    let server = shortener().await;
    let result = classifier().classify("https://youtube.com/watch?v=direct").await;
    assert!(matches!(result, Classification::Valid(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}
