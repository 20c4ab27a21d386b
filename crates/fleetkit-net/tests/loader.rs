//! ResourceLoader against a local HTTP server.

use std::time::Duration;

use fleetkit_net::{Fetcher, LoaderConfig, NetError, Request, ResourceLoader};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn loader() -> ResourceLoader {
    ResourceLoader::new(LoaderConfig::default()).unwrap()
}

#[tokio::test]
async fn test_fetch_returns_buffered_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/veiculos"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("date", "Fri, 01 Mar 2024 12:00:00 GMT")
                .set_body_string("[]"),
        )
        .mount(&server)
        .await;

    let request = Request::parse(&format!("{}/api/veiculos", server.uri())).unwrap();
    let response = loader().fetch(request).await.unwrap();

    assert!(response.ok());
    assert_eq!(response.text().unwrap(), "[]");
    assert_eq!(response.header("date"), Some("Fri, 01 Mar 2024 12:00:00 GMT"));
    assert!(response.url.is_some());
}

#[tokio::test]
async fn test_fetch_forwards_request_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header_exists("accept"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let url = url::Url::parse(&format!("{}/", server.uri())).unwrap();
    let response = loader().fetch(Request::navigate(url)).await.unwrap();
    assert!(response.ok());
}

#[tokio::test]
async fn test_error_status_is_not_a_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let request = Request::parse(&format!("{}/missing.png", server.uri())).unwrap();
    let response = loader().fetch(request).await.unwrap();
    assert_eq!(response.status.as_u16(), 404);
    assert!(!response.ok());
}

#[tokio::test]
async fn test_timeout_maps_to_net_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let request = Request::parse(&format!("{}/slow", server.uri()))
        .unwrap()
        .timeout(Duration::from_millis(100));
    let err = loader().fetch(request).await.unwrap_err();
    assert!(matches!(err, NetError::Timeout(_)));
}

#[tokio::test]
async fn test_connection_refused_is_err() {
    // Nothing listens on port 9 of the loopback interface.
    let request = Request::parse("http://127.0.0.1:9/").unwrap();
    let result = loader().fetch(request).await;
    assert!(result.is_err());
}
