//! # FleetKit Net
//!
//! Request and response types plus the network side of the FleetKit
//! offline caching layer.
//!
//! ## Design Goals
//!
//! 1. **Cloneable responses**: bodies are fully buffered so a response can
//!    be stored in a cache and returned to the page at the same time
//! 2. **Pluggable network**: everything above this crate talks to the
//!    network through the [`Fetcher`] trait
//! 3. **Async HTTP**: [`ResourceLoader`] is the reqwest-backed fetcher

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;
use url::Url;

pub mod fetcher;

pub use fetcher::{Fetcher, LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// How the page issued a request.
///
/// Only `Navigate` matters to the caching layer: it marks a
/// browsing-context load of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document navigation.
    Navigate,
    /// Same-origin subresource.
    #[default]
    SameOrigin,
    /// Cross-origin subresource with CORS.
    Cors,
    /// Opaque cross-origin subresource.
    NoCors,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a top-level navigation request that accepts HTML.
    pub fn navigate(url: Url) -> Self {
        let mut request = Self::get(url);
        request.mode = RequestMode::Navigate;
        request.headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml"),
        );
        request
    }

    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::SameOrigin,
            timeout: None,
        }
    }

    /// Parse `url` and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// The `Accept` header, if present and valid UTF-8.
    pub fn accept(&self) -> Option<&str> {
        self.headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
    }
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL after redirects; `None` for synthesized responses.
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Create a response with the given status and body.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// 200 OK with a body.
    pub fn ok_with(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    /// Add a header. Invalid header values are skipped.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Set the response URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Canonical reason phrase for the status.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parsed `Content-Type`.
    pub fn content_type(&self) -> Option<Mime> {
        self.header("content-type")
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Get the body as bytes.
    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.accept(), Some("application/json"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
        assert_eq!(request.mode, RequestMode::SameOrigin);
    }

    #[test]
    fn test_navigate_request() {
        let request = Request::navigate(Url::parse("https://example.com/lojas").unwrap());
        assert_eq!(request.mode, RequestMode::Navigate);
        assert!(request.accept().unwrap().contains("text/html"));
    }

    #[test]
    fn test_parse_invalid_url() {
        assert!(matches!(
            Request::parse("not a url"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_response_helpers() {
        let response = Response::ok_with("{\"ok\":true}")
            .with_header(header::CONTENT_TYPE, "application/json");
        assert!(response.ok());
        assert_eq!(response.status_text(), "OK");
        assert_eq!(response.content_type(), Some(mime::APPLICATION_JSON));

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_response_not_ok() {
        let response = Response::new(StatusCode::SERVICE_UNAVAILABLE, "Offline");
        assert!(!response.ok());
        assert_eq!(response.status_text(), "Service Unavailable");
        assert_eq!(response.text().unwrap(), "Offline");
    }
}
