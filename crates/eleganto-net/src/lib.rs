//! # Eleganto Net
//!
//! Request/response model and network access for the offline worker.
//!
//! ## Design Goals
//!
//! 1. **Cloneable responses**: bodies are fully buffered so a response can be
//!    stored in a cache and returned to the page at the same time
//! 2. **Fetch seam**: strategies talk to the network through the [`Fetcher`]
//!    trait, so the worker can run against reqwest or a scripted fetcher
//! 3. **Transport vs. status**: a received response is always `Ok`, whatever
//!    its status; only transport failures are `Err`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{HttpFetcher, LoaderConfig};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid body: {0}")]
    InvalidBody(String),

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

/// Request mode, as reported by the page that issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    SameOrigin,
    #[default]
    NoCors,
    Cors,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
}

impl Request {
    /// Create a GET request for a subresource.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::NoCors,
        }
    }

    /// Create a navigation request (a document load).
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            mode: RequestMode::Cors,
            ..Self::get(url)
        }
    }

    /// Parse a URL and create a GET request for it.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request mode.
    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether this request loads a document.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// The key under which responses to this request are cached.
    ///
    /// Fragments never reach the network, so they are not part of the key.
    pub fn cache_key(&self) -> String {
        cache_key_for(&self.url)
    }
}

/// Cache key for a URL: the absolute URL without its fragment.
pub fn cache_key_for(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_type: Option<Mime>,
    body: Bytes,
}

impl Response {
    /// Create a response with the given status and body.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            content_type: None,
            body: body.into(),
        }
    }

    /// Create a response from parts received over the wire.
    pub fn from_parts(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let content_type = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok());

        Self {
            url,
            status,
            headers,
            content_type,
            body,
        }
    }

    /// Set the content type (and the matching header).
    pub fn with_content_type(mut self, content_type: Mime) -> Self {
        if let Ok(value) = HeaderValue::from_str(content_type.as_ref()) {
            self.headers.insert(http::header::CONTENT_TYPE, value);
        }
        self.content_type = Some(content_type);
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get the body as bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::InvalidBody(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::InvalidBody(e.to_string()))
    }
}

/// Access to the network.
///
/// Implementations return `Ok` for every response that was received,
/// including 4xx/5xx; `Err` means no response arrived at all.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com/data.json").unwrap();
        let request = Request::get(url.clone()).header(
            HeaderName::from_static("accept"),
            HeaderValue::from_static("application/json"),
        );

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert!(!request.is_navigation());
    }

    #[test]
    fn test_navigation_request() {
        let url = Url::parse("https://example.com/about.html").unwrap();
        let request = Request::navigate(url);
        assert!(request.is_navigation());
        assert_eq!(request.method, Method::GET);
    }

    #[test]
    fn test_post_request() {
        let url = Url::parse("https://example.com/api/contact").unwrap();
        let request = Request::post(url, Bytes::from_static(b"{}"));
        assert_eq!(request.method, Method::POST);
        assert!(request.body.is_some());
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let request = Request::parse("https://example.com/gallery.html#wedding").unwrap();
        assert_eq!(request.cache_key(), "https://example.com/gallery.html");
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            Request::parse("not a url"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_response_content_type_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/css; charset=utf-8"),
        );
        let url = Url::parse("https://example.com/styles/main.css").unwrap();
        let response = Response::from_parts(url, StatusCode::OK, headers, Bytes::from("body{}"));

        let content_type = response.content_type.clone().unwrap();
        assert_eq!(content_type.essence_str(), "text/css");
        assert!(response.ok());
        assert_eq!(response.text().unwrap(), "body{}");
    }

    #[test]
    fn test_response_json() {
        let url = Url::parse("https://example.com/api/services").unwrap();
        let response = Response::new(url, StatusCode::OK, r#"{"count":3}"#)
            .with_content_type(mime::APPLICATION_JSON);

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["count"], 3);
        assert_eq!(
            response.headers.get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_not_found_is_not_ok() {
        let url = Url::parse("https://example.com/missing").unwrap();
        let response = Response::new(url, StatusCode::NOT_FOUND, "");
        assert!(!response.ok());
    }
}
