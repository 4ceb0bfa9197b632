//! Request classification: which cache role and strategy serve a request.

use eleganto_net::Request;
use http::Method;
use url::Url;

use crate::registry::CacheRole;

/// Image extensions served cache-first.
pub const IMAGE_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp"];

/// Font extensions, stored under their own role.
pub const FONT_EXTENSIONS: [&str; 4] = [".woff", ".woff2", ".ttf", ".eot"];

/// Algorithm resolving a request against network and cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    NetworkFirstWithOfflineFallback,
    StaleWhileRevalidate,
}

/// Where a request's response is stored and how it is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub role: CacheRole,
    pub strategy: Strategy,
}

impl Route {
    pub fn new(role: CacheRole, strategy: Strategy) -> Self {
        Self { role, strategy }
    }
}

/// Maps requests to routes.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    api_marker: String,
}

impl RequestClassifier {
    pub fn new(api_marker: impl Into<String>) -> Self {
        Self {
            api_marker: api_marker.into(),
        }
    }

    /// Classify a request. `None` means the worker does not handle it and the
    /// request goes to the network untouched.
    pub fn classify(&self, request: &Request) -> Option<Route> {
        if request.method != Method::GET || !is_web_scheme(&request.url) {
            return None;
        }

        let path = request.url.path();

        let route = if path.contains(&self.api_marker) {
            Route::new(CacheRole::Dynamic, Strategy::NetworkFirst)
        } else if request.is_navigation() {
            Route::new(CacheRole::Pages, Strategy::NetworkFirstWithOfflineFallback)
        } else if is_image(&request.url) {
            Route::new(CacheRole::Images, Strategy::CacheFirst)
        } else if has_extension(path, &FONT_EXTENSIONS) {
            Route::new(CacheRole::Fonts, Strategy::StaleWhileRevalidate)
        } else {
            Route::new(CacheRole::Static, Strategy::StaleWhileRevalidate)
        };

        Some(route)
    }
}

/// Whether the URL path ends with a recognized image extension.
pub fn is_image(url: &Url) -> bool {
    has_extension(url.path(), &IMAGE_EXTENSIONS)
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    let path = path.to_ascii_lowercase();
    extensions.iter().any(|ext| path.ends_with(ext))
}

// Browser-internal schemes (chrome-extension:, moz-extension:, about:, ...)
// never reach the caches.
fn is_web_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
