//! Strategy executors.
//!
//! | Strategy | Reads | Writes | Fallback |
//! |---|---|---|---|
//! | cache-first | cache, then network | 200 responses | placeholder (images) |
//! | network-first | network, then cache | 200 responses | none |
//! | network-first + offline | network, then cache | 200 responses | offline document |
//! | stale-while-revalidate | cache, network in background | 200 responses | none |
//!
//! A received non-200 response is returned but never cached. Cache writes
//! are best-effort: a failed write is logged and the response still goes out.

use std::sync::Arc;
use std::time::Duration;

use eleganto_cache::CacheStorage;
use eleganto_common::{timeout::with_optional_timeout, ElegantoError};
use eleganto_net::{cache_key_for, Fetcher, NetError, Request, Response};
use http::StatusCode;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::classify::{Route, Strategy};
use crate::registry::{CacheRegistry, CacheRole};
use crate::tasks::BackgroundTasks;

const PLACEHOLDER_SVG: &str = concat!(
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="300" viewBox="0 0 400 300">"##,
    r##"<rect width="400" height="300" fill="#f4efe6"/>"##,
    r##"<text x="200" y="155" font-family="serif" font-size="18" text-anchor="middle" fill="#8a7350">"##,
    r##"Image unavailable offline</text></svg>"##
);

const OFFLINE_HTML: &str = concat!(
    "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">",
    "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">",
    "<title>Offline | Royal Eleganto</title></head><body>",
    "<h1>You are offline</h1>",
    "<p>This page isn't available without a connection. Please try again once you are back online.</p>",
    "</body></html>"
);

/// Where a resolved response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Offline document or placeholder image.
    Fallback,
}

/// A response produced by a strategy.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub response: Response,
    pub source: ResponseSource,
}

impl Resolved {
    fn network(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }

    fn cache(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Cache,
        }
    }

    fn fallback(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Fallback,
        }
    }
}

/// Fixed content served when nothing else is available.
#[derive(Debug, Clone)]
pub struct Fallbacks {
    pub offline_page: Url,
    pub placeholder_image: Url,
}

/// Runs the caching strategies against a fetcher and the shared caches.
pub struct StrategyExecutor {
    fetcher: Arc<dyn Fetcher>,
    caches: Arc<CacheStorage>,
    tasks: Arc<BackgroundTasks>,
    fetch_timeout: Option<Duration>,
    fallbacks: Fallbacks,
}

impl StrategyExecutor {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        caches: Arc<CacheStorage>,
        tasks: Arc<BackgroundTasks>,
        fetch_timeout: Option<Duration>,
        fallbacks: Fallbacks,
    ) -> Self {
        Self {
            fetcher,
            caches,
            tasks,
            fetch_timeout,
            fallbacks,
        }
    }

    /// Resolve a classified request with its route's strategy.
    pub async fn execute(
        &self,
        request: &Request,
        route: Route,
        registry: &CacheRegistry,
    ) -> Result<Resolved, NetError> {
        debug!(url = %request.url, role = %route.role, strategy = ?route.strategy, "Executing strategy");

        match route.strategy {
            Strategy::CacheFirst => self.cache_first(request, route.role, registry).await,
            Strategy::NetworkFirst => self.network_first(request, route.role, registry).await,
            Strategy::NetworkFirstWithOfflineFallback => {
                self.network_first_with_offline_fallback(request, route.role, registry)
                    .await
            }
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, route.role, registry)
                    .await
            }
        }
    }

    /// Cache hit returns without touching the network; a miss fetches and
    /// stores. Images that fail both ways get the placeholder.
    pub async fn cache_first(
        &self,
        request: &Request,
        role: CacheRole,
        registry: &CacheRegistry,
    ) -> Result<Resolved, NetError> {
        if let Some(hit) = self.lookup(request, role, registry).await {
            return Ok(Resolved::cache(hit));
        }

        match fetch(self.fetcher.as_ref(), request, self.fetch_timeout).await {
            Ok(response) => {
                self.store(registry, role, request, &response).await;
                Ok(Resolved::network(response))
            }
            Err(e) => {
                error!(context = "cache-first strategy", url = %request.url, error = %e, "Network fetch failed");
                if role == CacheRole::Images {
                    return Ok(Resolved::fallback(self.placeholder(registry).await));
                }
                Err(e)
            }
        }
    }

    /// Network wins when reachable; the cache only answers transport failures.
    pub async fn network_first(
        &self,
        request: &Request,
        role: CacheRole,
        registry: &CacheRegistry,
    ) -> Result<Resolved, NetError> {
        match fetch(self.fetcher.as_ref(), request, self.fetch_timeout).await {
            Ok(response) => {
                self.store(registry, role, request, &response).await;
                Ok(Resolved::network(response))
            }
            Err(e) => {
                if let Some(hit) = self.lookup(request, role, registry).await {
                    debug!(url = %request.url, error = %e, "Network failed, serving cached copy");
                    return Ok(Resolved::cache(hit));
                }
                error!(context = "network-first strategy", url = %request.url, error = %e, "No network and no cached copy");
                Err(e)
            }
        }
    }

    /// Network-first that never fails: the offline document is the last resort.
    pub async fn network_first_with_offline_fallback(
        &self,
        request: &Request,
        role: CacheRole,
        registry: &CacheRegistry,
    ) -> Result<Resolved, NetError> {
        match self.network_first(request, role, registry).await {
            Ok(resolved) => Ok(resolved),
            Err(_) => {
                info!(url = %request.url, "Falling back to offline page");
                Ok(Resolved::fallback(self.offline_document(registry).await))
            }
        }
    }

    /// Serve the cached copy immediately and refresh it in the background;
    /// without a cached copy, wait for the network.
    pub async fn stale_while_revalidate(
        &self,
        request: &Request,
        role: CacheRole,
        registry: &CacheRegistry,
    ) -> Result<Resolved, NetError> {
        if let Some(hit) = self.lookup(request, role, registry).await {
            self.spawn_revalidation(request, registry.id(role).name().to_string())
                .await;
            return Ok(Resolved::cache(hit));
        }

        match fetch(self.fetcher.as_ref(), request, self.fetch_timeout).await {
            Ok(response) => {
                self.store(registry, role, request, &response).await;
                Ok(Resolved::network(response))
            }
            Err(e) => {
                error!(context = "stale-while-revalidate network fetch", url = %request.url, error = %e, "Network fetch failed");
                Err(e)
            }
        }
    }

    async fn spawn_revalidation(&self, request: &Request, cache_name: String) {
        let fetcher = Arc::clone(&self.fetcher);
        let caches = Arc::clone(&self.caches);
        let timeout = self.fetch_timeout;
        let request = request.clone();

        self.tasks
            .spawn("revalidate", async move {
                match fetch(fetcher.as_ref(), &request, timeout).await {
                    Ok(response) if response.status == StatusCode::OK => {
                        if let Err(e) = caches.put_existing(&cache_name, &request, response).await {
                            warn!(context = "stale-while-revalidate cache update", url = %request.url, error = %e, "Cache write failed");
                        } else {
                            debug!(url = %request.url, cache = %cache_name, "Revalidated");
                        }
                    }
                    Ok(response) => {
                        debug!(url = %request.url, status = %response.status, "Revalidation response not cached");
                    }
                    Err(e) => {
                        warn!(context = "stale-while-revalidate network fetch", url = %request.url, error = %e, "Revalidation failed");
                    }
                }
            })
            .await;
    }

    async fn lookup(
        &self,
        request: &Request,
        role: CacheRole,
        registry: &CacheRegistry,
    ) -> Option<Response> {
        self.caches
            .match_any(&registry.lookup_order(role), &request.cache_key())
            .await
    }

    /// Best-effort write of a 200 response into the role's cache.
    async fn store(
        &self,
        registry: &CacheRegistry,
        role: CacheRole,
        request: &Request,
        response: &Response,
    ) {
        if response.status != StatusCode::OK {
            debug!(url = %request.url, status = %response.status, "Response not cached");
            return;
        }

        let id = registry.id(role);
        if let Err(e) = self
            .caches
            .put_existing(id.name(), request, response.clone())
            .await
        {
            warn!(context = "cache write", cache = %id, url = %request.url, error = %e, "Cache write failed");
        }
    }

    async fn fallback_from_cache(&self, registry: &CacheRegistry, url: &Url) -> Option<Response> {
        self.caches
            .match_any(&registry.lookup_order(CacheRole::Static), &cache_key_for(url))
            .await
    }

    /// The offline document: cached copy, or the built-in page.
    pub async fn offline_document(&self, registry: &CacheRegistry) -> Response {
        let url = &self.fallbacks.offline_page;
        match self.fallback_from_cache(registry, url).await {
            Some(response) => response,
            None => Response::new(url.clone(), StatusCode::OK, OFFLINE_HTML)
                .with_content_type(mime::TEXT_HTML_UTF_8),
        }
    }

    /// The placeholder image: cached copy, or the built-in SVG.
    pub async fn placeholder(&self, registry: &CacheRegistry) -> Response {
        let url = &self.fallbacks.placeholder_image;
        match self.fallback_from_cache(registry, url).await {
            Some(response) => response,
            None => Response::new(url.clone(), StatusCode::OK, PLACEHOLDER_SVG)
                .with_content_type(mime::IMAGE_SVG),
        }
    }
}

/// Fetch with the optional timeout; a timeout counts as a transport failure.
pub(crate) async fn fetch(
    fetcher: &dyn Fetcher,
    request: &Request,
    timeout: Option<Duration>,
) -> Result<Response, NetError> {
    match with_optional_timeout(timeout, || fetcher.fetch(request)).await {
        Ok(result) => result,
        Err(ElegantoError::Timeout(elapsed)) => Err(NetError::Timeout(elapsed)),
        Err(e) => Err(NetError::RequestFailed(e.to_string())),
    }
}
