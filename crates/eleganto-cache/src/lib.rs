//! # Eleganto Cache
//!
//! Named request/response caches, modelled on the Cache API.
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache ("royal-eleganto-static-v1", ...)
//!             └── cache key (absolute URL) → CacheEntry
//! ```
//!
//! Every `put` is an overwrite-by-key; concurrent writers resolve as
//! last-write-wins. Entries never expire on their own, they disappear with
//! their cache.

use chrono::Utc;
use eleganto_net::{Request, Response};
use hashbrown::HashMap;
use http::Method;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};

// ==================== Errors ====================

/// Errors that can occur in cache operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Quota exceeded for cache {cache}: limit is {limit} entries")]
    QuotaExceeded { cache: String, limit: usize },

    #[error("Only GET requests can be cached, got {0}")]
    UnsupportedMethod(String),

    #[error("Cache not found: {0}")]
    NotFound(String),
}

// ==================== Cache ====================

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cache key (absolute request URL).
    pub url: String,

    /// Request method.
    pub method: Method,

    /// Stored response.
    pub response: Response,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: i64,
}

/// A single named cache.
#[derive(Debug)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,

    /// Maximum number of entries, if bounded.
    max_entries: Option<usize>,
}

impl Cache {
    /// Create a new unbounded cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
            max_entries: None,
        }
    }

    /// Create a cache that holds at most `max_entries` entries.
    pub fn with_capacity(name: &str, max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            ..Self::new(name)
        }
    }

    /// Match a cache key.
    pub fn match_request(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store a response for a request, replacing any previous entry.
    pub fn put(&mut self, request: &Request, response: Response) -> Result<(), CacheError> {
        if request.method != Method::GET {
            return Err(CacheError::UnsupportedMethod(request.method.to_string()));
        }

        let key = request.cache_key();
        self.check_quota(&key)?;

        trace!(cache = %self.name, key = %key, status = %response.status, "Cache put");
        self.entries.insert(
            key.clone(),
            CacheEntry {
                url: key,
                method: Method::GET,
                response,
                cached_at: Utc::now().timestamp_millis(),
            },
        );
        Ok(())
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_quota(&self, key: &str) -> Result<(), CacheError> {
        match self.max_entries {
            Some(limit) if self.entries.len() >= limit && !self.entries.contains_key(key) => {
                Err(CacheError::QuotaExceeded {
                    cache: self.name.clone(),
                    limit,
                })
            }
            _ => Ok(()),
        }
    }
}

// ==================== Cache Storage ====================

/// Cache storage (the `caches` global), shared by every task of a worker.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: RwLock<HashMap<String, Cache>>,

    /// Entry limit applied to caches created by this storage.
    max_entries_per_cache: Option<usize>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage whose caches hold at most `limit` entries each.
    pub fn with_entry_limit(limit: usize) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            max_entries_per_cache: Some(limit),
        }
    }

    fn create(&self, name: &str) -> Cache {
        match self.max_entries_per_cache {
            Some(limit) => Cache::with_capacity(name, limit),
            None => Cache::new(name),
        }
    }

    /// Open a cache, creating it if it doesn't exist.
    pub async fn open(&self, name: &str) {
        let mut caches = self.caches.write().await;
        if !caches.contains_key(name) {
            debug!(cache = %name, "Creating cache");
            caches.insert(name.to_string(), self.create(name));
        }
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    /// Delete a cache and all of its entries.
    pub async fn delete(&self, name: &str) -> bool {
        let removed = self.caches.write().await.remove(name).is_some();
        if removed {
            debug!(cache = %name, "Deleted cache");
        }
        removed
    }

    /// Get all cache names, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Store a response in the named cache, creating the cache if needed.
    pub async fn put(
        &self,
        name: &str,
        request: &Request,
        response: Response,
    ) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| self.create(name))
            .put(request, response)
    }

    /// Store a response in the named cache only if that cache still exists.
    ///
    /// Writers racing a cache deletion must not resurrect the deleted cache.
    pub async fn put_existing(
        &self,
        name: &str,
        request: &Request,
        response: Response,
    ) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        match caches.get_mut(name) {
            Some(cache) => cache.put(request, response),
            None => Err(CacheError::NotFound(name.to_string())),
        }
    }

    /// Store several responses in the named cache as one unit.
    ///
    /// Either every pair is stored or none is.
    pub async fn put_all(
        &self,
        name: &str,
        pairs: Vec<(Request, Response)>,
    ) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        let existing = caches.remove(name);
        let existed = existing.is_some();
        let mut staged = existing.unwrap_or_else(|| self.create(name));
        let snapshot = staged.entries.clone();

        for (request, response) in pairs {
            if let Err(e) = staged.put(&request, response) {
                if existed {
                    staged.entries = snapshot;
                    caches.insert(name.to_string(), staged);
                }
                return Err(e);
            }
        }

        caches.insert(name.to_string(), staged);
        Ok(())
    }

    /// Look a key up in one named cache.
    pub async fn match_in(&self, name: &str, key: &str) -> Option<Response> {
        let caches = self.caches.read().await;
        caches
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .map(|entry| entry.response.clone())
    }

    /// Look a key up in one named cache, returning the full entry.
    pub async fn entry_in(&self, name: &str, key: &str) -> Option<CacheEntry> {
        let caches = self.caches.read().await;
        caches
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned()
    }

    /// Look a key up across the given caches, in order.
    pub async fn match_any(&self, names: &[String], key: &str) -> Option<Response> {
        let caches = self.caches.read().await;
        names
            .iter()
            .filter_map(|name| caches.get(name.as_str()))
            .find_map(|cache| cache.match_request(key))
            .map(|entry| entry.response.clone())
    }

    /// Match across all caches, in name order.
    pub async fn match_request(&self, key: &str) -> Option<Response> {
        let names = self.keys().await;
        self.match_any(&names, key).await
    }

    /// Number of entries in the named cache (0 if it doesn't exist).
    pub async fn entry_count(&self, name: &str) -> usize {
        self.caches
            .read()
            .await
            .get(name)
            .map(Cache::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use url::Url;

    fn body(url: &str, text: &'static str) -> (Request, Response) {
        let url = Url::parse(url).unwrap();
        (
            Request::get(url.clone()),
            Response::new(url, StatusCode::OK, text),
        )
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("v1");
        let (request, response) = body("https://example.com/style.css", "a{}");

        cache.put(&request, response).unwrap();

        assert!(cache.match_request("https://example.com/style.css").is_some());
        assert!(cache.match_request("https://example.com/other.css").is_none());
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("v1");
        let (request, response) = body("https://example.com/style.css", "a{}");

        cache.put(&request, response).unwrap();
        assert!(cache.delete("https://example.com/style.css"));
        assert!(cache.match_request("https://example.com/style.css").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_overwrites() {
        let mut cache = Cache::new("v1");
        let (request, first) = body("https://example.com/a.js", "one");
        let (_, second) = body("https://example.com/a.js", "two");

        cache.put(&request, first).unwrap();
        cache.put(&request, second).unwrap();

        assert_eq!(cache.len(), 1);
        let entry = cache.match_request("https://example.com/a.js").unwrap();
        assert_eq!(entry.response.text().unwrap(), "two");
    }

    #[test]
    fn test_put_rejects_post() {
        let mut cache = Cache::new("v1");
        let url = Url::parse("https://example.com/api/contact").unwrap();
        let request = Request::post(url.clone(), "{}".into());
        let response = Response::new(url, StatusCode::OK, "");

        assert!(matches!(
            cache.put(&request, response),
            Err(CacheError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn test_quota() {
        let mut cache = Cache::with_capacity("small", 1);
        let (a, a_resp) = body("https://example.com/a.js", "a");
        let (b, b_resp) = body("https://example.com/b.js", "b");
        let (_, a_again) = body("https://example.com/a.js", "a2");

        cache.put(&a, a_resp).unwrap();
        assert!(matches!(
            cache.put(&b, b_resp),
            Err(CacheError::QuotaExceeded { limit: 1, .. })
        ));
        // Overwriting an existing key is always allowed.
        cache.put(&a, a_again).unwrap();
    }

    #[test]
    fn test_cache_keys() {
        let mut cache = Cache::new("test");
        let (b, b_resp) = body("https://example.com/b.js", "b");
        let (a, a_resp) = body("https://example.com/a.js", "a");
        cache.put(&b, b_resp).unwrap();
        cache.put(&a, a_resp).unwrap();

        assert_eq!(
            cache.keys(),
            vec!["https://example.com/a.js", "https://example.com/b.js"]
        );
    }

    #[tokio::test]
    async fn test_cache_storage() {
        let storage = CacheStorage::new();

        assert!(!storage.has("v1").await);

        storage.open("v1").await;
        assert!(storage.has("v1").await);

        assert!(storage.delete("v1").await);
        assert!(!storage.has("v1").await);
        assert!(!storage.delete("v1").await);
    }

    #[tokio::test]
    async fn test_storage_match_order() {
        let storage = CacheStorage::new();
        let (request, pages) = body("https://example.com/index.html", "pages");
        let (_, statics) = body("https://example.com/index.html", "static");

        storage.put("site-pages-v1", &request, pages).await.unwrap();
        storage.put("site-static-v1", &request, statics).await.unwrap();

        let order = vec!["site-static-v1".to_string(), "site-pages-v1".to_string()];
        let hit = storage
            .match_any(&order, "https://example.com/index.html")
            .await
            .unwrap();
        assert_eq!(hit.text().unwrap(), "static");

        assert!(storage
            .match_in("site-images-v1", "https://example.com/index.html")
            .await
            .is_none());
        assert!(storage
            .match_request("https://example.com/index.html")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_put_existing_does_not_resurrect() {
        let storage = CacheStorage::new();
        let (request, response) = body("https://example.com/a.png", "png");

        storage.open("site-images-v1").await;
        assert!(storage.delete("site-images-v1").await);

        let result = storage
            .put_existing("site-images-v1", &request, response)
            .await;
        assert_eq!(result, Err(CacheError::NotFound("site-images-v1".into())));
        assert!(!storage.has("site-images-v1").await);
    }

    #[tokio::test]
    async fn test_put_all_is_all_or_nothing() {
        let storage = CacheStorage::with_entry_limit(2);
        let pairs = vec![
            body("https://example.com/a.html", "a"),
            body("https://example.com/b.css", "b"),
            body("https://example.com/c.js", "c"),
        ];

        let result = storage.put_all("site-static-v1", pairs).await;
        assert!(matches!(result, Err(CacheError::QuotaExceeded { .. })));
        assert!(!storage.has("site-static-v1").await);

        let pairs = vec![
            body("https://example.com/a.html", "a"),
            body("https://example.com/b.css", "b"),
        ];
        storage.put_all("site-static-v1", pairs).await.unwrap();
        assert_eq!(storage.entry_count("site-static-v1").await, 2);
    }

    #[tokio::test]
    async fn test_entry_records_time() {
        let storage = CacheStorage::new();
        let (request, response) = body("https://example.com/a.js", "a");
        let before = Utc::now().timestamp_millis();
        storage.put("c", &request, response).await.unwrap();

        let entry = storage.entry_in("c", "https://example.com/a.js").await.unwrap();
        assert!(entry.cached_at >= before);
        assert_eq!(entry.method, Method::GET);
    }
}
