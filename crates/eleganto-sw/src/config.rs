//! Worker configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use eleganto_common::{load_json, ElegantoError};
use serde::{Deserialize, Serialize};
use url::Url;

/// Offline worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the worker controls; relative paths resolve against it
    pub origin: Url,

    /// Prefix of every cache name
    pub cache_prefix: String,

    /// Cache generation; bumping it retires every older cache at activation
    pub cache_version: u32,

    /// Paths that must be cached at install
    pub static_assets: Vec<String>,

    /// Document served when a navigation cannot be satisfied
    pub offline_page: String,

    /// Image served when an image cannot be loaded
    pub placeholder_image: String,

    /// Path segment marking API requests
    pub api_marker: String,

    /// Background sync tag for queued form submissions
    pub sync_tag: String,

    /// Activate right after a successful install instead of waiting
    pub skip_waiting_on_install: bool,

    /// Optional bound on every network fetch, in milliseconds
    pub fetch_timeout_ms: Option<u64>,

    /// Optional entry limit per cache
    pub max_entries_per_cache: Option<usize>,

    /// Directory holding the submission queue database
    pub data_dir: PathBuf,

    /// Notification texts and icons
    pub notifications: NotificationDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    /// Title used when a push carries none
    pub title: String,

    /// Body used when a push carries none
    pub body: String,

    pub icon: String,

    pub badge: String,

    /// Page opened when a notification without a URL is clicked
    pub url: String,

    /// Title shown after a queued submission went through
    pub sync_title: String,

    pub sync_body: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8080/").expect("static origin parses"),
            cache_prefix: "royal-eleganto".to_string(),
            cache_version: 1,
            static_assets: default_static_assets(),
            offline_page: "/offline.html".to_string(),
            placeholder_image: "/images/placeholder.jpg".to_string(),
            api_marker: "/api/".to_string(),
            sync_tag: "contact-form-sync".to_string(),
            skip_waiting_on_install: true,
            fetch_timeout_ms: None,
            max_entries_per_cache: None,
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("eleganto"),
            notifications: NotificationDefaults::default(),
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "Royal Eleganto".to_string(),
            body: "You have a new notification".to_string(),
            icon: "/images/icons/icon-192x192.png".to_string(),
            badge: "/images/icons/badge-128x128.png".to_string(),
            url: "/".to_string(),
            sync_title: "Form Submitted".to_string(),
            sync_body: "Your contact form was successfully submitted".to_string(),
        }
    }
}

fn default_static_assets() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/about.html",
        "/services.html",
        "/gallery.html",
        "/contact.html",
        "/privacy-policy.html",
        "/terms-of-service.html",
        "/offline.html",
        "/styles/main.css",
        "/scripts/main.js",
        "/scripts/modules/navigation.js",
        "/scripts/modules/forms.js",
        "/scripts/modules/gallery.js",
        "/scripts/modules/animation.js",
        "/scripts/modules/utils.js",
        "/manifest.json",
        "/images/royal-eleganto.png",
        "/images/icons/icon-192x192.png",
        "/images/icons/icon-512x512.png",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl WorkerConfig {
    /// Load a configuration from a JSON file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ElegantoError> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ElegantoError> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(ElegantoError::config(format!(
                "origin must be http(s), got {}",
                self.origin
            )));
        }
        if self.cache_prefix.is_empty() {
            return Err(ElegantoError::config("cache_prefix must not be empty"));
        }
        if self.api_marker.is_empty() {
            return Err(ElegantoError::config("api_marker must not be empty"));
        }
        for path in self.static_assets.iter().chain([&self.offline_page, &self.placeholder_image]) {
            self.resolve(path)?;
        }
        Ok(())
    }

    /// Resolve a site path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ElegantoError> {
        self.origin
            .join(path)
            .map_err(|e| ElegantoError::config_with_source(format!("bad path {}", path), e))
    }

    /// Fetch timeout, if configured.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    /// Location of the submission queue database.
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("pending_submissions.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.cache_prefix, "royal-eleganto");
        assert_eq!(config.static_assets.len(), 20);
        assert!(config.static_assets.contains(&"/offline.html".to_string()));
        assert!(config.fetch_timeout().is_none());
        assert!(config.skip_waiting_on_install);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"origin": "https://royaleleganto.example/", "cache_version": 3, "fetch_timeout_ms": 2500,
                "notifications": {{"title": "Eleganto"}}}}"#
        )
        .unwrap();

        let config = WorkerConfig::load(file.path()).unwrap();
        assert_eq!(config.origin.as_str(), "https://royaleleganto.example/");
        assert_eq!(config.cache_version, 3);
        assert_eq!(config.fetch_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.notifications.title, "Eleganto");
        assert_eq!(config.notifications.body, "You have a new notification");
        assert_eq!(config.sync_tag, "contact-form-sync");
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = WorkerConfig::load(file.path()).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_load_missing_file() {
        let err = WorkerConfig::load("/definitely/not/here.json").unwrap_err();
        assert_eq!(err.category(), "io");
    }

    #[test]
    fn test_rejects_non_http_origin() {
        let config = WorkerConfig {
            origin: Url::parse("file:///srv/site/").unwrap(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve() {
        let config = WorkerConfig::default();
        let url = config.resolve("/styles/main.css").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/styles/main.css");
        assert_eq!(
            config.queue_path().file_name().unwrap(),
            "pending_submissions.db"
        );
    }
}
