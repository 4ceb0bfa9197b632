//! Worker versions, their registration slots, and the install/activate steps
//! that populate and retire caches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eleganto_cache::CacheStorage;
use eleganto_net::{Fetcher, Request, Response};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::registry::{CacheRegistry, CacheRole};
use crate::strategy::fetch;
use crate::WorkerError;

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker version state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Install step running.
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Activate step running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// One version of the worker.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    pub version: u32,
    pub registry: CacheRegistry,
    pub state: ServiceWorkerState,

    /// Why the worker became redundant, if it failed.
    pub error: Option<String>,

    pub state_changed_at: Instant,
}

impl ServiceWorker {
    pub fn new(registry: CacheRegistry) -> Self {
        Self {
            id: ServiceWorkerId::next(),
            version: registry.version(),
            registry,
            state: ServiceWorkerState::Installing,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    pub fn set_state(&mut self, state: ServiceWorkerState) {
        debug!(worker = self.id.raw(), version = self.version, from = ?self.state, to = ?state, "Worker state change");
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// The installing, waiting and active slots of the site's worker.
#[derive(Debug)]
pub struct Registration {
    pub scope: Url,
    pub installing: Option<ServiceWorker>,
    pub waiting: Option<ServiceWorker>,
    pub active: Option<ServiceWorker>,
}

impl Registration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Registry of the active version, if one is active.
    pub fn active_registry(&self) -> Option<CacheRegistry> {
        self.active.as_ref().map(|w| w.registry.clone())
    }

    /// Start installing a new version. A version already installing is
    /// superseded and returned as redundant.
    pub fn begin_install(&mut self, registry: CacheRegistry) -> (ServiceWorker, Option<ServiceWorker>) {
        let superseded = self.installing.take().map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        });
        let worker = ServiceWorker::new(registry);
        self.installing = Some(worker.clone());
        (worker, superseded)
    }

    /// Move the installing worker `id` to waiting. A previously waiting
    /// worker becomes redundant and is returned.
    pub fn install_complete(&mut self, id: ServiceWorkerId) -> Result<Option<ServiceWorker>, WorkerError> {
        let mut worker = self.take_installing(id)?;
        worker.set_state(ServiceWorkerState::Installed);

        let replaced = self.waiting.replace(worker).map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        });
        Ok(replaced)
    }

    /// Discard the installing worker `id`.
    pub fn install_failed(&mut self, id: ServiceWorkerId, reason: &str) -> Result<ServiceWorker, WorkerError> {
        let mut worker = self.take_installing(id)?;
        worker.error = Some(reason.to_string());
        worker.set_state(ServiceWorkerState::Redundant);
        Ok(worker)
    }

    /// Whether `id` still holds the installing slot.
    pub fn is_installing(&self, id: ServiceWorkerId) -> bool {
        self.installing.as_ref().is_some_and(|w| w.id == id)
    }

    fn take_installing(&mut self, id: ServiceWorkerId) -> Result<ServiceWorker, WorkerError> {
        match self.installing.take() {
            Some(worker) if worker.id == id => Ok(worker),
            other => {
                self.installing = other;
                Err(WorkerError::StateError(format!(
                    "worker {} is not installing",
                    id.raw()
                )))
            }
        }
    }

    /// Mark the waiting worker as activating and return a copy of it.
    pub fn begin_activation(&mut self) -> Option<ServiceWorker> {
        let worker = self.waiting.as_mut()?;
        if worker.state != ServiceWorkerState::Installed {
            return None;
        }
        worker.set_state(ServiceWorkerState::Activating);
        Some(worker.clone())
    }

    /// Promote the activating worker `id` to active. Returns the previously
    /// active worker, now redundant.
    pub fn finish_activation(&mut self, id: ServiceWorkerId) -> Result<Option<ServiceWorker>, WorkerError> {
        let mut worker = match self.waiting.take() {
            Some(worker) if worker.id == id && worker.state == ServiceWorkerState::Activating => worker,
            other => {
                self.waiting = other;
                return Err(WorkerError::StateError(format!(
                    "worker {} is not activating",
                    id.raw()
                )));
            }
        };

        worker.set_state(ServiceWorkerState::Activated);
        let previous = self.active.replace(worker).map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        });
        Ok(previous)
    }

    /// Retire every version. Returns the workers that were retired.
    pub fn unregister(&mut self) -> Vec<ServiceWorker> {
        [self.installing.take(), self.waiting.take(), self.active.take()]
            .into_iter()
            .flatten()
            .map(|mut worker| {
                worker.set_state(ServiceWorkerState::Redundant);
                worker
            })
            .collect()
    }
}

/// Summary of one activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub worker_id: ServiceWorkerId,
    pub version: u32,

    /// Caches deleted because they belong to another version.
    pub deleted: Vec<String>,

    /// Caches alive after activation.
    pub kept: Vec<String>,

    /// Clients whose controller changed.
    pub claimed: Vec<String>,
}

/// Cache work of the install and activate steps.
pub struct LifecycleManager {
    fetcher: Arc<dyn Fetcher>,
    caches: Arc<CacheStorage>,
    fetch_timeout: Option<Duration>,
}

impl LifecycleManager {
    pub fn new(fetcher: Arc<dyn Fetcher>, caches: Arc<CacheStorage>, fetch_timeout: Option<Duration>) -> Self {
        Self {
            fetcher,
            caches,
            fetch_timeout,
        }
    }

    /// Fetch every asset for the registry's static cache. Nothing is written.
    ///
    /// One failed fetch or non-2xx response fails the whole set.
    pub async fn fetch_assets(
        &self,
        registry: &CacheRegistry,
        assets: &[Url],
    ) -> Result<Vec<(Request, Response)>, WorkerError> {
        info!(cache = %registry.id(CacheRole::Static), assets = assets.len(), "Fetching static assets");

        let fetches = assets.iter().map(|url| self.fetch_asset(url.clone()));
        try_join_all(fetches).await.map_err(|reason| WorkerError::InstallFailed {
            version: registry.version(),
            reason,
        })
    }

    /// Store fetched assets in the registry's static cache, all or none.
    pub async fn store_assets(
        &self,
        registry: &CacheRegistry,
        pairs: Vec<(Request, Response)>,
    ) -> Result<usize, WorkerError> {
        let cache = registry.id(CacheRole::Static);
        let count = pairs.len();
        self.caches
            .put_all(cache.name(), pairs)
            .await
            .map_err(|e| WorkerError::InstallFailed {
                version: registry.version(),
                reason: e.to_string(),
            })?;

        info!(cache = %cache, entries = count, "Static assets cached");
        Ok(count)
    }

    async fn fetch_asset(&self, url: Url) -> Result<(Request, Response), String> {
        let request = Request::get(url);
        let response = fetch(self.fetcher.as_ref(), &request, self.fetch_timeout)
            .await
            .map_err(|e| format!("{}: {}", request.url, e))?;

        if !response.ok() {
            return Err(format!("{}: status {}", request.url, response.status));
        }
        Ok((request, response))
    }

    /// Delete every cache outside the registry's identifier set.
    pub async fn purge_stale_caches(&self, registry: &CacheRegistry) -> Vec<String> {
        let mut deleted = Vec::new();
        for name in self.caches.keys().await {
            if registry.contains(&name) {
                continue;
            }
            if self.caches.delete(&name).await {
                info!(cache = %name, "Deleting old cache");
                deleted.push(name);
            } else {
                warn!(cache = %name, "Cache vanished before it could be deleted");
            }
        }
        deleted
    }

    /// Make sure every cache of the registry exists.
    pub async fn open_caches(&self, registry: &CacheRegistry) -> Vec<String> {
        let names = registry.names();
        for name in &names {
            self.caches.open(name).await;
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(version: u32) -> CacheRegistry {
        CacheRegistry::new("royal-eleganto", version)
    }

    #[test]
    fn test_install_then_activate() {
        let scope = Url::parse("https://royaleleganto.example/").unwrap();
        let mut registration = Registration::new(scope);

        let (worker, superseded) = registration.begin_install(registry(1));
        assert!(superseded.is_none());
        assert_eq!(worker.state, ServiceWorkerState::Installing);

        assert!(registration.install_complete(worker.id).unwrap().is_none());
        assert_eq!(
            registration.waiting.as_ref().unwrap().state,
            ServiceWorkerState::Installed
        );

        let activating = registration.begin_activation().unwrap();
        assert_eq!(activating.state, ServiceWorkerState::Activating);
        assert!(registration.finish_activation(activating.id).unwrap().is_none());

        let active = registration.get_active().unwrap();
        assert!(active.is_active());
        assert_eq!(registration.active_registry(), Some(registry(1)));
        assert!(registration.waiting.is_none());
    }

    #[test]
    fn test_activation_retires_previous() {
        let scope = Url::parse("https://royaleleganto.example/").unwrap();
        let mut registration = Registration::new(scope);

        for version in [1, 2] {
            let (worker, _) = registration.begin_install(registry(version));
            registration.install_complete(worker.id).unwrap();
            let activating = registration.begin_activation().unwrap();
            let previous = registration.finish_activation(activating.id).unwrap();
            if version == 2 {
                let previous = previous.unwrap();
                assert_eq!(previous.version, 1);
                assert!(previous.is_redundant());
            }
        }

        assert_eq!(registration.get_active().unwrap().version, 2);
    }

    #[test]
    fn test_failed_install_keeps_active() {
        let scope = Url::parse("https://royaleleganto.example/").unwrap();
        let mut registration = Registration::new(scope);

        let (v1, _) = registration.begin_install(registry(1));
        registration.install_complete(v1.id).unwrap();
        let activating = registration.begin_activation().unwrap();
        registration.finish_activation(activating.id).unwrap();

        let (v2, _) = registration.begin_install(registry(2));
        let failed = registration.install_failed(v2.id, "boom").unwrap();
        assert!(failed.is_redundant());
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(registration.active_registry(), Some(registry(1)));
        assert!(registration.installing.is_none());
    }

    #[test]
    fn test_stale_ids_are_rejected() {
        let scope = Url::parse("https://royaleleganto.example/").unwrap();
        let mut registration = Registration::new(scope);

        let (first, _) = registration.begin_install(registry(1));
        assert!(registration.is_installing(first.id));
        let (second, superseded) = registration.begin_install(registry(2));
        assert_eq!(superseded.unwrap().id, first.id);
        assert!(!registration.is_installing(first.id));

        assert!(registration.install_complete(first.id).is_err());
        assert!(registration.installing.is_some());
        registration.install_complete(second.id).unwrap();
        assert!(registration.finish_activation(second.id).is_err());
    }

    #[test]
    fn test_unregister() {
        let scope = Url::parse("https://royaleleganto.example/").unwrap();
        let mut registration = Registration::new(scope);
        let (worker, _) = registration.begin_install(registry(1));
        registration.install_complete(worker.id).unwrap();

        let retired = registration.unregister();
        assert_eq!(retired.len(), 1);
        assert!(retired[0].is_redundant());
        assert!(registration.waiting.is_none());
    }
}
