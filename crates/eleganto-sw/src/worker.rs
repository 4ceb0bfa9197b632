//! The offline worker: owns every component and routes events to them.

use std::sync::Arc;

use eleganto_cache::CacheStorage;
use eleganto_net::{Fetcher, Request};
use eleganto_queue::SubmissionStore;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::background::{LoggingSink, SubmissionSink};
use crate::classify::RequestClassifier;
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::events::{EventOutcome, ExtendableEvent, FetchOutcome, WorkerEvent};
use crate::lifecycle::{ActivationReport, LifecycleManager, Registration, ServiceWorker, ServiceWorkerId, ServiceWorkerState};
use crate::notifications::Notifications;
use crate::registry::CacheRegistry;
use crate::strategy::{Fallbacks, StrategyExecutor};
use crate::tasks::BackgroundTasks;
use crate::WorkerError;

/// A running worker for one site origin.
pub struct OfflineWorker {
    pub(crate) config: WorkerConfig,
    classifier: RequestClassifier,
    executor: StrategyExecutor,
    lifecycle: LifecycleManager,
    caches: Arc<CacheStorage>,
    registration: RwLock<Registration>,
    pub(crate) clients: RwLock<Clients>,
    pub(crate) notifications: RwLock<Notifications>,
    pub(crate) queue: Arc<dyn SubmissionStore>,
    pub(crate) sink: Arc<dyn SubmissionSink>,
    pub(crate) sync_lock: Mutex<()>,
    tasks: Arc<BackgroundTasks>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl OfflineWorker {
    /// Create a worker. The receiver carries events for the host.
    pub fn new(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        queue: Arc<dyn SubmissionStore>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), WorkerError> {
        Self::with_sink(config, fetcher, queue, Arc::new(LoggingSink))
    }

    /// Create a worker with a custom submission side effect.
    pub fn with_sink(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        queue: Arc<dyn SubmissionStore>,
        sink: Arc<dyn SubmissionSink>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), WorkerError> {
        config.validate()?;

        let caches = Arc::new(match config.max_entries_per_cache {
            Some(limit) => CacheStorage::with_entry_limit(limit),
            None => CacheStorage::new(),
        });
        let tasks = Arc::new(BackgroundTasks::new());
        let fallbacks = Fallbacks {
            offline_page: config.resolve(&config.offline_page)?,
            placeholder_image: config.resolve(&config.placeholder_image)?,
        };

        let executor = StrategyExecutor::new(
            Arc::clone(&fetcher),
            Arc::clone(&caches),
            Arc::clone(&tasks),
            config.fetch_timeout(),
            fallbacks,
        );
        let lifecycle = LifecycleManager::new(fetcher, Arc::clone(&caches), config.fetch_timeout());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = Self {
            classifier: RequestClassifier::new(config.api_marker.clone()),
            registration: RwLock::new(Registration::new(config.origin.clone())),
            executor,
            lifecycle,
            caches,
            clients: RwLock::new(Clients::new()),
            notifications: RwLock::new(Notifications::new()),
            queue,
            sink,
            sync_lock: Mutex::new(()),
            tasks,
            event_tx,
            config,
        };
        Ok((worker, event_rx))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn caches(&self) -> &Arc<CacheStorage> {
        &self.caches
    }

    pub fn clients(&self) -> &RwLock<Clients> {
        &self.clients
    }

    pub fn notifications(&self) -> &RwLock<Notifications> {
        &self.notifications
    }

    pub fn queue(&self) -> &Arc<dyn SubmissionStore> {
        &self.queue
    }

    /// The active version, if any.
    pub async fn active(&self) -> Option<ServiceWorker> {
        self.registration.read().await.active.clone()
    }

    /// The version waiting to activate, if any.
    pub async fn waiting(&self) -> Option<ServiceWorker> {
        self.registration.read().await.waiting.clone()
    }

    pub(crate) fn emit(&self, event: WorkerEvent) {
        // The host may have dropped its receiver; events are informational.
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, worker: &ServiceWorker) {
        self.emit(WorkerEvent::StateChange {
            worker_id: worker.id,
            version: worker.version,
            new_state: worker.state,
        });
    }

    /// Route an event to its handler.
    pub async fn dispatch(&self, event: ExtendableEvent) -> Result<EventOutcome, WorkerError> {
        debug!(event = event.name(), "Dispatching event");

        match event {
            ExtendableEvent::Install { version } => {
                let version = version.unwrap_or(self.config.cache_version);
                let (worker_id, activation) = self.install_version(version).await?;
                Ok(EventOutcome::Installed {
                    worker_id,
                    version,
                    activation,
                })
            }
            ExtendableEvent::Activate => Ok(EventOutcome::Activated(self.activate().await?)),
            ExtendableEvent::Fetch(request) => Ok(EventOutcome::Fetch(self.handle_fetch(&request).await)),
            ExtendableEvent::Sync { tag } => Ok(EventOutcome::Synced(self.handle_sync(&tag).await?)),
            ExtendableEvent::Push { data } => Ok(EventOutcome::NotificationShown(
                self.handle_push(data.as_deref()).await,
            )),
            ExtendableEvent::NotificationClick { notification_id } => Ok(EventOutcome::NotificationHandled(
                self.handle_notification_click(notification_id).await?,
            )),
            ExtendableEvent::Message { data } => Ok(EventOutcome::Message(self.handle_message(&data).await?)),
        }
    }

    /// Install the configured cache version.
    pub async fn install(&self) -> Result<(ServiceWorkerId, Option<ActivationReport>), WorkerError> {
        self.install_version(self.config.cache_version).await
    }

    /// Install `version`: precache the static assets into its static cache.
    ///
    /// On failure the new version is discarded and the active version, if
    /// any, keeps serving. On success the version waits, or activates right
    /// away when `skip_waiting_on_install` is set.
    pub async fn install_version(
        &self,
        version: u32,
    ) -> Result<(ServiceWorkerId, Option<ActivationReport>), WorkerError> {
        let registry = CacheRegistry::new(self.config.cache_prefix.clone(), version);
        let assets = self
            .config
            .static_assets
            .iter()
            .map(|path| self.config.resolve(path))
            .collect::<Result<Vec<Url>, _>>()?;

        let (worker, superseded) = self.registration.write().await.begin_install(registry.clone());
        if let Some(old) = superseded {
            self.emit_state(&old);
        }
        info!(worker = worker.id.raw(), version, "Installing");
        self.emit_state(&worker);

        if let Err(e) = self.precache(&worker, &registry, &assets).await {
            error!(context = "install", version, category = e.category(), error = %e, "Install failed");
            let reason = e.to_string();
            if let Ok(failed) = self.registration.write().await.install_failed(worker.id, &reason) {
                self.emit_state(&failed);
            }
            return Err(e);
        }

        let replaced = self.registration.write().await.install_complete(worker.id)?;
        if let Some(old) = replaced {
            self.emit_state(&old);
        }
        self.emit(WorkerEvent::StateChange {
            worker_id: worker.id,
            version,
            new_state: ServiceWorkerState::Installed,
        });
        info!(worker = worker.id.raw(), version, "Installed");

        let activation = if self.config.skip_waiting_on_install {
            self.skip_waiting().await?
        } else {
            None
        };
        Ok((worker.id, activation))
    }

    // The registration read guard is held across the write so a newer
    // install cannot take the slot between the check and the cache write.
    async fn precache(
        &self,
        worker: &ServiceWorker,
        registry: &CacheRegistry,
        assets: &[Url],
    ) -> Result<usize, WorkerError> {
        let pairs = self.lifecycle.fetch_assets(registry, assets).await?;

        let registration = self.registration.read().await;
        if !registration.is_installing(worker.id) {
            return Err(WorkerError::InstallFailed {
                version: worker.version,
                reason: "superseded by a newer install".to_string(),
            });
        }
        self.lifecycle.store_assets(registry, pairs).await
    }

    /// Activate the waiting version immediately. `None` when nothing waits.
    pub async fn skip_waiting(&self) -> Result<Option<ActivationReport>, WorkerError> {
        let Some(worker) = self.registration.write().await.begin_activation() else {
            debug!("No waiting worker to activate");
            return Ok(None);
        };
        self.run_activation(worker).await.map(Some)
    }

    /// Activate the waiting version. With nothing waiting, re-applies the
    /// active version's cache set, which deletes nothing the second time.
    pub async fn activate(&self) -> Result<Option<ActivationReport>, WorkerError> {
        if let Some(report) = self.skip_waiting().await? {
            return Ok(Some(report));
        }

        let Some(active) = self.active().await else {
            return Ok(None);
        };
        let deleted = self.retire_caches(&active.registry).await;
        let kept = self.lifecycle.open_caches(&active.registry).await;
        let claimed = self.claim_clients(active.id).await;
        Ok(Some(ActivationReport {
            worker_id: active.id,
            version: active.version,
            deleted,
            kept,
            claimed,
        }))
    }

    async fn run_activation(&self, worker: ServiceWorker) -> Result<ActivationReport, WorkerError> {
        info!(worker = worker.id.raw(), version = worker.version, "Activating");
        self.emit_state(&worker);

        // Old caches go before any client is claimed.
        let deleted = self.retire_caches(&worker.registry).await;
        let kept = self.lifecycle.open_caches(&worker.registry).await;

        let previous = self.registration.write().await.finish_activation(worker.id)?;
        if let Some(old) = previous {
            self.emit_state(&old);
        }
        self.emit(WorkerEvent::StateChange {
            worker_id: worker.id,
            version: worker.version,
            new_state: ServiceWorkerState::Activated,
        });

        let claimed = self.claim_clients(worker.id).await;
        info!(
            worker = worker.id.raw(),
            version = worker.version,
            deleted = deleted.len(),
            claimed = claimed.len(),
            "Activated"
        );

        Ok(ActivationReport {
            worker_id: worker.id,
            version: worker.version,
            deleted,
            kept,
            claimed,
        })
    }

    async fn retire_caches(&self, registry: &CacheRegistry) -> Vec<String> {
        let deleted = self.lifecycle.purge_stale_caches(registry).await;
        for name in &deleted {
            self.emit(WorkerEvent::CacheDeleted { name: name.clone() });
        }
        deleted
    }

    async fn claim_clients(&self, worker_id: ServiceWorkerId) -> Vec<String> {
        let claimed = self.clients.write().await.claim(worker_id);
        for client_id in &claimed {
            self.emit(WorkerEvent::ControllerChange {
                client_id: client_id.clone(),
                worker_id,
            });
        }
        claimed
    }

    /// Resolve a request the page made.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        let Some(route) = self.classifier.classify(request) else {
            return FetchOutcome::Passthrough;
        };
        let Some(registry) = self.registration.read().await.active_registry() else {
            debug!(url = %request.url, "No active worker, passing through");
            return FetchOutcome::Passthrough;
        };

        match self.executor.execute(request, route, &registry).await {
            Ok(resolved) => FetchOutcome::Respond(resolved),
            Err(e) => {
                warn!(context = "fetch", url = %request.url, error = %e, "Request failed");
                FetchOutcome::NetworkError(e.to_string())
            }
        }
    }

    /// Wait for every background revalidation to finish.
    pub async fn wait_for_background(&self) {
        self.tasks.wait_idle().await;
    }

    /// Stop background work and retire every version.
    pub async fn terminate(&self) {
        self.tasks.abort_all().await;
        let retired = self.registration.write().await.unregister();
        for worker in &retired {
            self.emit_state(worker);
        }
        info!(retired = retired.len(), "Worker terminated");
    }
}
