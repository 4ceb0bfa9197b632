//! # Eleganto Service Worker
//!
//! Offline request-caching worker for the Royal Eleganto site.
//!
//! ## Features
//!
//! - **Cache registry**: one versioned cache per content role
//! - **Routing**: every GET request is classified into a role and a strategy
//! - **Strategies**: cache-first, network-first, network-first with an offline
//!   page, stale-while-revalidate
//! - **Lifecycle**: all-or-nothing install, activation that retires older
//!   cache generations before claiming pages
//! - **Background events**: form submission replay, push notifications,
//!   notification clicks, `skipWaiting` messages
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker
//!     ├── RequestClassifier ── Route { role, strategy }
//!     ├── StrategyExecutor ─┬─ Fetcher (network)
//!     │                     ├─ CacheStorage ("royal-eleganto-{role}-v{n}")
//!     │                     └─ BackgroundTasks (revalidation)
//!     ├── Registration
//!     │       ├── installing / waiting / active (ServiceWorker)
//!     │       └── LifecycleManager (precache, purge)
//!     ├── Clients, Notifications
//!     └── SubmissionStore ── SubmissionSink (sync replay)
//! ```

use eleganto_cache::CacheError;
use eleganto_common::ElegantoError;
use eleganto_net::NetError;
use eleganto_queue::QueueError;
use thiserror::Error;

pub mod background;
pub mod classify;
pub mod clients;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod notifications;
pub mod registry;
pub mod strategy;
pub mod tasks;
pub mod worker;

pub use background::{LoggingSink, SubmissionError, SubmissionSink, SyncReport};
pub use classify::{RequestClassifier, Route, Strategy};
pub use clients::{Client, ClientType, Clients};
pub use config::{NotificationDefaults, WorkerConfig};
pub use events::{ClickAction, EventOutcome, ExtendableEvent, FetchOutcome, MessageAction, WorkerEvent};
pub use lifecycle::{ActivationReport, ServiceWorker, ServiceWorkerId, ServiceWorkerState};
pub use notifications::{Notification, NotificationId};
pub use registry::{CacheId, CacheRegistry, CacheRole};
pub use strategy::{Resolved, ResponseSource};
pub use worker::OfflineWorker;

/// Errors surfaced by the worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Install of version {version} failed: {reason}")]
    InstallFailed { version: u32, reason: String },

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Common(#[from] ElegantoError),

    /// A blocking storage call panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl WorkerError {
    /// Short category name for logging.
    pub fn category(&self) -> &'static str {
        match self {
            WorkerError::InstallFailed { .. } => "install",
            WorkerError::StateError(_) => "state",
            WorkerError::NotFound(_) => "not_found",
            WorkerError::Net(_) => "network",
            WorkerError::Cache(_) => "cache",
            WorkerError::Queue(_) => "storage",
            WorkerError::Common(e) => e.category(),
            WorkerError::Task(_) => "task",
        }
    }
}
