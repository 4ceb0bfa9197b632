//! Events delivered to the worker and events it reports back to the host.

use bytes::Bytes;
use eleganto_net::Request;
use serde_json::Value as JsonValue;

use crate::background::SyncReport;
use crate::lifecycle::{ActivationReport, ServiceWorkerId, ServiceWorkerState};
use crate::notifications::{Notification, NotificationId};
use crate::strategy::Resolved;

/// An event the host delivers to the worker.
#[derive(Debug, Clone)]
pub enum ExtendableEvent {
    /// Install a version. `None` installs the configured cache version.
    Install { version: Option<u32> },
    Activate,
    Fetch(Request),
    Sync { tag: String },
    Push { data: Option<Bytes> },
    NotificationClick { notification_id: NotificationId },
    Message { data: JsonValue },
}

impl ExtendableEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ExtendableEvent::Install { .. } => "install",
            ExtendableEvent::Activate => "activate",
            ExtendableEvent::Fetch(_) => "fetch",
            ExtendableEvent::Sync { .. } => "sync",
            ExtendableEvent::Push { .. } => "push",
            ExtendableEvent::NotificationClick { .. } => "notificationclick",
            ExtendableEvent::Message { .. } => "message",
        }
    }
}

/// Result of a fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The worker did not handle the request; the host fetches it itself.
    Passthrough,
    Respond(Resolved),
    /// Neither network nor caches could answer.
    NetworkError(String),
}

impl FetchOutcome {
    pub fn resolved(&self) -> Option<&Resolved> {
        match self {
            FetchOutcome::Respond(resolved) => Some(resolved),
            _ => None,
        }
    }
}

/// Result of a dispatched event.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed {
        worker_id: ServiceWorkerId,
        version: u32,
        activation: Option<ActivationReport>,
    },
    Activated(Option<ActivationReport>),
    Fetch(FetchOutcome),
    Synced(SyncReport),
    NotificationShown(Notification),
    NotificationHandled(ClickAction),
    Message(MessageAction),
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    Focused { client_id: String },
    Opened { client_id: String },
}

/// What a control message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageAction {
    /// A waiting version was activated.
    SkippedWaiting(ActivationReport),
    /// `skipWaiting` arrived with nothing waiting.
    NothingWaiting,
    Ignored,
}

/// Events reported to the host.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    StateChange {
        worker_id: ServiceWorkerId,
        version: u32,
        new_state: ServiceWorkerState,
    },
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    CacheDeleted {
        name: String,
    },
    NotificationShown(Notification),
    NotificationClosed {
        notification_id: NotificationId,
    },
    ClientFocused {
        client_id: String,
    },
    WindowOpened {
        client_id: String,
        url: url::Url,
    },
}
