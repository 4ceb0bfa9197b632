//! Background sync, push, notification-click and message handlers.

use std::sync::Arc;

use async_trait::async_trait;
use eleganto_queue::{PendingSubmission, SubmissionId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::events::{ClickAction, MessageAction, WorkerEvent};
use crate::notifications::{Notification, NotificationId, NotificationOptions};
use crate::worker::OfflineWorker;
use crate::WorkerError;

/// Control message action that activates the waiting version.
pub const SKIP_WAITING: &str = "skipWaiting";

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("submission endpoint unavailable: {0}")]
    Unavailable(String),
}

/// Side effect run for every replayed submission.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn submit(&self, submission: &PendingSubmission) -> Result<(), SubmissionError>;
}

/// Sink that only logs. The site has no backend, so replaying a submission
/// means recording it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl SubmissionSink for LoggingSink {
    async fn submit(&self, submission: &PendingSubmission) -> Result<(), SubmissionError> {
        info!(id = submission.id, queued_at = %submission.timestamp, "Submitting queued form");
        Ok(())
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Submitted and removed from the queue.
    pub processed: Vec<SubmissionId>,

    /// Still queued.
    pub failed: Vec<SubmissionId>,
}

/// Push payload. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    icon: Option<String>,
    url: Option<String>,
}

impl PushPayload {
    fn parse(data: Option<&[u8]>) -> Self {
        let Some(data) = data else {
            return Self::default();
        };
        match serde_json::from_slice(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(context = "push payload", error = %e, "Malformed push payload, using defaults");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ControlMessage {
    action: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl OfflineWorker {
    /// Replay queued submissions for `tag`. Other tags are ignored.
    ///
    /// Each entry is submitted, then removed, then acknowledged with a
    /// notification. A failing entry stays queued and the pass continues.
    /// Passes run one at a time; an entry another pass already removed is
    /// neither reported nor acknowledged again.
    pub async fn handle_sync(&self, tag: &str) -> Result<SyncReport, WorkerError> {
        if tag != self.config.sync_tag {
            debug!(tag, "Ignoring sync tag");
            return Ok(SyncReport::default());
        }

        let _pass = self.sync_lock.lock().await;
        let queue = Arc::clone(&self.queue);
        let pending = tokio::task::spawn_blocking(move || queue.pending()).await??;
        info!(count = pending.len(), "Replaying queued submissions");

        let mut report = SyncReport::default();
        for submission in pending {
            if let Err(e) = self.sink.submit(&submission).await {
                warn!(context = "background sync", id = submission.id, error = %e, "Submission failed");
                report.failed.push(submission.id);
                continue;
            }

            match self.dequeue(submission.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(id = submission.id, "Submission already dequeued");
                    continue;
                }
                Err(e) => {
                    warn!(context = "background sync", id = submission.id, category = e.category(), error = %e, "Could not dequeue submission");
                    report.failed.push(submission.id);
                    continue;
                }
            }

            let defaults = &self.config.notifications;
            self.show_notification(
                defaults.sync_title.clone(),
                defaults.sync_body.clone(),
                None,
                None,
            )
            .await;
            report.processed.push(submission.id);
        }

        info!(processed = report.processed.len(), failed = report.failed.len(), "Sync pass finished");
        Ok(report)
    }

    async fn dequeue(&self, id: SubmissionId) -> Result<bool, WorkerError> {
        let queue = Arc::clone(&self.queue);
        Ok(tokio::task::spawn_blocking(move || queue.remove(id)).await??)
    }

    /// Show a notification for a push message, filling gaps with defaults.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Notification {
        let payload = PushPayload::parse(data);
        let defaults = &self.config.notifications;

        let title = non_empty(payload.title).unwrap_or_else(|| defaults.title.clone());
        let body = non_empty(payload.body).unwrap_or_else(|| defaults.body.clone());

        self.show_notification(title, body, non_empty(payload.icon), non_empty(payload.url))
            .await
    }

    /// Close the clicked notification and bring its page to the front,
    /// focusing an open window at that URL or opening a new one.
    pub async fn handle_notification_click(&self, id: NotificationId) -> Result<ClickAction, WorkerError> {
        let notification = self
            .notifications
            .write()
            .await
            .close(id)
            .ok_or_else(|| WorkerError::NotFound(format!("notification {}", id.raw())))?;
        self.emit(WorkerEvent::NotificationClosed { notification_id: id });

        let target = notification.url;
        let mut clients = self.clients.write().await;

        if let Some(client_id) = clients.find_window(&target) {
            if let Some(client) = clients.get_mut(&client_id) {
                client.focus()?;
                debug!(client = %client_id, url = %target, "Focused existing window");
                self.emit(WorkerEvent::ClientFocused {
                    client_id: client_id.clone(),
                });
                return Ok(ClickAction::Focused { client_id });
            }
        }

        let client = clients.open_window(target.clone());
        debug!(client = %client.id, url = %target, "Opened window");
        self.emit(WorkerEvent::WindowOpened {
            client_id: client.id.clone(),
            url: target,
        });
        Ok(ClickAction::Opened { client_id: client.id })
    }

    /// Handle a cross-context message. Only `{"action": "skipWaiting"}` does
    /// anything.
    pub async fn handle_message(&self, data: &JsonValue) -> Result<MessageAction, WorkerError> {
        let action = serde_json::from_value::<ControlMessage>(data.clone())
            .ok()
            .and_then(|m| m.action);

        match action.as_deref() {
            Some(SKIP_WAITING) => match self.skip_waiting().await? {
                Some(report) => Ok(MessageAction::SkippedWaiting(report)),
                None => Ok(MessageAction::NothingWaiting),
            },
            other => {
                debug!(action = ?other, "Ignoring message");
                Ok(MessageAction::Ignored)
            }
        }
    }

    pub(crate) async fn show_notification(
        &self,
        title: String,
        body: String,
        icon: Option<String>,
        url: Option<String>,
    ) -> Notification {
        let defaults = &self.config.notifications;
        let options = NotificationOptions {
            title,
            body,
            icon: self.resolve_or_default(icon.as_deref(), &defaults.icon),
            badge: self.resolve_or_default(None, &defaults.badge),
            url: self.resolve_or_default(url.as_deref(), &defaults.url),
        };

        let notification = self.notifications.write().await.show(options);
        info!(id = notification.id.raw(), title = %notification.title, "Notification shown");
        self.emit(WorkerEvent::NotificationShown(notification.clone()));
        notification
    }

    // Resolve against the origin, falling back to the default path and then to
    // the origin itself.
    fn resolve_or_default(&self, value: Option<&str>, default: &str) -> Url {
        value
            .and_then(|v| match self.config.resolve(v) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(context = "notification url", value = v, error = %e, "Unresolvable URL, using default");
                    None
                }
            })
            .or_else(|| self.config.resolve(default).ok())
            .unwrap_or_else(|| self.config.origin.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_payload_parse() {
        let payload = PushPayload::parse(Some(br#"{"title": "Bridal week", "url": "/services.html"}"#.as_slice()));
        assert_eq!(payload.title.as_deref(), Some("Bridal week"));
        assert_eq!(payload.url.as_deref(), Some("/services.html"));
        assert!(payload.body.is_none());
    }

    #[test]
    fn test_push_payload_malformed() {
        let payload = PushPayload::parse(Some(b"not json at all".as_slice()));
        assert!(payload.title.is_none());

        let payload = PushPayload::parse(None);
        assert!(payload.icon.is_none());
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some("x".to_string())), Some("x".to_string()));
    }
}
