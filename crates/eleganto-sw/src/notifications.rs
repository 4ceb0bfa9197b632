//! Notifications shown by the worker.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// Unique identifier for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// What to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOptions {
    pub title: String,
    pub body: String,
    pub icon: Url,
    pub badge: Url,

    /// Page opened when the notification is clicked.
    pub url: Url,
}

/// A notification currently on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub icon: Url,
    pub badge: Url,
    pub url: Url,
}

/// Notifications on screen.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: HashMap<NotificationId, Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&mut self, options: NotificationOptions) -> Notification {
        let notification = Notification {
            id: NotificationId::next(),
            title: options.title,
            body: options.body,
            icon: options.icon,
            badge: options.badge,
            url: options.url,
        };
        self.shown.insert(notification.id, notification.clone());
        notification
    }

    /// Close a notification, returning it if it was shown.
    pub fn close(&mut self, id: NotificationId) -> Option<Notification> {
        self.shown.remove(&id)
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.get(&id)
    }

    /// Shown notifications, oldest first.
    pub fn list(&self) -> Vec<&Notification> {
        let mut list: Vec<&Notification> = self.shown.values().collect();
        list.sort_by_key(|n| n.id.raw());
        list
    }

    pub fn len(&self) -> usize {
        self.shown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}
