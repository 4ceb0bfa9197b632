//! # Eleganto Queue
//!
//! Durable queue of form submissions made while the site was offline.
//!
//! The contact form (outside this workspace) enqueues a submission when it
//! cannot reach the network; the worker's sync handler drains the queue once
//! connectivity returns, removing each entry after it has been processed.
//!
//! Two stores implement [`SubmissionStore`]:
//!
//! - [`SqliteSubmissionStore`]: persisted in a SQLite database file
//! - [`MemorySubmissionStore`]: process-local, for tests and ephemeral runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

mod database;
mod memory;

pub use database::SqliteSubmissionStore;
pub use memory::MemorySubmissionStore;

/// Queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue lock poisoned")]
    LockPoisoned,

    #[error("Migration error: {0}")]
    Migration(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Identifier of a pending submission.
pub type SubmissionId = i64;

/// A form submission waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub id: SubmissionId,
    pub payload: JsonValue,
    pub timestamp: DateTime<Utc>,
}

/// Storage for pending submissions.
///
/// `pending` returns entries in insertion order. `remove` is the commit
/// point: once it returns `Ok(true)` the entry will never be returned again.
pub trait SubmissionStore: Send + Sync {
    /// Queue a payload, assigning it an id and timestamp.
    fn enqueue(&self, payload: JsonValue) -> QueueResult<PendingSubmission>;

    /// All queued submissions, oldest first.
    fn pending(&self) -> QueueResult<Vec<PendingSubmission>>;

    /// Remove a submission. Returns whether it was present.
    fn remove(&self, id: SubmissionId) -> QueueResult<bool>;

    /// Number of queued submissions.
    fn len(&self) -> QueueResult<usize> {
        Ok(self.pending()?.len())
    }

    /// Whether the queue is empty.
    fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submission_serde() {
        let submission = PendingSubmission {
            id: 7,
            payload: json!({"name": "Amara", "service": "bridal"}),
            timestamp: Utc::now(),
        };

        let text = serde_json::to_string(&submission).unwrap();
        let back: PendingSubmission = serde_json::from_str(&text).unwrap();
        assert_eq!(back, submission);
    }

    #[test]
    fn test_default_len() {
        let store = MemorySubmissionStore::new();
        assert!(store.is_empty().unwrap());
        store.enqueue(json!({"a": 1})).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }
}
