use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value as JsonValue;

use crate::{PendingSubmission, QueueError, QueueResult, SubmissionId, SubmissionStore};

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<PendingSubmission>,
    next_id: SubmissionId,
}

/// In-memory submission queue.
#[derive(Debug, Default)]
pub struct MemorySubmissionStore {
    inner: Mutex<Inner>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given submissions, in order.
    pub fn with_entries(entries: Vec<PendingSubmission>) -> Self {
        let next_id = entries.iter().map(|e| e.id).max().unwrap_or(0);
        Self {
            inner: Mutex::new(Inner { entries, next_id }),
        }
    }
}

impl SubmissionStore for MemorySubmissionStore {
    fn enqueue(&self, payload: JsonValue) -> QueueResult<PendingSubmission> {
        let mut inner = self.inner.lock().map_err(|_| QueueError::LockPoisoned)?;
        inner.next_id += 1;
        let submission = PendingSubmission {
            id: inner.next_id,
            payload,
            timestamp: Utc::now(),
        };
        inner.entries.push(submission.clone());
        Ok(submission)
    }

    fn pending(&self) -> QueueResult<Vec<PendingSubmission>> {
        let inner = self.inner.lock().map_err(|_| QueueError::LockPoisoned)?;
        Ok(inner.entries.clone())
    }

    fn remove(&self, id: SubmissionId) -> QueueResult<bool> {
        let mut inner = self.inner.lock().map_err(|_| QueueError::LockPoisoned)?;
        let before = inner.entries.len();
        inner.entries.retain(|e| e.id != id);
        Ok(inner.entries.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enqueue_assigns_ids() {
        let store = MemorySubmissionStore::new();
        let a = store.enqueue(json!({"n": 1})).unwrap();
        let b = store.enqueue(json!({"n": 2})).unwrap();
        assert_ne!(a.id, b.id);

        let pending = store.pending().unwrap();
        assert_eq!(pending, vec![a, b]);
    }

    #[test]
    fn test_remove() {
        let store = MemorySubmissionStore::new();
        let a = store.enqueue(json!({"n": 1})).unwrap();
        assert!(store.remove(a.id).unwrap());
        assert!(!store.remove(a.id).unwrap());
        assert!(store.pending().unwrap().is_empty());
    }

    #[test]
    fn test_with_entries_continues_ids() {
        let existing = PendingSubmission {
            id: 41,
            payload: json!({}),
            timestamp: Utc::now(),
        };
        let store = MemorySubmissionStore::with_entries(vec![existing]);
        let next = store.enqueue(json!({})).unwrap();
        assert_eq!(next.id, 42);
    }
}
