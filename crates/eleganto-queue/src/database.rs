use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::{PendingSubmission, QueueError, QueueResult, SubmissionId, SubmissionStore};

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Submission queue persisted in SQLite.
pub struct SqliteSubmissionStore {
    conn: Mutex<Connection>,
}

impl SqliteSubmissionStore {
    /// Open (or create) the queue database at `path`.
    pub fn open(path: impl AsRef<Path>) -> QueueResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        init_database(&conn)?;
        info!(path = %path.as_ref().display(), "Opened submission queue");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a queue that lives only as long as this value.
    pub fn open_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Create or migrate the schema.
fn init_database(conn: &Connection) -> QueueResult<()> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get::<_, i32>(0).map(|count| count > 0),
        )
        .unwrap_or(false);

    let version: i32 = if table_exists {
        conn.query_row(
            "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0)
    } else {
        0
    };

    if version > SCHEMA_VERSION {
        return Err(QueueError::Migration(format!(
            "database schema {} is newer than supported {}",
            version, SCHEMA_VERSION
        )));
    }

    if version < 1 {
        create_schema_v1(conn)?;
    }

    Ok(())
}

fn create_schema_v1(conn: &Connection) -> QueueResult<()> {
    debug!("Creating submission queue schema v1");
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_submissions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
        params![SCHEMA_VERSION, Utc::now().timestamp()],
    )?;

    Ok(())
}

fn row_to_submission(
    id: SubmissionId,
    payload: &str,
    created_at: i64,
) -> QueueResult<PendingSubmission> {
    let payload: JsonValue = serde_json::from_str(payload)?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(created_at).unwrap_or_default();
    Ok(PendingSubmission {
        id,
        payload,
        timestamp,
    })
}

impl SubmissionStore for SqliteSubmissionStore {
    fn enqueue(&self, payload: JsonValue) -> QueueResult<PendingSubmission> {
        let conn = self.conn.lock().map_err(|_| QueueError::LockPoisoned)?;
        let now = Utc::now();
        let text = serde_json::to_string(&payload)?;

        conn.execute(
            "INSERT INTO pending_submissions (payload, created_at) VALUES (?, ?)",
            params![text, now.timestamp_millis()],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, "Queued submission");

        Ok(PendingSubmission {
            id,
            payload,
            timestamp: DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis())
                .unwrap_or(now),
        })
    }

    fn pending(&self) -> QueueResult<Vec<PendingSubmission>> {
        let conn = self.conn.lock().map_err(|_| QueueError::LockPoisoned)?;
        let mut stmt =
            conn.prepare("SELECT id, payload, created_at FROM pending_submissions ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut submissions = Vec::new();
        for row in rows {
            let (id, payload, created_at) = row?;
            submissions.push(row_to_submission(id, &payload, created_at)?);
        }
        Ok(submissions)
    }

    fn remove(&self, id: SubmissionId) -> QueueResult<bool> {
        let conn = self.conn.lock().map_err(|_| QueueError::LockPoisoned)?;
        let removed = conn.execute("DELETE FROM pending_submissions WHERE id = ?", params![id])?;
        Ok(removed > 0)
    }

    fn len(&self) -> QueueResult<usize> {
        let conn = self.conn.lock().map_err(|_| QueueError::LockPoisoned)?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_submissions", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}
