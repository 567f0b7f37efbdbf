use crate::error::StoreError;
use rusqlite::Connection;
use std::{
    path::Path,
    sync::Mutex,
    time::Duration,
};
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS videos (
        video_id          TEXT PRIMARY KEY,
        title             TEXT NOT NULL,
        channel_id        TEXT NOT NULL,
        channel_title     TEXT NOT NULL,
        published_at      INTEGER,
        tracked_since     INTEGER NOT NULL,
        last_collected_at INTEGER,
        status            TEXT NOT NULL DEFAULT 'active',
        status_checked_at INTEGER
    );

    CREATE TABLE IF NOT EXISTS snapshots (
        video_id    TEXT NOT NULL,
        captured_at INTEGER NOT NULL,
        views       INTEGER NOT NULL,
        likes       INTEGER NOT NULL,
        comments    INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_snapshots_video_time
        ON snapshots (video_id, captured_at);
";

/// Shared handle to the underlying SQLite database.
///
/// [`VideoRegistry`](crate::VideoRegistry) and
/// [`SnapshotStore`](crate::SnapshotStore) each hold an `Arc<Database>`; the
/// single connection behind the mutex is what serializes concurrent writers.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        debug!(?path, "opening metrics database");
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests and by the `--ephemeral` flag.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().expect("database mutex poisoned");
        f(&mut conn)
    }
}

/// Timestamps are stored as unix seconds; snapshot identity is second-granular.
pub(crate) fn to_unix(t: chrono::DateTime<chrono::Utc>) -> i64 {
    t.timestamp()
}

pub(crate) fn from_unix(secs: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(secs, 0).unwrap_or(chrono::DateTime::UNIX_EPOCH)
}
