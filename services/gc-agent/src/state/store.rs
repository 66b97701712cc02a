//! SQLite-based state store for image usage records.
//!
//! Timestamps are stored as RFC 3339 text in UTC with nanosecond
//! precision so a record survives a restart without losing ordering
//! against freshly observed times.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use imagegc_id::ImageId;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, warn};

/// How long SQLite waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors from state store operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create state directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid timestamp {value:?} for image {image_id}")]
    InvalidTimestamp { image_id: String, value: String },
}

/// A persisted usage record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    /// Image ID.
    pub image_id: ImageId,
    /// Last time the image was known to be in use.
    pub last_used_at: DateTime<Utc>,
}

/// SQLite state store.
pub struct StateStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open or create a state store at the given path.
    ///
    /// The parent directory is created if missing (mode 0700 on Unix).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateStoreError> {
        let path = path.as_ref();

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_private_dir(dir).map_err(|source| StateStoreError::Directory {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StateStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, path: None };
        store.init_schema()?;
        Ok(store)
    }

    /// Path of the database file, if on disk.
    #[cfg(test)]
    pub(crate) fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), StateStoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS image_usage (
                image_id TEXT PRIMARY KEY,
                last_used_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("State store schema initialized");
        Ok(())
    }

    /// Get the persisted last use of an image.
    pub fn get_usage(&self, image_id: &ImageId) -> Result<Option<DateTime<Utc>>, StateStoreError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT last_used_at FROM image_usage WHERE image_id = ?1",
                params![image_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        value
            .map(|value| decode_timestamp(image_id.as_str(), value))
            .transpose()
    }

    /// Insert or overwrite the last use of an image.
    pub fn put_usage(
        &self,
        image_id: &ImageId,
        last_used_at: DateTime<Utc>,
    ) -> Result<(), StateStoreError> {
        self.conn.execute(
            r#"
            INSERT INTO image_usage (image_id, last_used_at)
            VALUES (?1, ?2)
            ON CONFLICT(image_id) DO UPDATE SET
                last_used_at = excluded.last_used_at
            "#,
            params![image_id.as_str(), encode_timestamp(last_used_at)],
        )?;
        Ok(())
    }

    /// Delete the record of an image. Deleting a missing record is not an error.
    pub fn delete_usage(&self, image_id: &ImageId) -> Result<(), StateStoreError> {
        self.conn.execute(
            "DELETE FROM image_usage WHERE image_id = ?1",
            params![image_id.as_str()],
        )?;
        Ok(())
    }

    /// List all usage records.
    ///
    /// Rows whose image ID or timestamp cannot be decoded are skipped with
    /// a warning; they are left in place and overwritten by the next update.
    pub fn list_usage(&self) -> Result<Vec<UsageRecord>, StateStoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT image_id, last_used_at FROM image_usage ORDER BY image_id")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (raw_id, raw_ts) in rows {
            let image_id = match ImageId::parse(&raw_id) {
                Ok(id) => id,
                Err(e) => {
                    warn!(image_id = %raw_id, error = %e, "Skipping persisted record with invalid image ID");
                    continue;
                }
            };

            match decode_timestamp(&raw_id, raw_ts) {
                Ok(last_used_at) => records.push(UsageRecord {
                    image_id,
                    last_used_at,
                }),
                Err(e) => {
                    warn!(image_id = %raw_id, error = %e, "Cannot decode last usage, skipping");
                }
            }
        }

        Ok(records)
    }

    /// Count persisted records.
    #[cfg(test)]
    pub(crate) fn count_usage(&self) -> Result<i64, StateStoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM image_usage", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Drop the backing table so every later statement fails.
    #[cfg(test)]
    pub(crate) fn break_for_test(&self) {
        self.conn
            .execute_batch("DROP TABLE image_usage;")
            .expect("drop table");
    }

    /// Write a raw row, bypassing encoding.
    #[cfg(test)]
    pub(crate) fn put_raw_for_test(&self, image_id: &str, value: &str) {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO image_usage (image_id, last_used_at) VALUES (?1, ?2)",
                params![image_id, value],
            )
            .expect("raw insert");
    }
}

fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(image_id: &str, value: String) -> Result<DateTime<Utc>, StateStoreError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StateStoreError::InvalidTimestamp {
            image_id: image_id.to_string(),
            value,
        })
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}
