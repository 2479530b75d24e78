//! Persistent storage for analysis jobs and their per-type results.
//!
//! Every queue operation goes through one `Database` handle shared by the
//! queue and all workers. Statements run under a single connection lock, so
//! a one-statement claim is atomic across worker threads.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod result_repo;

pub use error::DatabaseError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the job store. Clones point at the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the store at `path`, creating parent directories and applying
    /// pending schema steps.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DatabaseError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::prepare(conn)?;
        log::info!("Analysis store ready at {}", path.display());
        Ok(db)
    }

    /// Private in-memory store, used by tests and embedded callers.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` while holding the connection lock.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// Returns the canonical database path: `~/.survey-analysis/data/analysis.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".survey-analysis").join("data").join("analysis.db"))
}

/// Formats a timestamp for storage. Fixed-width UTC text keeps string
/// comparison in SQL equivalent to chronological comparison.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a stored timestamp, falling back to the current time on
/// corrupt values.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(db: &Database, table: &str) -> u32 {
        db.with_conn(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_store_is_migrated() {
        let db = Database::open_in_memory().unwrap();
        let version = db.with_conn(|conn| migrations::schema_version(conn)).unwrap();
        assert!(version > 0);
        assert_eq!(count(&db, "analysis_jobs"), 0);
    }

    #[test]
    fn test_file_store_creates_parent_dirs_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("analysis.db");
        {
            let db = Database::open(&path).unwrap();
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO analysis_jobs (id, questionnaire_id, analysis_types, available_at, created_at, updated_at)
                     VALUES ('j1', 'q1', '[\"thematic\"]', 't', 't', 't')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        }
        assert!(path.exists());

        let reopened = Database::open(&path).unwrap();
        assert_eq!(count(&reopened, "analysis_jobs"), 1);
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with("analysis.db"));
        assert!(path.to_string_lossy().contains(".survey-analysis"));
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let early = DateTime::parse_from_rfc3339("2026-01-01T09:59:59.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (a, b) = (format_timestamp(early), format_timestamp(late));
        assert!(a < b);
        assert_eq!(b, "2026-01-01T10:00:00.000Z");
        assert_eq!(parse_timestamp(&b), late);
    }

    #[test]
    fn test_clones_share_the_connection() {
        let db = Database::open_in_memory().unwrap();
        let other = db.clone();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO analysis_jobs (id, questionnaire_id, analysis_types, available_at, created_at, updated_at)
                 VALUES ('j1', 'q1', '[\"thematic\"]', 't', 't', 't')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(count(&other, "analysis_jobs"), 1);
    }
}
