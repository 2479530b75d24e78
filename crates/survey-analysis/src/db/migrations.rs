//! Versioned schema for the job and result tables.
//!
//! Applied versions are recorded in `_migrations`. Each pending step runs in
//! its own transaction together with its bookkeeping row, so a failed step
//! leaves neither half-created tables nor a recorded version behind.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

/// Ordered `(version, description, sql)` steps.
const STEPS: &[(u32, &str, &str)] = &[
    (
        1,
        "create_analysis_jobs_table",
        include_str!("sql/001_create_analysis_jobs.sql"),
    ),
    (
        2,
        "create_analysis_results_table",
        include_str!("sql/002_create_analysis_results.sql"),
    ),
];

/// Highest version recorded in `conn`, or 0 for an empty database.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

/// Brings `conn` up to the latest schema version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;

    for &(version, description, sql) in STEPS.iter().filter(|(v, _, _)| *v > current) {
        log::info!("Applying schema v{}: {}", version, description);

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql).map_err(|e| DatabaseError::Migration {
            version,
            reason: e.to_string(),
        })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            params![version, description],
        )?;
        tx.commit()?;
    }

    Ok(())
}
