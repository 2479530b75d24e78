//! Result repository: insert-only records in `analysis_results`.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw per-type result row.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub job_id: String,
    pub attempt: i64,
    /// Index of the analysis type in the job's requested list.
    pub position: i64,
    pub analysis_type: String,
    pub status: String,
    pub payload: Option<String>,
    pub metadata: String,
    pub error: Option<String>,
    pub created_at: String,
}

impl ResultRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            attempt: row.get("attempt")?,
            position: row.get("position")?,
            analysis_type: row.get("analysis_type")?,
            status: row.get("status")?,
            payload: row.get("payload")?,
            metadata: row.get("metadata")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Appends a result row.
pub fn insert(db: &Database, result: &ResultRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO analysis_results (job_id, attempt, position, analysis_type, status,
             payload, metadata, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                result.job_id,
                result.attempt,
                result.position,
                result.analysis_type,
                result.status,
                result.payload,
                result.metadata,
                result.error,
                result.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Returns the results of the most recent attempt for a job, in the order
/// the analysis types were requested.
pub fn find_latest_for_job(db: &Database, job_id: &str) -> Result<Vec<ResultRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM analysis_results
             WHERE job_id = ?1
               AND attempt = (SELECT MAX(attempt) FROM analysis_results WHERE job_id = ?1)
             ORDER BY position ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], ResultRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts every stored result for a job across all attempts.
pub fn count_for_job(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM analysis_results WHERE job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
