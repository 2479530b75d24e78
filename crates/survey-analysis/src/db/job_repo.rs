//! Job repository: queue operations over the `analysis_jobs` table.
//!
//! Every state-changing statement carries a guard on the current status so
//! terminal rows are never rewritten and a job cannot move back to `queued`.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub questionnaire_id: String,
    /// JSON array of analysis type names.
    pub analysis_types: String,
    pub status: String,
    pub queue_state: String,
    pub priority: i64,
    pub progress: i64,
    /// JSON object of job options.
    pub options: String,
    pub created_by: Option<String>,
    pub error: Option<String>,
    pub attempts: i64,
    pub available_at: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            questionnaire_id: row.get("questionnaire_id")?,
            analysis_types: row.get("analysis_types")?,
            status: row.get("status")?,
            queue_state: row.get("queue_state")?,
            priority: row.get("priority")?,
            progress: row.get("progress")?,
            options: row.get("options")?,
            created_by: row.get("created_by")?,
            error: row.get("error")?,
            attempts: row.get("attempts")?,
            available_at: row.get("available_at")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            cancelled_at: row.get("cancelled_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub questionnaire_id: Option<String>,
    pub created_by: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO analysis_jobs (id, questionnaire_id, analysis_types, status, queue_state,
             priority, progress, options, created_by, error, attempts, available_at, created_at,
             started_at, completed_at, cancelled_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                job.id,
                job.questionnaire_id,
                job.analysis_types,
                job.status,
                job.queue_state,
                job.priority,
                job.progress,
                job.options,
                job.created_by,
                job.error,
                job.attempts,
                job.available_at,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.cancelled_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

fn select_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM analysis_jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

/// Atomically claims the next due job: highest priority first, then oldest.
///
/// Only rows in queue state `waiting` or `delayed` whose `available_at` has
/// passed are eligible. The claimed row moves to `active`/`processing` and
/// its attempt counter is incremented.
pub fn claim_next(db: &Database, now: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let candidate: Option<String> = conn
            .query_row(
                "SELECT id FROM analysis_jobs
                 WHERE queue_state IN ('waiting', 'delayed') AND available_at <= ?1
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT 1",
                params![now],
                |r| r.get(0),
            )
            .optional()?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let claimed = conn.execute(
            "UPDATE analysis_jobs
             SET status = 'processing', queue_state = 'active', attempts = attempts + 1,
                 started_at = COALESCE(started_at, ?2), error = NULL, updated_at = ?2
             WHERE id = ?1 AND queue_state IN ('waiting', 'delayed')",
            params![id, now],
        )?;

        if claimed == 0 {
            return Ok(None);
        }
        select_by_id(conn, &id)
    })
}

/// Raises progress of an in-flight job. Lower values are ignored.
pub fn update_progress(
    db: &Database,
    id: &str,
    progress: i64,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analysis_jobs SET progress = MAX(progress, ?2), updated_at = ?3
             WHERE id = ?1 AND status = 'processing' AND progress < ?2",
            params![id, progress, now],
        )?;
        Ok(changed > 0)
    })
}

/// Moves an active job to `completed` with progress 100.
pub fn mark_completed(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analysis_jobs
             SET status = 'completed', queue_state = 'done', progress = 100,
                 completed_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'processing'",
            params![id, now],
        )?;
        Ok(changed > 0)
    })
}

/// Moves an active job to `failed`. Progress is left where it was.
pub fn mark_failed(db: &Database, id: &str, error: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analysis_jobs
             SET status = 'failed', queue_state = 'done', error = ?2,
                 completed_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status = 'processing'",
            params![id, error, now],
        )?;
        Ok(changed > 0)
    })
}

/// Parks an active job in the `delayed` queue state until `available_at`.
/// The public status stays `processing`.
pub fn schedule_retry(
    db: &Database,
    id: &str,
    available_at: &str,
    error: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analysis_jobs
             SET queue_state = 'delayed', available_at = ?2, error = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'processing' AND queue_state = 'active'",
            params![id, available_at, error, now],
        )?;
        Ok(changed > 0)
    })
}

/// Cancels a job that has not been claimed yet.
pub fn cancel_queued(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analysis_jobs
             SET status = 'cancelled', queue_state = 'done', cancelled_at = ?2,
                 completed_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![id, now],
        )?;
        Ok(changed > 0)
    })
}

/// Releases jobs left `active` by a previous process so they can be
/// claimed again immediately. Returns the number of rows released.
pub fn release_stale_active(db: &Database, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analysis_jobs SET queue_state = 'delayed', available_at = ?1, updated_at = ?1
             WHERE queue_state = 'active'",
            params![now],
        )?;
        Ok(changed)
    })
}

/// Counts jobs grouped by (status, queue_state).
pub fn count_by_state(db: &Database) -> Result<Vec<(String, String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, queue_state, COUNT(*) FROM analysis_jobs GROUP BY status, queue_state",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Queries jobs with filters, returning (rows, total_count), newest first.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref questionnaire_id) = filter.questionnaire_id {
            conditions.push(format!("questionnaire_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(questionnaire_id.clone()));
        }
        if let Some(ref created_by) = filter.created_by {
            conditions.push(format!("created_by = ?{}", param_values.len() + 1));
            param_values.push(Box::new(created_by.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM analysis_jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM analysis_jobs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}
