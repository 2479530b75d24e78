//! Job queue backed by the analysis database.
//!
//! The queue keeps two views of a job: the public `status` callers see, and
//! an internal queue state (`waiting`, `active`, `delayed`, `done`) that
//! drives claiming. Retries park a job in `delayed` while its status stays
//! `processing`, so no job ever returns to `queued`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::result_repo::{self, ResultRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::worker::job::{
    AnalysisJob, AnalysisResult, AnalysisType, JobStatus, NewJob, Priority, ResultMetadata,
    ResultStatus,
};

use super::error::QueueError;

/// Read model returned by [`JobQueue::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub attempts: u32,
    pub error: Option<String>,
    /// Per-type results of the latest attempt, in requested order.
    pub results: Vec<AnalysisResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregated queue counts for operational visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

pub struct JobQueue {
    db: Database,
    broadcaster: JobProgressBroadcaster,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

fn parse_status(s: &str, job_id: &str) -> JobStatus {
    s.parse().unwrap_or_else(|e| {
        warn!(job_id, "{}, defaulting to processing", e);
        JobStatus::Processing
    })
}

fn clamp_progress(progress: i64) -> u8 {
    progress.clamp(0, 100) as u8
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self::with_broadcaster(db, JobProgressBroadcaster::default())
    }

    pub fn with_broadcaster(db: Database, broadcaster: JobProgressBroadcaster) -> Self {
        let (wake_tx, wake_rx) = bounded(64);
        Self {
            db,
            broadcaster,
            wake_tx,
            wake_rx,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Subscribes to progress events for every job in this queue.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    /// Receiver signalled on every submission; workers block on it between polls.
    pub(crate) fn wake_receiver(&self) -> Receiver<()> {
        self.wake_rx.clone()
    }

    /// Validates and persists a new `queued` job, returning its id.
    pub fn submit(&self, job: NewJob) -> Result<String, QueueError> {
        if job.analysis_types.is_empty() {
            return Err(QueueError::InvalidJob(
                "at least one analysis type is required".to_string(),
            ));
        }
        if uuid::Uuid::parse_str(&job.questionnaire_id).is_err() {
            return Err(QueueError::InvalidJob(format!(
                "questionnaire id '{}' is not a valid UUID",
                job.questionnaire_id
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        let row = JobRow {
            id: id.clone(),
            questionnaire_id: job.questionnaire_id,
            analysis_types: serde_json::to_string(&job.analysis_types)?,
            status: JobStatus::Queued.as_str().to_string(),
            queue_state: "waiting".to_string(),
            priority: job.priority.weight(),
            progress: 0,
            options: serde_json::to_string(&job.options)?,
            created_by: job.created_by,
            error: None,
            attempts: 0,
            available_at: now.clone(),
            created_at: now.clone(),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: now,
        };
        job_repo::insert(&self.db, &row)?;

        info!(
            job_id = %id,
            types = job.analysis_types.len(),
            priority = row.priority,
            "Analysis job queued"
        );
        self.broadcaster
            .send(JobProgressEvent::new(&id, JobStatus::Queued, 0, "Job queued"));
        // A full wake channel already guarantees a worker will look.
        let _ = self.wake_tx.try_send(());

        Ok(id)
    }

    /// Reads a job's current status and the results of its latest attempt.
    pub fn get_status(&self, job_id: &str) -> Result<JobStatusReport, QueueError> {
        let row = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        let results = result_repo::find_latest_for_job(&self.db, job_id)?
            .iter()
            .filter_map(result_from_row)
            .collect();

        Ok(JobStatusReport {
            job_id: row.id.clone(),
            status: parse_status(&row.status, &row.id),
            progress: clamp_progress(row.progress),
            attempts: row.attempts.max(0) as u32,
            error: row.error,
            results,
            created_at: parse_timestamp(&row.created_at),
            started_at: row.started_at.as_deref().map(parse_timestamp),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
        })
    }

    /// Cancels a job that no worker has claimed yet.
    ///
    /// Returns `Ok(false)` without touching the job when it has already
    /// started or finished.
    pub fn cancel(&self, job_id: &str) -> Result<bool, QueueError> {
        let now = format_timestamp(Utc::now());
        if job_repo::cancel_queued(&self.db, job_id, &now)? {
            info!(job_id, "Analysis job cancelled");
            self.broadcaster.send(JobProgressEvent::new(
                job_id,
                JobStatus::Cancelled,
                0,
                "Job cancelled",
            ));
            return Ok(true);
        }

        match job_repo::find_by_id(&self.db, job_id)? {
            Some(row) => {
                debug!(job_id, status = %row.status, "Cancel ignored, job already started");
                Ok(false)
            }
            None => Err(QueueError::JobNotFound(job_id.to_string())),
        }
    }

    /// Counts jobs per queue state and terminal status.
    pub fn health(&self) -> Result<QueueHealth, QueueError> {
        let mut health = QueueHealth::default();
        for (status, queue_state, count) in job_repo::count_by_state(&self.db)? {
            match (status.as_str(), queue_state.as_str()) {
                ("completed", _) => health.completed += count,
                ("failed", _) => health.failed += count,
                ("cancelled", _) => health.cancelled += count,
                (_, "waiting") => health.waiting += count,
                (_, "active") => health.active += count,
                (_, "delayed") => health.delayed += count,
                (other_status, other_state) => {
                    warn!(status = other_status, queue_state = other_state, "Unexpected job state");
                }
            }
        }
        Ok(health)
    }

    /// Lists jobs matching a filter, newest first, with the total count.
    pub fn list(&self, filter: &JobFilter) -> Result<(Vec<AnalysisJob>, u64), QueueError> {
        let (rows, total) = job_repo::query(&self.db, filter)?;
        let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, total))
    }

    /// Claims the next due job for a worker.
    pub fn claim_next(&self) -> Result<Option<AnalysisJob>, QueueError> {
        let now = format_timestamp(Utc::now());
        let Some(row) = job_repo::claim_next(&self.db, &now)? else {
            return Ok(None);
        };
        let job = job_from_row(&row)?;
        self.broadcaster.send(JobProgressEvent::new(
            &job.id,
            JobStatus::Processing,
            job.progress,
            &format!("Attempt {} started", job.attempts),
        ));
        Ok(Some(job))
    }

    /// Records one analysis type's outcome and raises job progress.
    ///
    /// `position` is the index of the type in the job's requested list.
    pub fn finish_analysis(
        &self,
        position: usize,
        result: &AnalysisResult,
        progress: u8,
    ) -> Result<(), QueueError> {
        let row = ResultRow {
            job_id: result.job_id.clone(),
            attempt: i64::from(result.attempt),
            position: position as i64,
            analysis_type: result.analysis_type.as_str().to_string(),
            status: result.status.as_str().to_string(),
            payload: result
                .payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            metadata: serde_json::to_string(&result.metadata)?,
            error: result.error.clone(),
            created_at: format_timestamp(result.created_at),
        };
        result_repo::insert(&self.db, &row)?;

        let now = format_timestamp(Utc::now());
        job_repo::update_progress(&self.db, &result.job_id, i64::from(progress), &now)?;
        let current = self.current_progress(&result.job_id)?;

        self.broadcaster.send(JobProgressEvent::analysis_finished(
            &result.job_id,
            result.analysis_type,
            current,
            result.error.as_deref(),
        ));
        Ok(())
    }

    /// Marks a job completed with progress 100.
    pub fn complete(&self, job_id: &str) -> Result<bool, QueueError> {
        let now = format_timestamp(Utc::now());
        let changed = job_repo::mark_completed(&self.db, job_id, &now)?;
        if changed {
            self.broadcaster.send(JobProgressEvent::completed(job_id));
        }
        Ok(changed)
    }

    /// Marks a job failed. Progress stays below 100.
    pub fn fail(&self, job_id: &str, error: &str) -> Result<bool, QueueError> {
        let now = format_timestamp(Utc::now());
        let changed = job_repo::mark_failed(&self.db, job_id, error, &now)?;
        if changed {
            let progress = self.current_progress(job_id)?;
            self.broadcaster
                .send(JobProgressEvent::failed(job_id, progress, error));
        }
        Ok(changed)
    }

    /// Parks a job until `delay` has elapsed; a later claim restarts it.
    pub fn schedule_retry(
        &self,
        job_id: &str,
        delay: Duration,
        error: &str,
    ) -> Result<bool, QueueError> {
        let now = Utc::now();
        let available_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        let changed = job_repo::schedule_retry(
            &self.db,
            job_id,
            &format_timestamp(available_at),
            error,
            &format_timestamp(now),
        )?;
        if changed {
            let progress = self.current_progress(job_id)?;
            let mut event = JobProgressEvent::new(
                job_id,
                JobStatus::Processing,
                progress,
                &format!("Retry scheduled at {}", format_timestamp(available_at)),
            );
            event.error = Some(error.to_string());
            self.broadcaster.send(event);
        }
        Ok(changed)
    }

    /// Makes jobs orphaned in `active` by a previous process claimable again.
    pub fn release_stale(&self) -> Result<usize, QueueError> {
        let released = job_repo::release_stale_active(&self.db, &format_timestamp(Utc::now()))?;
        if released > 0 {
            warn!(released, "Released jobs left active by a previous run");
        }
        Ok(released)
    }

    fn current_progress(&self, job_id: &str) -> Result<u8, QueueError> {
        Ok(job_repo::find_by_id(&self.db, job_id)?
            .map(|row| clamp_progress(row.progress))
            .unwrap_or(0))
    }
}

fn job_from_row(row: &JobRow) -> Result<AnalysisJob, DatabaseError> {
    let analysis_types: Vec<AnalysisType> = serde_json::from_str(&row.analysis_types)
        .map_err(|source| DatabaseError::Json {
            column: "analysis_types",
            source,
        })?;
    let options = serde_json::from_str(&row.options).map_err(|source| DatabaseError::Json {
        column: "options",
        source,
    })?;

    Ok(AnalysisJob {
        id: row.id.clone(),
        questionnaire_id: row.questionnaire_id.clone(),
        analysis_types,
        status: parse_status(&row.status, &row.id),
        priority: Priority::from_weight(row.priority),
        progress: clamp_progress(row.progress),
        options,
        created_by: row.created_by.clone(),
        error: row.error.clone(),
        attempts: row.attempts.max(0) as u32,
        created_at: parse_timestamp(&row.created_at),
        started_at: row.started_at.as_deref().map(parse_timestamp),
        completed_at: row.completed_at.as_deref().map(parse_timestamp),
    })
}

fn result_from_row(row: &ResultRow) -> Option<AnalysisResult> {
    let analysis_type = match row.analysis_type.parse() {
        Ok(t) => t,
        Err(e) => {
            warn!(job_id = %row.job_id, "Skipping stored result: {}", e);
            return None;
        }
    };
    let status = if row.status == ResultStatus::Completed.as_str() {
        ResultStatus::Completed
    } else {
        ResultStatus::Failed
    };
    let payload = row
        .payload
        .as_deref()
        .and_then(|p| serde_json::from_str(p).ok());
    let metadata: ResultMetadata = serde_json::from_str(&row.metadata).unwrap_or_else(|e| {
        warn!(job_id = %row.job_id, "Corrupt result metadata: {}", e);
        ResultMetadata::default()
    });

    Some(AnalysisResult {
        job_id: row.job_id.clone(),
        attempt: row.attempt.max(0) as u32,
        analysis_type,
        status,
        payload,
        metadata,
        error: row.error.clone(),
        created_at: parse_timestamp(&row.created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::job::JobOptions;

    const QID: &str = "6d1f9a52-2f0e-4c59-9f3b-0c3a8f1d2e77";

    fn queue() -> JobQueue {
        JobQueue::new(Database::open_in_memory().unwrap())
    }

    fn new_job(types: Vec<AnalysisType>) -> NewJob {
        NewJob::new(QID, types).created_by("researcher")
    }

    #[test]
    fn test_submit_persists_queued_job() {
        let queue = queue();
        let id = queue.submit(new_job(vec![AnalysisType::Thematic])).unwrap();

        let status = queue.get_status(&id).unwrap();
        assert_eq!(status.status, JobStatus::Queued);
        assert_eq!(status.progress, 0);
        assert!(status.results.is_empty());
        assert!(status.started_at.is_none());
    }

    #[test]
    fn test_submit_rejects_malformed_input() {
        let queue = queue();
        assert!(matches!(
            queue.submit(new_job(vec![])),
            Err(QueueError::InvalidJob(_))
        ));
        assert!(matches!(
            queue.submit(NewJob::new("not-a-uuid", vec![AnalysisType::Insights])),
            Err(QueueError::InvalidJob(_))
        ));
        assert_eq!(queue.health().unwrap(), QueueHealth::default());
    }

    #[test]
    fn test_submit_signals_workers() {
        let queue = queue();
        let wake = queue.wake_receiver();
        queue.submit(new_job(vec![AnalysisType::Thematic])).unwrap();
        assert!(wake.try_recv().is_ok());
    }

    #[test]
    fn test_get_status_unknown_job() {
        assert!(matches!(
            queue().get_status("missing"),
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_cancel_queued_job() {
        let queue = queue();
        let id = queue.submit(new_job(vec![AnalysisType::Thematic])).unwrap();

        assert!(queue.cancel(&id).unwrap());
        assert_eq!(queue.get_status(&id).unwrap().status, JobStatus::Cancelled);
        assert!(queue.claim_next().unwrap().is_none());
        // Cancelling twice is a quiet no-op.
        assert!(!queue.cancel(&id).unwrap());
    }

    #[test]
    fn test_cancel_processing_job_is_noop() {
        let queue = queue();
        let id = queue.submit(new_job(vec![AnalysisType::Thematic])).unwrap();
        queue.claim_next().unwrap().unwrap();

        assert!(!queue.cancel(&id).unwrap());
        assert_eq!(queue.get_status(&id).unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_cancel_unknown_job() {
        assert!(matches!(queue().cancel("missing"), Err(QueueError::JobNotFound(_))));
    }

    #[test]
    fn test_claim_roundtrips_job_fields() {
        let queue = queue();
        let options = JobOptions {
            min_cluster_size: Some(4),
            custom_prompt: Some("Focus on facilitators".to_string()),
            ..Default::default()
        };
        let id = queue
            .submit(
                new_job(vec![AnalysisType::Clustering, AnalysisType::Insights])
                    .with_priority(Priority::High)
                    .with_options(options.clone()),
            )
            .unwrap();

        let job = queue.claim_next().unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.priority, Priority::High);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.options, options);
        assert_eq!(
            job.analysis_types,
            vec![AnalysisType::Clustering, AnalysisType::Insights]
        );
    }

    #[test]
    fn test_claim_prefers_urgent() {
        let queue = queue();
        let low = queue
            .submit(new_job(vec![AnalysisType::Thematic]).with_priority(Priority::Low))
            .unwrap();
        let urgent = queue
            .submit(new_job(vec![AnalysisType::Thematic]).with_priority(Priority::Urgent))
            .unwrap();

        assert_eq!(queue.claim_next().unwrap().unwrap().id, urgent);
        assert_eq!(queue.claim_next().unwrap().unwrap().id, low);
    }

    #[test]
    fn test_finish_analysis_and_complete() {
        let queue = queue();
        let mut rx = queue.subscribe();
        let id = queue
            .submit(new_job(vec![AnalysisType::Thematic, AnalysisType::Insights]))
            .unwrap();
        let job = queue.claim_next().unwrap().unwrap();

        let ok = AnalysisResult::success(
            &job,
            AnalysisType::Thematic,
            serde_json::json!({"themes": []}),
            ResultMetadata::default(),
        );
        queue.finish_analysis(0, &ok, 50).unwrap();
        let failed = AnalysisResult::failure(
            &job,
            AnalysisType::Insights,
            "model output was not valid JSON".to_string(),
            ResultMetadata::default(),
        );
        queue.finish_analysis(1, &failed, 99).unwrap();
        assert!(queue.complete(&id).unwrap());

        let status = queue.get_status(&id).unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.progress, 100);
        assert_eq!(status.results.len(), 2);
        assert!(status.results[0].is_success());
        assert_eq!(status.results[1].status, ResultStatus::Failed);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.progress);
        }
        assert_eq!(seen, vec![0, 0, 50, 99, 100]);
    }

    #[test]
    fn test_fail_keeps_progress() {
        let queue = queue();
        let id = queue.submit(new_job(vec![AnalysisType::Thematic])).unwrap();
        queue.claim_next().unwrap();

        assert!(queue.fail(&id, "Questionnaire not found").unwrap());
        let status = queue.get_status(&id).unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.error.as_deref(), Some("Questionnaire not found"));
        assert!(status.progress < 100);
        assert!(!queue.complete(&id).unwrap());
    }

    #[test]
    fn test_retry_reports_latest_attempt_only() {
        let queue = queue();
        let id = queue.submit(new_job(vec![AnalysisType::Thematic])).unwrap();
        let first = queue.claim_next().unwrap().unwrap();
        let failed = AnalysisResult::failure(
            &first,
            AnalysisType::Thematic,
            "boom".to_string(),
            ResultMetadata::default(),
        );
        queue.finish_analysis(0, &failed, 99).unwrap();
        assert!(queue
            .schedule_retry(&id, Duration::ZERO, "connection reset")
            .unwrap());

        let parked = queue.get_status(&id).unwrap();
        assert_eq!(parked.status, JobStatus::Processing);
        assert_eq!(parked.error.as_deref(), Some("connection reset"));
        assert_eq!(queue.health().unwrap().delayed, 1);

        let second = queue.claim_next().unwrap().unwrap();
        assert_eq!(second.attempts, 2);
        let ok = AnalysisResult::success(
            &second,
            AnalysisType::Thematic,
            serde_json::json!({"themes": []}),
            ResultMetadata::default(),
        );
        queue.finish_analysis(0, &ok, 99).unwrap();
        queue.complete(&id).unwrap();

        let status = queue.get_status(&id).unwrap();
        assert_eq!(status.results.len(), 1);
        assert_eq!(status.results[0].attempt, 2);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_health_counts() {
        let queue = queue();
        queue.submit(new_job(vec![AnalysisType::Thematic])).unwrap();
        let b = queue.submit(new_job(vec![AnalysisType::Thematic])).unwrap();
        queue.submit(new_job(vec![AnalysisType::Thematic])).unwrap();
        queue.cancel(&b).unwrap();
        let claimed = queue.claim_next().unwrap().unwrap();
        queue.complete(&claimed.id).unwrap();

        let health = queue.health().unwrap();
        assert_eq!(health.completed, 1);
        assert_eq!(health.cancelled, 1);
        assert_eq!(health.waiting, 1);
        assert_eq!(health.active, 0);
    }

    #[test]
    fn test_release_stale() {
        let queue = queue();
        queue.submit(new_job(vec![AnalysisType::Thematic])).unwrap();
        queue.claim_next().unwrap();
        assert!(queue.claim_next().unwrap().is_none());

        assert_eq!(queue.release_stale().unwrap(), 1);
        assert!(queue.claim_next().unwrap().is_some());
    }

    #[test]
    fn test_list_jobs() {
        let queue = queue();
        queue.submit(new_job(vec![AnalysisType::Thematic])).unwrap();
        queue.submit(new_job(vec![AnalysisType::Insights])).unwrap();

        let (jobs, total) = queue.list(&JobFilter::default()).unwrap();
        assert_eq!(total, 2);
        assert_eq!(jobs.len(), 2);
    }
}
