//! Worker pool behaviour: claiming, retries, timeouts and rate limiting.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use survey_analysis::config::Settings;
use survey_analysis::db::Database;
use survey_analysis::engine::AnalysisEngine;
use survey_analysis::queue::{JobQueue, RateLimitConfig, RetryPolicy};
use survey_analysis::services::ServiceError;
use survey_analysis::worker::job::{AnalysisType, JobStatus, NewJob, ResultStatus};
use survey_analysis::worker::{PoolConfig, WorkerPool};

use common::*;

const WAIT: Duration = Duration::from_secs(10);

fn config() -> PoolConfig {
    PoolConfig {
        workers: 2,
        poll_interval: Duration::from_millis(20),
        rate_limit: RateLimitConfig::default(),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
        },
        job_timeout: Duration::from_secs(5),
    }
}

fn start(fakes: &Fakes, config: PoolConfig) -> (Arc<JobQueue>, WorkerPool) {
    start_on(Database::open_in_memory().unwrap(), fakes, config)
}

fn start_on(db: Database, fakes: &Fakes, config: PoolConfig) -> (Arc<JobQueue>, WorkerPool) {
    let queue = Arc::new(JobQueue::new(db));
    let (pipeline, _) = build_pipeline(fakes.services());
    let pool = WorkerPool::start(queue.clone(), Arc::new(pipeline), config).unwrap();
    (queue, pool)
}

fn stop(pool: WorkerPool) {
    pool.shutdown();
    assert!(pool.is_shutdown());
    pool.wait();
}

fn terminal(report: &survey_analysis::queue::JobStatusReport) -> bool {
    report.status.is_terminal()
}

#[test]
fn test_job_processed_end_to_end() {
    let fakes = Fakes::new(ScriptedModel::new());
    let (queue, pool) = start(&fakes, config());
    let mut events = queue.subscribe();

    let job_id = queue
        .submit(NewJob::new(
            QUESTIONNAIRE_ID,
            vec![AnalysisType::Thematic, AnalysisType::Clustering],
        ))
        .unwrap();
    let report = wait_for(&queue, &job_id, WAIT, terminal);
    stop(pool);

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.progress, 100);
    assert_eq!(report.attempts, 1);
    assert!(report.started_at.is_some());
    assert!(report.completed_at.is_some());
    assert!(report
        .results
        .iter()
        .all(|r| r.status == ResultStatus::Completed));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id == job_id {
            seen.push(event.progress);
        }
    }
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.last(), Some(&100));
}

#[test]
fn test_transient_failure_retried_then_completed() {
    let repository = FakeRepository::standard()
        .fail_responses_with([ServiceError::Timeout("survey store".to_string())]);
    let fakes = Fakes::new(ScriptedModel::new()).with_repository(repository);
    let (queue, pool) = start(&fakes, config());

    let job_id = queue
        .submit(NewJob::new(QUESTIONNAIRE_ID, vec![AnalysisType::Thematic]))
        .unwrap();
    let report = wait_for(&queue, &job_id, WAIT, terminal);
    stop(pool);

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].attempt, 2);
}

#[test]
fn test_retries_exhausted_marks_failed() {
    let repository = FakeRepository::standard().fail_responses_with([
        ServiceError::Connection("refused".to_string()),
        ServiceError::Connection("refused".to_string()),
    ]);
    let fakes = Fakes::new(ScriptedModel::new()).with_repository(repository);
    let mut config = config();
    config.retry.max_attempts = 2;
    let (queue, pool) = start(&fakes, config);

    let job_id = queue
        .submit(NewJob::new(QUESTIONNAIRE_ID, vec![AnalysisType::Thematic]))
        .unwrap();
    let report = wait_for(&queue, &job_id, WAIT, terminal);
    stop(pool);

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.attempts, 2);
    assert!(report.progress < 100);
    assert!(report.error.as_deref().unwrap().contains("Connection error"));
}

#[test]
fn test_fatal_error_is_not_retried() {
    let fakes = Fakes::new(ScriptedModel::new());
    let (queue, pool) = start(&fakes, config());

    let job_id = queue
        .submit(NewJob::new(
            MISSING_QUESTIONNAIRE_ID,
            vec![AnalysisType::Thematic],
        ))
        .unwrap();
    let report = wait_for(&queue, &job_id, WAIT, terminal);
    stop(pool);

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.attempts, 1);
    assert!(report.error.as_deref().unwrap().contains("not found"));
}

#[test]
fn test_job_timeout_fails_the_job() {
    let fakes = Fakes::new(ScriptedModel::new().with_delay(Duration::from_secs(3)));
    let mut config = config();
    config.job_timeout = Duration::from_millis(100);
    let (queue, pool) = start(&fakes, config);

    let job_id = queue
        .submit(NewJob::new(QUESTIONNAIRE_ID, vec![AnalysisType::Thematic]))
        .unwrap();
    let report = wait_for(&queue, &job_id, WAIT, terminal);
    stop(pool);

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.attempts, 1);
    assert!(report.error.as_deref().unwrap().contains("wall-clock"));
}

#[test]
fn test_result_write_failure_fails_the_job() {
    let db = Database::open_in_memory().unwrap();
    db.with_conn(|conn| {
        conn.execute_batch(
            "CREATE TRIGGER reject_results BEFORE INSERT ON analysis_results
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )?;
        Ok(())
    })
    .unwrap();
    let fakes = Fakes::new(ScriptedModel::new());
    let (queue, pool) = start_on(db, &fakes, config());

    let job_id = queue
        .submit(NewJob::new(QUESTIONNAIRE_ID, vec![AnalysisType::Thematic]))
        .unwrap();
    let report = wait_for(&queue, &job_id, WAIT, terminal);
    stop(pool);

    assert_eq!(report.status, JobStatus::Failed);
    assert!(report.progress < 100);
    assert!(report.results.is_empty());
    assert!(report.error.as_deref().unwrap().contains("disk full"));
}

#[test]
fn test_job_timeout_spans_retries() {
    let repository = FakeRepository::standard()
        .with_response_delay(Duration::from_millis(200))
        .fail_responses_with(
            (0..5).map(|_| ServiceError::Connection("reset by peer".to_string())),
        );
    let fakes = Fakes::new(ScriptedModel::new()).with_repository(repository);
    let mut config = config();
    config.job_timeout = Duration::from_millis(350);
    config.retry = RetryPolicy {
        max_attempts: 6,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
    };
    let (queue, pool) = start(&fakes, config);

    let job_id = queue
        .submit(NewJob::new(QUESTIONNAIRE_ID, vec![AnalysisType::Thematic]))
        .unwrap();
    let report = wait_for(&queue, &job_id, WAIT, terminal);
    stop(pool);

    assert_eq!(report.status, JobStatus::Failed);
    assert!(report.attempts <= 2, "attempts = {}", report.attempts);
    assert!(report.error.as_deref().unwrap().contains("wall-clock"));
    assert!(report.results.is_empty());
}

#[test]
fn test_rate_limit_holds_back_second_job() {
    let fakes = Fakes::new(ScriptedModel::new());
    let mut config = config();
    config.rate_limit = RateLimitConfig {
        max_dequeues: 1,
        window: Duration::from_secs(60),
    };
    let (queue, pool) = start(&fakes, config);

    for _ in 0..2 {
        queue
            .submit(NewJob::new(QUESTIONNAIRE_ID, vec![AnalysisType::Insights]))
            .unwrap();
    }

    let mut completed = 0;
    for _ in 0..500 {
        completed = queue.health().unwrap().completed;
        if completed > 0 {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(completed, 1);

    thread::sleep(Duration::from_millis(200));
    let health = queue.health().unwrap();
    assert_eq!(health.completed, 1);
    assert_eq!(health.waiting, 1);
    assert_eq!(pool.dequeues_in_window(), 1);
    stop(pool);
}

#[test]
fn test_zero_workers_rejected() {
    let fakes = Fakes::new(ScriptedModel::new());
    let queue = Arc::new(JobQueue::new(Database::open_in_memory().unwrap()));
    let (pipeline, _) = build_pipeline(fakes.services());
    let config = PoolConfig {
        workers: 0,
        ..config()
    };
    assert!(WorkerPool::start(queue, Arc::new(pipeline), config).is_err());
}

#[test]
fn test_engine_runs_jobs_and_reports_health() {
    let fakes = Fakes::new(ScriptedModel::new());
    let mut settings = Settings::default();
    settings.workers.count = 1;
    settings.workers.poll_interval_ms = 20;

    let engine = AnalysisEngine::start_with_database(
        &settings,
        fakes.services(),
        Database::open_in_memory().unwrap(),
    )
    .unwrap();
    assert_eq!(engine.templates().len(), 6);

    let job_id = engine
        .submit(NewJob::new(QUESTIONNAIRE_ID, vec![AnalysisType::Recommendations]))
        .unwrap();
    let report = wait_for(engine.queue(), &job_id, WAIT, terminal);
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(engine.status(&job_id).unwrap().progress, 100);

    assert!(!engine.cancel(&job_id).unwrap());
    let health = engine.health().unwrap();
    assert_eq!(health.completed, 1);
    assert_eq!(health.waiting + health.active + health.delayed, 0);

    assert!(engine.submit(NewJob::new("not-a-uuid", vec![AnalysisType::Thematic])).is_err());
    engine.shutdown();
}
