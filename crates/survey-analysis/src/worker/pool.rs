use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::runtime::Runtime;

use crate::error::WorkerError;
use crate::pipeline::{Pipeline, QueueProgress};
use crate::queue::{DequeueLimiter, JobQueue, RateLimitConfig, RetryPolicy};
use crate::worker::job::AnalysisJob;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// Upper bound on how long an idle worker sleeps before polling again.
    pub poll_interval: Duration,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    /// Hard wall-clock ceiling per job, measured from its first claim and
    /// shared by every retry.
    pub job_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            poll_interval: Duration::from_millis(250),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            job_timeout: Duration::from_secs(600),
        }
    }
}

/// Fixed set of worker threads claiming jobs from a [`JobQueue`].
///
/// Each worker owns one job at a time end to end. Claims from all workers
/// share one [`DequeueLimiter`].
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    limiter: Arc<DequeueLimiter>,
}

struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    pipeline: Arc<Pipeline>,
    limiter: Arc<DequeueLimiter>,
    shutdown: Arc<AtomicBool>,
    config: PoolConfig,
}

impl WorkerPool {
    /// Releases jobs orphaned by a previous process, then starts the workers.
    pub fn start(
        queue: Arc<JobQueue>,
        pipeline: Arc<Pipeline>,
        config: PoolConfig,
    ) -> Result<Self, WorkerError> {
        if config.workers == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker count must be > 0".to_string(),
            ));
        }
        if let Err(e) = queue.release_stale() {
            warn!("Could not release stale jobs: {}", e);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let limiter = Arc::new(DequeueLimiter::new(config.rate_limit));
        let mut workers = Vec::with_capacity(config.workers);

        for id in 0..config.workers {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(WorkerError::Runtime)?;
            let worker = Worker {
                id,
                queue: Arc::clone(&queue),
                pipeline: Arc::clone(&pipeline),
                limiter: Arc::clone(&limiter),
                shutdown: Arc::clone(&shutdown),
                config: config.clone(),
            };

            let handle = thread::Builder::new()
                .name(format!("analysis-worker-{}", id))
                .spawn(move || worker.run(runtime))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} workers", config.workers);
        Ok(Self {
            workers,
            shutdown,
            limiter,
        })
    }

    /// Jobs claimed within the current rate-limit window.
    pub fn dequeues_in_window(&self) -> usize {
        self.limiter.in_window()
    }

    /// Signals workers to stop after their current job.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Worker {
    fn run(self, runtime: Runtime) {
        debug!("Worker {} started", self.id);
        let wake = self.queue.wake_receiver();
        let reporter = QueueProgress::new(Arc::clone(&self.queue));

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            match self.limiter.try_admit(|| self.queue.claim_next()) {
                Ok(Some(job)) => runtime.block_on(self.process(job, &reporter)),
                Ok(None) => {
                    let wait = self
                        .limiter
                        .time_until_available()
                        .map_or(self.config.poll_interval, |d| {
                            d.min(self.config.poll_interval)
                        });
                    // Woken early by submissions; timeouts just mean poll again.
                    let _ = wake.recv_timeout(wait);
                }
                Err(e) => {
                    error!("Worker {} failed to claim a job: {}", self.id, e);
                    thread::sleep(self.config.poll_interval);
                }
            }
        }

        debug!("Worker {} stopped", self.id);
    }

    async fn process(&self, job: AnalysisJob, reporter: &QueueProgress) {
        let job_id = job.id.clone();
        let attempt = job.attempts;
        let limit = self.config.job_timeout;
        let budget = remaining_budget(job.started_at, limit, Utc::now());
        info!(
            "Worker {} processing job {} (attempt {}, {:?} left)",
            self.id, job_id, attempt, budget
        );

        // None: the budget ran out, before or during this attempt.
        let outcome = if budget.is_zero() {
            None
        } else {
            tokio::time::timeout(budget, self.pipeline.run(job, reporter))
                .await
                .ok()
        };
        let recorded = match outcome {
            Some(Ok(summary)) => {
                info!(
                    "Job {} completed: {} succeeded, {} failed",
                    job_id, summary.succeeded, summary.failed
                );
                self.queue.complete(&job_id)
            }
            Some(Err(e)) if e.is_retryable() && self.config.retry.should_retry(attempt) => {
                let delay = self.config.retry.delay_for_attempt(attempt);
                warn!(
                    "Job {} attempt {} failed, retrying in {:?}: {}",
                    job_id, attempt, delay, e
                );
                self.queue.schedule_retry(&job_id, delay, &e.to_string())
            }
            Some(Err(e)) => {
                error!("Job {} failed: {}", job_id, e);
                self.queue.fail(&job_id, &e.to_string())
            }
            None => {
                let message = format!("Job exceeded the {:?} wall-clock limit", limit);
                error!("Job {}: {}", job_id, message);
                self.queue.fail(&job_id, &message)
            }
        };

        match recorded {
            Ok(true) => {}
            Ok(false) => warn!("Job {} was no longer processing; outcome not recorded", job_id),
            Err(e) => error!("Failed to record outcome of job {}: {}", job_id, e),
        }
    }
}

/// Time left of `limit` for a job first claimed at `started_at`.
fn remaining_budget(
    started_at: Option<DateTime<Utc>>,
    limit: Duration,
    now: DateTime<Utc>,
) -> Duration {
    let elapsed = started_at
        .and_then(|started| (now - started).to_std().ok())
        .unwrap_or(Duration::ZERO);
    limit.saturating_sub(elapsed)
}
