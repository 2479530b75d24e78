//! Wires settings, storage, templates and the worker pool into one handle.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::broadcast::JobProgressEvent;
use crate::config::Settings;
use crate::db::{default_database_path, Database};
use crate::error::{ConfigError, Result};
use crate::pipeline::Pipeline;
use crate::quality::QualityValidator;
use crate::queue::{JobQueue, JobStatusReport, QueueHealth};
use crate::services::ServiceSet;
use crate::templates::{CatalogLoader, InMemoryContent, RenderCache, TemplateRegistry, TemplateRenderer};
use crate::worker::{NewJob, WorkerPool};

pub struct AnalysisEngine {
    queue: Arc<JobQueue>,
    registry: Arc<TemplateRegistry>,
    pool: Option<WorkerPool>,
}

impl AnalysisEngine {
    /// Opens the configured database and starts processing.
    pub fn start(settings: &Settings, services: ServiceSet) -> Result<Self> {
        let path = settings
            .database_path
            .clone()
            .or_else(default_database_path)
            .ok_or_else(|| ConfigError::Validation {
                message: "database_path is unset and no home directory was found".to_string(),
            })?;
        let db = Database::open(&path)?;
        Self::start_with_database(settings, services, db)
    }

    pub fn start_with_database(
        settings: &Settings,
        services: ServiceSet,
        db: Database,
    ) -> Result<Self> {
        let queue = Arc::new(JobQueue::new(db));
        let registry = Arc::new(TemplateRegistry::new());
        let content = Arc::new(InMemoryContent::new());
        let validator = Arc::new(QualityValidator::new());

        let loader = CatalogLoader::new(&registry, &content, &validator);
        loader.load_builtin()?;
        if let Some(dir) = &settings.templates_directory {
            loader.load_dir(dir)?;
        }

        let renderer = Arc::new(TemplateRenderer::new(
            content,
            RenderCache::new(settings.cache.max_entries, settings.cache_ttl()),
        ));
        let pipeline = Arc::new(Pipeline::new(
            settings.pipeline_config(),
            services,
            Arc::clone(&registry),
            renderer,
            validator,
        ));
        let pool = WorkerPool::start(Arc::clone(&queue), pipeline, settings.pool_config())?;

        info!(
            templates = registry.len(),
            workers = settings.workers.count,
            "Analysis engine started"
        );
        Ok(Self {
            queue,
            registry,
            pool: Some(pool),
        })
    }

    pub fn submit(&self, job: NewJob) -> Result<String> {
        Ok(self.queue.submit(job)?)
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatusReport> {
        Ok(self.queue.get_status(job_id)?)
    }

    /// Cancels a queued job. Returns `false` when the job already started.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        Ok(self.queue.cancel(job_id)?)
    }

    pub fn health(&self) -> Result<QueueHealth> {
        Ok(self.queue.health()?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.queue.subscribe()
    }

    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Stops the workers after their current jobs and waits for them.
    pub fn shutdown(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
            pool.wait();
        }
        info!("Analysis engine stopped");
    }
}

impl Drop for AnalysisEngine {
    fn drop(&mut self) {
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}
