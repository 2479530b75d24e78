use std::sync::Arc;

use super::error::PipelineError;
use crate::queue::JobQueue;
use crate::worker::job::{AnalysisResult, AnalysisType};

/// Events emitted by the pipeline while a job runs.
/// Response text never appears in an event.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        job_id: String,
        analysis_types: usize,
        responses: usize,
    },
    TypeStarted {
        job_id: String,
        position: usize,
        analysis_type: AnalysisType,
    },
    /// A type's result is final; `progress` is the job's new cumulative value.
    TypeFinished {
        position: usize,
        result: AnalysisResult,
        progress: u8,
    },
}

pub trait ProgressReporter: Send + Sync {
    /// An error aborts the job attempt; a finished type whose result could
    /// not be stored must not be reported as done.
    fn report(&self, event: ProgressEvent) -> Result<(), PipelineError>;
}

/// Discards every event.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Persists finished types through the job queue, which records the result,
/// raises job progress and broadcasts the change.
pub struct QueueProgress {
    queue: Arc<JobQueue>,
}

impl QueueProgress {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }
}

impl ProgressReporter for QueueProgress {
    fn report(&self, event: ProgressEvent) -> Result<(), PipelineError> {
        let ProgressEvent::TypeFinished {
            position,
            result,
            progress,
        } = event
        else {
            return Ok(());
        };
        self.queue
            .finish_analysis(position, &result, progress)
            .map_err(|source| PipelineError::ResultNotStored {
                analysis_type: result.analysis_type,
                source,
            })
    }
}
