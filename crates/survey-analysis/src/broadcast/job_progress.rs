//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::worker::job::{AnalysisType, JobStatus};

/// Progress event for a job. Emitted on every persisted state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// Overall job status after the change.
    pub status: JobStatus,
    /// Job progress after the change (0–100).
    pub progress: u8,
    /// Analysis type the event refers to, for per-type events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<AnalysisType>,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Error message (set on failures and scheduled retries).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    /// Creates a new progress event.
    pub fn new(job_id: &str, status: JobStatus, progress: u8, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            progress,
            analysis_type: None,
            message: message.to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates an event for a finished analysis type.
    pub fn analysis_finished(
        job_id: &str,
        analysis_type: AnalysisType,
        progress: u8,
        error: Option<&str>,
    ) -> Self {
        let message = match error {
            None => format!("{} analysis completed", analysis_type),
            Some(_) => format!("{} analysis failed", analysis_type),
        };
        Self {
            analysis_type: Some(analysis_type),
            error: error.map(str::to_string),
            ..Self::new(job_id, JobStatus::Processing, progress, &message)
        }
    }

    /// Creates a completion event.
    pub fn completed(job_id: &str) -> Self {
        Self::new(job_id, JobStatus::Completed, 100, "Analysis completed")
    }

    /// Creates a failure event.
    pub fn failed(job_id: &str, progress: u8, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(job_id, JobStatus::Failed, progress, "Analysis failed")
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors() {
        let event = JobProgressEvent::analysis_finished("j1", AnalysisType::Insights, 50, Some("boom"));
        assert_eq!(event.status, JobStatus::Processing);
        assert_eq!(event.analysis_type, Some(AnalysisType::Insights));
        assert_eq!(event.error.as_deref(), Some("boom"));
        assert!(event.message.contains("failed"));

        let done = JobProgressEvent::completed("j1");
        assert_eq!(done.progress, 100);
        assert_eq!(done.status, JobStatus::Completed);

        let failed = JobProgressEvent::failed("j1", 40, "questionnaire missing");
        assert_eq!(failed.progress, 40);
        assert_eq!(failed.status, JobStatus::Failed);
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let json = serde_json::to_value(JobProgressEvent::completed("j1")).unwrap();
        assert_eq!(json["jobId"], "j1");
        assert_eq!(json["status"], "completed");
        assert!(json.get("analysisType").is_none());
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let broadcaster = JobProgressBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(JobProgressEvent::new("j1", JobStatus::Queued, 0, "Job queued"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, "j1");
        assert_eq!(event.status, JobStatus::Queued);
    }

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster.send(JobProgressEvent::completed("j1"));
    }
}
