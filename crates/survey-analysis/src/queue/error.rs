use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Queue storage error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to encode job data: {0}")]
    Serialization(#[from] serde_json::Error),
}
