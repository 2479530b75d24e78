//! Real-time streaming of job progress to interested subscribers.

pub mod job_progress;

pub use job_progress::{JobProgressBroadcaster, JobProgressEvent};
