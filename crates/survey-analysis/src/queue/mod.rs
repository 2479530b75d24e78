//! Durable job queue: submission, status, cancellation and claiming.

pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod store;

pub use error::QueueError;
pub use rate_limit::{DequeueLimiter, RateLimitConfig};
pub use retry::{is_transient_message, RetryPolicy};
pub use store::{JobQueue, JobStatusReport, QueueHealth};
