pub mod config;
pub mod context;
pub mod error;
pub mod output;
pub mod progress;
pub mod runner;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::PipelineError;
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter, QueueProgress};
pub use runner::{type_progress, Pipeline, RunSummary};
