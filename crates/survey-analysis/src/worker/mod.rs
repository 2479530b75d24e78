pub mod job;
pub mod pool;

pub use job::{
    AnalysisJob, AnalysisResult, AnalysisType, AnonymizationLevel, JobOptions, JobStatus,
    Language, NewJob, Priority, ResultMetadata, ResultStatus,
};
pub use pool::{PoolConfig, WorkerPool};
