pub mod broadcast;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod quality;
pub mod queue;
pub mod services;
pub mod telemetry;
pub mod templates;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_settings, load_settings_from_str, Settings};
pub use db::{Database, DatabaseError};
pub use engine::AnalysisEngine;
pub use error::{AnalysisError, ConfigError, Result, WorkerError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError};
pub use quality::{QualityValidator, ValidationReport};
pub use queue::{JobQueue, JobStatusReport, QueueError, QueueHealth};
pub use services::{
    AnonymizedResponse, Anonymizer, EmbeddingService, ModelService, Questionnaire, ServiceError,
    ServiceSet, SurveyRepository, SurveyResponse,
};
pub use telemetry::init_tracing;
pub use templates::{TemplateRegistry, TemplateRenderer, TemplateSelector};
pub use worker::{
    AnalysisJob, AnalysisResult, AnalysisType, JobOptions, JobStatus, NewJob, Priority, WorkerPool,
};
