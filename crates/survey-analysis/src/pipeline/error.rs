use thiserror::Error;

use crate::queue::{is_transient_message, QueueError};
use crate::services::ServiceError;
use crate::templates::TemplateError;
use crate::worker::job::{AnalysisType, Language};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Questionnaire {0} not found")]
    QuestionnaireNotFound(String),

    #[error("No responses available for questionnaire {0}")]
    NoResponses(String),

    #[error("{stage} failed: {source}")]
    Service {
        stage: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error("Anonymization of response {response_id} failed: {source}")]
    Anonymization {
        response_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("No active template for {category} in language {language}")]
    TemplateNotFound {
        category: AnalysisType,
        language: Language,
    },

    #[error("Template rendering failed: {0}")]
    Template(#[from] TemplateError),

    #[error("Model invocation failed: {0}")]
    ModelInvocation(#[source] ServiceError),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Model output is missing required array '{0}'")]
    MissingField(&'static str),

    #[error("Output rejected by quality gate (score {score:.0}): {rules}")]
    QualityRejected { score: f64, rules: String },

    #[error("Failed to store the {analysis_type} result: {source}")]
    ResultNotStored {
        analysis_type: AnalysisType,
        #[source]
        source: QueueError,
    },
}

impl PipelineError {
    /// Transient errors restart the job after a backoff; everything else is
    /// final.
    pub fn is_retryable(&self) -> bool {
        is_transient_message(&self.to_string())
    }
}
