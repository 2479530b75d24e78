//! Contracts for the collaborators the pipeline depends on.
//!
//! Survey storage, anonymization, embeddings and the generative model live
//! outside this crate. Implementations are injected as trait objects so a
//! pipeline can run against real services or test doubles.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::worker::job::{AnonymizationLevel, Language};

/// Errors reported by collaborator services.
///
/// Messages follow the transient vocabulary (`timeout`, `connection`,
/// `rate limit`, `temporary`) where applicable so the retry policy can
/// classify them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Service temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

/// Questionnaire metadata used to build the rendering context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Questionnaire {
    pub id: String,
    /// Kind of questionnaire, e.g. `workshop_feedback` or `survey`.
    pub kind: String,
    pub topic: String,
    pub language: Language,
}

/// A single raw answer. Never handed to rendering or the model directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub id: String,
    pub question_id: String,
    pub question: String,
    pub answer: String,
}

/// An answer after de-identification.
///
/// Built by [`Anonymizer`] implementations. Prompt rendering accepts only
/// this type, so a raw response cannot reach the model service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnonymizedResponse {
    pub response_id: String,
    pub question_id: String,
    pub question: String,
    pub text: String,
    pub level: AnonymizationLevel,
}

impl AnonymizedResponse {
    pub fn new(response: &SurveyResponse, text: impl Into<String>, level: AnonymizationLevel) -> Self {
        Self {
            response_id: response.id.clone(),
            question_id: response.question_id.clone(),
            question: response.question.clone(),
            text: text.into(),
            level,
        }
    }
}

/// Generation parameters passed to the model service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvokeOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Raw model output plus usage accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: u32,
}

#[async_trait]
pub trait SurveyRepository: Send + Sync {
    async fn questionnaire(&self, id: &str) -> Result<Questionnaire, ServiceError>;

    async fn responses(&self, questionnaire_id: &str) -> Result<Vec<SurveyResponse>, ServiceError>;
}

#[async_trait]
pub trait Anonymizer: Send + Sync {
    async fn anonymize(
        &self,
        response: &SurveyResponse,
        level: AnonymizationLevel,
    ) -> Result<AnonymizedResponse, ServiceError>;
}

/// Best-effort embedding storage. Failures are logged by the caller and
/// never affect an analysis.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn store_embedding(
        &self,
        response_id: &str,
        question_id: &str,
        text: &str,
        model_name: &str,
    ) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait ModelService: Send + Sync {
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &InvokeOptions,
    ) -> Result<ModelResponse, ServiceError>;
}

/// The collaborators a pipeline is built from.
#[derive(Clone)]
pub struct ServiceSet {
    pub repository: Arc<dyn SurveyRepository>,
    pub anonymizer: Arc<dyn Anonymizer>,
    pub embeddings: Arc<dyn EmbeddingService>,
    pub model: Arc<dyn ModelService>,
}
