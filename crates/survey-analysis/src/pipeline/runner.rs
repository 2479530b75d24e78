use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{join_all, try_join_all};
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::quality::{output_schema, OutputCheckContext, QualityValidator};
use crate::services::{AnonymizedResponse, InvokeOptions, ServiceError, ServiceSet};
use crate::templates::{
    PerformanceSample, RenderOptions, TemplateRegistry, TemplateRenderer, TemplateSelector,
    Variables,
};
use crate::worker::job::{AnalysisJob, AnalysisResult, AnalysisType, ResultMetadata};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;
use super::output::{derive_confidence, parse_model_output};
use super::progress::{ProgressEvent, ProgressReporter};

/// Outcome of a job attempt whose per-type loop ran to the end.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub job_id: String,
    pub results: Vec<AnalysisResult>,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    services: ServiceSet,
    registry: Arc<TemplateRegistry>,
    selector: TemplateSelector,
    renderer: Arc<TemplateRenderer>,
    validator: Arc<QualityValidator>,
}

/// Cumulative progress after finishing type `index` of `total`. Held below
/// 100 until the queue marks the job completed.
pub fn type_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = ((index + 1) as f64 / total as f64 * 100.0).round();
    pct.min(99.0) as u8
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        services: ServiceSet,
        registry: Arc<TemplateRegistry>,
        renderer: Arc<TemplateRenderer>,
        validator: Arc<QualityValidator>,
    ) -> Self {
        let selector = TemplateSelector::new(registry.clone());
        Self {
            config,
            services,
            registry,
            selector,
            renderer,
            validator,
        }
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every requested analysis type for one job attempt.
    ///
    /// Errors returned here are job-level; failures inside a type are
    /// recorded as failed results and the loop moves on.
    pub async fn run(
        &self,
        job: AnalysisJob,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary, PipelineError> {
        let span = info_span!("pipeline",
            job_id = %job.id,
            questionnaire_id = %job.questionnaire_id,
            attempt = job.attempts,
        );
        self.run_inner(PipelineContext::new(job), progress)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        mut ctx: PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary, PipelineError> {
        self.load_inputs(&mut ctx).await?;

        let total = ctx.job.analysis_types.len();
        progress.report(ProgressEvent::Started {
            job_id: ctx.job.id.clone(),
            analysis_types: total,
            responses: ctx.responses.len(),
        })?;
        info!(
            analysis_types = total,
            responses = ctx.responses.len(),
            language = %ctx.language,
            "Pipeline started"
        );

        let types = ctx.job.analysis_types.clone();
        for (position, analysis_type) in types.into_iter().enumerate() {
            progress.report(ProgressEvent::TypeStarted {
                job_id: ctx.job.id.clone(),
                position,
                analysis_type,
            })?;

            let result = self
                .process_type(&ctx, analysis_type)
                .instrument(info_span!("analysis", analysis_type = %analysis_type))
                .await?;

            progress.report(ProgressEvent::TypeFinished {
                position,
                result: result.clone(),
                progress: type_progress(position, total),
            })?;
            ctx.results.push(result);
        }

        let succeeded = ctx.succeeded();
        info!(succeeded, failed = total - succeeded, "Pipeline finished");
        Ok(RunSummary {
            job_id: ctx.job.id.clone(),
            failed: ctx.results.len() - succeeded,
            succeeded,
            results: ctx.results,
        })
    }

    async fn load_inputs(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let questionnaire_id = ctx.job.questionnaire_id.clone();
        let questionnaire = self
            .services
            .repository
            .questionnaire(&questionnaire_id)
            .await
            .map_err(|source| match source {
                ServiceError::NotFound(_) => {
                    PipelineError::QuestionnaireNotFound(questionnaire_id.clone())
                }
                source => PipelineError::Service {
                    stage: "Questionnaire lookup",
                    source,
                },
            })?;

        let responses = self
            .services
            .repository
            .responses(&questionnaire_id)
            .await
            .map_err(|source| PipelineError::Service {
                stage: "Response lookup",
                source,
            })?;
        if responses.is_empty() {
            return Err(PipelineError::NoResponses(questionnaire_id));
        }

        ctx.language = ctx.job.options.language.unwrap_or(questionnaire.language);
        ctx.questionnaire = Some(questionnaire);
        ctx.responses = responses;
        Ok(())
    }

    /// Steps for one type. Anonymization failures escape as job-level
    /// errors; everything after it becomes this type's result.
    async fn process_type(
        &self,
        ctx: &PipelineContext,
        analysis_type: AnalysisType,
    ) -> Result<AnalysisResult, PipelineError> {
        let started = Instant::now();
        let anonymized = self.anonymize(ctx).await?;

        let mut metadata = ResultMetadata {
            responses_analyzed: anonymized.len(),
            ..Default::default()
        };
        let ((), outcome) = tokio::join!(
            self.store_embeddings(&anonymized),
            self.analyze(ctx, analysis_type, &anonymized, &mut metadata)
        );
        metadata.processing_time_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(payload) => {
                debug!(confidence = metadata.confidence, "Analysis succeeded");
                AnalysisResult::success(&ctx.job, analysis_type, payload, metadata)
            }
            Err(e) => {
                warn!(retryable = e.is_retryable(), "Analysis failed: {}", e);
                metadata.confidence = 0.0;
                AnalysisResult::failure(&ctx.job, analysis_type, e.to_string(), metadata)
            }
        };

        if let Some(template_id) = &result.metadata.template_id {
            let sample = PerformanceSample {
                confidence: result.metadata.confidence,
                processing_time_ms: result.metadata.processing_time_ms,
                success: result.is_success(),
            };
            if let Err(e) = self.registry.update_metrics(template_id, sample) {
                warn!(template_id = %template_id, "Performance feedback skipped: {}", e);
            }
        }
        Ok(result)
    }

    async fn anonymize(&self, ctx: &PipelineContext) -> Result<Vec<AnonymizedResponse>, PipelineError> {
        let level = ctx.job.options.anonymization_level;
        let anonymizer = &self.services.anonymizer;
        try_join_all(ctx.responses.iter().map(|response| async move {
            anonymizer
                .anonymize(response, level)
                .await
                .map_err(|source| PipelineError::Anonymization {
                    response_id: response.id.clone(),
                    source,
                })
        }))
        .await
    }

    /// Best-effort; failures are counted and logged only.
    async fn store_embeddings(&self, anonymized: &[AnonymizedResponse]) {
        let embeddings = &self.services.embeddings;
        let model = self.config.embedding_model.as_str();
        let outcomes = join_all(anonymized.iter().map(|r| {
            embeddings.store_embedding(&r.response_id, &r.question_id, &r.text, model)
        }))
        .await;

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        if failed > 0 {
            let first = outcomes
                .iter()
                .find_map(|o| o.as_ref().err())
                .map(ToString::to_string)
                .unwrap_or_default();
            warn!(failed, total = outcomes.len(), "Embedding storage failed: {}", first);
        }
    }

    async fn analyze(
        &self,
        ctx: &PipelineContext,
        analysis_type: AnalysisType,
        anonymized: &[AnonymizedResponse],
        metadata: &mut ResultMetadata,
    ) -> Result<Value, PipelineError> {
        let template = self
            .selector
            .select_optimal(analysis_type, ctx.language)
            .ok_or(PipelineError::TemplateNotFound {
                category: analysis_type,
                language: ctx.language,
            })?;
        metadata.template_id = Some(template.id.clone());
        metadata.template_version = Some(template.version.clone());

        let options = RenderOptions {
            strict: false,
            max_responses: self.config.max_responses,
            custom_instructions: ctx.job.options.custom_prompt.clone(),
        };
        let prompt = self.renderer.render_with_responses(
            &template.id,
            &ctx.render_context(),
            anonymized,
            Variables::new(),
            &options,
        )?;

        let invoke = InvokeOptions {
            model: self.config.model.clone(),
            max_tokens: template.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: template.temperature.unwrap_or(self.config.temperature),
        };
        let response = self
            .services
            .model
            .invoke(&prompt.system, &prompt.user, &invoke)
            .await
            .map_err(PipelineError::ModelInvocation)?;
        metadata.model = Some(response.model.clone());
        metadata.tokens_used = response.tokens_used;
        debug!(
            template_id = %template.id,
            tokens = response.tokens_used,
            "Model responded"
        );

        let payload = parse_model_output(&response.content, analysis_type)?;
        let schema = output_schema(analysis_type);
        let report = self.validator.validate_output(
            &payload,
            Some(&schema),
            Some(&OutputCheckContext {
                analysis_type: Some(analysis_type),
            }),
        );
        if !report.passed {
            return Err(PipelineError::QualityRejected {
                score: report.score,
                rules: report
                    .errors
                    .iter()
                    .map(|issue| issue.rule_id.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        metadata.confidence = derive_confidence(&payload, analysis_type, report.score);
        Ok(payload)
    }
}
