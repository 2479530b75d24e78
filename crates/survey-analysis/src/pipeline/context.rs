use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::services::{Questionnaire, SurveyResponse};
use crate::templates::RenderContext;
use crate::worker::job::{AnalysisJob, AnalysisResult, Language};

/// State accumulated while one job attempt runs.
pub struct PipelineContext {
    pub job: AnalysisJob,

    // Set by input loading
    pub questionnaire: Option<Questionnaire>,
    pub responses: Vec<SurveyResponse>,
    pub language: Language,

    // One entry per processed type, in requested order
    pub results: Vec<AnalysisResult>,
}

impl PipelineContext {
    pub fn new(job: AnalysisJob) -> Self {
        let language = job.options.language.unwrap_or_default();
        Self {
            job,
            questionnaire: None,
            responses: Vec::new(),
            language,
            results: Vec::new(),
        }
    }

    /// Rendering facts for this job. Job options are exposed under `options`.
    pub fn render_context(&self) -> RenderContext {
        let (kind, topic) = self
            .questionnaire
            .as_ref()
            .map(|q| (q.kind.clone(), q.topic.clone()))
            .unwrap_or_default();

        let options = &self.job.options;
        let mut exposed: BTreeMap<String, Value> = options.extra.clone();
        exposed.insert(
            "anonymization_level".to_string(),
            json!(options.anonymization_level),
        );
        if let Some(size) = options.min_cluster_size {
            exposed.insert("min_cluster_size".to_string(), json!(size));
        }
        if let Some(max) = options.max_clusters {
            exposed.insert("max_clusters".to_string(), json!(max));
        }

        RenderContext {
            language: self.language,
            questionnaire_type: kind,
            response_count: self.responses.len(),
            topic,
            options: exposed,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}
