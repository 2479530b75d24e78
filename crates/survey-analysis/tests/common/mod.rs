//! Fake collaborators and builders shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use survey_analysis::pipeline::{
    Pipeline, PipelineConfig, PipelineError, ProgressEvent, ProgressReporter,
};
use survey_analysis::quality::QualityValidator;
use survey_analysis::queue::{JobQueue, JobStatusReport};
use survey_analysis::services::{
    AnonymizedResponse, Anonymizer, EmbeddingService, InvokeOptions, ModelResponse, ModelService,
    Questionnaire, ServiceError, ServiceSet, SurveyRepository, SurveyResponse,
};
use survey_analysis::templates::{
    CatalogLoader, InMemoryContent, RenderCache, TemplateRegistry, TemplateRenderer,
};
use survey_analysis::worker::job::{AnalysisType, AnonymizationLevel, Language};

pub const QUESTIONNAIRE_ID: &str = "6f1c2a4e-8d3b-4c7a-9e21-5b0f3d8a1c77";
pub const EMPTY_QUESTIONNAIRE_ID: &str = "0b7e3f52-1a9c-4d68-8f03-2c4e6a9b7d15";
pub const MISSING_QUESTIONNAIRE_ID: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";

pub fn questionnaire(id: &str, language: Language) -> Questionnaire {
    Questionnaire {
        id: id.to_string(),
        kind: "workshop_feedback".to_string(),
        topic: "Civic workshops 2024".to_string(),
        language,
    }
}

pub fn responses() -> Vec<SurveyResponse> {
    [
        ("r1", "The trainers were excellent, Jan Kowalski explained everything"),
        ("r2", "Too little time for the practical part"),
        ("r3", "Trainers were engaged and friendly"),
        ("r4", "I would like more practical exercises"),
    ]
    .into_iter()
    .map(|(id, answer)| SurveyResponse {
        id: id.to_string(),
        question_id: "q1".to_string(),
        question: "What did you think of the workshop?".to_string(),
        answer: answer.to_string(),
    })
    .collect()
}

/// In-memory survey store. Scripted errors are returned, in order, by the
/// next `responses` calls before the stored data is served.
#[derive(Default)]
pub struct FakeRepository {
    questionnaires: HashMap<String, Questionnaire>,
    responses: HashMap<String, Vec<SurveyResponse>>,
    response_errors: Mutex<VecDeque<ServiceError>>,
    response_delay: Option<Duration>,
    pub response_calls: AtomicUsize,
}

impl FakeRepository {
    pub fn standard() -> Self {
        Self::default()
            .with(questionnaire(QUESTIONNAIRE_ID, Language::Pl), responses())
            .with(questionnaire(EMPTY_QUESTIONNAIRE_ID, Language::En), Vec::new())
    }

    pub fn with(mut self, questionnaire: Questionnaire, responses: Vec<SurveyResponse>) -> Self {
        self.responses.insert(questionnaire.id.clone(), responses);
        self.questionnaires
            .insert(questionnaire.id.clone(), questionnaire);
        self
    }

    pub fn fail_responses_with(self, errors: impl IntoIterator<Item = ServiceError>) -> Self {
        self.response_errors.lock().unwrap().extend(errors);
        self
    }

    /// Every `responses` call sleeps this long before answering.
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }
}

#[async_trait]
impl SurveyRepository for FakeRepository {
    async fn questionnaire(&self, id: &str) -> Result<Questionnaire, ServiceError> {
        self.questionnaires
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("Questionnaire {}", id)))
    }

    async fn responses(&self, questionnaire_id: &str) -> Result<Vec<SurveyResponse>, ServiceError> {
        self.response_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.response_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.response_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self
            .responses
            .get(questionnaire_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Replaces the known surname and counts calls.
#[derive(Default)]
pub struct MaskingAnonymizer {
    pub calls: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl Anonymizer for MaskingAnonymizer {
    async fn anonymize(
        &self,
        response: &SurveyResponse,
        level: AnonymizationLevel,
    ) -> Result<AnonymizedResponse, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ServiceError::Rejected("anonymizer refused input".to_string()));
        }
        let text = response.answer.replace("Jan Kowalski", "[PERSON]");
        Ok(AnonymizedResponse::new(response, text, level))
    }
}

#[derive(Default)]
pub struct CountingEmbeddings {
    pub calls: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl EmbeddingService for CountingEmbeddings {
    async fn store_embedding(
        &self,
        _response_id: &str,
        _question_id: &str,
        _text: &str,
        _model_name: &str,
    ) -> Result<(), ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(ServiceError::Unavailable("vector store down".to_string()))
        } else {
            Ok(())
        }
    }
}

/// A valid payload for `analysis_type`.
pub fn valid_payload(analysis_type: AnalysisType) -> String {
    json!({
        analysis_type.required_field(): [
            {"name": "Trainers", "description": "Participants valued the trainers", "confidence": 0.8},
            {"name": "Practice", "description": "More practical exercises wanted", "confidence": 0.6}
        ],
        "summary": "Positive overall"
    })
    .to_string()
}

/// Model fake that recognizes the analysis type from the output format in
/// the system prompt and replies from a per-type script, falling back to a
/// valid payload.
#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<HashMap<AnalysisType, VecDeque<Result<String, ServiceError>>>>,
    pub prompts: Mutex<Vec<(String, String)>>,
    pub options: Mutex<Vec<InvokeOptions>>,
    pub delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn reply(self, analysis_type: AnalysisType, reply: Result<String, ServiceError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(analysis_type)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn all_prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }

    fn detect(system: &str) -> Option<AnalysisType> {
        AnalysisType::ALL
            .into_iter()
            .find(|t| system.contains(&format!("{{\"{}\":", t.required_field())))
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &InvokeOptions,
    ) -> Result<ModelResponse, ServiceError> {
        self.prompts
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        self.options.lock().unwrap().push(options.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let analysis_type = Self::detect(system_prompt)
            .ok_or_else(|| ServiceError::Other("unrecognized prompt".to_string()))?;
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&analysis_type)
            .and_then(VecDeque::pop_front);
        let content = match scripted {
            Some(reply) => reply?,
            None => valid_payload(analysis_type),
        };

        Ok(ModelResponse {
            content,
            model: options.model.clone(),
            tokens_used: 321,
        })
    }
}

/// Handles to the fakes behind a [`ServiceSet`].
pub struct Fakes {
    pub repository: Arc<FakeRepository>,
    pub anonymizer: Arc<MaskingAnonymizer>,
    pub embeddings: Arc<CountingEmbeddings>,
    pub model: Arc<ScriptedModel>,
}

impl Fakes {
    pub fn new(model: ScriptedModel) -> Self {
        Self {
            repository: Arc::new(FakeRepository::standard()),
            anonymizer: Arc::new(MaskingAnonymizer::default()),
            embeddings: Arc::new(CountingEmbeddings::default()),
            model: Arc::new(model),
        }
    }

    pub fn with_repository(mut self, repository: FakeRepository) -> Self {
        self.repository = Arc::new(repository);
        self
    }

    pub fn with_anonymizer(mut self, anonymizer: MaskingAnonymizer) -> Self {
        self.anonymizer = Arc::new(anonymizer);
        self
    }

    pub fn with_embeddings(mut self, embeddings: CountingEmbeddings) -> Self {
        self.embeddings = Arc::new(embeddings);
        self
    }

    pub fn services(&self) -> ServiceSet {
        ServiceSet {
            repository: self.repository.clone(),
            anonymizer: self.anonymizer.clone(),
            embeddings: self.embeddings.clone(),
            model: self.model.clone(),
        }
    }
}

/// Pipeline over the built-in templates.
pub fn build_pipeline(services: ServiceSet) -> (Pipeline, Arc<TemplateRegistry>) {
    let registry = Arc::new(TemplateRegistry::new());
    let content = Arc::new(InMemoryContent::new());
    let validator = Arc::new(QualityValidator::new());
    CatalogLoader::new(&registry, &content, &validator)
        .load_builtin()
        .expect("built-in templates load");

    let renderer = Arc::new(TemplateRenderer::new(content, RenderCache::default()));
    let pipeline = Pipeline::new(
        PipelineConfig::default(),
        services,
        registry.clone(),
        renderer,
        validator,
    );
    (pipeline, registry)
}

/// Collects every pipeline event.
#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn finished_progress(&self) -> Vec<u8> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::TypeFinished { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) -> Result<(), PipelineError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Polls until the job satisfies `done` or the deadline passes.
pub fn wait_for(
    queue: &JobQueue,
    job_id: &str,
    timeout: Duration,
    done: impl Fn(&JobStatusReport) -> bool,
) -> JobStatusReport {
    let deadline = Instant::now() + timeout;
    loop {
        let report = queue.get_status(job_id).expect("job exists");
        if done(&report) || Instant::now() >= deadline {
            return report;
        }
        thread::sleep(Duration::from_millis(20));
    }
}
