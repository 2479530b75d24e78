//! Analysis jobs and the per-type results they produce.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Analytical lens applied to a questionnaire's response set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Thematic,
    Clustering,
    Contradiction,
    Insights,
    Recommendations,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 5] = [
        AnalysisType::Thematic,
        AnalysisType::Clustering,
        AnalysisType::Contradiction,
        AnalysisType::Insights,
        AnalysisType::Recommendations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Thematic => "thematic",
            AnalysisType::Clustering => "clustering",
            AnalysisType::Contradiction => "contradiction",
            AnalysisType::Insights => "insights",
            AnalysisType::Recommendations => "recommendations",
        }
    }

    /// Top-level field a model payload for this type must carry.
    pub fn required_field(&self) -> &'static str {
        match self {
            AnalysisType::Thematic => "themes",
            AnalysisType::Clustering => "clusters",
            AnalysisType::Contradiction => "contradictions",
            AnalysisType::Insights => "insights",
            AnalysisType::Recommendations => "recommendations",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown analysis type '{}'", s))
    }
}

/// Language of a questionnaire and of the prompts sent for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Pl,
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Pl => "pl",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// De-identification strength applied before responses leave the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnonymizationLevel {
    #[default]
    Partial,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Numeric weight used for queue ordering; higher is claimed first.
    pub fn weight(&self) -> i64 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 5,
            Priority::High => 10,
            Priority::Urgent => 20,
        }
    }

    pub fn from_weight(weight: i64) -> Self {
        match weight {
            w if w >= 20 => Priority::Urgent,
            w if w >= 10 => Priority::High,
            w if w >= 5 => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

/// Public lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Free-form job options. Unknown keys are kept in `extra` and exposed to
/// templates alongside the named ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default)]
    pub anonymization_level: AnonymizationLevel,
    /// Overrides the questionnaire's language when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cluster_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_clusters: Option<u32>,
    /// Appended to the rendered user prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A request to analyze a questionnaire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub questionnaire_id: String,
    pub analysis_types: Vec<AnalysisType>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub options: JobOptions,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewJob {
    pub fn new(questionnaire_id: impl Into<String>, analysis_types: Vec<AnalysisType>) -> Self {
        Self {
            questionnaire_id: questionnaire_id.into(),
            analysis_types,
            priority: Priority::default(),
            options: JobOptions::default(),
            created_by: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }
}

/// A persisted job as seen by the worker that owns it.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisJob {
    pub id: String,
    pub questionnaire_id: String,
    pub analysis_types: Vec<AnalysisType>,
    pub status: JobStatus,
    pub priority: Priority,
    pub progress: u8,
    pub options: JobOptions,
    pub created_by: Option<String>,
    pub error: Option<String>,
    /// Number of times the job has been claimed, including the current one.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Completed => "completed",
            ResultStatus::Failed => "failed",
        }
    }
}

/// Observations recorded for one analysis type attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub template_version: Option<String>,
    #[serde(default)]
    pub tokens_used: u32,
    #[serde(default)]
    pub processing_time_ms: u64,
    /// Derived confidence in `[0, 1]`; zero for failures.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub responses_analyzed: usize,
}

/// Outcome of one analysis type within one job attempt. Never mutated
/// after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub job_id: String,
    pub attempt: u32,
    pub analysis_type: AnalysisType,
    pub status: ResultStatus,
    pub payload: Option<serde_json::Value>,
    pub metadata: ResultMetadata,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn success(
        job: &AnalysisJob,
        analysis_type: AnalysisType,
        payload: serde_json::Value,
        metadata: ResultMetadata,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            attempt: job.attempts,
            analysis_type,
            status: ResultStatus::Completed,
            payload: Some(payload),
            metadata,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn failure(
        job: &AnalysisJob,
        analysis_type: AnalysisType,
        error: String,
        metadata: ResultMetadata,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            attempt: job.attempts,
            analysis_type,
            status: ResultStatus::Failed,
            payload: None,
            metadata,
            error: Some(error),
            created_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_type_parse_and_fields() {
        assert_eq!("thematic".parse::<AnalysisType>(), Ok(AnalysisType::Thematic));
        assert!("sentiment".parse::<AnalysisType>().is_err());
        assert_eq!(AnalysisType::Clustering.required_field(), "clusters");
        assert_eq!(AnalysisType::Contradiction.required_field(), "contradictions");
    }

    #[test]
    fn test_priority_weights_ordered() {
        let weights: Vec<i64> = [Priority::Low, Priority::Medium, Priority::High, Priority::Urgent]
            .iter()
            .map(Priority::weight)
            .collect();
        assert!(weights.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Priority::from_weight(Priority::High.weight()), Priority::High);
    }

    #[test]
    fn test_job_status_roundtrip_and_terminal() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_job_options_keep_unknown_keys() {
        let options: JobOptions = serde_json::from_str(
            r#"{"anonymization_level":"full","min_cluster_size":3,"focus":"workshops"}"#,
        )
        .unwrap();
        assert_eq!(options.anonymization_level, AnonymizationLevel::Full);
        assert_eq!(options.min_cluster_size, Some(3));
        assert_eq!(options.extra["focus"], "workshops");
    }

    #[test]
    fn test_job_options_defaults() {
        let options: JobOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.anonymization_level, AnonymizationLevel::Partial);
        assert!(options.language.is_none());
        assert!(options.custom_prompt.is_none());
    }
}
