//! Template definitions and their renderable content, kept as separate types.

use serde::{Deserialize, Serialize};

use crate::worker::job::{AnalysisType, Language};

/// Language scope of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateLanguage {
    Pl,
    En,
    Both,
}

impl TemplateLanguage {
    pub fn supports(&self, language: Language) -> bool {
        matches!(
            (self, language),
            (TemplateLanguage::Both, _)
                | (TemplateLanguage::Pl, Language::Pl)
                | (TemplateLanguage::En, Language::En)
        )
    }
}

/// Running performance averages maintained by feedback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplatePerformance {
    #[serde(default)]
    pub avg_confidence: f64,
    #[serde(default)]
    pub avg_processing_time_ms: f64,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub success_rate: f64,
}

impl TemplatePerformance {
    /// Ranking score used by the selector.
    pub fn score(&self) -> f64 {
        self.avg_confidence * self.success_rate
    }
}

/// Versioned, language- and category-scoped template definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateVersion {
    pub id: String,
    pub version: String,
    pub name: String,
    pub language: TemplateLanguage,
    pub category: AnalysisType,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Generation overrides; the configured model defaults apply otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub performance: TemplatePerformance,
}

fn default_active() -> bool {
    true
}

/// System/user text pair with placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateContent {
    pub system: String,
    pub user: String,
}

impl TemplateContent {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    /// Both halves joined, for rules that inspect the whole text.
    pub fn combined(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}
