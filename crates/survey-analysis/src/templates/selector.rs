//! Performance-driven template selection.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use super::definition::TemplateVersion;
use super::registry::TemplateRegistry;
use crate::worker::job::{AnalysisType, Language};

/// Picks the best active template for a (category, language) pair.
#[derive(Clone)]
pub struct TemplateSelector {
    registry: Arc<TemplateRegistry>,
}

impl TemplateSelector {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the candidate with the highest `avg_confidence × success_rate`
    /// among active templates of `category` supporting `language`. Ties go to
    /// the lexicographically smallest id.
    pub fn select_optimal(
        &self,
        category: AnalysisType,
        language: Language,
    ) -> Option<TemplateVersion> {
        let templates = self.registry.read();
        let best = templates
            .values()
            .filter(|t| t.active && t.category == category && t.language.supports(language))
            .max_by(|a, b| compare_candidates(a, b))
            .cloned();

        debug!(
            category = %category,
            language = %language,
            selected = best.as_ref().map(|t| t.id.as_str()).unwrap_or("none"),
            "Template selection"
        );
        best
    }
}

/// Orders candidates so that `max_by` yields the preferred one.
fn compare_candidates(a: &TemplateVersion, b: &TemplateVersion) -> Ordering {
    a.performance
        .score()
        .total_cmp(&b.performance.score())
        .then_with(|| b.id.cmp(&a.id))
}
