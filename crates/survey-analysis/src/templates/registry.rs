//! In-memory catalog of template definitions.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use super::definition::TemplateVersion;
use super::error::TemplateError;

/// Process-wide template catalog. Definitions are never removed; a template
/// is retired by flipping its activation flag.
#[derive(Default)]
pub struct TemplateRegistry {
    templates: RwLock<HashMap<String, TemplateVersion>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a definition. A replacement keeps the accumulated
    /// performance of the previous definition with the same id.
    pub fn register(&self, template: TemplateVersion) {
        let mut templates = self.write();
        let template = match templates.get(&template.id) {
            Some(existing) if existing.performance.usage_count > 0 => TemplateVersion {
                performance: existing.performance,
                ..template
            },
            _ => template,
        };
        info!(
            template_id = %template.id,
            version = %template.version,
            category = %template.category,
            active = template.active,
            "Template registered"
        );
        templates.insert(template.id.clone(), template);
    }

    pub fn get(&self, id: &str) -> Option<TemplateVersion> {
        self.read().get(id).cloned()
    }

    /// Snapshot of all definitions, sorted by id.
    pub fn list(&self) -> Vec<TemplateVersion> {
        let mut all: Vec<TemplateVersion> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<(), TemplateError> {
        let mut templates = self.write();
        let template = templates
            .get_mut(id)
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))?;
        template.active = active;
        info!(template_id = id, active, "Template activation changed");
        Ok(())
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TemplateVersion>> {
        match self.templates.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Template registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TemplateVersion>> {
        match self.templates.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Template registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::templates::definition::{TemplateLanguage, TemplatePerformance};
    use crate::worker::job::AnalysisType;

    pub(crate) fn template(
        id: &str,
        category: AnalysisType,
        language: TemplateLanguage,
        avg_confidence: f64,
        success_rate: f64,
    ) -> TemplateVersion {
        TemplateVersion {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            name: id.to_string(),
            language,
            category,
            active: true,
            max_tokens: None,
            temperature: None,
            performance: TemplatePerformance {
                avg_confidence,
                success_rate,
                usage_count: 10,
                avg_processing_time_ms: 1000.0,
            },
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = TemplateRegistry::new();
        assert!(registry.is_empty());
        registry.register(template("t1", AnalysisType::Thematic, TemplateLanguage::Both, 0.5, 0.5));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("t1").unwrap().category, AnalysisType::Thematic);
        assert!(registry.get("t2").is_none());
    }

    #[test]
    fn test_reregister_keeps_performance() {
        let registry = TemplateRegistry::new();
        registry.register(template("t1", AnalysisType::Thematic, TemplateLanguage::Both, 0.9, 1.0));

        let mut newer = template("t1", AnalysisType::Thematic, TemplateLanguage::Both, 0.0, 0.0);
        newer.version = "1.1.0".to_string();
        newer.performance = TemplatePerformance::default();
        registry.register(newer);

        let stored = registry.get("t1").unwrap();
        assert_eq!(stored.version, "1.1.0");
        assert_eq!(stored.performance.avg_confidence, 0.9);
    }

    #[test]
    fn test_deactivation_is_flag_flip() {
        let registry = TemplateRegistry::new();
        registry.register(template("t1", AnalysisType::Insights, TemplateLanguage::En, 0.5, 0.5));

        registry.set_active("t1", false).unwrap();
        assert!(!registry.get("t1").unwrap().active);
        assert_eq!(registry.list().len(), 1);
        assert!(matches!(
            registry.set_active("nope", false),
            Err(TemplateError::NotFound(_))
        ));
    }
}
