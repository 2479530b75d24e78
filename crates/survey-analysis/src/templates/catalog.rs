//! Loading template documents into the registry and content store.
//!
//! A template document is a YAML file carrying the definition and its
//! system/user text. Every document is validated before registration; a
//! template with error-severity failures is registered inactive so the
//! selector never picks it.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::content::InMemoryContent;
use super::definition::{TemplateContent, TemplateLanguage, TemplateVersion};
use super::error::TemplateError;
use super::registry::TemplateRegistry;
use crate::quality::{QualityValidator, TemplateCheckContext, ValidationReport};
use crate::worker::job::Language;

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("thematic.yaml", include_str!("../../templates/thematic.yaml")),
    ("thematic_pl.yaml", include_str!("../../templates/thematic_pl.yaml")),
    ("clustering.yaml", include_str!("../../templates/clustering.yaml")),
    ("contradiction.yaml", include_str!("../../templates/contradiction.yaml")),
    ("insights.yaml", include_str!("../../templates/insights.yaml")),
    ("recommendations.yaml", include_str!("../../templates/recommendations.yaml")),
];

/// One YAML file: the definition fields at top level next to the prompt text.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDocument {
    #[serde(flatten)]
    pub definition: TemplateVersion,
    pub system: String,
    pub user: String,
}

impl TemplateDocument {
    pub fn parse(yaml: &str, origin: &str) -> Result<Self, TemplateError> {
        serde_yaml::from_str(yaml).map_err(|source| TemplateError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    pub fn into_parts(self) -> (TemplateVersion, TemplateContent) {
        (self.definition, TemplateContent::new(self.system, self.user))
    }
}

/// What happened to the documents of one load.
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub registered: Vec<String>,
    /// Templates registered inactive, with the report that rejected them.
    pub rejected: Vec<(String, ValidationReport)>,
}

impl LoadSummary {
    fn merge(&mut self, id: String, report: ValidationReport) {
        if report.passed {
            self.registered.push(id);
        } else {
            self.rejected.push((id, report));
        }
    }
}

/// Installs template documents into a registry/content pair.
pub struct CatalogLoader<'a> {
    registry: &'a TemplateRegistry,
    content: &'a InMemoryContent,
    validator: &'a QualityValidator,
}

impl<'a> CatalogLoader<'a> {
    pub fn new(
        registry: &'a TemplateRegistry,
        content: &'a InMemoryContent,
        validator: &'a QualityValidator,
    ) -> Self {
        Self {
            registry,
            content,
            validator,
        }
    }

    /// Validates and registers one document, returning the validation report.
    pub fn install(&self, document: TemplateDocument) -> ValidationReport {
        let (mut version, content) = document.into_parts();
        let language = match version.language {
            TemplateLanguage::Pl => Some(Language::Pl),
            TemplateLanguage::En => Some(Language::En),
            TemplateLanguage::Both => None,
        };
        let report = self.validator.validate_template(
            &content,
            &TemplateCheckContext::for_template(language, version.category),
        );

        if !report.passed {
            warn!(
                template_id = %version.id,
                failed = ?report.failed_rule_ids(),
                "Template failed validation, registering inactive"
            );
            version.active = false;
        }

        self.content.insert(version.id.clone(), content);
        self.registry.register(version);
        report
    }

    pub fn load_builtin(&self) -> Result<LoadSummary, TemplateError> {
        let mut summary = LoadSummary::default();
        for (name, yaml) in BUILTIN_TEMPLATES {
            let document = TemplateDocument::parse(yaml, name)?;
            let id = document.definition.id.clone();
            summary.merge(id, self.install(document));
        }
        info!(
            registered = summary.registered.len(),
            rejected = summary.rejected.len(),
            "Built-in templates loaded"
        );
        Ok(summary)
    }

    /// Loads every `.yaml`/`.yml` file under `dir`, skipping hidden entries.
    pub fn load_dir(&self, dir: &Path) -> Result<LoadSummary, TemplateError> {
        let mut summary = LoadSummary::default();

        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let hidden = path
                .strip_prefix(dir)
                .map(|relative| {
                    relative.components().any(|c| {
                        c.as_os_str()
                            .to_str()
                            .map(|s| s.starts_with('.'))
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if hidden || (ext != "yaml" && ext != "yml") {
                continue;
            }

            let yaml = fs::read_to_string(path).map_err(|source| TemplateError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
            let document = TemplateDocument::parse(&yaml, &path.display().to_string())?;
            let id = document.definition.id.clone();
            summary.merge(id, self.install(document));
        }

        info!(
            dir = %dir.display(),
            registered = summary.registered.len(),
            rejected = summary.rejected.len(),
            "Template directory loaded"
        );
        Ok(summary)
    }
}
