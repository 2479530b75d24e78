use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("No content registered for template '{0}'")]
    ContentMissing(String),

    #[error("Template syntax error: {0}")]
    Syntax(#[from] handlebars::TemplateError),

    #[error("Failed to render template: {0}")]
    Render(handlebars::RenderError),

    #[error("Missing template variable '{0}'")]
    MissingVariable(String),

    #[error("Failed to read template file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse template document '{origin}': {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to scan template directory: {0}")]
    Scan(#[from] walkdir::Error),

    #[error("Failed to encode render inputs: {0}")]
    Encode(#[from] serde_json::Error),
}
