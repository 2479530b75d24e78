//! Handlebars rendering for prompt templates.
//!
//! Prompts are plain text handed to a model, so HTML escaping is turned off.
//! Two registries are kept: a lenient one that renders missing values as
//! empty text, and a strict one that fails on them.

use handlebars::{no_escape, Handlebars, RenderError, RenderErrorReason, Template};
use serde::Serialize;

use super::error::TemplateError;

pub struct PromptEngine {
    lenient: Handlebars<'static>,
    strict: Handlebars<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        Self {
            lenient: registry(false),
            strict: registry(true),
        }
    }

    pub fn render<T: Serialize>(
        &self,
        source: &str,
        data: &T,
        strict: bool,
    ) -> Result<String, TemplateError> {
        compile(source)?;
        let registry = if strict { &self.strict } else { &self.lenient };
        registry.render_template(source, data).map_err(render_error)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn registry(strict: bool) -> Handlebars<'static> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(strict);
    handlebars.register_escape_fn(no_escape);
    handlebars
}

/// Parses `source` without rendering it.
pub fn compile(source: &str) -> Result<Template, TemplateError> {
    Template::compile(source).map_err(TemplateError::from)
}

fn render_error(err: RenderError) -> TemplateError {
    match err.reason() {
        RenderErrorReason::MissingVariable(path) => {
            TemplateError::MissingVariable(path.clone().unwrap_or_default())
        }
        _ => TemplateError::Render(err),
    }
}
