//! Turns a template id plus run-time inputs into a concrete prompt pair.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::cache::{RenderCache, RenderedPrompt};
use super::content::ContentSource;
use super::engine::PromptEngine;
use super::error::TemplateError;
use crate::services::AnonymizedResponse;
use crate::worker::job::Language;

/// Caller-supplied template variables. Ordered so cache keys are canonical.
pub type Variables = BTreeMap<String, Value>;

/// Run-time facts about the questionnaire being analyzed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderContext {
    pub language: Language,
    pub questionnaire_type: String,
    pub response_count: usize,
    pub topic: String,
    pub options: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderOptions {
    /// Fail on placeholders with no value instead of rendering them empty.
    pub strict: bool,
    /// Truncates the `responses` variable to this many entries.
    pub max_responses: Option<usize>,
    /// Appended to the user prompt under its own heading.
    pub custom_instructions: Option<String>,
}

#[derive(Serialize)]
struct KeyInputs<'a> {
    context: &'a RenderContext,
    variables: &'a Variables,
    options: &'a RenderOptions,
}

pub struct TemplateRenderer {
    content: Arc<dyn ContentSource>,
    cache: RenderCache,
    engine: PromptEngine,
}

impl TemplateRenderer {
    pub fn new(content: Arc<dyn ContentSource>, cache: RenderCache) -> Self {
        Self {
            content,
            cache,
            engine: PromptEngine::new(),
        }
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    /// Renders a template, serving identical requests from the cache without
    /// reloading content.
    pub fn render(
        &self,
        template_id: &str,
        context: &RenderContext,
        variables: &Variables,
        options: &RenderOptions,
    ) -> Result<RenderedPrompt, TemplateError> {
        let key = RenderCache::key(
            template_id,
            self.content.revision(template_id),
            &KeyInputs {
                context,
                variables,
                options,
            },
        )?;
        if let Some(hit) = self.cache.get(&key) {
            debug!(template_id, "Render cache hit");
            return Ok(hit);
        }

        let content = self.content.load(template_id)?;
        let scope = build_scope(context, variables, options);

        let system = self.engine.render(&content.system, &scope, options.strict)?;
        let mut user = self.engine.render(&content.user, &scope, options.strict)?;
        if let Some(extra) = options
            .custom_instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            user.push_str("\n\n## Additional instructions\n");
            user.push_str(extra);
        }

        let prompt = RenderedPrompt { system, user };
        self.cache.insert(key, prompt.clone());
        debug!(template_id, "Template rendered");
        Ok(prompt)
    }

    /// Renders with the anonymized response set bound to `responses`.
    pub fn render_with_responses(
        &self,
        template_id: &str,
        context: &RenderContext,
        responses: &[AnonymizedResponse],
        mut variables: Variables,
        options: &RenderOptions,
    ) -> Result<RenderedPrompt, TemplateError> {
        variables.insert("responses".to_string(), response_variables(responses));
        self.render(template_id, context, &variables, options)
    }
}

/// Exposes anonymized responses to templates as `{id, question_id, question, text}`.
pub fn response_variables(responses: &[AnonymizedResponse]) -> Value {
    Value::Array(
        responses
            .iter()
            .map(|r| {
                json!({
                    "id": r.response_id,
                    "question_id": r.question_id,
                    "question": r.question,
                    "text": r.text,
                })
            })
            .collect(),
    )
}

/// Context fields first, caller variables on top.
fn build_scope(context: &RenderContext, variables: &Variables, options: &RenderOptions) -> Value {
    let mut scope = Map::new();
    scope.insert("language".to_string(), json!(context.language.as_str()));
    scope.insert(
        "questionnaire_type".to_string(),
        json!(context.questionnaire_type),
    );
    scope.insert("response_count".to_string(), json!(context.response_count));
    scope.insert("topic".to_string(), json!(context.topic));
    scope.insert(
        "options".to_string(),
        Value::Object(context.options.clone().into_iter().collect()),
    );
    for (name, value) in variables {
        scope.insert(name.clone(), value.clone());
    }

    if let (Some(max), Some(Value::Array(items))) =
        (options.max_responses, scope.get_mut("responses"))
    {
        items.truncate(max);
    }
    Value::Object(scope)
}
