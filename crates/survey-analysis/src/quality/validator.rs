use serde_json::Value;
use tracing::debug;

use super::output_rules::{self, OutputCheck, OutputCheckContext, OutputRule};
use super::report::{evaluate, ValidationReport};
use super::template_rules::{self, TemplateCheckContext, TemplateRule};
use crate::templates::definition::TemplateContent;

/// Runs the template and output rule sets.
///
/// Rule sets are fixed at construction; validation itself is a pure
/// function of its inputs.
#[derive(Debug, Clone)]
pub struct QualityValidator {
    template_rules: Vec<TemplateRule>,
    output_rules: Vec<OutputRule>,
}

impl Default for QualityValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityValidator {
    /// Validator with the built-in rule sets.
    pub fn new() -> Self {
        Self {
            template_rules: template_rules::default_rules(),
            output_rules: output_rules::default_rules(),
        }
    }

    /// Validator with no rules; every report passes with score 100.
    pub fn empty() -> Self {
        Self {
            template_rules: Vec::new(),
            output_rules: Vec::new(),
        }
    }

    pub fn with_template_rule(mut self, rule: TemplateRule) -> Self {
        self.template_rules.push(rule);
        self
    }

    pub fn with_output_rule(mut self, rule: OutputRule) -> Self {
        self.output_rules.push(rule);
        self
    }

    pub fn template_rules(&self) -> &[TemplateRule] {
        &self.template_rules
    }

    pub fn output_rules(&self) -> &[OutputRule] {
        &self.output_rules
    }

    pub fn validate_template(
        &self,
        content: &TemplateContent,
        context: &TemplateCheckContext,
    ) -> ValidationReport {
        let report = evaluate(&self.template_rules, content, context);
        debug!(
            score = report.score,
            passed = report.passed,
            failed = report.metrics.failed,
            "Template validated"
        );
        report
    }

    pub fn validate_output(
        &self,
        output: &Value,
        schema: Option<&Value>,
        context: Option<&OutputCheckContext>,
    ) -> ValidationReport {
        let check = OutputCheck {
            context: context.copied().unwrap_or_default(),
            schema: schema.cloned(),
        };
        let report = evaluate(&self.output_rules, output, &check);
        debug!(
            score = report.score,
            passed = report.passed,
            failed = report.metrics.failed,
            "Output validated"
        );
        report
    }
}
