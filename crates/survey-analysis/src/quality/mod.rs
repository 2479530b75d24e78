//! Rule-based quality checks for templates and model output.

pub mod output_rules;
pub mod report;
pub mod rule;
pub mod schemas;
pub mod template_rules;
mod validator;

pub use output_rules::{OutputCheck, OutputCheckContext, OutputRule};
pub use report::{ReportMetrics, ValidationIssue, ValidationReport};
pub use rule::{Rule, RuleCategory, RuleOutcome, Severity};
pub use schemas::output_schema;
pub use template_rules::{TemplateCheckContext, TemplateRule};
pub use validator::QualityValidator;
