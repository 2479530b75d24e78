//! Folding rule outcomes into a validation report.

use std::collections::BTreeSet;

use serde::Serialize;

use super::rule::{Rule, RuleCategory, Severity};

/// A failed rule as it appears in a report bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub rule_id: String,
    pub rule_name: String,
    pub category: RuleCategory,
    pub message: String,
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportMetrics {
    pub rules_run: usize,
    pub passed: usize,
    pub failed: usize,
    /// Failed rules of `error` severity.
    pub critical_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Passed rules as a percentage of rules run.
    pub score: f64,
    /// False iff an `error`-severity rule failed.
    pub passed: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub info: Vec<ValidationIssue>,
    pub metrics: ReportMetrics,
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    /// Ids of every failed rule, errors first.
    pub fn failed_rule_ids(&self) -> Vec<&str> {
        self.errors
            .iter()
            .chain(&self.warnings)
            .chain(&self.info)
            .map(|issue| issue.rule_id.as_str())
            .collect()
    }

    pub fn has_failure(&self, rule_id: &str) -> bool {
        self.failed_rule_ids().contains(&rule_id)
    }

    pub fn issue(&self, rule_id: &str) -> Option<&ValidationIssue> {
        self.errors
            .iter()
            .chain(&self.warnings)
            .chain(&self.info)
            .find(|issue| issue.rule_id == rule_id)
    }
}

fn recommendation(category: RuleCategory) -> &'static str {
    match category {
        RuleCategory::Structure => {
            "Fix structural problems (sections, placeholders, payload shape) before use"
        }
        RuleCategory::Content => "Sharpen instructions and make sure every expected section is filled",
        RuleCategory::Compliance => {
            "Review privacy handling: keep personal data out and state anonymization requirements"
        }
        RuleCategory::Performance => "Shorten the prompt to reduce token usage",
    }
}

/// Runs every rule against the input and folds the outcomes into a report.
pub fn evaluate<I: ?Sized, C>(rules: &[Rule<I, C>], input: &I, context: &C) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut info = Vec::new();
    let mut failed_categories = BTreeSet::new();
    let mut metrics = ReportMetrics {
        rules_run: rules.len(),
        ..Default::default()
    };

    for rule in rules {
        let outcome = (rule.check)(input, context);
        if outcome.passed {
            metrics.passed += 1;
            continue;
        }

        metrics.failed += 1;
        failed_categories.insert(rule.category);
        let issue = ValidationIssue {
            rule_id: rule.id.to_string(),
            rule_name: rule.name.to_string(),
            category: rule.category,
            message: outcome.message,
            suggestions: outcome.suggestions,
            score: outcome.score,
        };
        match rule.severity {
            Severity::Error => {
                metrics.critical_failures += 1;
                errors.push(issue);
            }
            Severity::Warning => warnings.push(issue),
            Severity::Info => info.push(issue),
        }
    }

    let score = if metrics.rules_run == 0 {
        100.0
    } else {
        metrics.passed as f64 / metrics.rules_run as f64 * 100.0
    };

    ValidationReport {
        score,
        passed: metrics.critical_failures == 0,
        errors,
        warnings,
        info,
        metrics,
        recommendations: failed_categories
            .into_iter()
            .map(|c| recommendation(c).to_string())
            .collect(),
    }
}
