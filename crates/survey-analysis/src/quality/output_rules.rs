//! Rules applied to parsed model output before it is accepted.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::rule::{Rule, RuleCategory, RuleOutcome, Severity};
use crate::worker::job::AnalysisType;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static NATIONAL_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{11}\b").unwrap());
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}-\d{2}-\d{2}\b|\b\d{1,2}[./]\d{1,2}[./]\d{4}\b").unwrap()
});

const MIN_DEPTH: usize = 2;
const MAX_DEPTH: usize = 10;

/// Caller-supplied facts about the output being checked.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputCheckContext {
    pub analysis_type: Option<AnalysisType>,
}

/// Everything an output rule sees besides the payload itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputCheck {
    pub context: OutputCheckContext,
    pub schema: Option<Value>,
}

pub type OutputRule = Rule<Value, OutputCheck>;

pub fn default_rules() -> Vec<OutputRule> {
    vec![
        Rule {
            id: "well_formed",
            name: "Well-formed payload",
            category: RuleCategory::Structure,
            severity: Severity::Error,
            check: well_formed,
        },
        Rule {
            id: "schema_compliance",
            name: "Schema compliance",
            category: RuleCategory::Structure,
            severity: Severity::Error,
            check: schema_compliance,
        },
        Rule {
            id: "pii_leakage",
            name: "Personal data leakage",
            category: RuleCategory::Compliance,
            severity: Severity::Error,
            check: pii_leakage,
        },
        Rule {
            id: "output_quality",
            name: "Output quality",
            category: RuleCategory::Content,
            severity: Severity::Warning,
            check: output_quality,
        },
        Rule {
            id: "confidence_range",
            name: "Confidence range",
            category: RuleCategory::Content,
            severity: Severity::Info,
            check: confidence_range,
        },
    ]
}

fn well_formed(payload: &Value, _: &OutputCheck) -> RuleOutcome {
    match payload {
        Value::Object(map) if !map.is_empty() => RuleOutcome::pass("Payload is a JSON object"),
        Value::Object(_) => RuleOutcome::fail(
            "Payload is an empty object",
            vec!["Ask the model to fill every section of the output format".to_string()],
        ),
        _ => RuleOutcome::fail(
            "Payload is not a JSON object",
            vec!["Ask the model to answer with a single JSON object".to_string()],
        ),
    }
}

fn schema_compliance(payload: &Value, check: &OutputCheck) -> RuleOutcome {
    let Some(schema) = &check.schema else {
        return RuleOutcome::pass("No schema supplied");
    };
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => {
            return RuleOutcome::fail(
                format!("Schema could not be compiled: {}", e),
                vec!["Fix the output schema".to_string()],
            )
        }
    };

    let errors: Vec<String> = validator
        .iter_errors(payload)
        .take(5)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        RuleOutcome::pass("Payload matches schema")
    } else {
        RuleOutcome::fail(
            format!("Schema violations: {}", errors.join("; ")),
            vec!["Restate the expected JSON structure in the output format section".to_string()],
        )
    }
}

/// Kinds of personal data found in `text`.
pub fn detect_pii(text: &str) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    if EMAIL_RE.is_match(text) {
        kinds.push("email address");
    }
    if NATIONAL_ID_RE.is_match(text) {
        kinds.push("national id number");
    }
    if DATE_RE.is_match(text) {
        kinds.push("specific date");
    }
    kinds
}

fn pii_leakage(payload: &Value, _: &OutputCheck) -> RuleOutcome {
    let kinds = detect_pii(&collect_strings(payload).join("\n"));
    if kinds.is_empty() {
        RuleOutcome::pass("No personal data detected")
    } else {
        RuleOutcome::fail(
            format!("Output contains personal data: {}", kinds.join(", ")),
            vec![
                "Run anonymization at the full level".to_string(),
                "Tell the model never to quote identifying details".to_string(),
            ],
        )
    }
}

/// String leaves and object keys, plus numbers rendered as text.
fn collect_strings(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![value];
    while let Some(v) = stack.pop() {
        match v {
            Value::String(s) => out.push(s.clone()),
            Value::Number(n) => out.push(n.to_string()),
            Value::Array(items) => stack.extend(items),
            Value::Object(map) => {
                for (key, item) in map {
                    out.push(key.clone());
                    stack.push(item);
                }
            }
            Value::Bool(_) | Value::Null => {}
        }
    }
    out
}

/// Nesting depth; scalars are depth 0.
pub fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn output_quality(payload: &Value, check: &OutputCheck) -> RuleOutcome {
    let mut problems = Vec::new();
    let mut suggestions = Vec::new();

    if let Some(analysis_type) = check.context.analysis_type {
        let field = analysis_type.required_field();
        match payload.get(field) {
            Some(Value::Array(items)) if !items.is_empty() => {}
            Some(Value::Array(_)) => {
                problems.push(format!("'{}' is empty", field));
                suggestions.push(format!("Ask for at least one entry in '{}'", field));
            }
            _ => {
                problems.push(format!("'{}' section missing", field));
                suggestions.push(format!("Require a top-level '{}' array", field));
            }
        }
    }

    let d = depth(payload);
    if !(MIN_DEPTH..=MAX_DEPTH).contains(&d) {
        problems.push(format!(
            "nesting depth {} outside {}..={}",
            d, MIN_DEPTH, MAX_DEPTH
        ));
        suggestions.push("Keep the payload to a list of flat objects".to_string());
    }

    if problems.is_empty() {
        RuleOutcome::pass("Expected sections present")
    } else {
        RuleOutcome::fail(problems.join("; "), suggestions)
    }
}

fn confidence_range(payload: &Value, _: &OutputCheck) -> RuleOutcome {
    let mut out_of_range = 0usize;
    let mut stack = vec![payload];
    while let Some(v) = stack.pop() {
        match v {
            Value::Object(map) => {
                for (key, item) in map {
                    if key == "confidence" {
                        match item.as_f64() {
                            Some(c) if (0.0..=1.0).contains(&c) => {}
                            _ => out_of_range += 1,
                        }
                    }
                    stack.push(item);
                }
            }
            Value::Array(items) => stack.extend(items),
            _ => {}
        }
    }

    if out_of_range == 0 {
        RuleOutcome::pass("Confidence values within [0, 1]")
    } else {
        RuleOutcome::fail(
            format!("{} confidence value(s) outside [0, 1]", out_of_range),
            vec!["Ask for confidence as a number between 0 and 1".to_string()],
        )
    }
}
