//! Rule descriptors shared by template and output validation.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    Structure,
    Content,
    Compliance,
    Performance,
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleCategory::Structure => "structure",
            RuleCategory::Content => "content",
            RuleCategory::Compliance => "compliance",
            RuleCategory::Performance => "performance",
        };
        f.write_str(name)
    }
}

/// Only `Error` failures block acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Result of evaluating one rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub passed: bool,
    pub score: Option<f64>,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl RuleOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            score: None,
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn fail(message: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            passed: false,
            score: None,
            message: message.into(),
            suggestions,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score.clamp(0.0, 1.0));
        self
    }
}

/// Immutable rule descriptor: metadata plus a pure check over `(input, context)`.
pub struct Rule<I: ?Sized, C> {
    pub id: &'static str,
    pub name: &'static str,
    pub category: RuleCategory,
    pub severity: Severity,
    pub check: fn(&I, &C) -> RuleOutcome,
}

impl<I: ?Sized, C> Clone for Rule<I, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I: ?Sized, C> Copy for Rule<I, C> {}

impl<I: ?Sized, C> fmt::Debug for Rule<I, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("severity", &self.severity)
            .finish()
    }
}
