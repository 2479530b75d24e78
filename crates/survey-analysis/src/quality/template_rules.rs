//! Rules applied to template content before it is used for rendering.

use std::sync::LazyLock;

use handlebars::TemplateErrorReason;
use regex::Regex;

use super::rule::{Rule, RuleCategory, RuleOutcome, Severity};
use crate::templates::definition::TemplateContent;
use crate::templates::{engine, TemplateError};
use crate::worker::job::{AnalysisType, Language};

static OPEN_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{~?#").unwrap());
static CLOSE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{~?/").unwrap());

/// Accepted heading spellings per required section.
const SECTION_ALIASES: &[(&str, &[&str])] = &[
    ("role", &["role", "rola"]),
    ("task", &["task", "zadanie"]),
    ("output format", &["output format", "format odpowiedzi", "format wyniku"]),
];

const IMPERATIVE_KEYWORDS: &[&str] = &[
    "analyze", "analyse", "identify", "list", "return", "group", "summarize", "describe",
    "przeanalizuj", "zidentyfikuj", "wymień", "zwróć", "pogrupuj", "podsumuj", "opisz",
];

const COMPLIANCE_KEYWORDS: &[&str] = &[
    "anonym",
    "personal data",
    "confidential",
    "privacy",
    "do not include",
    "dane osobowe",
    "danych osobowych",
    "poufn",
    "prywatno",
    "nie podawaj",
];

const POLISH_MARKERS: &[&str] = &["polsk", "polish", "{{language}}"];

/// Facts a template is checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateCheckContext {
    pub language: Option<Language>,
    pub category: Option<AnalysisType>,
    /// Canonical section names; each must appear as a heading.
    pub required_sections: Vec<String>,
    /// Upper bound for the estimated prompt size.
    pub max_prompt_tokens: usize,
}

impl Default for TemplateCheckContext {
    fn default() -> Self {
        Self {
            language: None,
            category: None,
            required_sections: SECTION_ALIASES
                .iter()
                .map(|(name, _)| name.to_string())
                .collect(),
            max_prompt_tokens: 1500,
        }
    }
}

impl TemplateCheckContext {
    pub fn for_template(language: Option<Language>, category: AnalysisType) -> Self {
        Self {
            language,
            category: Some(category),
            ..Default::default()
        }
    }
}

pub type TemplateRule = Rule<TemplateContent, TemplateCheckContext>;

pub fn default_rules() -> Vec<TemplateRule> {
    vec![
        Rule {
            id: "required_sections",
            name: "Required sections",
            category: RuleCategory::Structure,
            severity: Severity::Error,
            check: required_sections,
        },
        Rule {
            id: "placeholder_syntax",
            name: "Placeholder syntax",
            category: RuleCategory::Structure,
            severity: Severity::Error,
            check: placeholder_syntax,
        },
        Rule {
            id: "balanced_blocks",
            name: "Balanced blocks",
            category: RuleCategory::Structure,
            severity: Severity::Error,
            check: balanced_blocks,
        },
        Rule {
            id: "instruction_clarity",
            name: "Instruction clarity",
            category: RuleCategory::Content,
            severity: Severity::Warning,
            check: instruction_clarity,
        },
        Rule {
            id: "cultural_adaptation",
            name: "Cultural adaptation",
            category: RuleCategory::Content,
            severity: Severity::Info,
            check: cultural_adaptation,
        },
        Rule {
            id: "compliance_keywords",
            name: "Privacy wording",
            category: RuleCategory::Compliance,
            severity: Severity::Warning,
            check: compliance_keywords,
        },
        Rule {
            id: "token_efficiency",
            name: "Token efficiency",
            category: RuleCategory::Performance,
            severity: Severity::Info,
            check: token_efficiency,
        },
    ]
}

fn heading_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with('#') || (line.ends_with(':') && line.len() < 60))
        .map(|line| line.trim_start_matches('#').trim().to_lowercase())
        .collect()
}

fn required_sections(content: &TemplateContent, ctx: &TemplateCheckContext) -> RuleOutcome {
    let headings = heading_lines(&content.combined());
    let missing: Vec<&str> = ctx
        .required_sections
        .iter()
        .map(String::as_str)
        .filter(|section| {
            let aliases = SECTION_ALIASES
                .iter()
                .find(|(name, _)| name == section)
                .map(|(_, aliases)| *aliases)
                .unwrap_or(&[]);
            !headings.iter().any(|heading| {
                heading.contains(section) || aliases.iter().any(|alias| heading.contains(alias))
            })
        })
        .collect();

    if missing.is_empty() {
        return RuleOutcome::pass("All required sections present");
    }
    let found = ctx.required_sections.len() - missing.len();
    RuleOutcome::fail(
        format!("Missing sections: {}", missing.join(", ")),
        missing
            .iter()
            .map(|section| format!("Add a '## {}' heading describing the {}", title_case(section), section))
            .collect(),
    )
    .with_score(found as f64 / ctx.required_sections.len().max(1) as f64)
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Compile errors per prompt half, split into block-nesting problems and
/// everything else.
fn compile_problems(content: &TemplateContent) -> (Vec<String>, Vec<String>) {
    let mut unbalanced = Vec::new();
    let mut invalid = Vec::new();
    for (half, text) in [("system", &content.system), ("user", &content.user)] {
        let Err(err) = engine::compile(text) else {
            continue;
        };
        let message = format!("{} prompt: {}", half, err);
        if is_block_mismatch(text, &err) {
            unbalanced.push(message);
        } else {
            invalid.push(message);
        }
    }
    (unbalanced, invalid)
}

fn is_block_mismatch(text: &str, err: &TemplateError) -> bool {
    let crossed = matches!(
        err,
        TemplateError::Syntax(inner)
            if matches!(inner.reason(), TemplateErrorReason::MismatchingClosedHelper(..))
    );
    crossed || OPEN_BLOCK_RE.find_iter(text).count() != CLOSE_BLOCK_RE.find_iter(text).count()
}

fn placeholder_syntax(content: &TemplateContent, _: &TemplateCheckContext) -> RuleOutcome {
    let (_, invalid) = compile_problems(content);
    if invalid.is_empty() {
        RuleOutcome::pass("Placeholders well formed")
    } else {
        RuleOutcome::fail(
            invalid.join("; "),
            vec!["Use {{name}}, {{a.b}}, {{#if name}}, {{#each list}} and matching closing tags".to_string()],
        )
    }
}

fn balanced_blocks(content: &TemplateContent, _: &TemplateCheckContext) -> RuleOutcome {
    let (unbalanced, _) = compile_problems(content);
    if unbalanced.is_empty() {
        RuleOutcome::pass("Blocks balanced")
    } else {
        RuleOutcome::fail(
            unbalanced.join("; "),
            vec!["Close every {{#if}} with {{/if}} and every {{#each}} with {{/each}}".to_string()],
        )
    }
}

fn instruction_clarity(content: &TemplateContent, _: &TemplateCheckContext) -> RuleOutcome {
    let user = content.user.to_lowercase();
    let combined = content.combined().to_lowercase();
    let mut suggestions = Vec::new();

    if user.trim().chars().count() < 40 {
        suggestions.push("Expand the user prompt into explicit instructions".to_string());
    }
    if !IMPERATIVE_KEYWORDS.iter().any(|kw| user.contains(kw)) {
        suggestions.push("State the task with an imperative verb such as 'Identify' or 'List'".to_string());
    }
    if !combined.contains("json") {
        suggestions.push("Say that the answer must be JSON".to_string());
    }

    let score = (3 - suggestions.len()) as f64 / 3.0;
    if suggestions.is_empty() {
        RuleOutcome::pass("Instructions are explicit").with_score(score)
    } else {
        RuleOutcome::fail("Instructions could be clearer", suggestions).with_score(score)
    }
}

fn cultural_adaptation(content: &TemplateContent, ctx: &TemplateCheckContext) -> RuleOutcome {
    if ctx.language != Some(Language::Pl) {
        return RuleOutcome::pass("No language-specific adaptation required");
    }
    let combined = content.combined().to_lowercase();
    if POLISH_MARKERS.iter().any(|marker| combined.contains(marker)) {
        RuleOutcome::pass("Template addresses Polish-language responses")
    } else {
        RuleOutcome::fail(
            "Template does not mention the Polish context",
            vec!["Tell the model the responses are in Polish or use {{language}}".to_string()],
        )
    }
}

fn compliance_keywords(content: &TemplateContent, _: &TemplateCheckContext) -> RuleOutcome {
    let combined = content.combined().to_lowercase();
    if COMPLIANCE_KEYWORDS.iter().any(|kw| combined.contains(kw)) {
        RuleOutcome::pass("Privacy handling is stated")
    } else {
        RuleOutcome::fail(
            "Template never mentions anonymity or personal data",
            vec!["Instruct the model not to include personal data in its answer".to_string()],
        )
    }
}

/// Rough token estimate at four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn token_efficiency(content: &TemplateContent, ctx: &TemplateCheckContext) -> RuleOutcome {
    let tokens = estimate_tokens(&content.system) + estimate_tokens(&content.user);
    let score = if tokens == 0 {
        1.0
    } else {
        ctx.max_prompt_tokens as f64 / tokens as f64
    };
    if tokens <= ctx.max_prompt_tokens {
        RuleOutcome::pass(format!("About {} tokens", tokens)).with_score(score)
    } else {
        RuleOutcome::fail(
            format!(
                "About {} tokens, above the {} token budget",
                tokens, ctx.max_prompt_tokens
            ),
            vec!["Remove repeated instructions or long examples".to_string()],
        )
        .with_score(score)
    }
}
