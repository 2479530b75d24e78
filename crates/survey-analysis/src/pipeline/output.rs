//! Parsing and scoring of raw model output.

use serde_json::Value;

use super::error::PipelineError;
use crate::worker::job::AnalysisType;

/// Strips a surrounding Markdown code fence, with or without a language tag.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening line.
    match body.split_once('\n') {
        Some((info, content))
            if info
                .trim()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            content.trim()
        }
        _ => body.trim(),
    }
}

/// Parses model text into a payload carrying the type's required array.
pub fn parse_model_output(raw: &str, analysis_type: AnalysisType) -> Result<Value, PipelineError> {
    let text = strip_code_fence(raw);
    let payload: Value =
        serde_json::from_str(text).map_err(|e| PipelineError::MalformedOutput(e.to_string()))?;

    if !payload.is_object() {
        return Err(PipelineError::MalformedOutput(
            "expected a JSON object".to_string(),
        ));
    }
    let field = analysis_type.required_field();
    match payload.get(field) {
        Some(Value::Array(_)) => Ok(payload),
        _ => Err(PipelineError::MissingField(field)),
    }
}

/// Mean of the `confidence` values on the items of the type's main array,
/// falling back to the validation score when no item carries one.
pub fn derive_confidence(payload: &Value, analysis_type: AnalysisType, validation_score: f64) -> f64 {
    let values: Vec<f64> = payload
        .get(analysis_type.required_field())
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("confidence").and_then(Value::as_f64))
                .collect()
        })
        .unwrap_or_default();

    let confidence = if values.is_empty() {
        validation_score / 100.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    };
    confidence.clamp(0.0, 1.0)
}
