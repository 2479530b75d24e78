//! Expected payload shape per analysis type.

use serde_json::{json, Value};

use crate::worker::job::AnalysisType;

/// JSON schema the model payload for `analysis_type` must satisfy.
pub fn output_schema(analysis_type: AnalysisType) -> Value {
    let (field, item_required) = match analysis_type {
        AnalysisType::Thematic => ("themes", "name"),
        AnalysisType::Clustering => ("clusters", "name"),
        AnalysisType::Contradiction => ("contradictions", "description"),
        AnalysisType::Insights => ("insights", "description"),
        AnalysisType::Recommendations => ("recommendations", "description"),
    };
    debug_assert_eq!(field, analysis_type.required_field());

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": [field],
        "properties": {
            field: {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": [item_required],
                    "properties": {
                        item_required: { "type": "string" },
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                    }
                }
            },
            "summary": { "type": "string" }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_has_compilable_schema() {
        for analysis_type in AnalysisType::ALL {
            let schema = output_schema(analysis_type);
            assert!(jsonschema::validator_for(&schema).is_ok(), "{analysis_type}");
            assert_eq!(schema["required"][0], analysis_type.required_field());
        }
    }

    #[test]
    fn test_schema_rejects_out_of_range_confidence() {
        let validator = jsonschema::validator_for(&output_schema(AnalysisType::Thematic)).unwrap();
        assert!(validator.is_valid(&json!({"themes": [{"name": "Trainers", "confidence": 0.8}]})));
        assert!(!validator.is_valid(&json!({"themes": [{"name": "Trainers", "confidence": 1.8}]})));
        assert!(!validator.is_valid(&json!({"themes": [{"confidence": 0.5}]})));
    }
}
