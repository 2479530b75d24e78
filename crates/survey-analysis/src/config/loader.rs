use std::path::Path;

use crate::config::schema::Settings;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/settings-v1.json");

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let settings: Settings = serde_json::from_value(json_value)?;

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

/// Semantic checks the schema cannot express.
pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            settings.version
        )));
    }
    if settings.workers.count == 0 {
        return Err(invalid("workers.count must be > 0"));
    }
    if settings.rate_limit.max_dequeues == 0 || settings.rate_limit.window_secs == 0 {
        return Err(invalid(
            "rate_limit.max_dequeues and rate_limit.window_secs must be > 0",
        ));
    }
    if settings.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be >= 1"));
    }
    if settings.retry.base_delay_ms > settings.retry.max_delay_ms {
        return Err(invalid(format!(
            "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
            settings.retry.base_delay_ms, settings.retry.max_delay_ms
        )));
    }
    if !(0.0..=2.0).contains(&settings.model.temperature) {
        return Err(invalid(format!(
            "model.temperature {} outside [0, 2]",
            settings.model.temperature
        )));
    }
    if settings.job_timeout_secs == 0 {
        return Err(invalid("job_timeout_secs must be > 0"));
    }
    if settings.model.name.trim().is_empty() {
        return Err(invalid("model.name must not be empty"));
    }

    Ok(())
}
