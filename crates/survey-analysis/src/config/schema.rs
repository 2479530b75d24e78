use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineConfig;
use crate::queue::{RateLimitConfig, RetryPolicy};
use crate::worker::PoolConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub version: String,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Defaults to `~/.survey-analysis/data/analysis.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Extra YAML templates loaded on top of the built-in set.
    #[serde(default)]
    pub templates_directory: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_job_timeout_secs() -> u64 {
    600
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            workers: WorkersConfig::default(),
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
            job_timeout_secs: default_job_timeout_secs(),
            cache: CacheConfig::default(),
            model: ModelConfig::default(),
            embedding_model: default_embedding_model(),
            database_path: None,
            templates_directory: None,
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers.count,
            poll_interval: Duration::from_millis(self.workers.poll_interval_ms),
            rate_limit: RateLimitConfig {
                max_dequeues: self.rate_limit.max_dequeues,
                window: Duration::from_secs(self.rate_limit.window_secs),
            },
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
            },
            job_timeout: Duration::from_secs(self.job_timeout_secs),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            model: self.model.name.clone(),
            max_tokens: self.model.max_tokens,
            temperature: self.model.temperature,
            embedding_model: self.embedding_model.clone(),
            max_responses: self.model.max_responses,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_worker_count() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_dequeues")]
    pub max_dequeues: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_dequeues() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_dequeues: default_max_dequeues(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_max_entries() -> u64 {
    1000
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Caps how many responses go into one prompt.
    #[serde(default)]
    pub max_responses: Option<usize>,
}

fn default_model_name() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_temperature() -> f32 {
    0.3
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_responses: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `SURVEY_ANALYSIS_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}
