//! Rendering cache keyed by the full set of render inputs.

use std::time::Duration;

use moka::sync::Cache;
use serde::Serialize;

use super::error::TemplateError;

/// A rendered system/user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

/// TTL- and size-bounded store of rendered prompts.
///
/// Rendering is pure, so two workers racing on the same key store the same
/// value and no coordination beyond the cache's own is needed.
#[derive(Clone)]
pub struct RenderCache {
    inner: Cache<String, RenderedPrompt>,
}

impl RenderCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Builds the key as the JSON array `[template_id, revision, inputs]`,
    /// so distinct inputs can never share a key.
    pub fn key<T: Serialize>(
        template_id: &str,
        revision: u64,
        inputs: &T,
    ) -> Result<String, TemplateError> {
        Ok(serde_json::to_string(&(template_id, revision, inputs))?)
    }

    pub fn get(&self, key: &str) -> Option<RenderedPrompt> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: String, prompt: RenderedPrompt) {
        self.inner.insert(key, prompt);
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(1_000, Duration::from_secs(3_600))
    }
}
