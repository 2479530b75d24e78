//! Sources of renderable template content.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

use super::definition::TemplateContent;
use super::error::TemplateError;

/// Loads the raw system/user text for a template id.
pub trait ContentSource: Send + Sync {
    fn load(&self, template_id: &str) -> Result<TemplateContent, TemplateError>;

    /// Changes every time the content stored under `template_id` is replaced.
    fn revision(&self, template_id: &str) -> u64;
}

/// Content held in memory, filled by the catalog loader.
#[derive(Default)]
pub struct InMemoryContent {
    entries: RwLock<HashMap<String, (u64, TemplateContent)>>,
    revisions: AtomicU64,
    loads: AtomicUsize,
}

impl InMemoryContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, template_id: impl Into<String>, content: TemplateContent) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Template content lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let revision = self.revisions.fetch_add(1, Ordering::Relaxed) + 1;
        entries.insert(template_id.into(), (revision, content));
    }

    /// Number of `load` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, (u64, TemplateContent)>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Template content lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl ContentSource for InMemoryContent {
    fn load(&self, template_id: &str) -> Result<TemplateContent, TemplateError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.read()
            .get(template_id)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| TemplateError::ContentMissing(template_id.to_string()))
    }

    fn revision(&self, template_id: &str) -> u64 {
        self.read()
            .get(template_id)
            .map_or(0, |(revision, _)| *revision)
    }
}
