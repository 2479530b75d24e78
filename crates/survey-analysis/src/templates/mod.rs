//! Prompt templates: definitions, selection, rendering and feedback.

pub mod cache;
pub mod catalog;
pub mod content;
pub mod definition;
pub mod engine;
mod error;
pub mod feedback;
pub mod registry;
pub mod renderer;
pub mod selector;

pub use cache::{RenderCache, RenderedPrompt};
pub use catalog::{CatalogLoader, LoadSummary, TemplateDocument};
pub use content::{ContentSource, InMemoryContent};
pub use definition::{TemplateContent, TemplateLanguage, TemplatePerformance, TemplateVersion};
pub use error::TemplateError;
pub use feedback::PerformanceSample;
pub use registry::TemplateRegistry;
pub use renderer::{RenderContext, RenderOptions, TemplateRenderer, Variables};
pub use selector::TemplateSelector;
