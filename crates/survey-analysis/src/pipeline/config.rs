/// Generation defaults and limits applied by a [`super::Pipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Model name passed to the embedding service.
    pub embedding_model: String,
    /// Caps how many responses are rendered into one prompt.
    pub max_responses: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4000,
            temperature: 0.3,
            embedding_model: "text-embedding-3-small".to_string(),
            max_responses: None,
        }
    }
}
