use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs};
use async_trait::async_trait;

use crate::error::AppError;

/// Optional capability: text embeddings for the semantic-coherence quality
/// component. Absence degrades the composite formula, it never fails a
/// translation.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

/// Embedder backed by an OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbedder {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
    dimensions: u32,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, base_url: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            client: async_openai::Client::with_config(config),
            model: "text-embedding-3-small".to_string(),
            dimensions: 256,
        }
    }

    pub fn with_model(mut self, model: &str, dimensions: u32) -> Self {
        self.model = model.to_string();
        self.dimensions = dimensions;
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(self.dimensions)
            .input([text])
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        let embedding = response
            .data
            .first()
            .ok_or_else(|| AppError::InternalError("no embedding data received".into()))?
            .embedding
            .clone();

        Ok(embedding)
    }
}

/// Cosine similarity clamped to [0, 1]; 0 for degenerate vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}
