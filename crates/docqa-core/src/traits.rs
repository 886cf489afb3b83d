use async_trait::async_trait;

use crate::error::Result;

/// Dense text embedder. Implementations return L2-normalized vectors of
/// `dim()` entries and must be deterministic for a given `id()`.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the model (e.g. `candle:BAAI/bge-m3:d1024`).
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Pairwise relevance scorer (cross-encoder). One score per passage,
/// higher is more relevant; the score of a pair never depends on the other
/// passages in the batch.
pub trait RelevanceScorer: Send + Sync {
    fn id(&self) -> &str;
    fn score(&self, query: &str, passages: &[String]) -> anyhow::Result<Vec<f32>>;
}

/// Single-turn text completion backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String>;
}
