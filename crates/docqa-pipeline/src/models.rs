use std::sync::Arc;

use docqa_core::config::Settings;
use docqa_core::traits::{Embedder, RelevanceScorer, TextGenerator};
use docqa_core::{Error, Result};
use docqa_generate::OpenAiCompatibleGenerator;

/// Constructs the model backends. Called at most once per
/// [`PipelineContext`](crate::PipelineContext), on the blocking pool.
pub trait ModelFactory: Send + Sync {
    fn embedder(&self) -> Result<Arc<dyn Embedder>>;
    fn scorer(&self) -> Result<Arc<dyn RelevanceScorer>>;
    fn generator(&self) -> Result<Arc<dyn TextGenerator>>;
}

/// Backends chosen by [`Settings`]: candle models (or the fakes when
/// `use_fake_models` is set) and the OpenAI-compatible HTTP generator.
pub struct ConfiguredModels {
    settings: Settings,
}

impl ConfiguredModels {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl ModelFactory for ConfiguredModels {
    fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        docqa_embed::embedder_from_settings(&self.settings)
            .map_err(|e| Error::Embedding(format!("failed to load '{}': {e:#}", self.settings.embedding_model)))
    }

    fn scorer(&self) -> Result<Arc<dyn RelevanceScorer>> {
        docqa_embed::scorer_from_settings(&self.settings)
            .map_err(|e| Error::Rerank(format!("failed to load '{}': {e:#}", self.settings.reranker_model)))
    }

    fn generator(&self) -> Result<Arc<dyn TextGenerator>> {
        Ok(Arc::new(OpenAiCompatibleGenerator::from_settings(&self.settings)?))
    }
}
