//! Embedding and reranking models.
//!
//! Real models run on candle (XLM-RoBERTa family, weights from a local
//! directory or the Hugging Face Hub); the fakes are hash/lexical based and
//! need no files.

use anyhow::Result;
use std::sync::Arc;

use docqa_core::config::Settings;
use docqa_core::traits::{Embedder, RelevanceScorer};

pub mod bge_m3;
pub mod cross_encoder;
pub mod device;
pub mod fake;
pub mod model_files;
pub mod pool;
pub mod tokenize;

pub use bge_m3::XlmRobertaEmbedder;
pub use cross_encoder::CrossEncoderScorer;
pub use fake::{FakeEmbedder, LexicalScorer};
pub use pool::{cls_l2, masked_mean_l2, Pooling};

/// Build the embedder selected by `settings`. Loading a real model is slow
/// and blocking; call from a blocking context.
pub fn embedder_from_settings(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    if settings.use_fake_models {
        tracing::info!("using FakeEmbedder");
        return Ok(Arc::new(FakeEmbedder::default()));
    }
    let model = XlmRobertaEmbedder::load(
        &settings.embedding_model,
        &settings.model_dir,
        settings.max_seq_len,
        settings.embed_batch_size,
    )?;
    Ok(Arc::new(model))
}

/// Build the relevance scorer selected by `settings`.
pub fn scorer_from_settings(settings: &Settings) -> Result<Arc<dyn RelevanceScorer>> {
    if settings.use_fake_models {
        tracing::info!("using LexicalScorer");
        return Ok(Arc::new(LexicalScorer));
    }
    let model = CrossEncoderScorer::load(
        &settings.reranker_model,
        &settings.model_dir,
        settings.max_seq_len,
        settings.embed_batch_size,
    )?;
    Ok(Arc::new(model))
}
