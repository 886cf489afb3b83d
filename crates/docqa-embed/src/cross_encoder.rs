use anyhow::{anyhow, Result};
use candle_core::{DType, Device};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaForSequenceClassification};
use std::path::Path;
use std::time::Instant;
use tokenizers::Tokenizer;

use docqa_core::traits::RelevanceScorer;

use crate::device::select_device;
use crate::model_files::ModelFiles;
use crate::tokenize::encode_batch;

/// XLM-RoBERTa cross-encoder (e.g. `BAAI/bge-reranker-v2-m3`). Each
/// `(query, passage)` pair is scored independently; the single logit is
/// squashed with a sigmoid into `0..=1`.
pub struct CrossEncoderScorer {
    id: String,
    model: XLMRobertaForSequenceClassification,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
    batch_size: usize,
}

impl CrossEncoderScorer {
    pub fn load(model_id: &str, model_dir: &Path, max_len: usize, batch_size: usize) -> Result<Self> {
        let started = Instant::now();
        let device = select_device();
        let files = ModelFiles::locate(model_id, model_dir)?;
        let config: XLMRobertaConfig = files.read_config()?;
        let tokenizer = files.load_tokenizer()?;
        let vb = files.var_builder(&device)?;
        let model = XLMRobertaForSequenceClassification::new(1, &config, vb)?;
        let max_len = max_len.min(config.max_position_embeddings.saturating_sub(2)).max(1);
        tracing::info!(
            model = model_id,
            max_len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reranker model loaded"
        );
        Ok(Self {
            id: format!("candle:{model_id}"),
            model,
            tokenizer,
            device,
            max_len,
            batch_size: batch_size.max(1),
        })
    }

    fn score_chunk(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let pairs: Vec<(&str, &str)> = passages.iter().map(|p| (query, p.as_str())).collect();
        let batch = encode_batch(&self.tokenizer, pairs, self.max_len, &self.device)?;
        let logits = self
            .model
            .forward(&batch.input_ids, &batch.attention_mask, &batch.token_type_ids)?;
        let probs = candle_nn::ops::sigmoid(&logits.to_dtype(DType::F32)?)?;
        let scores: Vec<f32> = probs.flatten_all()?.to_device(&Device::Cpu)?.to_vec1()?;
        if scores.len() != passages.len() {
            return Err(anyhow!("reranker returned {} scores for {} passages", scores.len(), passages.len()));
        }
        Ok(scores)
    }
}

impl RelevanceScorer for CrossEncoderScorer {
    fn id(&self) -> &str {
        &self.id
    }

    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(passages.len());
        for chunk in passages.chunks(self.batch_size) {
            out.extend(self.score_chunk(query, chunk)?);
        }
        Ok(out)
    }
}
