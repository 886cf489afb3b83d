use anyhow::{anyhow, Result};
use candle_core::Device;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use std::path::Path;
use std::time::Instant;
use tokenizers::Tokenizer;

use docqa_core::traits::Embedder;

use crate::device::select_device;
use crate::model_files::ModelFiles;
use crate::pool::Pooling;
use crate::tokenize::encode_batch;

/// Dense XLM-RoBERTa sentence embedder (BGE-M3 and relatives) on candle.
pub struct XlmRobertaEmbedder {
    id: String,
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    pooling: Pooling,
    dim: usize,
    max_len: usize,
    batch_size: usize,
}

impl XlmRobertaEmbedder {
    pub fn load(model_id: &str, model_dir: &Path, max_len: usize, batch_size: usize) -> Result<Self> {
        let started = Instant::now();
        let device = select_device();
        let files = ModelFiles::locate(model_id, model_dir)?;
        let config: XLMRobertaConfig = files.read_config()?;
        let tokenizer = files.load_tokenizer()?;
        let vb = files.var_builder(&device)?;
        let model = XLMRobertaModel::new(&config, vb)?;
        let dim = config.hidden_size;
        let max_len = max_len.min(config.max_position_embeddings.saturating_sub(2)).max(1);
        tracing::info!(
            model = model_id,
            dim,
            max_len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedding model loaded"
        );
        Ok(Self {
            id: format!("candle:{model_id}:d{dim}"),
            model,
            tokenizer,
            device,
            pooling: Pooling::for_model(model_id),
            dim,
            max_len,
            batch_size: batch_size.max(1),
        })
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let batch = encode_batch(&self.tokenizer, inputs, self.max_len, &self.device)?;
        let hidden = self.model.forward(
            &batch.input_ids,
            &batch.attention_mask,
            &batch.token_type_ids,
            None,
            None,
            None,
        )?;
        let pooled = self.pooling.apply(&hidden, &batch.attention_mask)?;
        let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_vec2()?;
        if rows.iter().any(|r| r.len() != self.dim) {
            return Err(anyhow!("model returned vectors of unexpected width (expected {})", self.dim));
        }
        Ok(rows)
    }
}

impl Embedder for XlmRobertaEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let started = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            out.extend(self.embed_chunk(chunk)?);
        }
        tracing::debug!(texts = texts.len(), elapsed_ms = started.elapsed().as_millis() as u64, "embedded batch");
        Ok(out)
    }
}
