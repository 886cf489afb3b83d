use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const SAFETENSORS: &str = "model.safetensors";
const PYTORCH_BIN: &str = "pytorch_model.bin";

/// Files needed to build an XLM-RoBERTa model.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Look under `model_dir` first (`<model_dir>/<name>` or
    /// `<model_dir>/<org>/<name>`), then fetch from the Hugging Face Hub.
    pub fn locate(model_id: &str, model_dir: &Path) -> Result<Self> {
        let name = model_id.rsplit('/').next().unwrap_or(model_id);
        for dir in [model_dir.join(name), model_dir.join(model_id)] {
            if let Some(files) = Self::in_dir(&dir) {
                tracing::info!(model = model_id, dir = %dir.display(), "using local model files");
                return Ok(files);
            }
        }
        tracing::info!(model = model_id, "model not found locally, downloading from the Hugging Face Hub");
        Self::download(model_id)
    }

    pub fn in_dir(dir: &Path) -> Option<Self> {
        let config = dir.join("config.json");
        let tokenizer = dir.join("tokenizer.json");
        if !config.exists() || !tokenizer.exists() {
            return None;
        }
        let weights = [SAFETENSORS, PYTORCH_BIN].iter().map(|f| dir.join(f)).find(|p| p.exists())?;
        Some(Self { config, tokenizer, weights })
    }

    fn download(model_id: &str) -> Result<Self> {
        let api = Api::new().context("Failed to create HuggingFace API client")?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
        let config = repo.get("config.json").context("Failed to download model config")?;
        let tokenizer = repo.get("tokenizer.json").context("Failed to download tokenizer")?;
        let weights = match repo.get(SAFETENSORS) {
            Ok(p) => p,
            Err(_) => repo.get(PYTORCH_BIN).context("Failed to download model weights")?,
        };
        Ok(Self { config, tokenizer, weights })
    }

    pub fn read_config<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let raw = std::fs::read_to_string(&self.config)
            .with_context(|| format!("Failed to read {}", self.config.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", self.config.display()))
    }

    pub fn load_tokenizer(&self) -> Result<tokenizers::Tokenizer> {
        tokenizers::Tokenizer::from_file(&self.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {e}", self.tokenizer.display()))
    }

    /// Weights as a `VarBuilder`, from safetensors or a PyTorch pickle.
    pub fn var_builder(&self, device: &Device) -> Result<VarBuilder<'static>> {
        let is_safetensors = self.weights.extension().is_some_and(|e| e == "safetensors");
        let tensors: HashMap<String, Tensor> = if is_safetensors {
            candle_core::safetensors::load(&self.weights, device)?
        } else {
            candle_core::pickle::read_all(&self.weights)?.into_iter().collect()
        };
        Ok(VarBuilder::from_tensors(tensors, DType::F32, device))
    }
}
