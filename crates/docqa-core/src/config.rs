//! Configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + legacy variable names + `APP_*` env vars into [`Settings`].

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment names understood for compatibility with existing deployments,
/// mapped onto `Settings` keys.
const LEGACY_ENV: [(&str, &str); 5] = [
    ("EMB_MODEL_NAME", "embedding_model"),
    ("RERANKER_MODEL_NAME", "reranker_model"),
    ("MODEL_NAME", "generation_model"),
    ("BASE_URL", "generation_base_url"),
    ("OPEN_ROUTER_API_KEY", "generation_api_key"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding_model: String,
    pub reranker_model: String,
    pub generation_model: String,
    pub generation_base_url: String,
    pub generation_api_key: Option<String>,
    pub generation_timeout_secs: u64,
    pub generation_max_retries: u32,
    pub generation_retry_base_ms: u64,
    pub model_dir: PathBuf,
    pub use_fake_models: bool,
    pub index_dir: PathBuf,
    pub prompt_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_k: usize,
    pub rerank_top_n: usize,
    pub max_seq_len: usize,
    pub embed_batch_size: usize,
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding_model: "BAAI/bge-m3".to_string(),
            reranker_model: "BAAI/bge-reranker-v2-m3".to_string(),
            generation_model: "qwen/qwen3-14b:free".to_string(),
            generation_base_url: "https://openrouter.ai/api/v1".to_string(),
            generation_api_key: None,
            generation_timeout_secs: 120,
            generation_max_retries: 3,
            generation_retry_base_ms: 1000,
            model_dir: PathBuf::from("models"),
            use_fake_models: false,
            index_dir: PathBuf::from("data/index"),
            prompt_path: PathBuf::from("prompt.txt"),
            chunk_size: 1024,
            chunk_overlap: 128,
            retrieval_k: 30,
            rerank_top_n: 5,
            max_seq_len: 512,
            embed_batch_size: 16,
            host: "127.0.0.1".to_string(),
            port: 5000,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.retrieval_k == 0 || self.rerank_top_n == 0 {
            return Err(Error::InvalidConfig("retrieval_k and rerank_top_n must be positive".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::InvalidConfig("embed_batch_size must be positive".into()));
        }
        Ok(())
    }

    /// Expand and anchor every configured path at `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        self.model_dir = resolve_with_base(base, self.model_dir.to_string_lossy());
        self.index_dir = resolve_with_base(base, self.index_dir.to_string_lossy());
        self.prompt_path = resolve_with_base(base, self.prompt_path.to_string_lossy());
        self
    }
}

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(legacy_env()).merge(Env::prefixed("APP_"));

        let config = Self::from_figment(figment);
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// Typed settings with paths resolved against the working directory.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        let base = env::current_dir()?;
        Ok(settings.resolve_paths(&base))
    }

    fn validate_for_env(&self, env: &str) -> Result<()> {
        if matches!(env, "prod" | "production") {
            let key: Option<String> = self.get("generation_api_key").unwrap_or(None);
            if key.as_deref().map_or(true, str::is_empty) {
                tracing::warn!("generation_api_key is not set; the generation backend may reject requests");
            }
        }
        Ok(())
    }
}

fn legacy_env() -> Env {
    let names: Vec<&str> = LEGACY_ENV.iter().map(|(name, _)| *name).collect();
    Env::raw().only(&names).map(|key| {
        LEGACY_ENV
            .iter()
            .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
            .map_or_else(|| key.as_str().to_string(), |(_, field)| (*field).to_string())
            .into()
    })
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
