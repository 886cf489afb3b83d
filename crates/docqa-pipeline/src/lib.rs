//! Ingest and ask flows over one document.
//!
//! [`PipelineContext`] owns the process state: the active vector index and the
//! lazily constructed model backends. Model inference runs on the blocking
//! pool; the index is swapped as a whole after a successful ingest.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell, RwLock};

use docqa_core::chunker::{Chunker, ChunkingConfig};
use docqa_core::config::Settings;
use docqa_core::document::extract_text;
use docqa_core::prompt::{assemble, PromptTemplate};
use docqa_core::traits::{Embedder, TextGenerator};
use docqa_core::{Error, Result};
use docqa_rerank::{top_n, Reranker};
use docqa_vector::VectorIndex;

pub mod models;
pub mod retry;

pub use models::{ConfiguredModels, ModelFactory};
pub use retry::{with_backoff, RetryPolicy};

/// Model backends shared by every request once initialized.
pub struct Models {
    pub embedder: Arc<dyn Embedder>,
    pub reranker: Reranker,
    pub generator: Arc<dyn TextGenerator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub file_name: String,
    pub fragment_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub answer: String,
    pub sources_used: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub document_loaded: bool,
    pub models_initialized: bool,
}

pub struct PipelineContext {
    settings: Settings,
    chunker: Chunker,
    factory: Arc<dyn ModelFactory>,
    models: OnceCell<Arc<Models>>,
    index: RwLock<Option<Arc<VectorIndex>>>,
    ingest_lock: Mutex<()>,
}

impl PipelineContext {
    pub fn new(settings: Settings, factory: Arc<dyn ModelFactory>) -> Result<Self> {
        settings.validate()?;
        let chunker = Chunker::new(ChunkingConfig {
            chunk_size: settings.chunk_size,
            overlap: settings.chunk_overlap,
        })?;
        Ok(Self {
            settings,
            chunker,
            factory,
            models: OnceCell::new(),
            index: RwLock::new(None),
            ingest_lock: Mutex::new(()),
        })
    }

    /// Context with the backends selected by `settings`.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let factory = Arc::new(ConfiguredModels::new(settings.clone()));
        Self::new(settings, factory)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Construct the embedder, reranker and generator on first call; later
    /// and concurrent callers get the same instances.
    pub async fn ensure_initialized(&self) -> Result<Arc<Models>> {
        let models = self
            .models
            .get_or_try_init(|| async {
                let started = Instant::now();
                let factory = Arc::clone(&self.factory);
                let models = tokio::task::spawn_blocking(move || -> Result<Models> {
                    Ok(Models {
                        embedder: factory.embedder()?,
                        reranker: Reranker::new(factory.scorer()?),
                        generator: factory.generator()?,
                    })
                })
                .await
                .map_err(|e| Error::Internal(format!("model initialization panicked: {e}")))??;
                tracing::info!(
                    embedder = models.embedder.id(),
                    reranker = models.reranker.scorer_id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "models initialized"
                );
                Ok::<_, Error>(Arc::new(models))
            })
            .await?;
        Ok(Arc::clone(models))
    }

    /// Replace the index with the contents of one uploaded document.
    ///
    /// Nothing is changed, in memory or on disk, unless the new index was
    /// built and persisted.
    pub async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<IngestReport> {
        if bytes.is_empty() {
            return Err(Error::Validation(format!("uploaded file '{file_name}' is empty")));
        }
        let _guard = self.ingest_lock.lock().await;
        let started = Instant::now();

        let text = extract_text(file_name, bytes)?;
        let fragments = self.chunker.split(&text);
        if fragments.is_empty() {
            return Err(Error::EmptyInput(format!("'{file_name}' contains no text")));
        }
        let fragment_count = fragments.len();
        tracing::info!(file = file_name, chars = text.chars().count(), fragments = fragment_count, "split document");

        let models = self.ensure_initialized().await?;
        let embedder = Arc::clone(&models.embedder);
        let index = tokio::task::spawn_blocking(move || VectorIndex::build(fragments, embedder.as_ref()))
            .await
            .map_err(|e| Error::Internal(format!("index build panicked: {e}")))??;

        docqa_vector::persist(&index, &self.settings.index_dir).await?;
        *self.index.write().await = Some(Arc::new(index));

        tracing::info!(
            file = file_name,
            fragments = fragment_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document ingested"
        );
        Ok(IngestReport { file_name: file_name.to_string(), fragment_count })
    }

    /// Answer `question` from the ingested document.
    pub async fn ask(&self, question: &str) -> Result<AskResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::Validation("question must not be empty".into()));
        }
        let started = Instant::now();
        let models = self.ensure_initialized().await?;
        let index = self.active_index(&models).await?;

        let k = self.settings.retrieval_k;
        let embedder = Arc::clone(&models.embedder);
        let reranker = models.reranker.clone();
        let owned_question = question.to_string();
        let (candidate_count, selected) = tokio::task::spawn_blocking(move || -> Result<_> {
            let candidates = index.search_text(&owned_question, embedder.as_ref(), k)?;
            let candidate_count = candidates.len();
            let ranked = reranker.rerank(&owned_question, candidates)?;
            Ok((candidate_count, ranked))
        })
        .await
        .map_err(|e| Error::Internal(format!("retrieval panicked: {e}")))??;
        let selected = top_n(selected, self.settings.rerank_top_n);
        tracing::info!(candidates = candidate_count, selected = selected.len(), "retrieved context");

        let template = PromptTemplate::load_or_default(&self.settings.prompt_path)?;
        let texts: Vec<&str> = selected.iter().map(|r| r.text()).collect();
        let prompt = assemble(&template, &texts, question);

        let model = self.settings.generation_model.as_str();
        let generator = Arc::clone(&models.generator);
        let answer = with_backoff(RetryPolicy::from_settings(&self.settings), || {
            let generator = Arc::clone(&generator);
            let prompt = prompt.as_str();
            async move { generator.generate(prompt, model).await }
        })
        .await?;

        tracing::info!(
            sources = selected.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered question"
        );
        Ok(AskResponse { answer, sources_used: selected.len() })
    }

    /// Read-only view of the process state.
    pub async fn status(&self) -> Status {
        let in_memory = self.index.read().await.is_some();
        Status {
            document_loaded: in_memory || docqa_vector::exists(&self.settings.index_dir),
            models_initialized: self.models.initialized(),
        }
    }

    /// The in-memory index, restoring the persisted one on first use.
    async fn active_index(&self, models: &Models) -> Result<Arc<VectorIndex>> {
        if let Some(index) = self.index.read().await.as_ref() {
            return Ok(Arc::clone(index));
        }
        let mut slot = self.index.write().await;
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }
        let restored = match docqa_vector::restore(&self.settings.index_dir, models.embedder.as_ref()).await {
            Ok(index) => Arc::new(index),
            Err(Error::IndexNotFound(path)) => {
                tracing::debug!(path = %path.display(), "no persisted index");
                return Err(Error::NoDocumentIngested);
            }
            Err(e) => return Err(e),
        };
        *slot = Some(Arc::clone(&restored));
        Ok(restored)
    }
}
