//! In-memory flat vector index over one document's fragments.

use std::time::Instant;

use docqa_core::traits::Embedder;
use docqa_core::types::{by_score_desc, Fragment, ScoredCandidate};
use docqa_core::{Error, Result};

/// A fragment with the embedding computed for it at ingest time.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub fragment: Fragment,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    embedder_id: String,
    dim: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Assemble an index from already-embedded entries. Every vector must
    /// have `dim` components.
    pub fn from_entries(embedder_id: impl Into<String>, dim: usize, entries: Vec<IndexEntry>) -> Result<Self> {
        if dim == 0 {
            return Err(Error::Embedding("embedding dimension must be positive".into()));
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dim) {
            return Err(Error::Embedding(format!(
                "fragment {} has a {}-dimensional vector, expected {dim}",
                bad.fragment.index,
                bad.vector.len()
            )));
        }
        Ok(Self { embedder_id: embedder_id.into(), dim, entries })
    }

    /// Embed every fragment and build a fresh index. Blocking: the embedder
    /// runs inference on the calling thread.
    pub fn build(fragments: Vec<Fragment>, embedder: &dyn Embedder) -> Result<Self> {
        if fragments.is_empty() {
            return Err(Error::EmptyInput("no fragments to index".into()));
        }
        let started = Instant::now();
        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let vectors = embedder
            .embed_batch(&texts)
            .map_err(|e| Error::Embedding(format!("{e:#}")))?;
        if vectors.len() != fragments.len() {
            return Err(Error::Embedding(format!(
                "embedder returned {} vectors for {} fragments",
                vectors.len(),
                fragments.len()
            )));
        }
        let entries = fragments
            .into_iter()
            .zip(vectors)
            .map(|(fragment, vector)| IndexEntry { fragment, vector: normalized(vector) })
            .collect();
        let index = Self::from_entries(embedder.id(), embedder.dim(), entries)?;
        tracing::info!(
            fragments = index.len(),
            dim = index.dim,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built vector index"
        );
        Ok(index)
    }

    /// Up to `k` entries by cosine similarity, best first; equal scores keep
    /// fragment order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredCandidate>> {
        if query.len() != self.dim {
            return Err(Error::Embedding(format!(
                "query has {} dimensions, index has {}",
                query.len(),
                self.dim
            )));
        }
        let query_norm = norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine(query, query_norm, &e.vector)))
            .collect();
        scored.sort_by(|a, b| by_score_desc(a.1, b.1).then(a.0.cmp(&b.0)));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, score)| ScoredCandidate { fragment: self.entries[i].fragment.clone(), score })
            .collect())
    }

    /// Embed `question` with `embedder` and search.
    pub fn search_text(&self, question: &str, embedder: &dyn Embedder, k: usize) -> Result<Vec<ScoredCandidate>> {
        let mut vectors = embedder
            .embed_batch(&[question.to_string()])
            .map_err(|e| Error::Embedding(format!("{e:#}")))?;
        let query = vectors
            .pop()
            .ok_or_else(|| Error::Embedding("embedder returned no vector for the question".into()))?;
        self.search(&query, k)
    }

    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn normalized(mut v: Vec<f32>) -> Vec<f32> {
    let n = norm(&v);
    if n > 0.0 {
        for x in &mut v {
            *x /= n;
        }
    }
    v
}

fn cosine(query: &[f32], query_norm: f32, stored: &[f32]) -> f32 {
    if query_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(stored).map(|(a, b)| a * b).sum();
    dot / query_norm
}
