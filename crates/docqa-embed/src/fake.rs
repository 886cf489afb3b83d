//! Deterministic stand-ins for the candle models, used in tests and when
//! `use_fake_models` is set.

use anyhow::Result;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use docqa_core::traits::{Embedder, RelevanceScorer};

pub const FAKE_DIM: usize = 1024;

/// Hashed bag-of-words embedder. Texts sharing words get similar vectors.
pub struct FakeEmbedder {
    id: String,
    dim: usize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { id: format!("fake:xxhash64:d{dim}"), dim }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in tokens(text) {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let val = 0.5 + ((h >> 32) as u32 as f32) / (u32::MAX as f32);
            v[idx] += val;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        } else {
            v[0] = 1.0;
        }
        v
    }
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self::new(FAKE_DIM)
    }
}

impl Embedder for FakeEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Scores a passage by the fraction of distinct query words it contains.
#[derive(Default)]
pub struct LexicalScorer;

impl RelevanceScorer for LexicalScorer {
    fn id(&self) -> &str {
        "fake:lexical"
    }

    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let query_terms: HashSet<String> = tokens(query).collect();
        if query_terms.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }
        Ok(passages
            .iter()
            .map(|p| {
                let passage_terms: HashSet<String> = tokens(p).collect();
                let hits = query_terms.intersection(&passage_terms).count();
                hits as f32 / query_terms.len() as f32
            })
            .collect())
    }
}

/// Lowercased alphanumeric words.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}
