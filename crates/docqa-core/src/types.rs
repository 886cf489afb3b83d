//! Domain types shared by the chunker, the vector index and the pipeline.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub type Meta = BTreeMap<String, String>;

/// A contiguous slice of the source document.
///
/// - `index`: position of the fragment in the chunker output
/// - `start`/`end`: byte offsets of `text` inside the source text
/// - `metadata`: opaque key/values carried through to search results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    #[serde(default)]
    pub metadata: Meta,
}

/// A search hit. `score` is cosine similarity: higher is always better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub fragment: Fragment,
    pub score: f32,
}

/// A search hit rescored by the reranker. `rerank_score` is higher-is-better
/// and independent of the similarity metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub candidate: ScoredCandidate,
    pub rerank_score: f32,
}

impl RankedCandidate {
    pub fn text(&self) -> &str {
        &self.candidate.fragment.text
    }
}

/// Comparator for higher-is-better scores: descending, NaN last.
pub fn by_score_desc(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
