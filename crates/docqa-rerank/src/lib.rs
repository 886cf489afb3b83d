//! Second-pass ordering of search hits with a pairwise relevance scorer.

use std::sync::Arc;
use std::time::Instant;

use docqa_core::traits::RelevanceScorer;
use docqa_core::types::{by_score_desc, RankedCandidate, ScoredCandidate};
use docqa_core::{Error, Result};

#[derive(Clone)]
pub struct Reranker {
    scorer: Arc<dyn RelevanceScorer>,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>) -> Self {
        Self { scorer }
    }

    pub fn scorer_id(&self) -> &str {
        self.scorer.id()
    }

    /// Score every `(question, fragment)` pair and sort by score, best first.
    /// Equal scores keep their input order; NaN scores go last. Nothing is
    /// dropped. Blocking when the scorer runs a local model.
    pub fn rerank(&self, question: &str, candidates: Vec<ScoredCandidate>) -> Result<Vec<RankedCandidate>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let passages: Vec<String> = candidates.iter().map(|c| c.fragment.text.clone()).collect();
        let scores = self
            .scorer
            .score(question, &passages)
            .map_err(|e| Error::Rerank(format!("{e:#}")))?;
        if scores.len() != candidates.len() {
            return Err(Error::Rerank(format!(
                "scorer returned {} scores for {} candidates",
                scores.len(),
                candidates.len()
            )));
        }
        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .zip(scores)
            .map(|(candidate, rerank_score)| RankedCandidate { candidate, rerank_score })
            .collect();
        // `sort_by` is stable.
        ranked.sort_by(|a, b| by_score_desc(a.rerank_score, b.rerank_score));
        tracing::debug!(
            candidates = ranked.len(),
            scorer = self.scorer.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reranked candidates"
        );
        Ok(ranked)
    }
}

/// Keep the `n` best of an already ranked list.
pub fn top_n(mut ranked: Vec<RankedCandidate>, n: usize) -> Vec<RankedCandidate> {
    ranked.truncate(n);
    ranked
}
