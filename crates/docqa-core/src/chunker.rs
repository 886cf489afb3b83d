//! Overlapping fixed-size splitting of document text.
//!
//! Lengths are measured in characters (Unicode scalar values). A cut prefers,
//! in order: a paragraph break, a line break, a sentence end, any whitespace,
//! and finally a hard cut at the target length. Fragments are slices of the
//! input with separators kept, so skipping the overlap regions reconstructs the
//! text exactly.

use crate::error::{Error, Result};
use crate::types::{Fragment, Meta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 1024, overlap: 128 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    Word,
    Sentence,
    Line,
    Paragraph,
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if config.overlap >= config.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                config.overlap, config.chunk_size
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn split(&self, text: &str) -> Vec<Fragment> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = text.chars().collect();
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = chars.len();
        let size = self.config.chunk_size;

        let mut fragments = Vec::new();
        let mut push = |from: usize, to: usize| {
            let (start, end) = (offsets[from], offsets[to]);
            fragments.push(Fragment {
                index: fragments.len(),
                start,
                end,
                text: text[start..end].to_string(),
                metadata: Meta::new(),
            });
        };

        // Never accept a natural boundary that leaves the fragment shorter
        // than this; it also guarantees forward progress past the overlap.
        let min_len = (size / 2).max(self.config.overlap + 1);
        let mut start = 0usize;
        loop {
            if total - start <= size {
                push(start, total);
                break;
            }
            let limit = start + size;
            let cut = best_cut(&chars, start + min_len, limit);
            push(start, cut);
            start = self.next_start(&chars, cut);
        }
        tracing::debug!(fragments = fragments.len(), chars = total, "split text");
        fragments
    }

    fn next_start(&self, chars: &[char], cut: usize) -> usize {
        let from = cut - self.config.overlap;
        (from..cut)
            .find(|&c| c > 0 && chars[c - 1].is_whitespace() && !chars[c].is_whitespace())
            .unwrap_or(from)
    }
}

/// Latest cut position in `lo..=hi` of the strongest boundary kind, or `hi`.
fn best_cut(chars: &[char], lo: usize, hi: usize) -> usize {
    for kind in [Boundary::Paragraph, Boundary::Line, Boundary::Sentence, Boundary::Word] {
        if let Some(cut) = (lo..=hi).rev().find(|&c| boundary_at(chars, c) >= Some(kind)) {
            return cut;
        }
    }
    hi
}

/// Kind of boundary formed by cutting just before `chars[c]`.
fn boundary_at(chars: &[char], c: usize) -> Option<Boundary> {
    if c == 0 || c > chars.len() {
        return None;
    }
    let prev = chars[c - 1];
    let before = c.checked_sub(2).map(|i| chars[i]);
    if prev == '\n' && before == Some('\n') {
        Some(Boundary::Paragraph)
    } else if prev == '\n' {
        Some(Boundary::Line)
    } else if prev.is_whitespace() && before.is_some_and(|b| matches!(b, '.' | '!' | '?' | '…')) {
        Some(Boundary::Sentence)
    } else if prev.is_whitespace() {
        Some(Boundary::Word)
    } else {
        None
    }
}
