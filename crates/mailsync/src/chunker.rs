//! Overlapping text windows for embedding
//!
//! Splits a document into bounded windows measured in tokens. When no
//! tokenizer is configured, token counts are approximated as
//! [`CHARS_PER_TOKEN`] characters per token and offsets are character
//! offsets; with a tokenizer, offsets are token indices.

use std::ops::Range;
use std::sync::Arc;

/// Characters per token assumed by the fallback mode
pub const CHARS_PER_TOKEN: usize = 4;

/// One window of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Inclusive start offset (token index, or char index in fallback mode)
    pub start: usize,
    /// Exclusive end offset
    pub end: usize,
}

/// Splits text into tokens
pub trait Tokenizer: Send + Sync {
    /// Byte ranges of each token, in order and non-overlapping
    fn token_spans(&self, text: &str) -> Vec<Range<usize>>;
}

/// Treats every maximal run of non-whitespace as one token
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut start = None;
        for (i, c) in text.char_indices() {
            match (c.is_whitespace(), start) {
                (false, None) => start = Some(i),
                (true, Some(s)) => {
                    spans.push(s..i);
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            spans.push(s..text.len());
        }
        spans
    }
}

/// Sliding-window splitter
#[derive(Clone)]
pub struct Chunker {
    max_tokens: usize,
    overlap_tokens: usize,
    tokenizer: Option<Arc<dyn Tokenizer>>,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("max_tokens", &self.max_tokens)
            .field("overlap_tokens", &self.overlap_tokens)
            .field("token_aware", &self.tokenizer.is_some())
            .finish()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(600, 80)
    }
}

impl Chunker {
    /// Create a chunker using the character approximation
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            overlap_tokens,
            tokenizer: None,
        }
    }

    /// Count in real tokens instead of approximating
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Split `text` into overlapping windows.
    ///
    /// Blank input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        match &self.tokenizer {
            Some(tokenizer) => {
                let spans = tokenizer.token_spans(text);
                window_bounds(spans.len(), self.max_tokens, self.overlap_tokens)
                    .into_iter()
                    .map(|(i, j)| Chunk {
                        text: text[spans[i].start..spans[j - 1].end].to_string(),
                        start: i,
                        end: j,
                    })
                    .collect()
            }
            None => {
                // Byte position of every char boundary, including the end
                let bounds: Vec<usize> = text
                    .char_indices()
                    .map(|(b, _)| b)
                    .chain(std::iter::once(text.len()))
                    .collect();
                let char_count = bounds.len() - 1;
                window_bounds(
                    char_count,
                    self.max_tokens * CHARS_PER_TOKEN,
                    self.overlap_tokens * CHARS_PER_TOKEN,
                )
                .into_iter()
                .map(|(i, j)| Chunk {
                    text: text[bounds[i]..bounds[j]].to_string(),
                    start: i,
                    end: j,
                })
                .collect()
            }
        }
    }
}

/// Window `[start, end)` pairs over `len` units.
///
/// Each window after the first starts `overlap` units before the previous
/// end. Overlap is clamped below `size` so every step moves forward.
fn window_bounds(len: usize, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let size = size.max(1);
    let overlap = overlap.min(size - 1);
    let mut windows = Vec::new();
    let mut start = 0;

    while start < len {
        let end = (start + size).min(len);
        windows.push((start, end));
        if end == len {
            break;
        }
        start = end - overlap;
    }

    windows
}
