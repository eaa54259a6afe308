//! Embedding gateway
//!
//! Turns text into fixed-length vectors through an [`EmbeddingProvider`],
//! retrying each provider call with the injected [`RetryPolicy`]. Blank
//! inputs are never sent; they come back as `None`.

mod openai;

pub use openai::OpenAiEmbeddings;

use anyhow::{Result, bail};
use std::sync::Arc;

use crate::retry::RetryPolicy;

/// A dense embedding vector
pub type Embedding = Vec<f32>;

/// Backend that produces embeddings
pub trait EmbeddingProvider: Send + Sync {
    /// Embed non-blank inputs, returning one vector per input in order
    fn embed(&self, inputs: &[String]) -> Result<Vec<Embedding>>;
}

/// Retrying front door to an embedding provider
#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// Embed a single text; `None` for blank input
    pub fn embed(&self, text: &str) -> Result<Option<Embedding>> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        Ok(vectors.pop().flatten())
    }

    /// Embed many texts, preserving order and count.
    ///
    /// Blank entries map to `None` without reaching the provider.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Embedding>>> {
        let (positions, inputs): (Vec<usize>, Vec<String>) = texts
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                let trimmed = t.trim();
                (!trimmed.is_empty()).then(|| (i, trimmed.to_string()))
            })
            .unzip();

        let mut out: Vec<Option<Embedding>> = vec![None; texts.len()];
        if inputs.is_empty() {
            return Ok(out);
        }

        let vectors = self
            .retry
            .run("embedding request", || self.provider.embed(&inputs))?;

        if vectors.len() != inputs.len() {
            bail!(
                "Embedding provider returned {} vectors for {} inputs",
                vectors.len(),
                inputs.len()
            );
        }

        for (pos, vector) in positions.into_iter().zip(vectors) {
            out[pos] = Some(vector);
        }
        Ok(out)
    }
}
