//! OpenAI embeddings API provider
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Embedding, EmbeddingProvider};

/// Request body for `POST /v1/embeddings`
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Embedding,
}

/// Embedding provider backed by the OpenAI API
pub struct OpenAiEmbeddings {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: Option<u32>,
}

impl OpenAiEmbeddings {
    /// Default API base URL
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            dimensions: None,
        }
    }

    /// Point at a compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Request shortened vectors (text-embedding-3 models only)
    pub fn with_dimensions(mut self, dimensions: Option<u32>) -> Self {
        self.dimensions = dimensions;
        self
    }
}

impl EmbeddingProvider for OpenAiEmbeddings {
    fn embed(&self, inputs: &[String]) -> Result<Vec<Embedding>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };

        let mut response = self
            .agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(&request)
            .context("Failed to send embeddings request")?;

        let parsed: EmbeddingResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse embeddings response")?;

        Ok(into_ordered(parsed))
    }
}

/// Order vectors by the `index` the API reports
fn into_ordered(response: EmbeddingResponse) -> Vec<Embedding> {
    let mut data = response.data;
    data.sort_by_key(|d| d.index);
    data.into_iter().map(|d| d.embedding).collect()
}
