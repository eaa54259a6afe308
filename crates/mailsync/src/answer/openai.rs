//! OpenAI-compatible chat completions

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ChatMessage, ChatModel};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat model behind `POST /v1/chat/completions`
pub struct OpenAiChat {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
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
            temperature: 0.2,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

impl ChatModel for OpenAiChat {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let mut response = self
            .agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(&request)
            .context("Failed to send chat completion request")?;

        let parsed: CompletionResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse chat completion response")?;

        Ok(first_content(parsed))
    }
}

/// Text of the first choice; an empty reply when there is none
fn first_content(response: CompletionResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default()
}
