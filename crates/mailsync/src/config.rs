//! Runtime configuration for the sync service
//!
//! Loaded from (later sources override earlier ones):
//! 1. Built-in defaults
//! 2. `mailsync.json` in the mailsync config directory
//! 3. Environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::chunker::Chunker;
use crate::retry::RetryPolicy;

/// Config filename in the mailsync config directory
pub const CONFIG_FILE: &str = "mailsync.json";

/// Default database filename in the mailsync data directory
const DATABASE_FILE: &str = "mailsync.db";

/// All tunables of the sync service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub chunk_max_tokens: usize,
    pub chunk_overlap_tokens: usize,

    pub embedding_model: String,
    pub embedding_dimensions: Option<u32>,

    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    /// Upper bound on any single HTTP call
    pub http_timeout_secs: u64,

    /// Minutes between scheduler passes
    pub schedule_minutes: u64,
    /// Minimum seconds between two runs of one account
    pub sync_cooldown_secs: u64,

    pub list_page_size: usize,
    pub history_page_size: usize,

    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub pinecone_index_host: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    /// SQLite path; defaults to the data directory
    pub database_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_max_tokens: 600,
            chunk_overlap_tokens: 80,
            embedding_model: "text-embedding-3-large".to_string(),
            embedding_dimensions: None,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 1000,
            retry_max_delay_ms: 6000,
            http_timeout_secs: 30,
            schedule_minutes: 15,
            sync_cooldown_secs: 60,
            list_page_size: 500,
            history_page_size: 1000,
            openai_api_key: None,
            openai_base_url: None,
            pinecone_api_key: None,
            pinecone_index_host: None,
            google_client_id: None,
            google_client_secret: None,
            database_path: None,
        }
    }
}

impl SyncConfig {
    /// Load defaults, then the config file, then environment overrides
    pub fn load() -> Result<Self> {
        let mut config = ::config::load_json_if_exists::<Self>(CONFIG_FILE)?.unwrap_or_default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.openai_base_url = Some(v);
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            self.embedding_model = v;
        }
        if let Some(v) = get("EMBEDDING_DIM") {
            self.embedding_dimensions = Some(
                v.trim()
                    .parse()
                    .with_context(|| format!("Invalid EMBEDDING_DIM: {}", v))?,
            );
        }
        if let Some(v) = get("PINECONE_API_KEY") {
            self.pinecone_api_key = Some(v);
        }
        if let Some(v) = get("PINECONE_INDEX_HOST") {
            self.pinecone_index_host = Some(v);
        }
        if let Some(v) = get("GOOGLE_CLIENT_ID") {
            self.google_client_id = Some(v);
        }
        if let Some(v) = get("GOOGLE_CLIENT_SECRET") {
            self.google_client_secret = Some(v);
        }
        if let Some(v) = get("MAILSYNC_DATABASE") {
            self.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SYNC_SCHEDULE_MINUTES") {
            self.schedule_minutes = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid SYNC_SCHEDULE_MINUTES: {}", v))?;
        }
        Ok(())
    }

    /// Retry policy shared by the embedding gateway and vector index
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_initial_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn chunker(&self) -> Chunker {
        Chunker::new(self.chunk_max_tokens, self.chunk_overlap_tokens)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn schedule_period(&self) -> Duration {
        Duration::from_secs(self.schedule_minutes.max(1) * 60)
    }

    /// Resolved database path
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => ::config::data_path(DATABASE_FILE).context("Could not determine data directory"),
        }
    }

    /// Fetch a required secret, naming it in the error
    pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
        value
            .as_deref()
            .with_context(|| format!("{} is not configured", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.chunk_max_tokens, 600);
        assert_eq!(config.chunk_overlap_tokens, 80);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.schedule_period(), Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"chunk_max_tokens": 300, "pinecone_index_host": "h"}"#)
                .unwrap();
        assert_eq!(config.chunk_max_tokens, 300);
        assert_eq!(config.chunk_overlap_tokens, 80);
        assert_eq!(config.pinecone_index_host.as_deref(), Some("h"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SyncConfig::default();
        config
            .apply_env(env(&[
                ("OPENAI_API_KEY", "sk-test"),
                ("EMBEDDING_DIM", "1024"),
                ("SYNC_SCHEDULE_MINUTES", "5"),
                ("MAILSYNC_DATABASE", "/tmp/mail.db"),
                ("PINECONE_API_KEY", "  "),
            ]))
            .unwrap();

        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.embedding_dimensions, Some(1024));
        assert_eq!(config.schedule_minutes, 5);
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/mail.db"));
        assert!(config.pinecone_api_key.is_none());
    }

    #[test]
    fn test_bad_env_number_is_an_error() {
        let mut config = SyncConfig::default();
        assert!(config.apply_env(env(&[("EMBEDDING_DIM", "large")])).is_err());
    }

    #[test]
    fn test_require() {
        let config = SyncConfig::default();
        assert!(SyncConfig::require(&config.openai_api_key, "OPENAI_API_KEY").is_err());
    }
}
