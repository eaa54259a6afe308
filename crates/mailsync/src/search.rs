//! Semantic search over an account's indexed mail
//!
//! Embeds the query, pulls the nearest chunks from the account namespace
//! and returns one hit per thread, best first.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::EmbeddingGateway;
use crate::indexing::CHUNK_TYPE;
use crate::models::MessageId;
use crate::storage::MessageStore;
use crate::vector::{Filter, VectorIndexAdapter};

/// Matches scoring below this are never returned
pub const MIN_SCORE: f32 = 0.25;

/// Matches further than this below the best score are dropped
pub const SCORE_WINDOW: f32 = 0.05;

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub message_id: MessageId,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub score: f32,
}

/// Query-time view of the embedding gateway, vector index and store
pub struct SemanticSearch {
    embeddings: EmbeddingGateway,
    vectors: VectorIndexAdapter,
    store: Arc<dyn MessageStore>,
}

impl SemanticSearch {
    pub fn new(
        embeddings: EmbeddingGateway,
        vectors: VectorIndexAdapter,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            embeddings,
            vectors,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Search an account's mail. Blank queries return nothing.
    pub fn search(&self, account_id: &str, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let Some(vector) = self.embeddings.embed(query)? else {
            return Ok(Vec::new());
        };

        let filter = Filter::eq("type", CHUNK_TYPE);
        let matches = self
            .vectors
            .query_top_k(account_id, &vector, k, Some(&filter))?;

        let Some(best) = matches.iter().map(|m| m.score).reduce(f32::max) else {
            return Ok(Vec::new());
        };
        let floor = MIN_SCORE.max(best - SCORE_WINDOW);

        let mut seen_threads = HashSet::new();
        let mut hits = Vec::new();

        for m in matches.iter().filter(|m| m.score >= floor) {
            let Some(message_id) = m.metadata.get("message_id").and_then(|v| v.as_str()) else {
                continue;
            };
            let message_id = MessageId::new(message_id);

            // Vectors can outlive their message until the delete lands
            let Some(record) = self.store.get_message(account_id, &message_id)? else {
                debug!("Search hit {} has no stored message", message_id);
                continue;
            };

            let thread_key = record
                .thread_id
                .clone()
                .unwrap_or_else(|| message_id.to_string());
            if !seen_threads.insert(thread_key) {
                continue;
            }

            hits.push(SearchHit {
                message_id,
                thread_id: record.thread_id,
                subject: record.subject,
                from: record.from,
                date: record.date,
                snippet: record.snippet,
                score: m.score,
            });
        }

        Ok(hits)
    }
}
