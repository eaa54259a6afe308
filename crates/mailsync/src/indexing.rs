//! Chunk -> embed -> upsert pipeline for one message
//!
//! Vectors live in the namespace named after the owning account and are
//! keyed `"{message_id}#{chunk_index}"`.

use anyhow::Result;
use log::debug;
use serde_json::{Value, json};

use crate::chunker::Chunker;
use crate::embedding::EmbeddingGateway;
use crate::models::{MessageId, MessageRecord};
use crate::vector::{Filter, Metadata, VectorIndexAdapter, VectorRecord};

/// `type` metadata value carried by every message chunk vector
pub const CHUNK_TYPE: &str = "email_chunk";

/// Vector id for one chunk of a message
pub fn chunk_vector_id(message_id: &MessageId, chunk_index: usize) -> String {
    format!("{}#{}", message_id, chunk_index)
}

/// Turns message records into vectors and keeps the index in step
#[derive(Clone)]
pub struct MessageIndexer {
    chunker: Chunker,
    embeddings: EmbeddingGateway,
    vectors: VectorIndexAdapter,
}

impl MessageIndexer {
    pub fn new(chunker: Chunker, embeddings: EmbeddingGateway, vectors: VectorIndexAdapter) -> Self {
        Self {
            chunker,
            embeddings,
            vectors,
        }
    }

    pub fn embeddings(&self) -> &EmbeddingGateway {
        &self.embeddings
    }

    pub fn vectors(&self) -> &VectorIndexAdapter {
        &self.vectors
    }

    /// Chunk and embed a record. No chunks means nothing to index.
    pub fn build_vectors(&self, record: &MessageRecord) -> Result<Vec<VectorRecord>> {
        let chunks = self.chunker.split(&record.index_text());
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embeddings.embed_batch(&texts)?;

        let vectors = chunks
            .iter()
            .zip(embeddings)
            .enumerate()
            .filter_map(|(index, (chunk, embedding))| {
                let values = embedding?;
                let mut metadata = base_metadata(record);
                metadata.insert("chunk_index".to_string(), json!(index));
                metadata.insert("start".to_string(), json!(chunk.start));
                metadata.insert("end".to_string(), json!(chunk.end));
                Some(VectorRecord {
                    id: chunk_vector_id(&record.id, index),
                    values,
                    metadata,
                })
            })
            .collect();

        Ok(vectors)
    }

    /// Write the record's vectors; returns how many were upserted.
    ///
    /// With `replace`, every existing vector of the message is deleted
    /// first so a shorter body leaves no stale chunks behind.
    pub fn index(&self, record: &MessageRecord, replace: bool) -> Result<usize> {
        let vectors = self.build_vectors(record)?;

        if replace {
            self.remove(&record.account_id, &record.id)?;
        }

        let written = self.vectors.upsert(&record.account_id, &vectors)?;
        debug!(
            "Indexed message {} for account {} ({} chunks)",
            record.id, record.account_id, written
        );
        Ok(written)
    }

    /// Delete every vector referencing the message
    pub fn remove(&self, account_id: &str, message_id: &MessageId) -> Result<()> {
        self.vectors
            .delete_by_filter(account_id, &Filter::eq("message_id", message_id.as_str()))
    }
}

/// Metadata shared by every chunk of a message. Absent fields are omitted
/// rather than stored as null.
fn base_metadata(record: &MessageRecord) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("type".to_string(), json!(CHUNK_TYPE));
    metadata.insert("message_id".to_string(), json!(record.id.as_str()));
    metadata.insert("account_id".to_string(), json!(record.account_id));
    if let Some(thread_id) = &record.thread_id {
        metadata.insert("thread_id".to_string(), json!(thread_id));
    }
    if let Some(subject) = &record.subject {
        metadata.insert("subject".to_string(), json!(subject));
    }
    if let Some(date) = record.date {
        metadata.insert("date".to_string(), json!(date.to_rfc3339()));
    }
    metadata.insert(
        "label_ids".to_string(),
        Value::Array(record.label_ids.iter().map(|l| json!(l)).collect()),
    );
    metadata.insert("doc_hash".to_string(), json!(record.content_hash));
    metadata
}
