//! Pinecone data-plane client
//!
//! Talks to a single index host over HTTPS with synchronous HTTP (ureq).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{Filter, QueryMatch, VectorIndex, VectorRecord};

/// Maximum vectors per upsert request
const UPSERT_BATCH: usize = 100;

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    namespace: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    namespace: &'a str,
    include_values: bool,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

/// Vector index hosted by Pinecone
pub struct PineconeIndex {
    agent: ureq::Agent,
    api_key: String,
    /// Index host, e.g. `https://mail-abc123.svc.us-east1-gcp.pinecone.io`
    host: String,
}

impl PineconeIndex {
    pub fn new(api_key: impl Into<String>, host: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        let host = host.into();
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{}", host)
        };
        Self {
            agent,
            api_key: api_key.into(),
            host: host.trim_end_matches('/').to_string(),
        }
    }

    fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<ureq::http::Response<ureq::Body>> {
        let url = format!("{}{}", self.host, path);
        self.agent
            .post(&url)
            .header("Api-Key", &self.api_key)
            .send_json(body)
            .with_context(|| format!("Pinecone request to {} failed", path))
    }
}

impl VectorIndex for PineconeIndex {
    fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        for batch in records.chunks(UPSERT_BATCH) {
            self.post(
                "/vectors/upsert",
                &UpsertRequest {
                    vectors: batch,
                    namespace,
                },
            )?;
        }
        Ok(())
    }

    fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> Result<()> {
        self.post(
            "/vectors/delete",
            &DeleteRequest {
                namespace,
                ids: Some(ids),
                filter: None,
            },
        )?;
        Ok(())
    }

    fn delete_by_filter(&self, namespace: &str, filter: &Filter) -> Result<()> {
        self.post(
            "/vectors/delete",
            &DeleteRequest {
                namespace,
                ids: None,
                filter: Some(filter.to_json()),
            },
        )?;
        Ok(())
    }

    fn query_top_k(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>> {
        let mut response = self.post(
            "/query",
            &QueryRequest {
                vector,
                top_k: k,
                namespace,
                include_values: false,
                include_metadata: true,
                filter: filter.map(Filter::to_json),
            },
        )?;

        let parsed: QueryResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse Pinecone query response")?;
        Ok(parsed.matches)
    }
}
