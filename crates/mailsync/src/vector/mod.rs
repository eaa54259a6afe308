//! Vector index adapter
//!
//! Namespaced upsert/delete/query against an approximate-nearest-neighbor
//! index. One namespace per account is the tenant isolation boundary.
//! [`VectorIndexAdapter`] wraps any [`VectorIndex`] backend with the
//! injected [`RetryPolicy`].

mod memory;
mod pinecone;

pub use memory::InMemoryVectorIndex;
pub use pinecone::PineconeIndex;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::retry::RetryPolicy;

/// Metadata attached to each vector
pub type Metadata = Map<String, Value>;

/// One stored vector. Upserting an existing id replaces it entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Metadata,
}

/// A query hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Metadata predicate for deletes and queries
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value
    Eq { field: String, value: Value },
    /// All sub-filters hold
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And(filters)
    }

    /// Evaluate against a metadata map
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Eq { field, value } => metadata.get(field) == Some(value),
            Self::And(filters) => filters.iter().all(|f| f.matches(metadata)),
        }
    }

    /// Render in the Pinecone/Mongo-style filter language
    pub fn to_json(&self) -> Value {
        match self {
            Self::Eq { field, value } => {
                let mut clause = Map::new();
                clause.insert(field.clone(), json!({ "$eq": value }));
                Value::Object(clause)
            }
            Self::And(filters) => {
                json!({ "$and": filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
        }
    }
}

/// Backend operations of a vector index
pub trait VectorIndex: Send + Sync {
    /// Insert or fully replace records by id
    fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()>;

    /// Delete records by id; unknown ids are ignored
    fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> Result<()>;

    /// Delete every record whose metadata matches
    fn delete_by_filter(&self, namespace: &str, filter: &Filter) -> Result<()>;

    /// Nearest `k` records, best first
    fn query_top_k(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>>;
}

/// Retrying front door to a vector index backend
#[derive(Clone)]
pub struct VectorIndexAdapter {
    index: Arc<dyn VectorIndex>,
    retry: RetryPolicy,
}

impl VectorIndexAdapter {
    pub fn new(index: Arc<dyn VectorIndex>, retry: RetryPolicy) -> Self {
        Self { index, retry }
    }

    /// Upsert records; returns how many were written
    pub fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.retry
            .run("vector upsert", || self.index.upsert(namespace, records))?;
        Ok(records.len())
    }

    pub fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.retry
            .run("vector delete", || self.index.delete_by_ids(namespace, ids))
    }

    pub fn delete_by_filter(&self, namespace: &str, filter: &Filter) -> Result<()> {
        self.retry.run("vector delete by filter", || {
            self.index.delete_by_filter(namespace, filter)
        })
    }

    pub fn query_top_k(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        self.retry.run("vector query", || {
            self.index.query_top_k(namespace, vector, k, filter)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn meta(pairs: &[(&str, Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_filter_matches() {
        let m = meta(&[("message_id", json!("m1")), ("chunk_index", json!(0))]);
        assert!(Filter::eq("message_id", "m1").matches(&m));
        assert!(!Filter::eq("message_id", "m2").matches(&m));
        assert!(!Filter::eq("missing", "m1").matches(&m));
        assert!(
            Filter::and(vec![
                Filter::eq("message_id", "m1"),
                Filter::eq("chunk_index", 0)
            ])
            .matches(&m)
        );
    }

    #[test]
    fn test_filter_json() {
        assert_eq!(
            Filter::eq("message_id", "m1").to_json(),
            json!({"message_id": {"$eq": "m1"}})
        );
        assert_eq!(
            Filter::and(vec![Filter::eq("a", 1), Filter::eq("b", "x")]).to_json(),
            json!({"$and": [{"a": {"$eq": 1}}, {"b": {"$eq": "x"}}]})
        );
    }

    /// Fails the first `failures` calls of every operation
    struct FlakyIndex {
        inner: InMemoryVectorIndex,
        calls: AtomicUsize,
        failures: usize,
    }

    impl FlakyIndex {
        fn gate(&self) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(anyhow!("503 from index"));
            }
            Ok(())
        }
    }

    impl VectorIndex for FlakyIndex {
        fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
            self.gate()?;
            self.inner.upsert(namespace, records)
        }

        fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> Result<()> {
            self.gate()?;
            self.inner.delete_by_ids(namespace, ids)
        }

        fn delete_by_filter(&self, namespace: &str, filter: &Filter) -> Result<()> {
            self.gate()?;
            self.inner.delete_by_filter(namespace, filter)
        }

        fn query_top_k(
            &self,
            namespace: &str,
            vector: &[f32],
            k: usize,
            filter: Option<&Filter>,
        ) -> Result<Vec<QueryMatch>> {
            self.gate()?;
            self.inner.query_top_k(namespace, vector, k, filter)
        }
    }

    fn record(id: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            values: vec![1.0, 0.0],
            metadata: meta(&[("message_id", json!("m1"))]),
        }
    }

    #[test]
    fn test_adapter_retries_upsert() {
        let flaky = Arc::new(FlakyIndex {
            inner: InMemoryVectorIndex::new(),
            calls: AtomicUsize::new(0),
            failures: 2,
        });
        let adapter = VectorIndexAdapter::new(flaky.clone(), RetryPolicy::immediate(3));

        assert_eq!(adapter.upsert("acct", &[record("m1#0")]).unwrap(), 1);
        assert_eq!(flaky.inner.count("acct"), 1);
    }

    #[test]
    fn test_adapter_gives_up() {
        let flaky = Arc::new(FlakyIndex {
            inner: InMemoryVectorIndex::new(),
            calls: AtomicUsize::new(0),
            failures: 5,
        });
        let adapter = VectorIndexAdapter::new(flaky, RetryPolicy::immediate(3));
        assert!(adapter.upsert("acct", &[record("m1#0")]).is_err());
    }

    #[test]
    fn test_adapter_skips_empty_calls() {
        let flaky = Arc::new(FlakyIndex {
            inner: InMemoryVectorIndex::new(),
            calls: AtomicUsize::new(0),
            failures: 100,
        });
        let adapter = VectorIndexAdapter::new(flaky.clone(), RetryPolicy::immediate(3));
        assert_eq!(adapter.upsert("acct", &[]).unwrap(), 0);
        adapter.delete_by_ids("acct", &[]).unwrap();
        assert!(adapter.query_top_k("acct", &[1.0], 0, None).unwrap().is_empty());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
    }
}
