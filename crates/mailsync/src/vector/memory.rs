//! In-memory vector index
//!
//! Exact cosine-similarity search over namespaced maps. Used by tests and
//! local runs without a hosted index.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Filter, QueryMatch, VectorIndex, VectorRecord};

/// In-memory implementation of VectorIndex
pub struct InMemoryVectorIndex {
    /// namespace -> id -> record
    namespaces: RwLock<HashMap<String, HashMap<String, VectorRecord>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records in a namespace
    pub fn count(&self, namespace: &str) -> usize {
        let namespaces = self.namespaces.read().unwrap();
        namespaces.get(namespace).map(|ns| ns.len()).unwrap_or(0)
    }

    /// Sorted record ids in a namespace
    pub fn ids(&self, namespace: &str) -> Vec<String> {
        let namespaces = self.namespaces.read().unwrap();
        let mut ids: Vec<String> = namespaces
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Fetch one record
    pub fn get(&self, namespace: &str, id: &str) -> Option<VectorRecord> {
        let namespaces = self.namespaces.read().unwrap();
        namespaces.get(namespace)?.get(id).cloned()
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorIndex for InMemoryVectorIndex {
    fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        let mut namespaces = self.namespaces.write().unwrap();
        let ns = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            ns.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> Result<()> {
        let mut namespaces = self.namespaces.write().unwrap();
        if let Some(ns) = namespaces.get_mut(namespace) {
            for id in ids {
                ns.remove(id);
            }
        }
        Ok(())
    }

    fn delete_by_filter(&self, namespace: &str, filter: &Filter) -> Result<()> {
        let mut namespaces = self.namespaces.write().unwrap();
        if let Some(ns) = namespaces.get_mut(namespace) {
            ns.retain(|_, record| !filter.matches(&record.metadata));
        }
        Ok(())
    }

    fn query_top_k(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>> {
        let namespaces = self.namespaces.read().unwrap();
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<QueryMatch> = ns
            .values()
            .filter(|r| filter.is_none_or(|f| f.matches(&r.metadata)))
            .map(|r| QueryMatch {
                id: r.id.clone(),
                score: cosine(vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(k);
        Ok(matches)
    }
}
