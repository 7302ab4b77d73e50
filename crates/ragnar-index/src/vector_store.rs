//! Vector store interface and the in-process implementation.
//!
//! Points are keyed by entity id. The payload carries enough metadata to
//! filter by kind and path and to show a hit without touching the graph.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::entity::Entity;

/// Metadata stored with each vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPayload {
    pub entity_id: String,
    /// "function", "class" or "file"
    pub kind: String,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub language: String,
    pub line_start: usize,
    pub line_end: usize,
    pub signature: Option<String>,
    /// Hash of the embedded text
    pub content_hash: String,
}

impl EntityPayload {
    pub fn from_entity(entity: &Entity, content_hash: String) -> Self {
        Self {
            entity_id: entity.id.clone(),
            kind: entity.kind.label().to_string(),
            name: entity.name.clone(),
            qualified_name: entity.qualified_name.clone(),
            file_path: entity.file_path.clone(),
            language: entity.language.name().to_string(),
            line_start: entity.span.start_line,
            line_end: entity.span.end_line,
            signature: entity.signature.clone(),
            content_hash,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub vector: Vec<f32>,
    pub payload: EntityPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub entity_id: String,
    pub score: f32,
    pub payload: EntityPayload,
}

/// Search filters.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub kind: Option<String>,
    pub file_path_prefix: Option<String>,
}

impl VectorFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_path_prefix = Some(prefix.into());
        self
    }

    pub fn matches(&self, payload: &EntityPayload) -> bool {
        self.kind.as_ref().map_or(true, |k| &payload.kind == k)
            && self
                .file_path_prefix
                .as_ref()
                .map_or(true, |p| payload.file_path.starts_with(p.as_str()))
    }
}

/// Storage for entity embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Prepare the backend (create collections and the like).
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Insert or replace points.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Delete points by entity id. Unknown ids are ignored.
    async fn delete(&self, entity_ids: &[String]) -> Result<()>;

    /// Nearest neighbours of `query`, best first.
    async fn search(&self, query: &[f32], limit: usize, filter: &VectorFilter) -> Result<Vec<VectorHit>>;

    /// Number of stored points.
    async fn count(&self) -> Result<usize>;

    fn backend(&self) -> &str;
}

/// Vector store held in process memory, searched by brute-force cosine.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    points: RwLock<HashMap<String, VectorRecord>>,
    dimensions: Option<usize>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject vectors of any other length.
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
            dimensions: Some(dimensions),
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if let Some(dim) = self.dimensions {
            if let Some(bad) = records.iter().find(|r| r.vector.len() != dim) {
                bail!(
                    "Vector for {} has {} dimensions, expected {}",
                    bad.payload.entity_id,
                    bad.vector.len(),
                    dim
                );
            }
        }
        let mut points = self.points.write().await;
        for record in records {
            points.insert(record.payload.entity_id.clone(), record);
        }
        Ok(())
    }

    async fn delete(&self, entity_ids: &[String]) -> Result<()> {
        let mut points = self.points.write().await;
        for id in entity_ids {
            points.remove(id);
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize, filter: &VectorFilter) -> Result<Vec<VectorHit>> {
        let points = self.points.read().await;
        let mut hits: Vec<VectorHit> = points
            .values()
            .filter(|r| filter.matches(&r.payload))
            .map(|r| VectorHit {
                entity_id: r.payload.entity_id.clone(),
                score: cosine_similarity(query, &r.vector),
                payload: r.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.entity_id.cmp(&b.entity_id)));
        hits.truncate(limit);
        debug!(hits = hits.len(), "Memory vector search");
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.points.read().await.len())
    }

    fn backend(&self) -> &str {
        "memory"
    }
}

/// Cosine similarity; zero for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, kind: &str, path: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            vector,
            payload: EntityPayload {
                entity_id: id.to_string(),
                kind: kind.to_string(),
                file_path: path.to_string(),
                ..EntityPayload::default()
            },
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_memory_store_search_and_filter() {
        let store = MemoryVectorStore::new();
        store
            .upsert(vec![
                record("r:a.py:f", "function", "src/a.py", vec![1.0, 0.0]),
                record("r:b.py:C", "class", "lib/b.py", vec![0.9, 0.1]),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 10, &VectorFilter::new()).await.unwrap();
        assert_eq!(hits[0].entity_id, "r:a.py:f");
        assert_eq!(hits.len(), 2);

        let classes = store
            .search(&[1.0, 0.0], 10, &VectorFilter::new().with_kind("class"))
            .await
            .unwrap();
        assert_eq!(classes.len(), 1);

        let under_src = store
            .search(&[1.0, 0.0], 10, &VectorFilter::new().with_path_prefix("src/"))
            .await
            .unwrap();
        assert_eq!(under_src[0].entity_id, "r:a.py:f");
        assert_eq!(under_src.len(), 1);

        store.delete(&["r:a.py:f".to_string()]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[test]
    fn test_dimension_check() {
        let store = MemoryVectorStore::with_dimensions(3);
        let err = tokio_test::block_on(store.upsert(vec![record("x", "function", "a.py", vec![1.0])]));
        assert!(err.is_err());
        assert_eq!(tokio_test::block_on(store.count()).unwrap(), 0);
    }
}
