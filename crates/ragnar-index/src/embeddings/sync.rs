//! Keeps the vector store in step with the graph.
//!
//! Each function and class is embedded from its text summary. The hash of
//! that summary decides whether an entity is new, changed or unchanged, so a
//! sync after an edit only embeds what the edit touched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::embeddings::EmbeddingProvider;
use crate::entity::{content_hash, Entity};
use crate::graph::{CodeGraph, NodeKind};
use crate::vector_store::{EntityPayload, VectorFilter, VectorHit, VectorRecord, VectorStore};

/// Source characters included in an entity summary.
pub const MAX_SUMMARY_CODE_CHARS: usize = 1500;

/// Texts per embedding request.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Counts from one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl SyncStats {
    fn absorb(&mut self, other: SyncStats) {
        self.added += other.added;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

struct Pending {
    entity: Entity,
    text: String,
    hash: String,
    is_new: bool,
}

pub struct EmbeddingSync {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
    /// Summary hash last stored per entity id
    synced: Mutex<HashMap<String, String>>,
    totals: Mutex<SyncStats>,
}

impl EmbeddingSync {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        let batch_size = provider.max_batch_size().clamp(1, DEFAULT_BATCH_SIZE);
        Self {
            provider,
            store,
            batch_size,
            synced: Mutex::new(HashMap::new()),
            totals: Mutex::new(SyncStats::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Totals over every sync since start.
    pub async fn totals(&self) -> SyncStats {
        *self.totals.lock().await
    }

    pub async fn synced_count(&self) -> usize {
        self.synced.lock().await.len()
    }

    /// Bring the vector store in line with `graph`.
    pub async fn sync(&self, graph: &CodeGraph) -> Result<SyncStats> {
        let mut synced = self.synced.lock().await;
        let mut stats = SyncStats::default();

        let mut pending = Vec::new();
        let mut present = HashSet::new();
        for node in graph.nodes() {
            if !matches!(node.kind, NodeKind::Function | NodeKind::Class) {
                continue;
            }
            let Some(entity) = &node.entity else { continue };
            let text = entity.summary(MAX_SUMMARY_CODE_CHARS);
            let hash = content_hash(&text);
            present.insert(entity.id.clone());
            match synced.get(&entity.id) {
                Some(previous) if *previous == hash => stats.skipped += 1,
                previous => pending.push(Pending {
                    entity: entity.clone(),
                    text,
                    hash,
                    is_new: previous.is_none(),
                }),
            }
        }

        let gone: Vec<String> = synced
            .keys()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect();
        if !gone.is_empty() {
            match self.store.delete(&gone).await {
                Ok(()) => {
                    for id in &gone {
                        synced.remove(id);
                    }
                    stats.deleted = gone.len();
                }
                Err(e) => {
                    warn!(error = %e, count = gone.len(), "Failed to delete stale vectors");
                    stats.errors += gone.len();
                }
            }
        }

        pending.sort_by(|a, b| a.entity.id.cmp(&b.entity.id));
        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors = match self.provider.embed_batch(&texts).await {
                Ok(vectors) if vectors.len() == batch.len() => vectors,
                Ok(vectors) => {
                    warn!(expected = batch.len(), got = vectors.len(), "Embedding batch size mismatch");
                    stats.errors += batch.len();
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, count = batch.len(), "Embedding batch failed");
                    stats.errors += batch.len();
                    continue;
                }
            };

            let records = batch
                .iter()
                .zip(vectors)
                .map(|(p, vector)| VectorRecord {
                    vector,
                    payload: EntityPayload::from_entity(&p.entity, p.hash.clone()),
                })
                .collect();
            if let Err(e) = self.store.upsert(records).await {
                warn!(error = %e, count = batch.len(), "Vector upsert failed");
                stats.errors += batch.len();
                continue;
            }
            for p in batch {
                synced.insert(p.entity.id.clone(), p.hash.clone());
                if p.is_new {
                    stats.added += 1;
                } else {
                    stats.updated += 1;
                }
            }
            debug!(count = batch.len(), "Embedded batch");
        }

        self.totals.lock().await.absorb(stats);
        if stats.added + stats.updated + stats.deleted + stats.errors > 0 {
            info!(
                added = stats.added,
                updated = stats.updated,
                deleted = stats.deleted,
                skipped = stats.skipped,
                errors = stats.errors,
                "Embedding sync finished"
            );
        }
        Ok(stats)
    }

    /// Embed `query` and search the store.
    pub async fn search(&self, query: &str, limit: usize, filter: &VectorFilter) -> Result<Vec<VectorHit>> {
        let vector = self.provider.embed(query).await?;
        self.store.search(&vector, limit, filter).await
    }

    /// Forget what was synced so the next pass embeds everything again.
    pub async fn reset(&self) {
        self.synced.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::entity::{EntityKind, Span};
    use crate::graph::{Edge, EdgeKind, Node};
    use crate::languages::Language;
    use crate::vector_store::MemoryVectorStore;

    /// Deterministic provider: vector from text length and first byte.
    struct FakeEmbeddings {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddings {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.bytes().next().unwrap_or(0) as f32])
                .collect())
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "fake"
        }

        fn max_batch_size(&self) -> usize {
            2
        }
    }

    fn graph(functions: &[(&str, &str)]) -> CodeGraph {
        let mut g = CodeGraph::new();
        g.add_node(Node::file("r:a.py", "a.py")).unwrap();
        for (name, code) in functions {
            let entity = Entity::new("r", EntityKind::Function, *name, *name, "a.py", Language::Python)
                .with_span(Span {
                    start_line: 1,
                    end_line: 2,
                    ..Span::default()
                })
                .with_code(*code);
            let id = entity.id.clone();
            g.add_node(Node::from_entity(entity)).unwrap();
            g.add_edge(Edge::new("r:a.py", id, EdgeKind::Contains)).unwrap();
        }
        g
    }

    #[tokio::test]
    async fn test_sync_tracks_changes() {
        let provider = Arc::new(FakeEmbeddings { calls: AtomicUsize::new(0) });
        let store = Arc::new(MemoryVectorStore::new());
        let sync = EmbeddingSync::new(provider.clone(), store.clone());

        let first = sync
            .sync(&graph(&[("a", "def a(): pass"), ("b", "def b(): pass"), ("c", "def c(): pass")]))
            .await
            .unwrap();
        assert_eq!(first.added, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.count().await.unwrap(), 3);

        let second = sync
            .sync(&graph(&[("a", "def a(): return 1"), ("b", "def b(): pass")]))
            .await
            .unwrap();
        assert_eq!(second.updated, 1);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.deleted, 1);
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(sync.totals().await.added, 3);
    }

    #[tokio::test]
    async fn test_search_uses_provider() {
        let provider = Arc::new(FakeEmbeddings { calls: AtomicUsize::new(0) });
        let store = Arc::new(MemoryVectorStore::new());
        let sync = EmbeddingSync::new(provider, store);
        sync.sync(&graph(&[("a", "def a(): pass")])).await.unwrap();
        let hits = sync.search("function a", 5, &VectorFilter::new()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, "r:a.py:a");
    }
}
