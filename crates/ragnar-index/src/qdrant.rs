//! Qdrant backend for the vector store.
//!
//! Qdrant point ids must be integers or UUIDs, so each entity id is mapped to
//! a name-based UUID (v5) and the entity id itself travels in the payload.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    value::Kind, Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointId,
    PointStruct, PointsIdsList, QuantizationType, ScalarQuantizationBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::vector_store::{EntityPayload, VectorFilter, VectorHit, VectorRecord, VectorStore};

/// Extra candidates fetched when a path prefix has to be filtered locally.
const PREFIX_OVERSAMPLE: usize = 4;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection_name: String,
    pub dimensions: usize,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            collection_name: crate::DEFAULT_COLLECTION.to_string(),
            dimensions: crate::DEFAULT_DIMENSIONS,
        }
    }
}

/// Point id of an entity.
pub fn point_id(entity_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, entity_id.as_bytes()).to_string()
}

pub struct QdrantStore {
    client: Qdrant,
    collection_name: String,
    dimensions: usize,
}

impl QdrantStore {
    pub fn from_config(config: &QdrantConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.url).skip_compatibility_check();
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder.build().context("Failed to connect to Qdrant")?;
        info!(url = %config.url, collection = %config.collection_name, "Connected to Qdrant");

        Ok(Self {
            client,
            collection_name: config.collection_name.clone(),
            dimensions: config.dimensions,
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Drop the whole collection.
    pub async fn delete_collection(&self) -> Result<()> {
        info!(collection = %self.collection_name, "Deleting collection");
        self.client
            .delete_collection(&self.collection_name)
            .await
            .context("Failed to delete collection")?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    /// Create the collection with int8 scalar quantization if it is missing.
    async fn ensure_ready(&self) -> Result<()> {
        let collections = self.client.list_collections().await?;
        if collections.collections.iter().any(|c| c.name == self.collection_name) {
            debug!(collection = %self.collection_name, "Collection already exists");
            return Ok(());
        }

        info!(
            collection = %self.collection_name,
            dimensions = self.dimensions,
            "Creating collection"
        );
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name)
                    .vectors_config(VectorParamsBuilder::new(self.dimensions as u64, Distance::Cosine))
                    .quantization_config(
                        ScalarQuantizationBuilder::default()
                            .r#type(QuantizationType::Int8.into())
                            .quantile(0.99)
                            .always_ram(true),
                    ),
            )
            .await
            .context("Failed to create collection")?;
        Ok(())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        debug!(points = records.len(), "Upserting points");

        let points: Vec<PointStruct> = records
            .into_iter()
            .map(|r| PointStruct::new(point_id(&r.payload.entity_id), r.vector, payload_to_map(&r.payload)))
            .collect();
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points))
            .await
            .context("Failed to upsert points")?;
        Ok(())
    }

    async fn delete(&self, entity_ids: &[String]) -> Result<()> {
        if entity_ids.is_empty() {
            return Ok(());
        }
        debug!(points = entity_ids.len(), "Deleting points");

        let ids: Vec<PointId> = entity_ids.iter().map(|id| PointId::from(point_id(id))).collect();
        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection_name).points(PointsIdsList { ids }))
            .await
            .context("Failed to delete points")?;
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize, filter: &VectorFilter) -> Result<Vec<VectorHit>> {
        let fetch = if filter.file_path_prefix.is_some() {
            limit * PREFIX_OVERSAMPLE
        } else {
            limit
        };
        let mut builder =
            SearchPointsBuilder::new(&self.collection_name, query.to_vec(), fetch as u64).with_payload(true);
        if let Some(kind) = &filter.kind {
            builder = builder.filter(Filter::must([Condition::matches("kind", kind.clone())]));
        }

        let results = self
            .client
            .search_points(builder)
            .await
            .context("Failed to search points")?;

        let mut hits: Vec<VectorHit> = results
            .result
            .into_iter()
            .map(|p| {
                let payload = map_to_payload(&p.payload);
                VectorHit {
                    entity_id: payload.entity_id.clone(),
                    score: p.score,
                    payload,
                }
            })
            .filter(|hit| filter.matches(&hit.payload))
            .collect();
        hits.truncate(limit);
        debug!(hits = hits.len(), "Qdrant search");
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        let info = self
            .client
            .collection_info(&self.collection_name)
            .await
            .context("Failed to get collection info")?;
        Ok(info.result.and_then(|r| r.points_count).unwrap_or(0) as usize)
    }

    fn backend(&self) -> &str {
        "qdrant"
    }
}

fn payload_to_map(payload: &EntityPayload) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    let strings = [
        ("entity_id", &payload.entity_id),
        ("kind", &payload.kind),
        ("name", &payload.name),
        ("qualified_name", &payload.qualified_name),
        ("file_path", &payload.file_path),
        ("language", &payload.language),
        ("content_hash", &payload.content_hash),
    ];
    for (key, value) in strings {
        map.insert(key.to_string(), Value::from(value.clone()));
    }
    map.insert("line_start".to_string(), Value::from(payload.line_start as i64));
    map.insert("line_end".to_string(), Value::from(payload.line_end as i64));
    if let Some(sig) = &payload.signature {
        map.insert("signature".to_string(), Value::from(sig.clone()));
    }
    map
}

fn map_to_payload(map: &HashMap<String, Value>) -> EntityPayload {
    EntityPayload {
        entity_id: string(map, "entity_id").unwrap_or_default(),
        kind: string(map, "kind").unwrap_or_default(),
        name: string(map, "name").unwrap_or_default(),
        qualified_name: string(map, "qualified_name").unwrap_or_default(),
        file_path: string(map, "file_path").unwrap_or_default(),
        language: string(map, "language").unwrap_or_default(),
        line_start: integer(map, "line_start") as usize,
        line_end: integer(map, "line_end") as usize,
        signature: string(map, "signature"),
        content_hash: string(map, "content_hash").unwrap_or_default(),
    }
}

fn string(map: &HashMap<String, Value>, key: &str) -> Option<String> {
    match map.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn integer(map: &HashMap<String, Value>, key: &str) -> i64 {
    match map.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(i)) => *i,
        _ => 0,
    }
}
