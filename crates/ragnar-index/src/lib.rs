//! Code intelligence index for Ragnar.
//!
//! This crate provides:
//! - Entity extraction over tree-sitter syntax trees for Python, JavaScript,
//!   TypeScript, Go, Rust and Java
//! - Import resolution and a scoped symbol table
//! - Call classification and a typed code graph (CONTAINS, CALLS, IMPORTS,
//!   INHERITS) with transactional incremental updates
//! - Graph queries: call chains, class hierarchies, file dependencies,
//!   connected components, paths and symbol lookup
//! - An indexing orchestrator with persistence, file watching and optional
//!   embedding sync for natural-language search

pub mod classifier;
pub mod embeddings;
pub mod entity;
pub mod error;
pub mod extractor;
pub mod graph;
pub mod graph_builder;
pub mod import_resolver;
pub mod indexer;
pub mod languages;
pub mod qdrant;
pub mod query;
pub mod storage;
pub mod symbols;
pub mod syntax;
pub mod tools;
pub mod vector_store;
pub mod watcher;

pub use embeddings::{EmbeddingProvider, EmbeddingSync, OpenRouterEmbeddings, SyncStats};
pub use entity::{CallInfo, CallKind, Entity, EntityId, EntityKind, FileExtraction, ImportStmt};
pub use error::{error_code, IndexError};
pub use extractor::EntityExtractor;
pub use graph::{CodeGraph, Edge, EdgeKind, GraphError, GraphStats, GraphStore, Node, NodeKind};
pub use graph_builder::{GraphBuilder, UpdateSummary};
pub use import_resolver::{resolve_import, ImportTarget, ResolvedImport};
pub use indexer::{FileOutcome, IndexPhase, IndexStats, IndexStatus, Indexer, IndexerConfig};
pub use languages::Language;
pub use qdrant::{QdrantConfig, QdrantStore};
pub use query::{Direction, HierarchyDirection, QueryEngine};
pub use storage::{IndexSnapshot, IndexStorage};
pub use symbols::{Resolution, SymbolTable, SymbolTableState};
pub use syntax::{ParseError, SyntaxParser, SyntaxTree};
pub use tools::ToolRouter;
pub use vector_store::{MemoryVectorStore, VectorFilter, VectorStore};
pub use watcher::{FileEvent, FileWatcher, IndexingService, WatcherConfig, WatcherError};

/// Default Qdrant collection name
pub const DEFAULT_COLLECTION: &str = "ragnar-code";

/// Default embedding dimensions (Qwen3-Embedding-8B)
pub const DEFAULT_DIMENSIONS: usize = 4096;
