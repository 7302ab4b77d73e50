//! Crate-level error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::embeddings::EmbeddingError;
use crate::graph::GraphError;
use crate::syntax::ParseError;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("Path is outside the repository: {0}")]
    OutsideRepo(PathBuf),

    #[error("Semantic search is not configured")]
    SearchUnavailable,

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

impl IndexError {
    /// Stable machine-readable code, used in tool responses.
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::Parse(_) => "parse_error",
            IndexError::Graph(GraphError::NotFound(_)) => "not_found",
            IndexError::Graph(GraphError::Inconsistency(_)) => "graph_inconsistency",
            IndexError::Graph(GraphError::InvalidArgument(_)) => "invalid_arguments",
            IndexError::Graph(GraphError::InvalidEdge(..)) => "graph_inconsistency",
            IndexError::Embedding(_) => "embedding_error",
            IndexError::OutsideRepo(_) => "outside_repo",
            IndexError::SearchUnavailable => "search_unavailable",
            IndexError::UnknownTool(_) => "unknown_tool",
            IndexError::InvalidArguments(_) => "invalid_arguments",
        }
    }
}

/// Best code for an error that crossed an `anyhow` boundary.
pub fn error_code(error: &anyhow::Error) -> &'static str {
    if let Some(e) = error.downcast_ref::<IndexError>() {
        return e.code();
    }
    if let Some(e) = error.downcast_ref::<GraphError>() {
        return IndexError::Graph(e.clone()).code();
    }
    if error.downcast_ref::<ParseError>().is_some() {
        return "parse_error";
    }
    if error.downcast_ref::<EmbeddingError>().is_some() {
        return "embedding_error";
    }
    "internal"
}
