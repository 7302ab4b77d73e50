//! Tool surface: every query and control operation behind one
//! `call(name, args)` entry point taking and returning JSON.
//!
//! Failures come back as `{"error": <code>, "message": <text>}` so a
//! calling agent can branch on the code.

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{error_code, IndexError};
use crate::graph::NodeKind;
use crate::indexer::Indexer;
use crate::query::{Direction, HierarchyDirection};

pub const DEFAULT_CHAIN_DEPTH: usize = 5;
pub const DEFAULT_PATH_DEPTH: usize = 6;
pub const DEFAULT_SYMBOL_LIMIT: usize = 20;
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Names accepted by [`ToolRouter::call`].
pub const TOOL_NAMES: &[&str] = &[
    "get_function_calls",
    "get_callers",
    "get_call_chain",
    "get_class_hierarchy",
    "get_file_dependencies",
    "get_file_dependents",
    "find_paths",
    "get_connected_components",
    "find_symbol",
    "get_file_structure",
    "search_code",
    "get_index_status",
    "reindex",
];

#[derive(Clone)]
pub struct ToolRouter {
    indexer: Indexer,
}

impl ToolRouter {
    pub fn new(indexer: Indexer) -> Self {
        Self { indexer }
    }

    /// Run one tool. Never fails; errors are encoded in the result.
    pub async fn call(&self, name: &str, args: &Value) -> Value {
        debug!(tool = name, "Dispatching tool");
        match self.dispatch(name, args).await {
            Ok(value) => value,
            Err(e) => {
                let code = error_code(&e);
                warn!(tool = name, code, error = %e, "Tool failed");
                json!({ "error": code, "message": e.to_string() })
            }
        }
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Result<Value> {
        let query = self.indexer.query();
        match name {
            "get_function_calls" => to_json(query.get_function_calls(required_str(args, "function_id")?)?),
            "get_callers" => to_json(query.get_callers(required_str(args, "function_id")?)?),
            "get_call_chain" => {
                let direction: Direction = optional_str(args, "direction").unwrap_or("outgoing").parse()?;
                let depth = optional_usize(args, "max_depth")?.unwrap_or(DEFAULT_CHAIN_DEPTH);
                to_json(query.get_call_chain(required_str(args, "function_id")?, depth, direction)?)
            }
            "get_class_hierarchy" => {
                let direction: HierarchyDirection = optional_str(args, "direction").unwrap_or("both").parse()?;
                to_json(query.get_class_hierarchy(required_str(args, "class_id")?, direction)?)
            }
            "get_file_dependencies" => {
                let include_external = optional_bool(args, "include_external").unwrap_or(true);
                to_json(query.get_file_dependencies(required_str(args, "file_path")?, include_external)?)
            }
            "get_file_dependents" => to_json(query.get_file_dependents(required_str(args, "file_path")?)?),
            "find_paths" => {
                let depth = optional_usize(args, "max_depth")?.unwrap_or(DEFAULT_PATH_DEPTH);
                let paths = query.find_paths(required_str(args, "from_id")?, required_str(args, "to_id")?, depth)?;
                Ok(json!({ "count": paths.len(), "paths": paths }))
            }
            "get_connected_components" => {
                let components = query.get_connected_components();
                Ok(json!({ "count": components.len(), "components": components }))
            }
            "find_symbol" => {
                let kind = optional_kind(args)?;
                let limit = optional_usize(args, "limit")?.unwrap_or(DEFAULT_SYMBOL_LIMIT);
                to_json(query.find_symbol(required_str(args, "name")?, kind, limit))
            }
            "get_file_structure" => to_json(query.get_file_structure(required_str(args, "file_path")?)?),
            "search_code" => {
                let limit = optional_usize(args, "limit")?.unwrap_or(DEFAULT_SEARCH_LIMIT);
                let prefix = optional_str(args, "file_path_prefix").map(str::to_string);
                let hits = self
                    .indexer
                    .search_code(required_str(args, "query")?, limit, optional_kind(args)?, prefix)
                    .await?;
                to_json(hits)
            }
            "get_index_status" => to_json(self.indexer.status().await),
            "reindex" => {
                let force = optional_bool(args, "force").unwrap_or(false);
                to_json(self.indexer.reindex(force).await?)
            }
            other => Err(IndexError::UnknownTool(other.to_string()).into()),
        }
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, IndexError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| IndexError::InvalidArguments(format!("missing required parameter: {}", key)))
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn optional_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| v.as_bool())
}

fn optional_usize(args: &Value, key: &str) -> Result<Option<usize>, IndexError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| IndexError::InvalidArguments(format!("{} must be a non-negative integer", key))),
    }
}

fn optional_kind(args: &Value) -> Result<Option<NodeKind>, IndexError> {
    match args.get("kind") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|_| IndexError::InvalidArguments(format!("unknown kind: {}", v))),
    }
}
