//! Code graph: files, functions and classes connected by typed edges.
//!
//! The graph is a directed multigraph stored as an arena. Nodes and edges
//! live in slot vectors and refer to each other by index; adjacency lists
//! hold edge indices in both directions so traversals never recurse and never
//! chase pointers.
//!
//! # Structure
//!
//! - **File nodes** own every entity defined in them, through CONTAINS edges
//!   that form a forest rooted at the files.
//! - **Entity nodes** are functions and classes.
//! - **Sink nodes** stand for targets outside the repository (`external:`,
//!   `stdlib:`) or targets that could not be determined (`unresolved:`,
//!   `ambiguous:`). Sinks have no owner and disappear with their last
//!   incoming edge.
//!
//! # Example
//!
//! ```no_run
//! use ragnar_index::graph::{CodeGraph, Edge, EdgeKind, Node};
//!
//! let mut graph = CodeGraph::new();
//! graph.add_node(Node::file("repo:a.py", "a.py")).unwrap();
//! graph.add_node(Node::function("repo:a.py:foo", "foo", "a.py")).unwrap();
//! graph
//!     .add_edge(Edge::new("repo:a.py", "repo:a.py:foo", EdgeKind::Contains))
//!     .unwrap();
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{CallKind, Entity, EntityId, EntityKind};

pub type NodeIndex = usize;
pub type EdgeIndex = usize;

/// Type of graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Function,
    Class,
    /// Module outside the repository
    External,
    /// Standard library module
    Stdlib,
    /// Call or base that could not be resolved
    Unresolved,
    /// Name with several equally good candidates
    Ambiguous,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Function => "function",
            NodeKind::Class => "class",
            NodeKind::External => "external",
            NodeKind::Stdlib => "stdlib",
            NodeKind::Unresolved => "unresolved",
            NodeKind::Ambiguous => "ambiguous",
        }
    }

    /// Synthetic node that no file owns.
    pub fn is_sink(&self) -> bool {
        matches!(
            self,
            NodeKind::External | NodeKind::Stdlib | NodeKind::Unresolved | NodeKind::Ambiguous
        )
    }

    /// Sink outside the repository.
    pub fn is_external(&self) -> bool {
        matches!(self, NodeKind::External | NodeKind::Stdlib)
    }

    /// Id prefix used for sinks of this kind.
    pub fn sink_id(&self, text: &str) -> String {
        format!("{}:{}", self.label(), text)
    }
}

impl From<EntityKind> for NodeKind {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::File => NodeKind::File,
            EntityKind::Function => NodeKind::Function,
            EntityKind::Class => NodeKind::Class,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Edge type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EdgeKind {
    /// Containment (file -> entity, class -> method)
    Contains,
    /// Call site (caller -> callee)
    Calls,
    /// Base class or implemented interface (class -> base)
    Inherits,
    /// Import (file -> file or module)
    Imports,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::Contains,
        EdgeKind::Calls,
        EdgeKind::Inherits,
        EdgeKind::Imports,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            EdgeKind::Contains => "CONTAINS",
            EdgeKind::Calls => "CALLS",
            EdgeKind::Inherits => "INHERITS",
            EdgeKind::Imports => "IMPORTS",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: EntityId,
    pub kind: NodeKind,
    pub name: String,
    /// Owning file; `None` for sinks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Extracted metadata for files, functions and classes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Entity>,
}

impl Node {
    /// Node for an extracted entity.
    pub fn from_entity(entity: Entity) -> Self {
        Self {
            id: entity.id.clone(),
            kind: entity.kind.into(),
            name: entity.name.clone(),
            file_path: Some(entity.file_path.clone()),
            entity: Some(entity),
        }
    }

    /// Bare file node.
    pub fn file(id: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: id.into(),
            kind: NodeKind::File,
            name: path.rsplit('/').next().unwrap_or(&path).to_string(),
            file_path: Some(path),
            entity: None,
        }
    }

    /// Bare function node.
    pub fn function(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Function,
            name: name.into(),
            file_path: Some(path.into()),
            entity: None,
        }
    }

    /// Bare class node.
    pub fn class(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Class,
            ..Self::function(id, name, path)
        }
    }

    /// Synthetic sink node, e.g. `unresolved:bar`.
    pub fn sink(kind: NodeKind, text: &str) -> Self {
        Self {
            id: kind.sink_id(text),
            kind,
            name: text.to_string(),
            file_path: None,
            entity: None,
        }
    }

    pub fn qualified_name(&self) -> &str {
        self.entity
            .as_ref()
            .map(|e| e.qualified_name.as_str())
            .filter(|q| !q.is_empty())
            .unwrap_or(&self.name)
    }

    pub fn line(&self) -> Option<usize> {
        self.entity.as_ref().map(|e| e.span.start_line)
    }
}

/// A typed edge. Identity is `(source, target, kind, line)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: EntityId,
    pub target: EntityId,
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// How the call was made (CALLS only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_kind: Option<CallKind>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            line: None,
            call_kind: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_call_kind(mut self, kind: CallKind) -> Self {
        self.call_kind = Some(kind);
        self
    }

    fn key(&self) -> EdgeKey {
        (self.source.clone(), self.target.clone(), self.kind, self.line)
    }
}

type EdgeKey = (EntityId, EntityId, EdgeKind, Option<usize>);

#[derive(Debug, Clone)]
struct NodeSlot {
    node: Node,
    outgoing: Vec<EdgeIndex>,
    incoming: Vec<EdgeIndex>,
}

/// Counts reported by index status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub files: usize,
    pub functions: usize,
    pub classes: usize,
    pub external: usize,
    pub unresolved: usize,
    pub edges_by_kind: BTreeMap<String, usize>,
}

/// Flat, serializable form of a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// What removing a file took with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovedFile {
    pub nodes: Vec<EntityId>,
    /// Other files that had edges into the removed nodes
    pub dependents: BTreeSet<String>,
}

/// Directed multigraph of code entities.
#[derive(Debug, Clone, Default)]
pub struct CodeGraph {
    nodes: Vec<Option<NodeSlot>>,
    free_nodes: Vec<NodeIndex>,
    edges: Vec<Option<Edge>>,
    free_edges: Vec<EdgeIndex>,
    index: HashMap<EntityId, NodeIndex>,
    edge_keys: HashMap<EdgeKey, EdgeIndex>,
    /// Nodes owned by each file, the file node included
    file_nodes: HashMap<String, BTreeSet<NodeIndex>>,
    edge_count: usize,
}

impl CodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Add a node. A second node with the same id is an inconsistency: every
    /// entity has exactly one owner.
    pub fn add_node(&mut self, node: Node) -> Result<NodeIndex, GraphError> {
        if let Some(&existing) = self.index.get(&node.id) {
            if node.kind.is_sink() {
                return Ok(existing);
            }
            return Err(GraphError::Inconsistency(format!(
                "node {} defined twice",
                node.id
            )));
        }
        if !node.kind.is_sink() && node.file_path.is_none() {
            return Err(GraphError::Inconsistency(format!("node {} has no owning file", node.id)));
        }

        let owner = node.file_path.clone();
        let id = node.id.clone();
        let slot = NodeSlot {
            node,
            outgoing: Vec::new(),
            incoming: Vec::new(),
        };
        let idx = match self.free_nodes.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(slot);
                idx
            }
            None => {
                self.nodes.push(Some(slot));
                self.nodes.len() - 1
            }
        };
        self.index.insert(id, idx);
        if let Some(path) = owner {
            self.file_nodes.entry(path).or_default().insert(idx);
        }
        Ok(idx)
    }

    /// Sink node for `text`, created on first use.
    pub fn ensure_sink(&mut self, kind: NodeKind, text: &str) -> Result<EntityId, GraphError> {
        let node = Node::sink(kind, text);
        let id = node.id.clone();
        self.add_node(node)?;
        Ok(id)
    }

    /// Add an edge. Returns `false` when an identical edge already exists.
    pub fn add_edge(&mut self, edge: Edge) -> Result<bool, GraphError> {
        let key = edge.key();
        if self.edge_keys.contains_key(&key) {
            return Ok(false);
        }
        let (Some(&src), Some(&dst)) = (self.index.get(&edge.source), self.index.get(&edge.target)) else {
            return Err(GraphError::InvalidEdge(edge.source, edge.target));
        };

        if edge.kind == EdgeKind::Contains {
            if self.container_of(dst).is_some() {
                return Err(GraphError::Inconsistency(format!(
                    "{} would have two containers",
                    edge.target
                )));
            }
            let src_owner = self.slot(src).and_then(|s| s.node.file_path.as_deref());
            let dst_owner = self.slot(dst).and_then(|s| s.node.file_path.as_deref());
            if src_owner.is_none() || src_owner != dst_owner {
                return Err(GraphError::Inconsistency(format!(
                    "{} cannot contain {} owned by another file",
                    edge.source, edge.target
                )));
            }
        }

        let idx = match self.free_edges.pop() {
            Some(idx) => {
                self.edges[idx] = Some(edge);
                idx
            }
            None => {
                self.edges.push(Some(edge));
                self.edges.len() - 1
            }
        };
        if let Some(slot) = self.nodes[src].as_mut() {
            slot.outgoing.push(idx);
        }
        if let Some(slot) = self.nodes[dst].as_mut() {
            slot.incoming.push(idx);
        }
        self.edge_keys.insert(key, idx);
        self.edge_count += 1;
        Ok(true)
    }

    fn slot(&self, idx: NodeIndex) -> Option<&NodeSlot> {
        self.nodes.get(idx).and_then(Option::as_ref)
    }

    fn container_of(&self, idx: NodeIndex) -> Option<NodeIndex> {
        let slot = self.slot(idx)?;
        slot.incoming.iter().find_map(|&e| {
            let edge = self.edges[e].as_ref()?;
            (edge.kind == EdgeKind::Contains)
                .then(|| self.index.get(&edge.source).copied())
                .flatten()
        })
    }

    /// Remove one edge; sinks left without incoming edges go with it.
    fn remove_edge_at(&mut self, idx: EdgeIndex) {
        let Some(edge) = self.edges.get_mut(idx).and_then(Option::take) else {
            return;
        };
        self.free_edges.push(idx);
        self.edge_keys.remove(&edge.key());
        self.edge_count -= 1;

        if let Some(&src) = self.index.get(&edge.source) {
            if let Some(slot) = self.nodes[src].as_mut() {
                slot.outgoing.retain(|&e| e != idx);
            }
        }
        if let Some(&dst) = self.index.get(&edge.target) {
            let orphaned_sink = match self.nodes[dst].as_mut() {
                Some(slot) => {
                    slot.incoming.retain(|&e| e != idx);
                    slot.node.kind.is_sink() && slot.incoming.is_empty()
                }
                None => false,
            };
            if orphaned_sink {
                self.remove_node_at(dst);
            }
        }
    }

    fn remove_node_at(&mut self, idx: NodeIndex) {
        let Some(slot) = self.nodes.get(idx).and_then(Option::as_ref) else {
            return;
        };
        let edges: Vec<EdgeIndex> = slot.outgoing.iter().chain(slot.incoming.iter()).copied().collect();
        for e in edges {
            self.remove_edge_at(e);
        }
        if let Some(slot) = self.nodes.get_mut(idx).and_then(Option::take) {
            self.index.remove(&slot.node.id);
            if let Some(path) = &slot.node.file_path {
                if let Some(owned) = self.file_nodes.get_mut(path) {
                    owned.remove(&idx);
                    if owned.is_empty() {
                        self.file_nodes.remove(path);
                    }
                }
            }
            self.free_nodes.push(idx);
        }
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<(), GraphError> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| GraphError::NotFound(id.to_string()))?;
        self.remove_node_at(idx);
        Ok(())
    }

    /// Remove every node owned by `path` and every edge touching them.
    pub fn remove_file(&mut self, path: &str) -> RemovedFile {
        let mut removed = RemovedFile::default();
        let Some(owned) = self.file_nodes.get(path).cloned() else {
            return removed;
        };
        for &idx in &owned {
            let Some(slot) = self.slot(idx) else {
                continue;
            };
            for &e in &slot.incoming {
                if let Some(edge) = self.edges[e].as_ref() {
                    if let Some(owner) = self.owner_file(&edge.source) {
                        if owner != path {
                            removed.dependents.insert(owner.to_string());
                        }
                    }
                }
            }
            removed.nodes.push(slot.node.id.clone());
        }
        for idx in owned {
            self.remove_node_at(idx);
        }
        removed
    }

    /// Remove the resolved edges (everything but CONTAINS) leaving nodes
    /// owned by `path`, so they can be resolved again.
    pub fn clear_outgoing(&mut self, path: &str) {
        let Some(owned) = self.file_nodes.get(path).cloned() else {
            return;
        };
        let mut doomed = Vec::new();
        for idx in owned {
            if let Some(slot) = self.slot(idx) {
                doomed.extend(slot.outgoing.iter().copied().filter(|&e| {
                    self.edges[e]
                        .as_ref()
                        .is_some_and(|edge| edge.kind != EdgeKind::Contains)
                }));
            }
        }
        for e in doomed {
            self.remove_edge_at(e);
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        let idx = self.index.get(id)?;
        self.slot(*idx).map(|s| &s.node)
    }

    /// File owning a node; `None` for sinks and unknown ids.
    pub fn owner_file(&self, id: &str) -> Option<&str> {
        self.node(id).and_then(|n| n.file_path.as_deref())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(|s| s.as_ref().map(|s| &s.node))
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter_map(Option::as_ref)
    }

    /// Outgoing edges of a node, in insertion order.
    pub fn outgoing(&self, id: &str) -> Vec<&Edge> {
        self.adjacent(id, true)
    }

    /// Incoming edges of a node, in insertion order.
    pub fn incoming(&self, id: &str) -> Vec<&Edge> {
        self.adjacent(id, false)
    }

    fn adjacent(&self, id: &str, outgoing: bool) -> Vec<&Edge> {
        let Some(slot) = self.index.get(id).and_then(|&i| self.slot(i)) else {
            return Vec::new();
        };
        let list = if outgoing { &slot.outgoing } else { &slot.incoming };
        list.iter().filter_map(|&e| self.edges[e].as_ref()).collect()
    }

    /// Repo-relative paths of all file nodes, sorted.
    pub fn files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = self
            .nodes()
            .filter(|n| n.kind == NodeKind::File)
            .filter_map(|n| n.file_path.as_deref())
            .collect();
        files.sort_unstable();
        files
    }

    /// Nodes owned by a file, the file node included.
    pub fn file_nodes(&self, path: &str) -> Vec<&Node> {
        self.file_nodes
            .get(path)
            .map(|owned| owned.iter().filter_map(|&i| self.slot(i)).map(|s| &s.node).collect())
            .unwrap_or_default()
    }

    /// File node of a path.
    pub fn file_node(&self, path: &str) -> Option<&Node> {
        self.file_nodes(path).into_iter().find(|n| n.kind == NodeKind::File)
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            nodes: self.node_count(),
            edges: self.edge_count(),
            ..GraphStats::default()
        };
        for node in self.nodes() {
            match node.kind {
                NodeKind::File => stats.files += 1,
                NodeKind::Function => stats.functions += 1,
                NodeKind::Class => stats.classes += 1,
                NodeKind::External | NodeKind::Stdlib => stats.external += 1,
                NodeKind::Unresolved | NodeKind::Ambiguous => stats.unresolved += 1,
            }
        }
        for edge in self.edges() {
            *stats.edges_by_kind.entry(edge.kind.label().to_string()).or_default() += 1;
        }
        stats
    }

    /// Check the ownership invariants: every owned non-file node has exactly
    /// one container owned by the same file, and containment never loops.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (idx, slot) in self.nodes.iter().enumerate() {
            let Some(slot) = slot else { continue };
            let node = &slot.node;
            let containers = slot
                .incoming
                .iter()
                .filter(|&&e| self.edges[e].as_ref().is_some_and(|x| x.kind == EdgeKind::Contains))
                .count();
            match node.kind {
                NodeKind::File if containers > 0 => {
                    return Err(GraphError::Inconsistency(format!("file {} is contained", node.id)));
                }
                k if k.is_sink() && containers > 0 => {
                    return Err(GraphError::Inconsistency(format!("sink {} is contained", node.id)));
                }
                NodeKind::Function | NodeKind::Class if containers != 1 => {
                    return Err(GraphError::Inconsistency(format!(
                        "{} has {} containers",
                        node.id, containers
                    )));
                }
                _ => {}
            }

            let mut current = idx;
            let mut steps = 0;
            while let Some(parent) = self.container_of(current) {
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(GraphError::Inconsistency(format!("containment cycle at {}", node.id)));
                }
                current = parent;
            }
        }
        Ok(())
    }

    /// Flat copy with nodes and edges in a stable order.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<Node> = self.nodes().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<Edge> = self.edges().cloned().collect();
        edges.sort_by(|a, b| a.key().cmp(&b.key()));
        GraphSnapshot { nodes, edges }
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self, GraphError> {
        let mut graph = CodeGraph::new();
        for node in snapshot.nodes {
            graph.add_node(node)?;
        }
        for edge in snapshot.edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }
}

/// Holder of the most recently committed graph.
///
/// Readers take an `Arc` to the current version and keep using it while a
/// writer builds the next version on a private copy and swaps it in.
#[derive(Debug, Default)]
pub struct GraphStore {
    current: RwLock<Arc<CodeGraph>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graph(graph: CodeGraph) -> Self {
        Self {
            current: RwLock::new(Arc::new(graph)),
        }
    }

    pub fn snapshot(&self) -> Arc<CodeGraph> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, graph: CodeGraph) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(graph);
    }
}

/// Graph operation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Graph inconsistency: {0}")]
    Inconsistency(String),

    #[error("Invalid edge: source '{0}' or target '{1}' not found")]
    InvalidEdge(String, String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
