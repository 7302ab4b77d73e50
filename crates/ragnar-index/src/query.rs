//! Read-only queries over one committed graph version.
//!
//! Traversals are iterative with explicit queues or stacks and a visited
//! set, so cyclic call and inheritance graphs terminate and deep chains
//! cannot overflow the stack.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::CallKind;
use crate::graph::{CodeGraph, Edge, EdgeKind, GraphError, Node, NodeKind};

/// Upper bound on the number of paths `find_paths` returns.
pub const MAX_PATHS: usize = 100;

/// Direction of a call-chain traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Follow calls made by the function
    Outgoing,
    /// Follow calls made to the function
    Incoming,
}

impl FromStr for Direction {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "outgoing" | "callees" => Ok(Direction::Outgoing),
            "incoming" | "callers" => Ok(Direction::Incoming),
            other => Err(GraphError::InvalidArgument(format!(
                "direction must be 'outgoing' or 'incoming', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outgoing => f.write_str("outgoing"),
            Direction::Incoming => f.write_str("incoming"),
        }
    }
}

/// Direction of a class hierarchy traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyDirection {
    Parents,
    Children,
    Both,
}

impl FromStr for HierarchyDirection {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parents" | "up" => Ok(HierarchyDirection::Parents),
            "children" | "down" => Ok(HierarchyDirection::Children),
            "both" => Ok(HierarchyDirection::Both),
            other => Err(GraphError::InvalidArgument(format!(
                "direction must be 'parents', 'children' or 'both', got '{}'",
                other
            ))),
        }
    }
}

/// Compact description of a node in query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub qualified_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl From<&Node> for NodeSummary {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            kind: node.kind,
            name: node.name.clone(),
            qualified_name: node.qualified_name().to_string(),
            file_path: node.file_path.clone(),
            line: node.line(),
            signature: node.entity.as_ref().and_then(|e| e.signature.clone()),
        }
    }
}

/// One CALLS edge seen from one of its ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub caller: String,
    pub callee: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_kind: Option<CallKind>,
    /// The other end of the edge
    pub node: NodeSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainNode {
    #[serde(flatten)]
    pub node: NodeSummary,
    pub depth: usize,
}

/// Subgraph visited by a call-chain traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallChain {
    pub root: String,
    pub direction: Direction,
    pub max_depth: usize,
    pub nodes: Vec<ChainNode>,
    pub edges: Vec<Edge>,
    /// The depth bound cut off further calls
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEntry {
    #[serde(flatten)]
    pub node: NodeSummary,
    pub depth: usize,
    /// Class or function that contains this class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassHierarchy {
    pub class: NodeSummary,
    /// Containing class, function or file of `class`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<NodeSummary>,
    pub parents: Vec<HierarchyEntry>,
    pub children: Vec<HierarchyEntry>,
    pub edges: Vec<Edge>,
    /// Inheritance cycles found, each as a list of class ids
    pub cycles: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDependency {
    /// Node id of the other end: a file node or an external sink
    pub id: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub size: usize,
    pub files: Vec<String>,
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMatch {
    #[serde(flatten)]
    pub node: NodeSummary,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureNode {
    #[serde(flatten)]
    pub node: NodeSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StructureNode>,
}

/// Queries against one graph version.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    graph: Arc<CodeGraph>,
}

impl QueryEngine {
    pub fn new(graph: Arc<CodeGraph>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &CodeGraph {
        &self.graph
    }

    fn require(&self, id: &str) -> Result<&Node, GraphError> {
        self.graph
            .node(id)
            .ok_or_else(|| GraphError::NotFound(id.to_string()))
    }

    /// Accept a file node id or a repo-relative path.
    fn require_file(&self, file: &str) -> Result<&Node, GraphError> {
        match self.graph.node(file) {
            Some(node) if node.kind == NodeKind::File => Ok(node),
            _ => self
                .graph
                .file_node(file)
                .ok_or_else(|| GraphError::NotFound(file.to_string())),
        }
    }

    fn summary(&self, id: &str) -> Option<NodeSummary> {
        self.graph.node(id).map(NodeSummary::from)
    }

    /// Outgoing CALLS edges of a function.
    pub fn get_function_calls(&self, id: &str) -> Result<Vec<CallSite>, GraphError> {
        self.require(id)?;
        Ok(self.call_sites(id, Direction::Outgoing))
    }

    /// Incoming CALLS edges of a function.
    pub fn get_callers(&self, id: &str) -> Result<Vec<CallSite>, GraphError> {
        self.require(id)?;
        Ok(self.call_sites(id, Direction::Incoming))
    }

    fn call_sites(&self, id: &str, direction: Direction) -> Vec<CallSite> {
        let mut sites: Vec<CallSite> = self
            .call_edges(id, direction)
            .into_iter()
            .filter_map(|edge| {
                let other = match direction {
                    Direction::Outgoing => &edge.target,
                    Direction::Incoming => &edge.source,
                };
                Some(CallSite {
                    caller: edge.source.clone(),
                    callee: edge.target.clone(),
                    line: edge.line,
                    call_kind: edge.call_kind,
                    node: self.summary(other)?,
                })
            })
            .collect();
        sites.sort_by(|a, b| (a.line, &a.caller, &a.callee).cmp(&(b.line, &b.caller, &b.callee)));
        sites
    }

    fn call_edges(&self, id: &str, direction: Direction) -> Vec<&Edge> {
        let edges = match direction {
            Direction::Outgoing => self.graph.outgoing(id),
            Direction::Incoming => self.graph.incoming(id),
        };
        edges.into_iter().filter(|e| e.kind == EdgeKind::Calls).collect()
    }

    /// Breadth-first walk over CALLS edges, at most `max_depth` hops.
    pub fn get_call_chain(
        &self,
        id: &str,
        max_depth: usize,
        direction: Direction,
    ) -> Result<CallChain, GraphError> {
        let root = self.require(id)?;
        let mut chain = CallChain {
            root: id.to_string(),
            direction,
            max_depth,
            nodes: vec![ChainNode {
                node: root.into(),
                depth: 0,
            }],
            edges: Vec::new(),
            truncated: false,
        };

        let mut visited: HashSet<&str> = HashSet::from([root.id.as_str()]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(root.id.as_str(), 0)]);
        while let Some((current, depth)) = queue.pop_front() {
            let edges = self.call_edges(current, direction);
            if depth >= max_depth {
                if !edges.is_empty() {
                    chain.truncated = true;
                }
                continue;
            }
            for edge in edges {
                let next = match direction {
                    Direction::Outgoing => edge.target.as_str(),
                    Direction::Incoming => edge.source.as_str(),
                };
                chain.edges.push(edge.clone());
                if visited.insert(next) {
                    if let Some(summary) = self.summary(next) {
                        chain.nodes.push(ChainNode {
                            node: summary,
                            depth: depth + 1,
                        });
                    }
                    queue.push_back((next, depth + 1));
                }
            }
        }
        Ok(chain)
    }

    /// Walk INHERITS edges from a class. A function id stands for the class
    /// that directly contains it.
    pub fn get_class_hierarchy(
        &self,
        id: &str,
        direction: HierarchyDirection,
    ) -> Result<ClassHierarchy, GraphError> {
        let node = self.require(id)?;
        let class = match node.kind {
            NodeKind::Class => node,
            NodeKind::Function => self
                .container(id)
                .filter(|c| c.kind == NodeKind::Class)
                .ok_or_else(|| GraphError::InvalidArgument(format!("{} is not a method", id)))?,
            _ => {
                return Err(GraphError::InvalidArgument(format!("{} is not a class", id)));
            }
        };

        let mut hierarchy = ClassHierarchy {
            class: class.into(),
            container: self.container(&class.id).map(NodeSummary::from),
            parents: Vec::new(),
            children: Vec::new(),
            edges: Vec::new(),
            cycles: Vec::new(),
        };
        if matches!(direction, HierarchyDirection::Parents | HierarchyDirection::Both) {
            hierarchy.parents = self.inheritance_walk(&class.id, Direction::Outgoing, &mut hierarchy.edges);
        }
        if matches!(direction, HierarchyDirection::Children | HierarchyDirection::Both) {
            hierarchy.children = self.inheritance_walk(&class.id, Direction::Incoming, &mut hierarchy.edges);
        }
        hierarchy.cycles = self.inheritance_cycles(&class.id);
        Ok(hierarchy)
    }

    fn container(&self, id: &str) -> Option<&Node> {
        self.graph
            .incoming(id)
            .into_iter()
            .find(|e| e.kind == EdgeKind::Contains)
            .and_then(|e| self.graph.node(&e.source))
    }

    fn inheritance_walk(&self, start: &str, direction: Direction, edges: &mut Vec<Edge>) -> Vec<HierarchyEntry> {
        let mut entries = Vec::new();
        let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
        let mut queue = VecDeque::from([(start.to_string(), 0usize)]);
        while let Some((current, depth)) = queue.pop_front() {
            let adjacent = match direction {
                Direction::Outgoing => self.graph.outgoing(&current),
                Direction::Incoming => self.graph.incoming(&current),
            };
            for edge in adjacent.into_iter().filter(|e| e.kind == EdgeKind::Inherits) {
                let next = match direction {
                    Direction::Outgoing => &edge.target,
                    Direction::Incoming => &edge.source,
                };
                if !edges.contains(edge) {
                    edges.push(edge.clone());
                }
                if !visited.insert(next.clone()) {
                    continue;
                }
                if let Some(node) = self.graph.node(next) {
                    entries.push(HierarchyEntry {
                        node: node.into(),
                        depth: depth + 1,
                        container: self.container(next).map(|c| c.id.clone()),
                    });
                }
                queue.push_back((next.clone(), depth + 1));
            }
        }
        entries
    }

    /// Cycles among the ancestors of `start`, found with an explicit-stack
    /// depth-first search.
    fn inheritance_cycles(&self, start: &str) -> Vec<Vec<String>> {
        let parents = |id: &str| -> Vec<String> {
            self.graph
                .outgoing(id)
                .into_iter()
                .filter(|e| e.kind == EdgeKind::Inherits)
                .map(|e| e.target.clone())
                .collect()
        };

        let mut cycles = Vec::new();
        let mut seen: BTreeSet<Vec<String>> = BTreeSet::new();
        let mut done: HashSet<String> = HashSet::new();
        let mut path: Vec<String> = vec![start.to_string()];
        let mut stack: Vec<(Vec<String>, usize)> = vec![(parents(start), 0)];

        while let Some((next, cursor)) = stack.last_mut() {
            let Some(candidate) = next.get(*cursor).cloned() else {
                stack.pop();
                if let Some(finished) = path.pop() {
                    done.insert(finished);
                }
                continue;
            };
            *cursor += 1;
            if let Some(pos) = path.iter().position(|p| *p == candidate) {
                let mut cycle = path[pos..].to_vec();
                // rotate so equal cycles compare equal
                if let Some(min) = cycle.iter().enumerate().min_by(|a, b| a.1.cmp(b.1)).map(|(i, _)| i) {
                    cycle.rotate_left(min);
                }
                if seen.insert(cycle.clone()) {
                    cycles.push(cycle);
                }
                continue;
            }
            if done.contains(&candidate) {
                continue;
            }
            let grand = parents(&candidate);
            path.push(candidate);
            stack.push((grand, 0));
        }
        cycles
    }

    /// Files imported by `file`.
    pub fn get_file_dependencies(&self, file: &str, include_external: bool) -> Result<Vec<FileDependency>, GraphError> {
        let node = self.require_file(file)?;
        let mut deps: Vec<FileDependency> = self
            .graph
            .outgoing(&node.id)
            .into_iter()
            .filter(|e| e.kind == EdgeKind::Imports)
            .filter_map(|e| {
                let target = self.graph.node(&e.target)?;
                if !include_external && target.kind != NodeKind::File {
                    return None;
                }
                Some(FileDependency {
                    id: target.id.clone(),
                    kind: target.kind,
                    file_path: target.file_path.clone(),
                    line: e.line,
                })
            })
            .collect();
        deps.sort_by(|a, b| (&a.id, a.line).cmp(&(&b.id, b.line)));
        deps.dedup_by(|a, b| a.id == b.id);
        Ok(deps)
    }

    /// Files that import `file`.
    pub fn get_file_dependents(&self, file: &str) -> Result<Vec<FileDependency>, GraphError> {
        let node = self.require_file(file)?;
        let mut deps: Vec<FileDependency> = self
            .graph
            .incoming(&node.id)
            .into_iter()
            .filter(|e| e.kind == EdgeKind::Imports)
            .filter_map(|e| {
                let source = self.graph.node(&e.source)?;
                Some(FileDependency {
                    id: source.id.clone(),
                    kind: source.kind,
                    file_path: source.file_path.clone(),
                    line: e.line,
                })
            })
            .collect();
        deps.sort_by(|a, b| (&a.id, a.line).cmp(&(&b.id, b.line)));
        deps.dedup_by(|a, b| a.id == b.id);
        Ok(deps)
    }

    /// Weakly connected components, largest first. Sinks are left out so a
    /// shared import like `stdlib:os` does not glue unrelated files together.
    pub fn get_connected_components(&self) -> Vec<Component> {
        let ids: Vec<&str> = self
            .graph
            .nodes()
            .filter(|n| !n.kind.is_sink())
            .map(|n| n.id.as_str())
            .collect();
        let mut component_of: HashMap<&str, usize> = HashMap::new();
        let mut components = Vec::new();

        for &start in &ids {
            if component_of.contains_key(start) {
                continue;
            }
            let index = components.len();
            let mut members = Vec::new();
            let mut queue = VecDeque::from([start]);
            component_of.insert(start, index);
            while let Some(current) = queue.pop_front() {
                members.push(current.to_string());
                let neighbours = self
                    .graph
                    .outgoing(current)
                    .into_iter()
                    .map(|e| e.target.as_str())
                    .chain(self.graph.incoming(current).into_iter().map(|e| e.source.as_str()));
                for next in neighbours {
                    let is_sink = self.graph.node(next).map_or(true, |n| n.kind.is_sink());
                    if is_sink || component_of.contains_key(next) {
                        continue;
                    }
                    component_of.insert(next, index);
                    queue.push_back(next);
                }
            }
            members.sort();
            let files: BTreeSet<String> = members
                .iter()
                .filter_map(|id| self.graph.owner_file(id).map(str::to_string))
                .collect();
            components.push(Component {
                size: members.len(),
                files: files.into_iter().collect(),
                nodes: members,
            });
        }
        components.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.nodes.cmp(&b.nodes)));
        components
    }

    /// All simple paths from `from` to `to` of at most `max_depth` edges,
    /// over every edge kind. Capped at [`MAX_PATHS`].
    pub fn find_paths(&self, from: &str, to: &str, max_depth: usize) -> Result<Vec<Vec<String>>, GraphError> {
        self.require(from)?;
        self.require(to)?;
        let successors = |id: &str| -> Vec<String> {
            let set: BTreeSet<String> = self.graph.outgoing(id).into_iter().map(|e| e.target.clone()).collect();
            set.into_iter().collect()
        };

        let mut paths = Vec::new();
        if from == to {
            paths.push(vec![from.to_string()]);
            return Ok(paths);
        }
        let mut path = vec![from.to_string()];
        let mut on_path: HashSet<String> = HashSet::from([from.to_string()]);
        let mut stack: Vec<(Vec<String>, usize)> = vec![(successors(from), 0)];

        while let Some((next, cursor)) = stack.last_mut() {
            if paths.len() >= MAX_PATHS {
                break;
            }
            let Some(candidate) = next.get(*cursor).cloned() else {
                stack.pop();
                if let Some(left) = path.pop() {
                    on_path.remove(&left);
                }
                continue;
            };
            *cursor += 1;
            if candidate == to {
                if path.len() > max_depth {
                    continue;
                }
                let mut found = path.clone();
                found.push(candidate);
                paths.push(found);
                continue;
            }
            if path.len() >= max_depth || on_path.contains(&candidate) {
                continue;
            }
            let onward = successors(&candidate);
            on_path.insert(candidate.clone());
            path.push(candidate);
            stack.push((onward, 0));
        }
        Ok(paths)
    }

    /// Scored lookup by name: exact matches first, then qualified-name
    /// suffixes, then substrings.
    pub fn find_symbol(&self, query: &str, kind: Option<NodeKind>, limit: usize) -> Vec<SymbolMatch> {
        let needle = query.to_lowercase();
        let suffix = format!(".{}", needle);
        let mut matches: Vec<SymbolMatch> = self
            .graph
            .nodes()
            .filter(|n| !n.kind.is_sink())
            .filter(|n| kind.map_or(true, |k| n.kind == k))
            .filter_map(|n| {
                let name = n.name.to_lowercase();
                let qualified = n.qualified_name().to_lowercase();
                let score = if n.name == query || n.qualified_name() == query || n.id == query {
                    1.0
                } else if name == needle || qualified == needle {
                    0.9
                } else if qualified.ends_with(&suffix) {
                    0.8
                } else if name.contains(&needle) {
                    0.6
                } else if qualified.contains(&needle) {
                    0.5
                } else {
                    return None;
                };
                Some(SymbolMatch {
                    node: n.into(),
                    score,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.node.id.cmp(&b.node.id))
        });
        matches.truncate(limit);
        matches
    }

    /// The CONTAINS tree of one file.
    pub fn get_file_structure(&self, file: &str) -> Result<StructureNode, GraphError> {
        let root = self.require_file(file)?;
        let mut children: BTreeMap<&str, Vec<&Node>> = BTreeMap::new();
        for node in self.graph.file_nodes(root.file_path.as_deref().unwrap_or_default()) {
            if let Some(parent) = self.container(&node.id) {
                children.entry(parent.id.as_str()).or_default().push(node);
            }
        }
        for list in children.values_mut() {
            list.sort_by_key(|n| (n.line(), n.id.clone()));
        }
        Ok(build_structure(root, &children))
    }
}

fn build_structure(node: &Node, children: &BTreeMap<&str, Vec<&Node>>) -> StructureNode {
    StructureNode {
        node: node.into(),
        children: children
            .get(node.id.as_str())
            .map(|list| list.iter().map(|c| build_structure(c, children)).collect())
            .unwrap_or_default(),
    }
}
