//! Graph builder: extracted files in, committed graph versions out.
//!
//! Every mutation is a transaction. The builder copies the current symbol
//! table and graph, applies the change together with the re-resolution of
//! every file the change can affect, and publishes both only when the whole
//! transaction succeeded. Readers holding an older version keep it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::classify;
use crate::entity::{file_id, EntityKind, FileExtraction};
use crate::graph::{CodeGraph, Edge, EdgeKind, GraphError, GraphSnapshot, GraphStats, GraphStore, Node, NodeKind};
use crate::import_resolver::{resolve_import, ImportTarget};
use crate::symbols::{FileSymbols, ImportBinding, Resolution, SymbolTable, SymbolTableState, FILE_SCOPE};

/// Outcome of one committed transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub file_path: String,
    pub nodes_removed: usize,
    pub nodes_added: usize,
    /// Other files whose edges were resolved again
    pub dependents: Vec<String>,
    pub generation: u64,
}

/// Serializable state of a builder, restored without re-parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuilderSnapshot {
    pub generation: u64,
    pub extractions: Vec<FileExtraction>,
    /// Files that failed to parse, with the reason
    pub unparsed: BTreeMap<String, String>,
    pub symbols: Vec<FileSymbols>,
    pub graph: GraphSnapshot,
}

#[derive(Debug, Clone)]
struct ParsedFile {
    extraction: Arc<FileExtraction>,
    /// Identifier segments the file refers to
    references: Arc<BTreeSet<String>>,
}

impl ParsedFile {
    fn new(extraction: FileExtraction) -> Self {
        let references = Arc::new(referenced_names(&extraction));
        Self {
            extraction: Arc::new(extraction),
            references,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BuilderState {
    parsed: BTreeMap<String, ParsedFile>,
    unparsed: BTreeMap<String, String>,
    /// Every source file of the repository, parsed or not
    known: BTreeSet<String>,
    generation: u64,
}

enum Change {
    Update(FileExtraction),
    Unparsed(String),
    Remove,
}

/// Maintains the code graph and the symbol table of one repository.
#[derive(Debug)]
pub struct GraphBuilder {
    repo: String,
    symbols: SymbolTable,
    graph: GraphStore,
    state: Mutex<BuilderState>,
}

impl GraphBuilder {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            symbols: SymbolTable::new(),
            graph: GraphStore::new(),
            state: Mutex::new(BuilderState::default()),
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Most recently committed graph.
    pub fn graph(&self) -> Arc<CodeGraph> {
        self.graph.snapshot()
    }

    /// Most recently committed symbol table.
    pub fn symbols(&self) -> Arc<SymbolTableState> {
        self.symbols.snapshot()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn extraction(&self, path: &str) -> Option<Arc<FileExtraction>> {
        self.lock().parsed.get(path).map(|f| Arc::clone(&f.extraction))
    }

    /// Paths of all parsed files, sorted.
    pub fn parsed_files(&self) -> Vec<String> {
        self.lock().parsed.keys().cloned().collect()
    }

    pub fn unparsed(&self) -> BTreeMap<String, String> {
        self.lock().unparsed.clone()
    }

    /// Fingerprints of the parsed files.
    pub fn fingerprints(&self) -> BTreeMap<String, String> {
        self.lock()
            .parsed
            .iter()
            .map(|(path, f)| (path.clone(), f.extraction.fingerprint.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BuilderState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace everything known about one file.
    pub fn update_file(&self, extraction: FileExtraction) -> Result<UpdateSummary, GraphError> {
        let path = extraction.file_path.clone();
        self.apply(&path, Change::Update(extraction))
    }

    /// Record that a file no longer parses. Its nodes leave the graph until
    /// it parses again.
    pub fn mark_unparsed(&self, path: &str, reason: impl Into<String>) -> Result<UpdateSummary, GraphError> {
        self.apply(path, Change::Unparsed(reason.into()))
    }

    /// Remove a deleted file.
    pub fn remove_file(&self, path: &str) -> Result<UpdateSummary, GraphError> {
        self.apply(path, Change::Remove)
    }

    /// Works on copies of the graph and symbol table and publishes them on
    /// success; a commit costs O(graph size) and commits are serialized.
    fn apply(&self, path: &str, change: Change) -> Result<UpdateSummary, GraphError> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let mut symbols = (*self.symbols.snapshot()).clone();
        let mut graph = (*self.graph.snapshot()).clone();

        let previous = next.parsed.remove(path);
        next.unparsed.remove(path);
        let removed = graph.remove_file(path);
        let old_symbols = symbols.remove_file(path);

        let mut nodes_added = 0;
        match change {
            Change::Update(extraction) => {
                next.known.insert(path.to_string());
                let file = ParsedFile::new(extraction);
                symbols.insert_file(self.file_symbols(&file.extraction, &next.known));
                nodes_added = self.add_nodes(&mut graph, &file.extraction)?;
                next.parsed.insert(path.to_string(), file);
            }
            Change::Unparsed(reason) => {
                next.known.insert(path.to_string());
                next.unparsed.insert(path.to_string(), reason);
            }
            Change::Remove => {
                next.known.remove(path);
            }
        }

        let changed = changed_names(
            old_symbols.as_deref(),
            symbols.file(path),
            previous.as_ref().map(|f| f.extraction.as_ref()),
            next.parsed.get(path).map(|f| f.extraction.as_ref()),
        );

        let mut dependents = removed.dependents;
        for (other, file) in &next.parsed {
            if other == path {
                continue;
            }
            let imports_path = symbols
                .file(other)
                .is_some_and(|s| s.imports().iter().any(|i| i.may_resolve_to(path)));
            if imports_path || !file.references.is_disjoint(&changed) {
                dependents.insert(other.clone());
            }
        }
        dependents.remove(path);
        dependents.retain(|d| next.parsed.contains_key(d));

        // import targets of dependents may have appeared or disappeared
        for dependent in &dependents {
            if let Some(file) = next.parsed.get(dependent) {
                symbols.insert_file(self.file_symbols(&file.extraction, &next.known));
            }
        }

        if let Some(file) = next.parsed.get(path) {
            self.add_edges(&mut graph, &symbols, &file.extraction)?;
        }
        for dependent in &dependents {
            if let Some(file) = next.parsed.get(dependent) {
                graph.clear_outgoing(dependent);
                self.add_edges(&mut graph, &symbols, &file.extraction)?;
            }
        }

        next.generation += 1;
        let summary = UpdateSummary {
            file_path: path.to_string(),
            nodes_removed: removed.nodes.len(),
            nodes_added,
            dependents: dependents.into_iter().collect(),
            generation: next.generation,
        };

        self.symbols.replace(symbols);
        self.graph.replace(graph);
        *guard = next;

        debug!(
            file = %summary.file_path,
            removed = summary.nodes_removed,
            added = summary.nodes_added,
            dependents = summary.dependents.len(),
            generation = summary.generation,
            "Committed file update"
        );
        Ok(summary)
    }

    /// Derive the whole graph from scratch.
    pub fn rebuild(
        &self,
        extractions: Vec<FileExtraction>,
        unparsed: BTreeMap<String, String>,
    ) -> Result<GraphStats, GraphError> {
        let mut guard = self.lock();
        let mut next = BuilderState {
            generation: guard.generation + 1,
            unparsed,
            ..BuilderState::default()
        };
        next.known.extend(next.unparsed.keys().cloned());
        next.known.extend(extractions.iter().map(|e| e.file_path.clone()));
        for extraction in extractions {
            next.unparsed.remove(&extraction.file_path);
            next.parsed.insert(extraction.file_path.clone(), ParsedFile::new(extraction));
        }

        let symbols = SymbolTableState::from_files(
            next.parsed
                .values()
                .map(|f| self.file_symbols(&f.extraction, &next.known)),
        );
        let mut graph = CodeGraph::new();
        for file in next.parsed.values() {
            self.add_nodes(&mut graph, &file.extraction)?;
        }
        for file in next.parsed.values() {
            self.add_edges(&mut graph, &symbols, &file.extraction)?;
        }

        let stats = graph.stats();
        self.symbols.replace(symbols);
        self.graph.replace(graph);
        info!(
            files = next.parsed.len(),
            unparsed = next.unparsed.len(),
            nodes = stats.nodes,
            edges = stats.edges,
            generation = next.generation,
            "Rebuilt code graph"
        );
        *guard = next;
        Ok(stats)
    }

    pub fn export(&self) -> BuilderSnapshot {
        let guard = self.lock();
        let symbols = self.symbols.snapshot();
        let mut files: Vec<FileSymbols> = symbols.files().cloned().collect();
        files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        BuilderSnapshot {
            generation: guard.generation,
            extractions: guard.parsed.values().map(|f| (*f.extraction).clone()).collect(),
            unparsed: guard.unparsed.clone(),
            symbols: files,
            graph: self.graph.snapshot().snapshot(),
        }
    }

    /// Restore a previously exported state.
    pub fn restore(&self, snapshot: BuilderSnapshot) -> Result<(), GraphError> {
        let graph = CodeGraph::from_snapshot(snapshot.graph)?;
        graph.validate()?;

        let mut guard = self.lock();
        let mut next = BuilderState {
            generation: snapshot.generation,
            unparsed: snapshot.unparsed,
            ..BuilderState::default()
        };
        next.known.extend(next.unparsed.keys().cloned());
        for extraction in snapshot.extractions {
            next.known.insert(extraction.file_path.clone());
            next.parsed.insert(extraction.file_path.clone(), ParsedFile::new(extraction));
        }

        self.symbols.replace(SymbolTableState::from_files(snapshot.symbols));
        self.graph.replace(graph);
        *guard = next;
        Ok(())
    }

    fn file_symbols(&self, extraction: &FileExtraction, known: &BTreeSet<String>) -> FileSymbols {
        let imports = extraction
            .imports
            .iter()
            .map(|stmt| resolve_import(stmt, &extraction.file_path, extraction.language, known))
            .collect();
        FileSymbols::build(&self.repo, extraction, imports)
    }

    /// File node, entity nodes and the CONTAINS forest of one file.
    fn add_nodes(&self, graph: &mut CodeGraph, extraction: &FileExtraction) -> Result<usize, GraphError> {
        let file = extraction.file_entity(&self.repo);
        let file_node = file.id.clone();
        graph.add_node(Node::from_entity(file))?;
        for entity in &extraction.entities {
            graph.add_node(Node::from_entity(entity.clone()))?;
        }
        for entity in &extraction.entities {
            let container = entity.parent.as_deref().unwrap_or(&file_node);
            if !graph.contains(container) {
                return Err(GraphError::Inconsistency(format!(
                    "{} is contained by unknown node {}",
                    entity.id, container
                )));
            }
            graph.add_edge(Edge::new(container, &entity.id, EdgeKind::Contains))?;
        }
        Ok(extraction.entities.len() + 1)
    }

    /// IMPORTS, INHERITS and CALLS edges leaving one file.
    fn add_edges(
        &self,
        graph: &mut CodeGraph,
        symbols: &SymbolTableState,
        extraction: &FileExtraction,
    ) -> Result<(), GraphError> {
        let path = &extraction.file_path;
        let Some(file) = symbols.file(path) else {
            return Err(GraphError::Inconsistency(format!("no symbols for {}", path)));
        };
        let source = file_id(&self.repo, path);

        for import in file.imports() {
            let target = match &import.target {
                ImportTarget::File(target) => {
                    let id = file_id(&self.repo, target);
                    if graph.contains(&id) {
                        id
                    } else {
                        // known file that does not parse
                        graph.ensure_sink(NodeKind::Unresolved, &import.module)?
                    }
                }
                other => external_sink(graph, other)?,
            };
            graph.add_edge(Edge::new(&source, target, EdgeKind::Imports).at_line(import.line))?;
        }

        for class in extraction.entities.iter().filter(|e| e.kind == EntityKind::Class) {
            let scope = class
                .parent
                .as_deref()
                .map(|p| file.scope_of(p))
                .unwrap_or(FILE_SCOPE);
            for base in class.bases.iter().chain(&class.implements) {
                let target = match symbols.resolve_class(path, scope, base) {
                    Resolution::Resolved(id) if graph.contains(&id) => id,
                    Resolution::Ambiguous(_) => graph.ensure_sink(NodeKind::Ambiguous, base)?,
                    _ => {
                        let head = base.split(['.', ':']).next().unwrap_or(base);
                        match file.binding(head) {
                            Some(ImportBinding::Name { target, .. } | ImportBinding::Module { target })
                                if !target.is_in_repo() =>
                            {
                                external_sink(graph, target)?
                            }
                            _ => graph.ensure_sink(NodeKind::Unresolved, base)?,
                        }
                    }
                };
                graph.add_edge(
                    Edge::new(&class.id, target, EdgeKind::Inherits).at_line(class.span.start_line),
                )?;
            }
        }

        for call in &extraction.calls {
            if !graph.contains(&call.caller) {
                warn!(caller = %call.caller, line = call.line, "Call site without a caller node");
                continue;
            }
            let resolved = classify(call, path, symbols);
            let target = match (&resolved.target, &resolved.external) {
                (Resolution::Resolved(id), _) if graph.contains(id) => id.clone(),
                (Resolution::Ambiguous(_), _) => graph.ensure_sink(NodeKind::Ambiguous, &call.text)?,
                // a missing in-repo module looks the same as a third-party one
                (_, Some(stdlib @ ImportTarget::Stdlib(_))) => external_sink(graph, stdlib)?,
                _ => graph.ensure_sink(NodeKind::Unresolved, &call.text)?,
            };
            graph.add_edge(
                Edge::new(&call.caller, target, EdgeKind::Calls)
                    .at_line(call.line)
                    .with_call_kind(resolved.kind),
            )?;
        }
        Ok(())
    }
}

fn external_sink(graph: &mut CodeGraph, target: &ImportTarget) -> Result<String, GraphError> {
    match target {
        ImportTarget::Stdlib(module) => graph.ensure_sink(NodeKind::Stdlib, module),
        ImportTarget::External(module) => graph.ensure_sink(NodeKind::External, module),
        ImportTarget::File(path) => graph.ensure_sink(NodeKind::Unresolved, path),
    }
}

fn insert_segments(names: &mut BTreeSet<String>, text: &str) {
    for segment in text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$')) {
        if !segment.is_empty() {
            names.insert(segment.to_string());
        }
    }
}

/// Identifier segments a file's resolution depends on.
fn referenced_names(extraction: &FileExtraction) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for call in &extraction.calls {
        insert_segments(&mut names, &call.name);
        for text in [&call.receiver, &call.receiver_type].into_iter().flatten() {
            insert_segments(&mut names, text);
        }
    }
    for entity in &extraction.entities {
        for base in entity.bases.iter().chain(&entity.implements) {
            insert_segments(&mut names, base);
        }
    }
    for import in &extraction.imports {
        for name in &import.names {
            insert_segments(&mut names, &name.name);
        }
    }
    names
}

/// Names whose meaning may differ between two versions of a file: exports
/// that appeared or vanished, and classes whose bases changed.
fn changed_names(
    old: Option<&FileSymbols>,
    new: Option<&FileSymbols>,
    old_extraction: Option<&FileExtraction>,
    new_extraction: Option<&FileExtraction>,
) -> BTreeSet<String> {
    let old_surface = old.map(FileSymbols::surface).unwrap_or_default();
    let new_surface = new.map(FileSymbols::surface).unwrap_or_default();
    let mut changed = BTreeSet::new();
    for name in old_surface.symmetric_difference(&new_surface) {
        insert_segments(&mut changed, name);
    }

    let bases = |ext: Option<&FileExtraction>| -> BTreeMap<String, Vec<String>> {
        ext.map(|e| {
            e.entities
                .iter()
                .filter(|c| c.kind == EntityKind::Class)
                .map(|c| {
                    let all = c.bases.iter().chain(&c.implements).cloned().collect();
                    (c.qualified_name.clone(), all)
                })
                .collect()
        })
        .unwrap_or_default()
    };
    let (before, after) = (bases(old_extraction), bases(new_extraction));
    for class in before.keys().chain(after.keys()) {
        if before.get(class) != after.get(class) {
            insert_segments(&mut changed, class);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::EntityExtractor;
    use crate::languages::Language;
    use crate::syntax::SyntaxParser;

    fn extract(path: &str, source: &str) -> FileExtraction {
        let language = Language::from_path(std::path::Path::new(path)).unwrap();
        let tree = SyntaxParser::new().parse(source, language).unwrap();
        EntityExtractor::new("repo").extract(&tree, path)
    }

    fn callees(builder: &GraphBuilder, id: &str) -> Vec<String> {
        let graph = builder.graph();
        let mut out: Vec<String> = graph
            .outgoing(id)
            .into_iter()
            .filter(|e| e.kind == EdgeKind::Calls)
            .map(|e| e.target.clone())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_update_resolves_imported_call() {
        let builder = GraphBuilder::new("repo");
        builder.update_file(extract("b.py", "def bar():\n    pass\n")).unwrap();
        builder
            .update_file(extract("a.py", "from b import bar\n\ndef foo():\n    bar()\n"))
            .unwrap();
        assert_eq!(callees(&builder, "repo:a.py:foo"), vec!["repo:b.py:bar"]);
        assert!(builder.graph().validate().is_ok());
    }

    #[test]
    fn test_removing_target_leaves_unresolved_sink() {
        let builder = GraphBuilder::new("repo");
        builder.update_file(extract("b.py", "def bar():\n    pass\n")).unwrap();
        builder
            .update_file(extract("a.py", "from b import bar\n\ndef foo():\n    bar()\n"))
            .unwrap();
        let summary = builder.remove_file("b.py").unwrap();
        assert_eq!(summary.dependents, vec!["a.py".to_string()]);
        assert_eq!(callees(&builder, "repo:a.py:foo"), vec!["unresolved:bar"]);
        assert!(builder.graph().node("repo:b.py:bar").is_none());
    }

    #[test]
    fn test_late_target_is_picked_up() {
        let builder = GraphBuilder::new("repo");
        builder
            .update_file(extract("a.py", "from b import bar\n\ndef foo():\n    bar()\n"))
            .unwrap();
        assert_eq!(callees(&builder, "repo:a.py:foo"), vec!["unresolved:bar"]);
        builder.update_file(extract("b.py", "def bar():\n    pass\n")).unwrap();
        assert_eq!(callees(&builder, "repo:a.py:foo"), vec!["repo:b.py:bar"]);
        assert!(builder.graph().node("unresolved:bar").is_none());
    }

    #[test]
    fn test_incremental_matches_rebuild() {
        let files = [
            ("models.py", "class Base:\n    def save(self):\n        pass\n\nclass User(Base):\n    pass\n"),
            ("service.py", "from models import User\n\ndef create():\n    u = User()\n    u.save()\n"),
            ("main.py", "import os\nfrom service import create\n\ndef main():\n    create()\n    os.getcwd()\n"),
        ];
        let incremental = GraphBuilder::new("repo");
        for (path, source) in files.iter().rev() {
            incremental.update_file(extract(path, source)).unwrap();
        }
        let rebuilt = GraphBuilder::new("repo");
        rebuilt
            .rebuild(files.iter().map(|(p, s)| extract(p, s)).collect(), BTreeMap::new())
            .unwrap();
        assert_eq!(incremental.graph().snapshot(), rebuilt.graph().snapshot());
        assert_eq!(callees(&rebuilt, "repo:service.py:create"), vec![
            "repo:models.py:Base.save".to_string(),
            "repo:models.py:User".to_string(),
        ]);
    }

    #[test]
    fn test_unparsed_file_leaves_graph() {
        let builder = GraphBuilder::new("repo");
        builder.update_file(extract("b.py", "def bar():\n    pass\n")).unwrap();
        builder.update_file(extract("a.py", "import b\n\ndef foo():\n    b.bar()\n")).unwrap();
        builder.mark_unparsed("b.py", "syntax error at 1:4").unwrap();

        let graph = builder.graph();
        assert!(graph.file_node("b.py").is_none());
        let imports: Vec<_> = graph
            .outgoing("repo:a.py")
            .into_iter()
            .filter(|e| e.kind == EdgeKind::Imports)
            .map(|e| e.target.clone())
            .collect();
        assert_eq!(imports, vec!["unresolved:b".to_string()]);
        assert_eq!(builder.unparsed().get("b.py").map(String::as_str), Some("syntax error at 1:4"));
    }

    #[test]
    fn test_external_base_and_import() {
        let builder = GraphBuilder::new("repo");
        builder
            .update_file(extract(
                "views.py",
                "from django.views import View\n\nclass Home(View):\n    pass\n",
            ))
            .unwrap();
        let graph = builder.graph();
        let bases: Vec<_> = graph.outgoing("repo:views.py:Home").into_iter().map(|e| e.target.clone()).collect();
        assert_eq!(bases, vec!["external:django.views".to_string()]);
        assert_eq!(graph.stats().external, 1);
    }

    #[test]
    fn test_readers_keep_their_version() {
        let builder = GraphBuilder::new("repo");
        builder.update_file(extract("b.py", "def bar():\n    pass\n")).unwrap();
        let before = builder.graph();
        builder.remove_file("b.py").unwrap();
        assert!(before.node("repo:b.py:bar").is_some());
        assert!(builder.graph().node("repo:b.py:bar").is_none());
    }

    #[test]
    fn test_export_restore() {
        let builder = GraphBuilder::new("repo");
        builder.update_file(extract("b.py", "def bar():\n    pass\n")).unwrap();
        builder
            .update_file(extract("a.py", "from b import bar\n\ndef foo():\n    bar()\n"))
            .unwrap();
        let restored = GraphBuilder::new("repo");
        restored.restore(builder.export()).unwrap();
        assert_eq!(restored.graph().snapshot(), builder.graph().snapshot());
        assert_eq!(restored.generation(), builder.generation());

        restored.remove_file("b.py").unwrap();
        assert_eq!(callees(&restored, "repo:a.py:foo"), vec!["unresolved:bar"]);
    }
}
