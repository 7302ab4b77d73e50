//! Integration tests for ragnar-index.
//!
//! These tests drive the public API end to end: syntax trees from source
//! text, extraction, the graph builder and the query engine, and the
//! orchestrator over repositories written to temporary directories.

use std::fs;
use std::path::Path;

use serde_json::json;
use tempfile::tempdir;

use ragnar_index::entity::FileExtraction;
use ragnar_index::graph::{EdgeKind, NodeKind};
use ragnar_index::query::{Direction, HierarchyDirection};
use ragnar_index::{
    EntityExtractor, FileOutcome, GraphBuilder, Indexer, IndexerConfig, Language, QueryEngine, SyntaxParser,
    ToolRouter,
};

fn extract(path: &str, source: &str) -> FileExtraction {
    let language = Language::from_path(Path::new(path)).unwrap();
    let tree = SyntaxParser::new().parse(source, language).unwrap();
    EntityExtractor::new("repo").extract(&tree, path)
}

fn callees(q: &QueryEngine, id: &str) -> Vec<String> {
    q.get_function_calls(id).unwrap().into_iter().map(|c| c.callee).collect()
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

const SHAPES: &str = r#"
class Shape:
    def area(self):
        return 0

class Square(Shape):
    def __init__(self, side):
        self.side = side

    def area(self):
        return helper(self.side)

def helper(x):
    return x * x
"#;

const MAIN: &str = r#"
from shapes import Square, helper
import os

def run():
    sq = Square(3)
    sq.area()
    helper(2)
    os.getcwd()
"#;

const UTIL: &str = r#"
from main import run

def again():
    run()
"#;

#[test]
fn test_rebuild_matches_incremental_updates() {
    let files = [("shapes.py", SHAPES), ("main.py", MAIN), ("util.py", UTIL)];

    let rebuilt = GraphBuilder::new("repo");
    rebuilt
        .rebuild(files.iter().map(|(p, s)| extract(p, s)).collect(), Default::default())
        .unwrap();

    // reverse order so every import target arrives after its importer
    let incremental = GraphBuilder::new("repo");
    for (path, source) in files.iter().rev() {
        incremental.update_file(extract(path, source)).unwrap();
    }

    assert_eq!(rebuilt.export().graph, incremental.export().graph);

    let q = QueryEngine::new(incremental.graph());
    let calls = callees(&q, "repo:main.py:run");
    assert!(calls.contains(&"repo:shapes.py:Square".to_string()));
    assert!(calls.contains(&"repo:shapes.py:Square.area".to_string()));
    assert!(calls.contains(&"repo:shapes.py:helper".to_string()));
    assert!(calls.iter().any(|c| c.starts_with("stdlib:")));
    assert_eq!(callees(&q, "repo:util.py:again"), vec!["repo:main.py:run".to_string()]);
}

#[test]
fn test_delete_and_readd_restores_subgraph() {
    let builder = GraphBuilder::new("repo");
    builder.update_file(extract("shapes.py", SHAPES)).unwrap();
    builder.update_file(extract("main.py", MAIN)).unwrap();
    let before = builder.export().graph;

    builder.remove_file("shapes.py").unwrap();
    let graph = builder.graph();
    assert!(graph.nodes().all(|n| n.file_path.as_deref() != Some("shapes.py")));
    assert!(graph
        .edges()
        .all(|e| !e.source.starts_with("repo:shapes.py") && !e.target.starts_with("repo:shapes.py")));
    assert!(graph.validate().is_ok());

    builder.update_file(extract("shapes.py", SHAPES)).unwrap();
    assert_eq!(builder.export().graph, before);
}

#[test]
fn test_call_chain_with_cycle() {
    let builder = GraphBuilder::new("repo");
    builder
        .update_file(extract(
            "loop.py",
            "def a():\n    b()\n\ndef b():\n    a()\n    c()\n\ndef c():\n    pass\n",
        ))
        .unwrap();
    let q = QueryEngine::new(builder.graph());

    let chain = q.get_call_chain("repo:loop.py:a", 10, Direction::Outgoing).unwrap();
    let mut ids: Vec<_> = chain.nodes.iter().map(|n| n.node.id.clone()).collect();
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total);
    assert_eq!(total, 3);

    let short = q.get_call_chain("repo:loop.py:a", 1, Direction::Outgoing).unwrap();
    assert!(short.nodes.iter().all(|n| n.depth <= 1));
    assert!(short.truncated);
}

#[test]
fn test_decorator_base_name_keeps_nested_call() {
    let ext = extract(
        "views.py",
        "import mod\n\n@mod.outer(inner(x, y))\ndef handler():\n    pass\n",
    );
    let handler = ext.entities.iter().find(|e| e.name == "handler").unwrap();
    assert_eq!(handler.decorators, vec!["mod.outer".to_string()]);
}

#[test]
fn test_nested_class_hierarchy() {
    let builder = GraphBuilder::new("repo");
    builder
        .update_file(extract(
            "m.py",
            "class Base:\n    pass\n\nclass Outer:\n    class Inner(Base):\n        def method(self):\n            pass\n",
        ))
        .unwrap();
    let q = QueryEngine::new(builder.graph());

    let hierarchy = q
        .get_class_hierarchy("repo:m.py:Outer.Inner.method", HierarchyDirection::Both)
        .unwrap();
    assert_eq!(hierarchy.class.id, "repo:m.py:Outer.Inner");
    assert_eq!(hierarchy.container.unwrap().id, "repo:m.py:Outer");
    assert_eq!(hierarchy.parents[0].node.id, "repo:m.py:Base");
}

#[test]
fn test_deleted_import_target_becomes_unresolved() {
    let builder = GraphBuilder::new("repo");
    builder.update_file(extract("b.py", "def bar():\n    pass\n")).unwrap();
    builder
        .update_file(extract("a.py", "from b import bar\n\ndef foo():\n    bar()\n"))
        .unwrap();
    assert_eq!(
        callees(&QueryEngine::new(builder.graph()), "repo:a.py:foo"),
        vec!["repo:b.py:bar".to_string()]
    );

    builder.remove_file("b.py").unwrap();
    builder
        .update_file(extract("a.py", "from b import bar\n\ndef foo():\n    bar()\n"))
        .unwrap();
    let q = QueryEngine::new(builder.graph());
    assert_eq!(callees(&q, "repo:a.py:foo"), vec!["unresolved:bar".to_string()]);
    assert_eq!(q.graph().node("unresolved:bar").unwrap().kind, NodeKind::Unresolved);
}

#[test]
fn test_method_call_resolution_by_receiver_type() {
    let builder = GraphBuilder::new("repo");
    builder
        .update_file(extract(
            "p.py",
            "class Processor:\n    def process(self):\n        pass\n\ndef foo():\n    obj = Processor()\n    obj.process()\n\ndef bar(obj):\n    obj.process()\n",
        ))
        .unwrap();
    let q = QueryEngine::new(builder.graph());

    let callers: Vec<String> = q
        .get_callers("repo:p.py:Processor.process")
        .unwrap()
        .into_iter()
        .map(|c| c.caller)
        .collect();
    assert_eq!(callers, vec!["repo:p.py:foo".to_string()]);

    assert_eq!(callees(&q, "repo:p.py:bar"), vec!["unresolved:obj.process".to_string()]);
}

#[test]
fn test_rebound_or_shadowed_receiver_stays_unresolved() {
    let builder = GraphBuilder::new("repo");
    builder
        .update_file(extract(
            "a.py",
            "class Processor:\n    def process(self):\n        pass\n\ndef make():\n    pass\n\ndef foo():\n    obj = Processor()\n    obj = make()\n    obj.process()\n\ndef outer():\n    obj = Processor()\n    def inner(obj):\n        obj.process()\n",
        ))
        .unwrap();
    let q = QueryEngine::new(builder.graph());

    let foo = callees(&q, "repo:a.py:foo");
    assert!(foo.contains(&"unresolved:obj.process".to_string()));
    assert!(!foo.contains(&"repo:a.py:Processor.process".to_string()));
    assert_eq!(callees(&q, "repo:a.py:outer.inner"), vec!["unresolved:obj.process".to_string()]);
    assert!(q.get_callers("repo:a.py:Processor.process").unwrap().is_empty());
}

#[test]
fn test_imports_and_inheritance_edges() {
    let builder = GraphBuilder::new("repo");
    builder.update_file(extract("shapes.py", SHAPES)).unwrap();
    builder.update_file(extract("main.py", MAIN)).unwrap();
    let graph = builder.graph();

    assert!(graph
        .outgoing("repo:main.py")
        .iter()
        .any(|e| e.kind == EdgeKind::Imports && e.target == "repo:shapes.py"));
    assert!(graph
        .outgoing("repo:shapes.py:Square")
        .iter()
        .any(|e| e.kind == EdgeKind::Inherits && e.target == "repo:shapes.py:Shape"));
}

#[test]
fn test_cross_language_repository() {
    let builder = GraphBuilder::new("repo");
    builder
        .update_file(extract(
            "src/lib.rs",
            "pub struct Store;\n\nimpl Store {\n    pub fn new() -> Self { Store }\n    pub fn get(&self) {}\n}\n\nfn helper() {\n    let s = Store::new();\n    s.get();\n}\n",
        ))
        .unwrap();
    builder
        .update_file(extract(
            "web/app.ts",
            "import { render } from './view';\n\nexport function main(): void {\n  render();\n}\n",
        ))
        .unwrap();
    builder
        .update_file(extract("web/view.ts", "export function render(): void {}\n"))
        .unwrap();
    let q = QueryEngine::new(builder.graph());

    let rust_calls = callees(&q, "repo:src/lib.rs:helper");
    assert!(rust_calls.contains(&"repo:src/lib.rs:Store.new".to_string()));
    assert!(rust_calls.contains(&"repo:src/lib.rs:Store.get".to_string()));
    assert_eq!(callees(&q, "repo:web/app.ts:main"), vec!["repo:web/view.ts:render".to_string()]);
}

#[tokio::test]
async fn test_orchestrator_end_to_end() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "b.py", "def bar():\n    pass\n");
    write(root, "a.py", "from b import bar\n\ndef foo():\n    bar()\n");
    write(root, "broken.py", "def nope(:\n");

    let indexer = Indexer::new(IndexerConfig::new(root).with_repo_name("repo"), None);
    let stats = indexer.start().await.unwrap();
    assert_eq!(stats.files_indexed, 2);
    assert_eq!(stats.files_unparsed, 1);

    // fixing the broken file brings it into the graph
    write(root, "broken.py", "def nope():\n    bar()\n");
    let outcome = indexer.index_file(&root.join("broken.py")).await.unwrap();
    assert!(matches!(outcome, FileOutcome::Indexed(_)));
    assert!(indexer.status().await.unparsed.is_empty());

    fs::remove_file(root.join("b.py")).unwrap();
    assert_eq!(indexer.index_file(&root.join("b.py")).await.unwrap(), FileOutcome::Removed);
    assert_eq!(callees(&indexer.query(), "repo:a.py:foo"), vec!["unresolved:bar".to_string()]);

    let status = indexer.status().await;
    assert_eq!(status.files_indexed, 2);
    assert_eq!(status.pending_tasks, 0);
}

#[tokio::test]
async fn test_concurrent_updates_to_one_file_converge() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "a.py", "def v0():\n    pass\n");
    let indexer = Indexer::new(IndexerConfig::new(root).with_repo_name("repo").with_state_dir(None), None);
    indexer.rebuild().await.unwrap();

    write(root, "a.py", "def v1():\n    pass\n");
    let mut handles = Vec::new();
    for _ in 0..8 {
        let indexer = indexer.clone();
        let path = root.join("a.py");
        handles.push(tokio::spawn(async move { indexer.index_file(&path).await }));
    }
    let outcomes: Vec<FileOutcome> = futures_outcomes(handles).await;
    assert!(outcomes.iter().any(|o| matches!(o, FileOutcome::Indexed(_))));
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, FileOutcome::Indexed(_) | FileOutcome::Coalesced | FileOutcome::Unchanged)));

    indexer.wait_idle().await;
    let graph = indexer.builder().graph();
    assert!(graph.node("repo:a.py:v1").is_some());
    assert!(graph.node("repo:a.py:v0").is_none());
}

#[tokio::test]
async fn test_parallel_updates_of_distinct_files_match_rebuild() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let indexer = Indexer::new(IndexerConfig::new(root).with_repo_name("repo").with_state_dir(None), None);
    indexer.rebuild().await.unwrap();

    let files = [("shapes.py", SHAPES), ("main.py", MAIN), ("util.py", UTIL)];
    for (path, source) in files {
        write(root, path, source);
    }
    let mut handles = Vec::new();
    for (path, _) in files {
        let indexer = indexer.clone();
        let path = root.join(path);
        handles.push(tokio::spawn(async move { indexer.index_file(&path).await }));
    }
    let outcomes = futures_outcomes(handles).await;
    assert!(outcomes.iter().all(|o| matches!(o, FileOutcome::Indexed(_))));
    indexer.wait_idle().await;
    let incremental = indexer.builder().export().graph;

    indexer.rebuild().await.unwrap();
    assert_eq!(indexer.builder().export().graph, incremental);
}

async fn futures_outcomes(
    handles: Vec<tokio::task::JoinHandle<anyhow::Result<FileOutcome>>>,
) -> Vec<FileOutcome> {
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }
    outcomes
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "pkg/__init__.py", "");
    write(root, "pkg/core.py", "class Engine:\n    def start(self):\n        pass\n");
    write(root, "run.py", "from pkg.core import Engine\n\ndef main():\n    Engine().start()\n");

    let first = Indexer::new(IndexerConfig::new(root).with_repo_name("repo"), None);
    first.start().await.unwrap();
    let generation = first.status().await.generation;
    let calls = callees(&first.query(), "repo:run.py:main");
    drop(first);

    let second = Indexer::new(IndexerConfig::new(root).with_repo_name("repo"), None);
    let stats = second.start().await.unwrap();
    assert_eq!(stats.files_indexed, 0);
    assert_eq!(second.status().await.generation, generation);
    assert_eq!(callees(&second.query(), "repo:run.py:main"), calls);
}

#[tokio::test]
async fn test_tool_router_over_indexed_repo() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "shapes.py", SHAPES);
    write(root, "main.py", MAIN);

    let indexer = Indexer::new(IndexerConfig::new(root).with_repo_name("repo").with_state_dir(None), None);
    indexer.rebuild().await.unwrap();
    let router = ToolRouter::new(indexer);

    let chain = router
        .call(
            "get_call_chain",
            &json!({ "function_id": "repo:main.py:run", "max_depth": 2, "direction": "outgoing" }),
        )
        .await;
    assert_eq!(chain["root"], "repo:main.py:run");
    assert!(chain["nodes"].as_array().unwrap().len() > 1);

    let hierarchy = router
        .call("get_class_hierarchy", &json!({ "class_id": "repo:shapes.py:Square", "direction": "parents" }))
        .await;
    assert_eq!(hierarchy["parents"][0]["id"], "repo:shapes.py:Shape");

    let deps = router.call("get_file_dependencies", &json!({ "file_path": "main.py" })).await;
    assert!(deps.as_array().unwrap().iter().any(|d| d["id"] == "repo:shapes.py"));

    let structure = router.call("get_file_structure", &json!({ "file_path": "shapes.py" })).await;
    assert_eq!(structure["children"].as_array().unwrap().len(), 3);

    let reindex = router.call("reindex", &json!({ "force": false })).await;
    assert_eq!(reindex["files_unchanged"], 2);
}
