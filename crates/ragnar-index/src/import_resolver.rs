//! Import resolution: import statements to repository files or external modules.
//!
//! Resolution is a pure function of the statement, the importing file's path
//! and the set of files known to the index. Every attempt also records the
//! candidate paths it tried so the graph builder can re-resolve importers
//! when one of those files appears or disappears.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::entity::{ImportStmt, ImportedName};
use crate::languages::{ImportRules, ImportStyle, Language};

/// Files known to the index, by repo-relative path.
pub trait FileSet {
    fn contains_file(&self, path: &str) -> bool;

    /// Files directly inside `dir` ("" is the repository root).
    fn list_dir(&self, dir: &str) -> Vec<String>;
}

impl FileSet for BTreeSet<String> {
    fn contains_file(&self, path: &str) -> bool {
        self.contains(path)
    }

    fn list_dir(&self, dir: &str) -> Vec<String> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        self.range(prefix.clone()..)
            .take_while(|p| p.starts_with(&prefix))
            .filter(|p| !p[prefix.len()..].contains('/'))
            .cloned()
            .collect()
    }
}

impl FileSet for HashSet<String> {
    fn contains_file(&self, path: &str) -> bool {
        self.contains(path)
    }

    fn list_dir(&self, dir: &str) -> Vec<String> {
        let mut files: Vec<String> = self
            .iter()
            .filter(|p| parent_dir(p) == dir)
            .cloned()
            .collect();
        files.sort();
        files
    }
}

/// Where an import points.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ImportTarget {
    /// A file in the repository
    File(String),
    /// Standard library module
    Stdlib(String),
    /// Third-party package or a path that does not exist
    External(String),
}

impl ImportTarget {
    pub fn file(&self) -> Option<&str> {
        match self {
            ImportTarget::File(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_in_repo(&self) -> bool {
        matches!(self, ImportTarget::File(_))
    }
}

/// An import statement mapped onto the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedImport {
    pub module: String,
    pub target: ImportTarget,
    pub imported_names: Vec<ImportedName>,
    /// Local name to imported name
    pub alias_map: BTreeMap<String, String>,
    /// Local name bound to the module itself
    pub module_alias: Option<String>,
    /// Imported names that are modules of their own, with their files
    pub submodules: BTreeMap<String, String>,
    pub is_wildcard: bool,
    /// Paths tried, in order. A trailing `*` matches any file in that directory.
    pub candidates: Vec<String>,
    pub line: usize,
}

impl ResolvedImport {
    /// Whether `path` appearing or disappearing could change this resolution.
    pub fn may_resolve_to(&self, path: &str) -> bool {
        self.candidates.iter().any(|c| candidate_matches(c, path))
    }
}

/// Whether a recorded candidate covers `path`.
pub fn candidate_matches(candidate: &str, path: &str) -> bool {
    match candidate.strip_suffix('*') {
        Some(prefix) => {
            let dir = prefix.trim_end_matches('/');
            parent_dir(path) == dir && path.starts_with(prefix)
        }
        None => candidate == path,
    }
}

/// Resolve one import statement of `file_path`.
pub fn resolve_import(
    stmt: &ImportStmt,
    file_path: &str,
    language: Language,
    files: &dyn FileSet,
) -> ResolvedImport {
    let rules = &language.rules().imports;
    let mut resolved = ResolvedImport {
        module: stmt.module.clone(),
        target: ImportTarget::External(stmt.module.clone()),
        imported_names: stmt.names.clone(),
        alias_map: stmt
            .names
            .iter()
            .map(|n| (n.local().to_string(), n.name.clone()))
            .collect(),
        module_alias: stmt.module_alias.clone(),
        submodules: BTreeMap::new(),
        is_wildcard: stmt.is_wildcard,
        candidates: Vec::new(),
        line: stmt.line,
    };

    if is_stdlib(&stmt.module, rules) {
        resolved.target = ImportTarget::Stdlib(stmt.module.clone());
        return resolved;
    }

    let mut search = Search {
        files,
        candidates: Vec::new(),
    };
    let (target, submodules) = match rules.style {
        ImportStyle::Python => python(stmt, file_path, rules, &mut search),
        ImportStyle::EcmaScript => ecma(stmt, file_path, rules, &mut search),
        ImportStyle::Go => go(stmt, rules, &mut search),
        ImportStyle::Rust => rust(stmt, file_path, rules, &mut search),
        ImportStyle::Java => java(stmt, rules, &mut search),
    };

    if let Some(path) = target {
        resolved.target = ImportTarget::File(path);
    }
    resolved.submodules = submodules;
    resolved.candidates = search.candidates;
    resolved
}

fn is_stdlib(module: &str, rules: &ImportRules) -> bool {
    if rules.stdlib_prefixes.iter().any(|p| module.starts_with(p)) {
        return true;
    }
    let first = module
        .split(rules.separator)
        .next()
        .unwrap_or(module)
        .trim_start_matches('.');
    if rules.style == ImportStyle::Go && first.contains('.') {
        return false;
    }
    !module.starts_with('.') && rules.stdlib.contains(&first)
}

struct Search<'a> {
    files: &'a dyn FileSet,
    candidates: Vec<String>,
}

impl Search<'_> {
    /// First existing `{base}{suffix}`.
    fn module(&mut self, base: &str, suffixes: &[&str]) -> Option<String> {
        let mut found = None;
        for suffix in suffixes {
            let path = normalize_path(&format!("{}{}", base, suffix));
            if path.is_empty() {
                continue;
            }
            if found.is_none() && self.files.contains_file(&path) {
                found = Some(path.clone());
            }
            if !self.candidates.contains(&path) {
                self.candidates.push(path);
            }
        }
        found
    }

    /// First file of `ext` directly inside `dir`.
    fn directory(&mut self, dir: &str, ext: &str) -> Option<String> {
        let dir = normalize_path(dir);
        self.candidates.push(format!("{}/*", dir));
        self.files
            .list_dir(&dir)
            .into_iter()
            .find(|f| f.ends_with(ext) && !f.ends_with(&format!("_test{}", ext)))
    }
}

type Outcome = (Option<String>, BTreeMap<String, String>);

fn python(stmt: &ImportStmt, file_path: &str, rules: &ImportRules, search: &mut Search<'_>) -> Outcome {
    let module = stmt.module.as_str();
    let dots = module.chars().take_while(|c| *c == '.').count();
    let rest = module[dots..].replace('.', "/");

    let bases: Vec<String> = if dots > 0 {
        let mut dir = parent_dir(file_path).to_string();
        for _ in 1..dots {
            dir = parent_dir(&dir).to_string();
        }
        vec![join_path(&dir, &rest)]
    } else {
        rules.search_roots.iter().map(|root| format!("{}{}", root, rest)).collect()
    };

    let mut target = None;
    let mut submodules = BTreeMap::new();
    for base in &bases {
        let found = if rest.is_empty() {
            search.module(base, &["/__init__.py"])
        } else {
            search.module(base, rules.module_files)
        };
        for name in &stmt.names {
            let sub = join_path(base, &name.name);
            if let Some(path) = search.module(&sub, rules.module_files) {
                submodules.entry(name.local().to_string()).or_insert(path);
            }
        }
        if found.is_some() {
            target = found;
            break;
        }
        if !submodules.is_empty() {
            break;
        }
    }
    if target.is_none() {
        target = submodules.values().next().cloned();
    }
    (target, submodules)
}

fn ecma(stmt: &ImportStmt, file_path: &str, rules: &ImportRules, search: &mut Search<'_>) -> Outcome {
    let module = stmt.module.as_str();
    if !(module.starts_with("./") || module.starts_with("../") || module.starts_with('/') || module == "." || module == "..") {
        return (None, BTreeMap::new());
    }
    let base = normalize_path(&join_path(parent_dir(file_path), module.trim_start_matches('/')));
    let mut target = search.module(&base, &[""]);
    if target.is_none() {
        let stem = strip_extension(&base);
        target = search.module(stem, rules.module_files);
    }
    (target, BTreeMap::new())
}

fn go(stmt: &ImportStmt, rules: &ImportRules, search: &mut Search<'_>) -> Outcome {
    let segments: Vec<&str> = stmt.module.split('/').filter(|s| !s.is_empty()).collect();
    for start in 0..segments.len() {
        let suffix = segments[start..].join("/");
        let last = segments[segments.len() - 1];
        for root in rules.search_roots {
            let dir = format!("{}{}", root, suffix);
            let files: Vec<String> = rules
                .module_files
                .iter()
                .map(|f| format!("{}{}", dir, f))
                .chain(std::iter::once(format!("{}/{}.go", dir, last)))
                .collect();
            let suffixes: Vec<&str> = files.iter().map(|f| &f[dir.len()..]).collect();
            if let Some(path) = search.module(&dir, &suffixes) {
                return (Some(path), BTreeMap::new());
            }
            if let Some(path) = search.directory(&dir, ".go") {
                return (Some(path), BTreeMap::new());
            }
        }
    }
    (None, BTreeMap::new())
}

fn rust(stmt: &ImportStmt, file_path: &str, rules: &ImportRules, search: &mut Search<'_>) -> Outcome {
    let segments: Vec<&str> = stmt.module.split("::").filter(|s| !s.is_empty()).collect();
    let Some(first) = segments.first().copied() else {
        return (None, BTreeMap::new());
    };

    let (base, rest) = match first {
        "crate" => (crate_src_dir(file_path), &segments[1..]),
        "self" => (rust_module_dir(file_path), &segments[1..]),
        "super" => {
            let supers = segments.iter().take_while(|s| **s == "super").count();
            let mut dir = rust_module_dir(file_path);
            for _ in 0..supers {
                dir = parent_dir(&dir).to_string();
            }
            (dir, &segments[supers..])
        }
        _ => (rust_module_dir(file_path), &segments[..]),
    };

    let mut target = None;
    let mut module_dir = base.clone();
    for len in (0..=rest.len()).rev() {
        let dir = join_path(&base, &rest[..len].join("/"));
        let found = if len == 0 {
            match first {
                "crate" => search.module(&base, &["/lib.rs", "/main.rs"]),
                "super" => search.module(&base, &["/mod.rs", ".rs", "/lib.rs", "/main.rs"]),
                _ => Some(file_path.to_string()),
            }
        } else {
            search.module(&dir, rules.module_files)
        };
        if found.is_some() {
            target = found;
            module_dir = dir;
            break;
        }
    }

    // `use foo::bar` where `foo` is not a local module names another crate
    if target.is_some() && rest.len() == segments.len() && module_dir == base {
        return (None, BTreeMap::new());
    }

    let mut submodules = BTreeMap::new();
    if target.is_some() {
        for name in &stmt.names {
            let sub = join_path(&module_dir, &name.name);
            if let Some(path) = search.module(&sub, rules.module_files) {
                submodules.insert(name.local().to_string(), path);
            }
        }
    }
    (target, submodules)
}

fn java(stmt: &ImportStmt, rules: &ImportRules, search: &mut Search<'_>) -> Outcome {
    let package = stmt.module.replace('.', "/");
    for root in rules.search_roots {
        let dir = format!("{}{}", root, package);
        if stmt.is_wildcard {
            if let Some(path) = search.directory(&dir, ".java") {
                return (Some(path), BTreeMap::new());
            }
            continue;
        }
        for name in &stmt.names {
            if let Some(path) = search.module(&join_path(&dir, &name.name), rules.module_files) {
                return (Some(path), BTreeMap::new());
            }
        }
        // static import of a member: the module is the class
        if let Some(path) = search.module(&dir, rules.module_files) {
            return (Some(path), BTreeMap::new());
        }
    }
    (None, BTreeMap::new())
}

/// Directory part of a repo-relative path.
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

fn join_path(dir: &str, rest: &str) -> String {
    match (dir.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => dir.to_string(),
        _ => format!("{}/{}", dir, rest),
    }
}

fn strip_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(i) if i > 0 => &path[..file_start + i],
        _ => path,
    }
}

/// Collapse `.` and `..` segments.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Nearest enclosing `src` directory, or the file's own directory.
fn crate_src_dir(file_path: &str) -> String {
    let mut dir = parent_dir(file_path);
    loop {
        if dir == "src" || dir.ends_with("/src") {
            return dir.to_string();
        }
        if dir.is_empty() {
            return parent_dir(file_path).to_string();
        }
        dir = parent_dir(dir);
    }
}

/// Directory holding the child modules of a Rust source file.
fn rust_module_dir(file_path: &str) -> String {
    let dir = parent_dir(file_path);
    let file = &file_path[file_path.rfind('/').map(|i| i + 1).unwrap_or(0)..];
    match file {
        "mod.rs" | "lib.rs" | "main.rs" => dir.to_string(),
        other => join_path(dir, strip_extension(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    fn stmt(module: &str, names: &[&str]) -> ImportStmt {
        ImportStmt {
            module: module.to_string(),
            names: names.iter().map(|n| ImportedName::new(*n, None)).collect(),
            module_alias: None,
            is_wildcard: false,
            line: 1,
        }
    }

    #[test]
    fn test_python_absolute_and_stdlib() {
        let fs = files(&["b.py", "pkg/__init__.py", "pkg/mod.py"]);
        let r = resolve_import(&stmt("b", &["bar"]), "a.py", Language::Python, &fs);
        assert_eq!(r.target, ImportTarget::File("b.py".into()));
        assert!(r.candidates.contains(&"b.py".to_string()));

        let r = resolve_import(&stmt("os.path", &["join"]), "a.py", Language::Python, &fs);
        assert_eq!(r.target, ImportTarget::Stdlib("os.path".into()));

        let r = resolve_import(&stmt("requests", &["get"]), "a.py", Language::Python, &fs);
        assert_eq!(r.target, ImportTarget::External("requests".into()));
        assert!(r.may_resolve_to("requests.py"));
    }

    #[test]
    fn test_python_relative() {
        let fs = files(&["x/__init__.py", "x/utils.py", "x/y/a.py", "x/pkg/mod.py"]);
        let r = resolve_import(&stmt(".", &["utils"]), "x/utils_user.py", Language::Python, &fs);
        assert_eq!(r.target, ImportTarget::File("x/__init__.py".into()));
        assert_eq!(r.submodules.get("utils").map(String::as_str), Some("x/utils.py"));

        let r = resolve_import(&stmt("..pkg.mod", &["bar"]), "x/y/a.py", Language::Python, &fs);
        assert_eq!(r.target, ImportTarget::File("x/pkg/mod.py".into()));
    }

    #[test]
    fn test_python_missing_file_is_external() {
        let fs = files(&["a.py"]);
        let r = resolve_import(&stmt("b", &["bar"]), "a.py", Language::Python, &fs);
        assert!(!r.target.is_in_repo());
        assert!(r.may_resolve_to("b.py"));
    }

    #[test]
    fn test_alias_map() {
        let fs = files(&["b.py"]);
        let mut s = stmt("b", &[]);
        s.names.push(ImportedName::new("bar", Some("baz".into())));
        let r = resolve_import(&s, "a.py", Language::Python, &fs);
        assert_eq!(r.alias_map.get("baz").map(String::as_str), Some("bar"));
    }

    #[test]
    fn test_ecmascript() {
        let fs = files(&["src/util.ts", "src/lib/index.js"]);
        let r = resolve_import(&stmt("./util", &["helper"]), "src/app.ts", Language::TypeScript, &fs);
        assert_eq!(r.target, ImportTarget::File("src/util.ts".into()));

        let r = resolve_import(&stmt("./lib", &[]), "src/app.ts", Language::TypeScript, &fs);
        assert_eq!(r.target, ImportTarget::File("src/lib/index.js".into()));

        let r = resolve_import(&stmt("../src/util.js", &[]), "test/a.ts", Language::TypeScript, &fs);
        assert_eq!(r.target, ImportTarget::File("src/util.ts".into()));

        let r = resolve_import(&stmt("react", &["useState"]), "src/app.ts", Language::TypeScript, &fs);
        assert_eq!(r.target, ImportTarget::External("react".into()));

        let r = resolve_import(&stmt("node:fs", &[]), "src/app.ts", Language::JavaScript, &fs);
        assert_eq!(r.target, ImportTarget::Stdlib("node:fs".into()));
        let r = resolve_import(&stmt("path", &[]), "src/app.ts", Language::JavaScript, &fs);
        assert_eq!(r.target, ImportTarget::Stdlib("path".into()));
    }

    #[test]
    fn test_go_packages() {
        let fs = files(&["internal/db/store.go", "internal/db/store_test.go", "main.go"]);
        let r = resolve_import(&stmt("fmt", &[]), "main.go", Language::Go, &fs);
        assert_eq!(r.target, ImportTarget::Stdlib("fmt".into()));

        let r = resolve_import(&stmt("example.com/app/internal/db", &[]), "main.go", Language::Go, &fs);
        assert_eq!(r.target, ImportTarget::File("internal/db/store.go".into()));
        assert!(r.may_resolve_to("internal/db/other.go"));

        let r = resolve_import(&stmt("github.com/pkg/errors", &[]), "main.go", Language::Go, &fs);
        assert_eq!(r.target, ImportTarget::External("github.com/pkg/errors".into()));
    }

    #[test]
    fn test_rust_paths() {
        let fs = files(&[
            "src/lib.rs",
            "src/graph.rs",
            "src/search/mod.rs",
            "src/search/bm25.rs",
        ]);
        let r = resolve_import(&stmt("crate::graph", &["CodeGraph"]), "src/search/mod.rs", Language::Rust, &fs);
        assert_eq!(r.target, ImportTarget::File("src/graph.rs".into()));

        let r = resolve_import(&stmt("crate", &["graph"]), "src/lib.rs", Language::Rust, &fs);
        assert_eq!(r.target, ImportTarget::File("src/lib.rs".into()));
        assert_eq!(r.submodules.get("graph").map(String::as_str), Some("src/graph.rs"));

        let r = resolve_import(&stmt("super::graph", &["Edge"]), "src/search/mod.rs", Language::Rust, &fs);
        assert_eq!(r.target, ImportTarget::File("src/graph.rs".into()));

        let r = resolve_import(&stmt("super", &["bm25"]), "src/search/bm25.rs", Language::Rust, &fs);
        assert_eq!(r.target, ImportTarget::File("src/search/mod.rs".into()));
        assert_eq!(r.submodules.get("bm25").map(String::as_str), Some("src/search/bm25.rs"));

        let r = resolve_import(&stmt("self::bm25", &["Index"]), "src/search/mod.rs", Language::Rust, &fs);
        assert_eq!(r.target, ImportTarget::File("src/search/bm25.rs".into()));

        let r = resolve_import(&stmt("std::collections", &["HashMap"]), "src/lib.rs", Language::Rust, &fs);
        assert_eq!(r.target, ImportTarget::Stdlib("std::collections".into()));

        let r = resolve_import(&stmt("serde", &["Serialize"]), "src/lib.rs", Language::Rust, &fs);
        assert_eq!(r.target, ImportTarget::External("serde".into()));
    }

    #[test]
    fn test_java() {
        let fs = files(&["src/main/java/com/acme/Repo.java"]);
        let r = resolve_import(&stmt("com.acme", &["Repo"]), "src/main/java/com/acme/App.java", Language::Java, &fs);
        assert_eq!(r.target, ImportTarget::File("src/main/java/com/acme/Repo.java".into()));

        let r = resolve_import(&stmt("java.util", &["List"]), "A.java", Language::Java, &fs);
        assert_eq!(r.target, ImportTarget::Stdlib("java.util".into()));

        let mut wildcard = stmt("com.acme", &[]);
        wildcard.is_wildcard = true;
        let r = resolve_import(&wildcard, "A.java", Language::Java, &fs);
        assert!(r.target.is_in_repo());
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(normalize_path("a/./b/../c"), "a/c");
        assert_eq!(parent_dir("a/b/c.py"), "a/b");
        assert_eq!(parent_dir("c.py"), "");
        assert!(candidate_matches("pkg/*", "pkg/a.go"));
        assert!(!candidate_matches("pkg/*", "pkg/sub/a.go"));
        assert_eq!(rust_module_dir("src/a.rs"), "src/a");
        assert_eq!(crate_src_dir("crates/x/src/a/b.rs"), "crates/x/src");
    }
}
