//! Scoped symbol table.
//!
//! Scopes nest Global -> File -> Class -> Function. Each file owns an arena of
//! scopes ([`FileSymbols`]) built from its extraction; the process-wide
//! [`SymbolTableState`] merges them and keeps the Global scope, which holds
//! every symbol a file exports.
//!
//! The state is copy-on-write: writers clone it, apply their change and swap
//! the new version in under [`SymbolTable`]'s writer lock, so lookups run
//! against a consistent snapshot and never wait for a writer.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::entity::{file_id, EntityId, EntityKind, FileExtraction};
use crate::import_resolver::{ImportTarget, ResolvedImport};
use crate::languages::Language;

/// Base-class walks stop at this depth.
const MAX_BASE_DEPTH: usize = 8;

pub type ScopeId = usize;

/// The file scope of every [`FileSymbols`].
pub const FILE_SCOPE: ScopeId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    File,
    Class,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    /// Entity whose body this scope is
    pub owner: EntityId,
    pub names: BTreeMap<String, EntityId>,
}

/// Outcome of a name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(EntityId),
    /// Several Global candidates; never guessed
    Ambiguous(Vec<EntityId>),
    Unresolved,
}

impl Resolution {
    pub fn id(&self) -> Option<&EntityId> {
        match self {
            Resolution::Resolved(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Resolution::Unresolved)
    }

    fn or_else(self, f: impl FnOnce() -> Resolution) -> Resolution {
        match self {
            Resolution::Unresolved => f(),
            other => other,
        }
    }
}

/// What an imported local name stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "binding", rename_all = "lowercase")]
pub enum ImportBinding {
    /// A name defined in the target module
    Name { target: ImportTarget, name: String },
    /// The module itself
    Module { target: ImportTarget },
}

/// Symbols defined by one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSymbols {
    pub file_path: String,
    pub language: Language,
    scopes: Vec<Scope>,
    /// Scope holding each entity's body
    entity_scopes: HashMap<EntityId, ScopeId>,
    kinds: HashMap<EntityId, EntityKind>,
    /// Qualified names of classes, by id
    classes: HashMap<EntityId, String>,
    /// Base and interface names of each class
    class_bases: HashMap<EntityId, Vec<String>>,
    imports: Vec<ResolvedImport>,
    bindings: BTreeMap<String, ImportBinding>,
    wildcards: Vec<ImportTarget>,
    /// Names published into the Global scope
    exports: Vec<(String, EntityId)>,
}

impl FileSymbols {
    /// Build the scope tree of a file from its extraction and resolved imports.
    pub fn build(repo: &str, extraction: &FileExtraction, imports: Vec<ResolvedImport>) -> Self {
        let mut symbols = FileSymbols {
            file_path: extraction.file_path.clone(),
            language: extraction.language,
            scopes: vec![Scope {
                kind: ScopeKind::File,
                parent: None,
                owner: file_id(repo, &extraction.file_path),
                names: BTreeMap::new(),
            }],
            entity_scopes: HashMap::new(),
            kinds: HashMap::new(),
            classes: HashMap::new(),
            class_bases: HashMap::new(),
            imports: Vec::new(),
            bindings: BTreeMap::new(),
            wildcards: Vec::new(),
            exports: Vec::new(),
        };
        symbols
            .entity_scopes
            .insert(symbols.scopes[FILE_SCOPE].owner.clone(), FILE_SCOPE);

        for entity in &extraction.entities {
            let parent_scope = match &entity.parent {
                Some(parent) => symbols.entity_scopes.get(parent).copied(),
                None if entity.class_name.is_some() && entity.kind == EntityKind::Function => None,
                None => Some(FILE_SCOPE),
            };
            if let Some(scope) = parent_scope {
                symbols.define(scope, &entity.name, &entity.id);
            }

            let kind = match entity.kind {
                EntityKind::Class => ScopeKind::Class,
                _ => ScopeKind::Function,
            };
            let scope = symbols.push_scope(kind, parent_scope.unwrap_or(FILE_SCOPE), &entity.id);
            symbols.entity_scopes.insert(entity.id.clone(), scope);
            symbols.kinds.insert(entity.id.clone(), entity.kind);

            if entity.kind == EntityKind::Class {
                symbols.classes.insert(entity.id.clone(), entity.qualified_name.clone());
                let bases: Vec<String> = entity
                    .bases
                    .iter()
                    .chain(entity.implements.iter())
                    .cloned()
                    .collect();
                symbols.class_bases.insert(entity.id.clone(), bases);
            }

            if entity.access.is_exported() && symbols.only_classes_above(entity.parent.as_ref()) {
                if entity.parent.is_none() && entity.class_name.is_none() {
                    symbols.exports.push((entity.name.clone(), entity.id.clone()));
                } else {
                    symbols.exports.push((entity.qualified_name.clone(), entity.id.clone()));
                }
            }
        }

        for import in imports {
            symbols.bind_import(&import);
            symbols.imports.push(import);
        }
        symbols
    }

    fn push_scope(&mut self, kind: ScopeKind, parent: ScopeId, owner: &str) -> ScopeId {
        self.scopes.push(Scope {
            kind,
            parent: Some(parent),
            owner: owner.to_string(),
            names: BTreeMap::new(),
        });
        self.scopes.len() - 1
    }

    fn only_classes_above(&self, parent: Option<&EntityId>) -> bool {
        let mut current = parent.and_then(|p| self.entity_scopes.get(p).copied());
        while let Some(scope) = current {
            match self.scopes[scope].kind {
                ScopeKind::Function => return false,
                ScopeKind::File => return true,
                ScopeKind::Class => current = self.scopes[scope].parent,
            }
        }
        true
    }

    fn bind_import(&mut self, import: &ResolvedImport) {
        if import.is_wildcard {
            self.wildcards.push(import.target.clone());
        }
        if let Some(alias) = &import.module_alias {
            self.bindings.insert(
                alias.clone(),
                ImportBinding::Module {
                    target: import.target.clone(),
                },
            );
        }
        for name in &import.imported_names {
            let local = name.local().to_string();
            let binding = match import.submodules.get(&local) {
                Some(path) => ImportBinding::Module {
                    target: ImportTarget::File(path.clone()),
                },
                None => ImportBinding::Name {
                    target: import.target.clone(),
                    name: name.name.clone(),
                },
            };
            self.bindings.insert(local, binding);
        }
    }

    /// Bind `name` to `entity_id` in `scope`; a later definition shadows an
    /// earlier one with the same name.
    pub fn define(&mut self, scope: ScopeId, name: &str, entity_id: &str) {
        if let Some(s) = self.scopes.get_mut(scope) {
            s.names.insert(name.to_string(), entity_id.to_string());
        }
    }

    /// Name defined directly in `scope`.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&EntityId> {
        self.scopes.get(scope).and_then(|s| s.names.get(name))
    }

    /// Scope holding the body of `entity_id` (the file scope for the file).
    pub fn scope_of(&self, entity_id: &str) -> ScopeId {
        self.entity_scopes.get(entity_id).copied().unwrap_or(FILE_SCOPE)
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id)
    }

    pub fn imports(&self) -> &[ResolvedImport] {
        &self.imports
    }

    pub fn binding(&self, local: &str) -> Option<&ImportBinding> {
        self.bindings.get(local)
    }

    pub fn exports(&self) -> &[(String, EntityId)] {
        &self.exports
    }

    pub fn kind_of(&self, entity_id: &str) -> Option<EntityKind> {
        self.kinds.get(entity_id).copied()
    }

    /// Qualified name of a class defined in this file.
    pub fn class_name(&self, class_id: &str) -> Option<&str> {
        self.classes.get(class_id).map(String::as_str)
    }

    pub fn class_bases(&self, class_id: &str) -> &[String] {
        self.class_bases.get(class_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every simple and qualified name this file contributes to the Global
    /// scope. Used to find dependents whose resolution may change when the
    /// file changes.
    pub fn surface(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        for (name, _) in &self.exports {
            names.insert(name.clone());
            if let Some(simple) = name.rsplit('.').next() {
                names.insert(simple.to_string());
            }
        }
        names
    }

    /// Lexical lookup from `scope` outward to the file scope.
    fn lookup_lexical(&self, scope: ScopeId, name: &str, only_classes: bool) -> Option<&EntityId> {
        let members_visible = self.language.rules().class_members_in_scope;
        let mut current = Some(scope);
        let mut first = true;
        while let Some(id) = current {
            let s = &self.scopes[id];
            let visible = first || s.kind != ScopeKind::Class || members_visible;
            if visible {
                if let Some(found) = s.names.get(name) {
                    if !only_classes || self.classes.contains_key(found) {
                        return Some(found);
                    }
                }
            }
            first = false;
            current = s.parent;
        }
        None
    }
}

/// A symbol published to the Global scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalEntry {
    pub id: EntityId,
    pub file_path: String,
    pub language: Language,
    pub is_class: bool,
}

/// Cross-file exports by name.
#[derive(Debug, Clone, Default)]
pub struct GlobalScope {
    names: HashMap<String, BTreeSet<GlobalEntry>>,
}

impl GlobalScope {
    fn define(&mut self, name: &str, entry: GlobalEntry) {
        self.names.entry(name.to_string()).or_default().insert(entry);
    }

    fn undefine_file(&mut self, file: &FileSymbols) {
        for (name, id) in &file.exports {
            if let Some(entries) = self.names.get_mut(name) {
                entries.retain(|e| &e.id != id);
                if entries.is_empty() {
                    self.names.remove(name);
                }
            }
        }
    }

    /// Global candidates for `name` in one language.
    pub fn candidates(&self, name: &str, language: Language, only_classes: bool) -> Vec<&GlobalEntry> {
        self.names
            .get(name)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| same_family(e.language, language) && (!only_classes || e.is_class))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.names.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// TypeScript, TSX and JavaScript share one module system.
fn same_family(a: Language, b: Language) -> bool {
    let family = |l: Language| match l {
        Language::JavaScript | Language::TypeScript | Language::Tsx => Language::TypeScript,
        other => other,
    };
    family(a) == family(b)
}

/// Where a class lives.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ClassLocation {
    file_path: String,
    scope: ScopeId,
}

/// One version of the process-wide symbol table.
#[derive(Debug, Clone, Default)]
pub struct SymbolTableState {
    version: u64,
    files: HashMap<String, Arc<FileSymbols>>,
    global: GlobalScope,
    classes: HashMap<EntityId, ClassLocation>,
}

impl SymbolTableState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a state from per-file symbols, as loaded from a snapshot.
    pub fn from_files(files: impl IntoIterator<Item = FileSymbols>) -> Self {
        let mut state = Self::new();
        for file in files {
            state.insert_file(file);
        }
        state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn global(&self) -> &GlobalScope {
        &self.global
    }

    pub fn file(&self, path: &str) -> Option<&FileSymbols> {
        self.files.get(path).map(Arc::as_ref)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileSymbols> {
        self.files.values().map(Arc::as_ref)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Replace the symbols of one file, updating the Global scope.
    pub fn insert_file(&mut self, symbols: FileSymbols) -> Option<Arc<FileSymbols>> {
        let previous = self.remove_file(&symbols.file_path);
        for (name, id) in &symbols.exports {
            let entry = GlobalEntry {
                id: id.clone(),
                file_path: symbols.file_path.clone(),
                language: symbols.language,
                is_class: symbols.classes.contains_key(id),
            };
            self.global.define(name, entry);
        }
        for class_id in symbols.classes.keys() {
            self.classes.insert(
                class_id.clone(),
                ClassLocation {
                    file_path: symbols.file_path.clone(),
                    scope: symbols.scope_of(class_id),
                },
            );
        }
        self.files.insert(symbols.file_path.clone(), Arc::new(symbols));
        self.version += 1;
        previous
    }

    pub fn remove_file(&mut self, path: &str) -> Option<Arc<FileSymbols>> {
        let previous = self.files.remove(path)?;
        self.global.undefine_file(&previous);
        for class_id in previous.classes.keys() {
            self.classes.remove(class_id);
        }
        self.version += 1;
        Some(previous)
    }

    /// Global lookup by name, limited to the caller's language family.
    pub fn lookup_global(&self, name: &str, language: Language, only_classes: bool) -> Resolution {
        let candidates = self.global.candidates(name, language, only_classes);
        match candidates.as_slice() {
            [] => Resolution::Unresolved,
            [one] => Resolution::Resolved(one.id.clone()),
            many => Resolution::Ambiguous(many.iter().map(|e| e.id.clone()).collect()),
        }
    }

    /// Resolve an unqualified name used in `scope` of `file_path`:
    /// lexical scope chain, then import bindings, then wildcard imports, then
    /// the Global scope.
    pub fn resolve_name(&self, file_path: &str, scope: ScopeId, name: &str) -> Resolution {
        self.resolve_filtered(file_path, scope, name, false)
    }

    fn resolve_filtered(&self, file_path: &str, scope: ScopeId, name: &str, only_classes: bool) -> Resolution {
        let Some(file) = self.file(file_path) else {
            return Resolution::Unresolved;
        };
        if let Some(id) = file.lookup_lexical(scope, name, only_classes) {
            return Resolution::Resolved(id.clone());
        }
        match file.binding(name) {
            Some(ImportBinding::Name { target, name: imported }) => {
                return self.resolve_in_target(target, imported, file.language, only_classes);
            }
            Some(ImportBinding::Module { .. }) => return Resolution::Unresolved,
            None => {}
        }
        for target in &file.wildcards {
            if let Some(path) = target.file() {
                if let Some(id) = self.lookup_in_file(path, name) {
                    return Resolution::Resolved(id);
                }
            }
        }
        self.lookup_global(name, file.language, only_classes)
    }

    /// Resolve a name imported from `target`. Names bound to modules outside
    /// the repository never fall back to the Global scope.
    pub fn resolve_in_target(
        &self,
        target: &ImportTarget,
        name: &str,
        language: Language,
        only_classes: bool,
    ) -> Resolution {
        match target {
            ImportTarget::File(path) => match self.lookup_in_file(path, name) {
                Some(id) => Resolution::Resolved(id),
                // re-exported from somewhere else in the repo
                None => self.lookup_global(name, language, only_classes),
            },
            _ => Resolution::Unresolved,
        }
    }

    /// A top-level name, or a dotted path through classes, defined in a file.
    pub fn lookup_in_file(&self, file_path: &str, name: &str) -> Option<EntityId> {
        let file = self.file(file_path)?;
        let mut parts = name.split('.');
        let mut id = file.lookup(FILE_SCOPE, parts.next()?)?.clone();
        for part in parts {
            let scope = *file.entity_scopes.get(&id)?;
            id = file.lookup(scope, part)?.clone();
        }
        Some(id)
    }

    /// Resolve a type name to a class, following module aliases and nested
    /// class paths (`mod.Outer.Inner`).
    pub fn resolve_class(&self, file_path: &str, scope: ScopeId, type_name: &str) -> Resolution {
        let Some(file) = self.file(file_path) else {
            return Resolution::Unresolved;
        };
        let mut parts = type_name.split('.');
        let Some(head) = parts.next() else {
            return Resolution::Unresolved;
        };
        let rest: Vec<&str> = parts.collect();
        if rest.is_empty() {
            return self.resolve_filtered(file_path, scope, head, true);
        }

        if let Some(ImportBinding::Module { target }) = file.binding(head) {
            let path = rest.join(".");
            return match target.file() {
                Some(target_file) => match self.lookup_in_file(target_file, &path) {
                    Some(id) if self.is_class(&id) => Resolution::Resolved(id),
                    _ => Resolution::Unresolved,
                },
                None => Resolution::Unresolved,
            };
        }

        let mut current = match self.resolve_filtered(file_path, scope, head, true) {
            Resolution::Resolved(id) => id,
            other => {
                return other.or_else(|| self.lookup_global(type_name, file.language, true));
            }
        };
        for part in rest {
            match self.nested_class(&current, part) {
                Some(id) => current = id,
                None => return Resolution::Unresolved,
            }
        }
        Resolution::Resolved(current)
    }

    fn nested_class(&self, class_id: &str, name: &str) -> Option<EntityId> {
        let location = self.classes.get(class_id)?;
        let file = self.file(&location.file_path)?;
        let id = file.lookup(location.scope, name)?;
        self.is_class(id).then(|| id.clone())
    }

    pub fn is_class(&self, id: &str) -> bool {
        self.classes.contains_key(id)
    }

    /// Qualified name of a known class.
    pub fn class_qualified_name(&self, class_id: &str) -> Option<&str> {
        let location = self.classes.get(class_id)?;
        self.file(&location.file_path)?.class_name(class_id)
    }

    /// Resolve `member` on a class: the class scope first, then methods
    /// attached from other files, then the base classes.
    pub fn lookup_qualified(&self, class_id: &str, member: &str) -> Resolution {
        let mut visited = HashSet::new();
        self.lookup_member(class_id, member, 0, &mut visited)
    }

    fn lookup_member(
        &self,
        class_id: &str,
        member: &str,
        depth: usize,
        visited: &mut HashSet<EntityId>,
    ) -> Resolution {
        if depth > MAX_BASE_DEPTH || !visited.insert(class_id.to_string()) {
            return Resolution::Unresolved;
        }
        let Some(location) = self.classes.get(class_id) else {
            return Resolution::Unresolved;
        };
        let Some(file) = self.file(&location.file_path) else {
            return Resolution::Unresolved;
        };
        if let Some(id) = file.lookup(location.scope, member) {
            return Resolution::Resolved(id.clone());
        }
        if let Some(qualified) = file.class_name(class_id) {
            let attached = self.lookup_global(&format!("{}.{}", qualified, member), file.language, false);
            if !attached.is_unresolved() {
                return attached;
            }
        }

        let parent_scope = file
            .scope(location.scope)
            .and_then(|s| s.parent)
            .unwrap_or(FILE_SCOPE);
        for base in file.class_bases(class_id) {
            if let Resolution::Resolved(base_id) = self.resolve_class(&file.file_path, parent_scope, base) {
                let found = self.lookup_member(&base_id, member, depth + 1, visited);
                if !found.is_unresolved() {
                    return found;
                }
            }
        }
        Resolution::Unresolved
    }
}

/// Shared handle on the current [`SymbolTableState`].
#[derive(Debug, Default)]
pub struct SymbolTable {
    state: RwLock<Arc<SymbolTableState>>,
    writer: Mutex<()>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SymbolTableState) -> Self {
        Self {
            state: RwLock::new(Arc::new(state)),
            writer: Mutex::new(()),
        }
    }

    /// Current version; lookups against it never block writers.
    pub fn snapshot(&self) -> Arc<SymbolTableState> {
        match self.state.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version()
    }

    /// Apply a change to a private copy and publish it.
    pub fn update<R>(&self, change: impl FnOnce(&mut SymbolTableState) -> R) -> R {
        let _writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = (*self.snapshot()).clone();
        let result = change(&mut next);
        self.publish(next);
        result
    }

    /// Publish a state built elsewhere, returning the one it replaces.
    pub fn replace(&self, state: SymbolTableState) -> Arc<SymbolTableState> {
        let _writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = self.snapshot();
        self.publish(state);
        previous
    }

    fn publish(&self, state: SymbolTableState) {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ImportStmt;
    use crate::extractor::EntityExtractor;
    use crate::import_resolver::resolve_import;
    use crate::syntax::SyntaxParser;

    fn build(files: &[(&str, &str)]) -> SymbolTableState {
        let known: BTreeSet<String> = files.iter().map(|(p, _)| p.to_string()).collect();
        let extractor = EntityExtractor::new("repo");
        let mut state = SymbolTableState::new();
        for (path, source) in files {
            let language = Language::from_path(std::path::Path::new(path)).unwrap();
            let tree = SyntaxParser::new().parse(*source, language).unwrap();
            let ext = extractor.extract(&tree, path);
            let imports: Vec<ResolvedImport> = ext
                .imports
                .iter()
                .map(|i: &ImportStmt| resolve_import(i, path, language, &known))
                .collect();
            state.insert_file(FileSymbols::build("repo", &ext, imports));
        }
        state
    }

    #[test]
    fn test_imported_name_resolves_to_defining_file() {
        let state = build(&[
            ("a.py", "from b import bar\n\ndef foo():\n    bar()\n"),
            ("b.py", "def bar():\n    pass\n"),
        ]);
        let a = state.file("a.py").unwrap();
        let scope = a.scope_of("repo:a.py:foo");
        assert_eq!(
            state.resolve_name("a.py", scope, "bar"),
            Resolution::Resolved("repo:b.py:bar".into())
        );
    }

    #[test]
    fn test_inner_scope_shadows_outer() {
        let state = build(&[(
            "a.py",
            "def helper():\n    pass\n\ndef outer():\n    def helper():\n        pass\n    helper()\n",
        )]);
        let file = state.file("a.py").unwrap();
        let scope = file.scope_of("repo:a.py:outer");
        assert_eq!(
            state.resolve_name("a.py", scope, "helper"),
            Resolution::Resolved("repo:a.py:outer.helper".into())
        );
        assert_eq!(
            state.resolve_name("a.py", FILE_SCOPE, "helper"),
            Resolution::Resolved("repo:a.py:helper".into())
        );
    }

    #[test]
    fn test_class_members_not_visible_unqualified_in_python() {
        let state = build(&[(
            "a.py",
            "class A:\n    def run(self):\n        step()\n\n    def step(self):\n        pass\n",
        )]);
        let scope = state.file("a.py").unwrap().scope_of("repo:a.py:A.run");
        assert_eq!(state.resolve_name("a.py", scope, "step"), Resolution::Unresolved);
    }

    #[test]
    fn test_ambiguous_global_is_not_guessed() {
        let state = build(&[
            ("a.py", "def caller():\n    dup()\n"),
            ("b.py", "def dup():\n    pass\n"),
            ("c.py", "def dup():\n    pass\n"),
        ]);
        match state.resolve_name("a.py", FILE_SCOPE, "dup") {
            Resolution::Ambiguous(ids) => assert_eq!(ids.len(), 2),
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_lookup_qualified_walks_bases() {
        let state = build(&[
            ("base.py", "class Base:\n    def save(self):\n        pass\n"),
            (
                "child.py",
                "from base import Base\n\nclass Child(Base):\n    def run(self):\n        pass\n",
            ),
        ]);
        assert_eq!(
            state.lookup_qualified("repo:child.py:Child", "run"),
            Resolution::Resolved("repo:child.py:Child.run".into())
        );
        assert_eq!(
            state.lookup_qualified("repo:child.py:Child", "save"),
            Resolution::Resolved("repo:base.py:Base.save".into())
        );
        assert_eq!(state.lookup_qualified("repo:child.py:Child", "missing"), Resolution::Unresolved);
    }

    #[test]
    fn test_cyclic_bases_terminate() {
        let state = build(&[("a.py", "class A(B):\n    pass\n\nclass B(A):\n    pass\n")]);
        assert_eq!(state.lookup_qualified("repo:a.py:A", "nothing"), Resolution::Unresolved);
    }

    #[test]
    fn test_nested_class_resolution() {
        let state = build(&[(
            "a.py",
            "class Outer:\n    class Inner:\n        def method(self):\n            pass\n",
        )]);
        assert_eq!(
            state.resolve_class("a.py", FILE_SCOPE, "Outer.Inner"),
            Resolution::Resolved("repo:a.py:Outer.Inner".into())
        );
        assert_eq!(
            state.lookup_qualified("repo:a.py:Outer.Inner", "method"),
            Resolution::Resolved("repo:a.py:Outer.Inner.method".into())
        );
    }

    #[test]
    fn test_private_names_are_not_exported() {
        let state = build(&[("a.py", "def _p():\n    pass\n\ndef __q():\n    pass\n\ndef pub():\n    pass\n")]);
        let exported: Vec<&str> = state
            .file("a.py")
            .unwrap()
            .exports()
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert!(exported.contains(&"pub"));
        assert!(exported.contains(&"_p"));
        assert!(!exported.contains(&"__q"));
    }

    #[test]
    fn test_remove_file_undefines_exports() {
        let mut state = build(&[("b.py", "def bar():\n    pass\n")]);
        assert!(state.global().len() > 0);
        let before = state.version();
        state.remove_file("b.py");
        assert!(state.global().is_empty());
        assert!(state.version() > before);
        assert_eq!(state.lookup_global("bar", Language::Python, false), Resolution::Unresolved);
    }

    #[test]
    fn test_external_binding_skips_global() {
        let state = build(&[
            ("a.py", "from requests import get\n\ndef f():\n    get()\n"),
            ("b.py", "def get():\n    pass\n"),
        ]);
        assert_eq!(state.resolve_name("a.py", FILE_SCOPE, "get"), Resolution::Unresolved);
    }

    #[test]
    fn test_global_is_per_language_family() {
        let state = build(&[
            ("a.go", "package main\n\nfunc Helper() {}\n"),
            ("b.py", "def caller():\n    Helper()\n"),
        ]);
        assert_eq!(
            state.lookup_global("Helper", Language::Python, false),
            Resolution::Unresolved
        );
        assert!(state.lookup_global("Helper", Language::Go, false).id().is_some());
    }

    #[test]
    fn test_table_copy_on_write() {
        let table = SymbolTable::new();
        let before = table.snapshot();
        let state = build(&[("b.py", "def bar():\n    pass\n")]);
        let symbols = state.file("b.py").unwrap().clone();
        table.update(|s| {
            s.insert_file(symbols);
        });
        assert_eq!(before.file_count(), 0);
        assert_eq!(table.snapshot().file_count(), 1);
        assert!(table.version() > before.version());
    }
}
