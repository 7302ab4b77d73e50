//! Call classification: raw call sites to call kinds and targets.
//!
//! Order of decisions for a call with a receiver:
//!
//! 1. receiver names an imported module: look the name up in that module
//! 2. receiver has a known static type: qualified lookup on that class
//! 3. receiver is itself a class: static call on it
//! 4. anything else is a method call with no statically known target
//!
//! Calls without a receiver are constructor calls when the language's
//! constructor convention says so, plain function calls otherwise. Each link
//! of a chain `a().b().c()` is classified on its own; the type of an inner
//! call's result is never assumed.

use serde::{Deserialize, Serialize};

use crate::entity::{CallInfo, CallKind, CallSyntax, EntityId};
use crate::extractor::is_identifier;
use crate::import_resolver::ImportTarget;
use crate::languages::starts_uppercase;
use crate::symbols::{FileSymbols, ImportBinding, Resolution, SymbolTableState};

/// A classified call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCall {
    pub kind: CallKind,
    pub target: Resolution,
    /// Class the receiver was resolved to
    pub receiver_type: Option<EntityId>,
    /// Module outside the repository the call goes into
    pub external: Option<ImportTarget>,
}

impl ResolvedCall {
    fn new(kind: CallKind, target: Resolution) -> Self {
        Self {
            kind,
            target,
            receiver_type: None,
            external: None,
        }
    }
}

/// Serializable form of a classification, used by tools and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSummary {
    pub kind: CallKind,
    pub target: Option<EntityId>,
    pub receiver_type: Option<EntityId>,
}

impl From<&ResolvedCall> for CallSummary {
    fn from(call: &ResolvedCall) -> Self {
        Self {
            kind: call.kind,
            target: call.target.id().cloned(),
            receiver_type: call.receiver_type.clone(),
        }
    }
}

/// Classify one call site of `file_path` against a symbol table version.
pub fn classify(call: &CallInfo, file_path: &str, state: &SymbolTableState) -> ResolvedCall {
    let Some(file) = state.file(file_path) else {
        return ResolvedCall::new(CallKind::Function, Resolution::Unresolved);
    };
    let scope = file.scope_of(&call.caller);
    let rules = file.language.rules();

    if call.syntax == CallSyntax::Decorator {
        let mut resolved = match &call.receiver {
            Some(receiver) => classify_module_member(file, state, receiver, &call.name)
                .unwrap_or_else(|| ResolvedCall::new(CallKind::Decorator, Resolution::Unresolved)),
            None => by_name(file, state, scope, &call.name),
        };
        resolved.kind = CallKind::Decorator;
        return resolved;
    }

    if let Some(receiver) = &call.receiver {
        if !call.receiver_is_call {
            if let Some(resolved) = classify_module_member(file, state, receiver, &call.name) {
                return resolved;
            }
        }

        if let Some(type_name) = &call.receiver_type {
            let kind = match call.syntax {
                CallSyntax::Path if rules.looks_like_constructor(&call.name) => CallKind::Constructor,
                CallSyntax::Path => CallKind::Static,
                _ => CallKind::Method,
            };
            return match state.resolve_class(file_path, scope, type_name) {
                Resolution::Resolved(class_id) => ResolvedCall {
                    kind,
                    target: state.lookup_qualified(&class_id, &call.name),
                    receiver_type: Some(class_id),
                    external: None,
                },
                _ => ResolvedCall::new(kind, Resolution::Unresolved),
            };
        }

        if !call.receiver_is_call && is_identifier(receiver) && starts_uppercase(receiver) {
            if let Resolution::Resolved(class_id) = state.resolve_class(file_path, scope, receiver) {
                return ResolvedCall {
                    kind: CallKind::Static,
                    target: state.lookup_qualified(&class_id, &call.name),
                    receiver_type: Some(class_id),
                    external: None,
                };
            }
        }

        return ResolvedCall::new(CallKind::Method, Resolution::Unresolved);
    }

    if call.syntax == CallSyntax::New {
        let mut resolved = by_name(file, state, scope, &call.name);
        resolved.kind = CallKind::Constructor;
        if let Resolution::Resolved(id) = &resolved.target {
            if !state.is_class(id) {
                resolved.target = state.resolve_class(file_path, scope, &call.name);
            }
        }
        return resolved;
    }

    let mut resolved = by_name(file, state, scope, &call.name);
    let is_constructor = match resolved.target.id() {
        Some(id) if state.is_class(id) => true,
        // a capitalized function is still a function; `NewServer` is a factory
        Some(_) => {
            rules.looks_like_constructor(&call.name)
                && rules.constructed_type(&call.name) != Some(call.name.as_str())
        }
        None => rules.looks_like_constructor(&call.name),
    };
    if is_constructor {
        resolved.kind = CallKind::Constructor;
    }
    resolved
}

/// Plain name through the scope chain, imports and the Global scope.
fn by_name(file: &FileSymbols, state: &SymbolTableState, scope: usize, name: &str) -> ResolvedCall {
    if let Some(ImportBinding::Name { target, .. }) = file.binding(name) {
        if !target.is_in_repo() && file.lookup(scope, name).is_none() {
            let mut resolved = ResolvedCall::new(CallKind::Function, Resolution::Unresolved);
            resolved.external = Some(target.clone());
            return resolved;
        }
    }
    ResolvedCall::new(CallKind::Function, state.resolve_name(&file.file_path, scope, name))
}

/// `module.name(...)` where `module` is bound by an import.
fn classify_module_member(
    file: &FileSymbols,
    state: &SymbolTableState,
    receiver: &str,
    name: &str,
) -> Option<ResolvedCall> {
    let (head, rest) = match receiver.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (receiver, None),
    };
    let Some(ImportBinding::Module { target }) = file.binding(head) else {
        return None;
    };
    let Some(path) = target.file() else {
        let mut resolved = ResolvedCall::new(CallKind::Function, Resolution::Unresolved);
        resolved.external = Some(target.clone());
        return Some(resolved);
    };

    let member = match rest {
        Some(rest) => format!("{}.{}", rest, name),
        None => name.to_string(),
    };
    let target = match state.lookup_in_file(path, &member) {
        Some(id) => Resolution::Resolved(id),
        None if rest.is_none() => state.lookup_global(name, file.language, false),
        None => Resolution::Unresolved,
    };
    let kind = match target.id() {
        Some(id) if state.is_class(id) => CallKind::Constructor,
        _ if rest.is_some() => CallKind::Static,
        _ => CallKind::Function,
    };
    Some(ResolvedCall::new(kind, target))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::entity::FileExtraction;
    use crate::extractor::EntityExtractor;
    use crate::import_resolver::{resolve_import, ResolvedImport};
    use crate::languages::Language;
    use crate::symbols::FileSymbols;
    use crate::syntax::SyntaxParser;

    fn index(files: &[(&str, &str)]) -> (SymbolTableState, Vec<FileExtraction>) {
        let known: BTreeSet<String> = files.iter().map(|(p, _)| p.to_string()).collect();
        let extractor = EntityExtractor::new("repo");
        let mut state = SymbolTableState::new();
        let mut extractions = Vec::new();
        for (path, source) in files {
            let language = Language::from_path(std::path::Path::new(path)).unwrap();
            let tree = SyntaxParser::new().parse(*source, language).unwrap();
            let ext = extractor.extract(&tree, path);
            let imports: Vec<ResolvedImport> = ext
                .imports
                .iter()
                .map(|i| resolve_import(i, path, language, &known))
                .collect();
            state.insert_file(FileSymbols::build("repo", &ext, imports));
            extractions.push(ext);
        }
        (state, extractions)
    }

    fn classify_named(state: &SymbolTableState, ext: &FileExtraction, name: &str) -> ResolvedCall {
        let call = ext.calls.iter().find(|c| c.name == name).unwrap();
        classify(call, &ext.file_path, state)
    }

    #[test]
    fn test_method_on_known_receiver_type() {
        let (state, exts) = index(&[(
            "a.py",
            "class Processor:\n    def process(self):\n        pass\n\ndef foo():\n    obj = Processor()\n    obj.process()\n",
        )]);
        let resolved = classify_named(&state, &exts[0], "process");
        assert_eq!(resolved.kind, CallKind::Method);
        assert_eq!(resolved.target, Resolution::Resolved("repo:a.py:Processor.process".into()));
        assert_eq!(resolved.receiver_type.as_deref(), Some("repo:a.py:Processor"));

        let ctor = classify_named(&state, &exts[0], "Processor");
        assert_eq!(ctor.kind, CallKind::Constructor);
        assert_eq!(ctor.target, Resolution::Resolved("repo:a.py:Processor".into()));
    }

    #[test]
    fn test_unknown_receiver_is_never_guessed() {
        let (state, exts) = index(&[(
            "a.py",
            "class Processor:\n    def process(self):\n        pass\n\ndef foo(obj):\n    obj.process()\n",
        )]);
        let resolved = classify_named(&state, &exts[0], "process");
        assert_eq!(resolved.kind, CallKind::Method);
        assert_eq!(resolved.target, Resolution::Unresolved);
    }

    #[test]
    fn test_module_alias_call() {
        let (state, exts) = index(&[
            ("a.py", "import b as mod\n\ndef foo():\n    mod.bar()\n"),
            ("b.py", "def bar():\n    pass\n"),
        ]);
        let resolved = classify_named(&state, &exts[0], "bar");
        assert_eq!(resolved.kind, CallKind::Function);
        assert_eq!(resolved.target, Resolution::Resolved("repo:b.py:bar".into()));
    }

    #[test]
    fn test_external_module_call() {
        let (state, exts) = index(&[("a.py", "import os\n\ndef foo():\n    os.getcwd()\n")]);
        let resolved = classify_named(&state, &exts[0], "getcwd");
        assert_eq!(resolved.target, Resolution::Unresolved);
        assert_eq!(resolved.external, Some(ImportTarget::Stdlib("os".into())));
    }

    #[test]
    fn test_decorator_kind() {
        let (state, exts) = index(&[
            ("a.py", "from deco import register\n\n@register\ndef handler():\n    pass\n"),
            ("deco.py", "def register(f):\n    return f\n"),
        ]);
        let call = exts[0]
            .calls
            .iter()
            .find(|c| c.syntax == CallSyntax::Decorator)
            .unwrap();
        let resolved = classify(call, "a.py", &state);
        assert_eq!(resolved.kind, CallKind::Decorator);
        assert_eq!(resolved.target, Resolution::Resolved("repo:deco.py:register".into()));
    }

    #[test]
    fn test_static_call_on_class() {
        let (state, exts) = index(&[(
            "a.py",
            "class Factory:\n    @staticmethod\n    def create():\n        pass\n\ndef foo():\n    Factory.create()\n",
        )]);
        let resolved = classify_named(&state, &exts[0], "create");
        assert_eq!(resolved.kind, CallKind::Static);
        assert_eq!(resolved.target, Resolution::Resolved("repo:a.py:Factory.create".into()));
    }

    #[test]
    fn test_chained_links_are_independent() {
        let (state, exts) = index(&[(
            "a.py",
            "class A:\n    def b(self):\n        pass\n\ndef make():\n    pass\n\ndef f():\n    make().b()\n",
        )]);
        let resolved = classify_named(&state, &exts[0], "b");
        assert_eq!(resolved.kind, CallKind::Method);
        assert_eq!(resolved.target, Resolution::Unresolved);
        let make = classify_named(&state, &exts[0], "make");
        assert_eq!(make.target, Resolution::Resolved("repo:a.py:make".into()));
    }

    #[test]
    fn test_rust_associated_constructor() {
        let (state, exts) = index(&[(
            "src/lib.rs",
            "pub struct Store {}\n\nimpl Store {\n    pub fn new() -> Self { Store {} }\n}\n\npub fn open() { Store::new(); }\n",
        )]);
        let resolved = classify_named(&state, &exts[0], "new");
        assert_eq!(resolved.kind, CallKind::Constructor);
        assert_eq!(resolved.target, Resolution::Resolved("repo:src/lib.rs:Store.new".into()));
    }

    #[test]
    fn test_java_new_and_implicit_this() {
        let (state, exts) = index(&[(
            "App.java",
            "public class App {\n    void run() { helper(); Object o = new App(); }\n    void helper() {}\n}\n",
        )]);
        let helper = classify_named(&state, &exts[0], "helper");
        assert_eq!(helper.kind, CallKind::Function);
        assert_eq!(helper.target, Resolution::Resolved("repo:App.java:App.helper".into()));

        let ctor = classify_named(&state, &exts[0], "App");
        assert_eq!(ctor.kind, CallKind::Constructor);
        assert_eq!(ctor.target, Resolution::Resolved("repo:App.java:App".into()));
    }

    #[test]
    fn test_go_factory_is_constructor() {
        let (state, exts) = index(&[(
            "main.go",
            "package main\n\ntype Server struct{}\n\nfunc NewServer() *Server { return &Server{} }\n\nfunc main() { NewServer() }\n",
        )]);
        let resolved = classify_named(&state, &exts[0], "NewServer");
        assert_eq!(resolved.kind, CallKind::Constructor);
        assert_eq!(resolved.target, Resolution::Resolved("repo:main.go:NewServer".into()));
    }
}
