//! Language-normalized entities produced by the extractor.
//!
//! Every supported language is reduced to the same small vocabulary:
//! files, functions and classes ([`Entity`]), call sites waiting to be
//! resolved ([`CallInfo`]) and import statements ([`ImportStmt`]).
//!
//! # Identifiers
//!
//! Entities are identified by a qualified identifier built from the repo
//! name, the repo-relative file path and the dotted containment chain:
//!
//! - `repo:src/app.py` for a file
//! - `repo:src/app.py:main` for a top-level function
//! - `repo:src/app.py:Outer.Inner.method` for a nested method

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::languages::Language;

/// Qualified identifier of an entity (`repo:file_path:name`).
pub type EntityId = String;

/// Build the identifier of a file node.
pub fn file_id(repo: &str, file_path: &str) -> EntityId {
    format!("{}:{}", repo, file_path)
}

/// Build the identifier of an entity inside a file.
pub fn entity_id(repo: &str, file_path: &str, qualified_name: &str) -> EntityId {
    format!("{}:{}:{}", repo, file_path, qualified_name)
}

/// Hex-encoded sha256 of arbitrary text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Kind of entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    File,
    Function,
    Class,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::File => "file",
            EntityKind::Function => "function",
            EntityKind::Class => "class",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Access modifier, normalized across languages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessModifier {
    #[default]
    Public,
    Private,
    Protected,
    Internal,
    Package,
}

impl AccessModifier {
    /// Whether a symbol with this modifier is published into the global scope.
    pub fn is_exported(&self) -> bool {
        !matches!(self, AccessModifier::Private)
    }
}

/// Source span, 1-indexed lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
}

/// Generic type parameter (`T: Clone = Foo`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Boolean markers attached to an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFlags {
    pub is_async: bool,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_constructor: bool,
    pub is_interface: bool,
}

/// A function, class or file extracted from source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Qualified identifier
    pub id: EntityId,
    pub kind: EntityKind,
    /// Simple name (`method`)
    pub name: String,
    /// Dotted containment chain inside the file (`Outer.Inner.method`)
    pub qualified_name: String,
    /// Repo-relative path with forward slashes
    pub file_path: String,
    pub language: Language,
    pub span: Span,
    /// Containing entity; `None` means the file itself contains it
    pub parent: Option<EntityId>,
    /// Qualified name of the owning class for methods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<String>,
    #[serde(default)]
    pub access: AccessModifier,
    #[serde(default)]
    pub flags: EntityFlags,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_parameters: Vec<TypeParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// Base classes (classes only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<String>,
    /// Implemented interfaces or traits (classes only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub implements: Vec<String>,
    /// sha256 of the entity's source text
    pub content_hash: String,
    /// Source text; not persisted
    #[serde(skip)]
    pub code: String,
}

impl Entity {
    /// Create an entity with empty metadata.
    pub fn new(
        repo: &str,
        kind: EntityKind,
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        file_path: impl Into<String>,
        language: Language,
    ) -> Self {
        let name = name.into();
        let qualified_name = qualified_name.into();
        let file_path = file_path.into();
        let id = match kind {
            EntityKind::File => file_id(repo, &file_path),
            _ => entity_id(repo, &file_path, &qualified_name),
        };
        Self {
            id,
            kind,
            name,
            qualified_name,
            file_path,
            language,
            span: Span::default(),
            parent: None,
            class_name: None,
            signature: None,
            docstring: None,
            decorators: Vec::new(),
            access: AccessModifier::Public,
            flags: EntityFlags::default(),
            type_parameters: Vec::new(),
            return_type: None,
            bases: Vec::new(),
            implements: Vec::new(),
            content_hash: String::new(),
            code: String::new(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_parent(mut self, parent: Option<EntityId>) -> Self {
        self.parent = parent;
        self
    }

    /// Attach source text and derive the content hash from it.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self.content_hash = content_hash(&self.code);
        self
    }

    pub fn is_method(&self) -> bool {
        self.kind == EntityKind::Function && self.class_name.is_some()
    }

    /// Text handed to the embedding pipeline for this entity.
    pub fn summary(&self, max_code_chars: usize) -> String {
        let mut text = format!("{} {}", self.kind.label(), self.qualified_name);
        if let Some(sig) = &self.signature {
            text.push('\n');
            text.push_str(sig);
        }
        if let Some(doc) = &self.docstring {
            text.push('\n');
            text.push_str(doc);
        }
        if !self.code.is_empty() {
            text.push('\n');
            text.extend(self.code.chars().take(max_code_chars));
        }
        text
    }
}

/// How a call site invokes its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Function,
    Method,
    Constructor,
    Decorator,
    Static,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallKind::Function => "function",
            CallKind::Method => "method",
            CallKind::Constructor => "constructor",
            CallKind::Decorator => "decorator",
            CallKind::Static => "static",
        };
        f.write_str(s)
    }
}

/// Syntactic shape of a call site, recorded before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSyntax {
    /// `name(...)` or `recv.name(...)`
    Plain,
    /// `new Name(...)`
    New,
    /// `@name(...)` applied to a definition
    Decorator,
    /// `Type::name(...)`
    Path,
}

/// A call site waiting to be resolved into a CALLS edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Entity (or file) the call is made from
    pub caller: EntityId,
    /// Target name as written, without receiver
    pub name: String,
    /// Receiver expression text (`obj`, `self.items`, `a().b()`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Receiver type when it is syntactically evident
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_type: Option<String>,
    /// Receiver is itself a call (`a().b()`)
    #[serde(default)]
    pub receiver_is_call: bool,
    pub syntax: CallSyntax,
    /// Number of calls this one is chained onto
    pub chain_depth: usize,
    /// Call appears inside another call's arguments
    pub is_nested: bool,
    pub line: usize,
    /// Literal callee text, used to tag unresolved sinks
    pub text: String,
}

/// One name brought in by an import (`bar as baz`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedName {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ImportedName {
    pub fn new(name: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            name: name.into(),
            alias,
        }
    }

    /// Name bound in the importing file.
    pub fn local(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// An import statement as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStmt {
    /// Module specifier (`..pkg.mod`, `./util`, `crate::graph`, `net/http`)
    pub module: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<ImportedName>,
    /// Name the module itself is bound to (`import numpy as np`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_alias: Option<String>,
    #[serde(default)]
    pub is_wildcard: bool,
    pub line: usize,
}

/// Everything the extractor yields for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileExtraction {
    pub file_path: String,
    pub language: Language,
    /// sha256 of the whole file
    pub fingerprint: String,
    pub line_count: usize,
    pub entities: Vec<Entity>,
    pub calls: Vec<CallInfo>,
    pub imports: Vec<ImportStmt>,
}

impl FileExtraction {
    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Build the file-level entity.
    pub fn file_entity(&self, repo: &str) -> Entity {
        let mut file = Entity::new(
            repo,
            EntityKind::File,
            self.file_path.rsplit('/').next().unwrap_or(&self.file_path),
            "",
            self.file_path.clone(),
            self.language,
        );
        file.span = Span {
            start_line: 1,
            end_line: self.line_count.max(1),
            start_byte: 0,
            end_byte: 0,
        };
        file.content_hash = self.fingerprint.clone();
        file
    }
}
