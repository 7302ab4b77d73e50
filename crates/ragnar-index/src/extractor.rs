//! Entity extraction over concrete syntax trees.
//!
//! One generic walker serves every language: all language knowledge comes
//! from the [`LanguageRules`] table of the tree's language. The walk is a
//! single pre-order pass that keeps a stack of frames (file, class, function)
//! so nested definitions get dotted qualified names reflecting their full
//! containment chain.
//!
//! Output is deterministic for a given tree: entities and calls are emitted
//! in document order.

use std::collections::HashMap;

use tree_sitter::Node;

use crate::entity::{
    file_id, AccessModifier, CallInfo, CallSyntax, Entity, EntityFlags, EntityId,
    EntityKind, FileExtraction, ImportStmt, ImportedName, Span, TypeParameter,
};
use crate::languages::{
    starts_uppercase, BindingRule, CallRule, ConstructorConvention, DocStyle, ImplRule,
    ImportStyle, LanguageRules, Visibility,
};
use crate::syntax::SyntaxTree;

/// Nodes that wrap a definition without changing what it is.
const DOC_ANCHOR_WRAPPERS: &[&str] = &[
    "decorated_definition",
    "export_statement",
    "type_declaration",
    "lexical_declaration",
    "variable_declaration",
];

const MAX_SIGNATURE_CHARS: usize = 300;
const MAX_EXPRESSION_CHARS: usize = 200;

/// Turns syntax trees into [`FileExtraction`]s for one repository.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    repo: String,
}

impl EntityExtractor {
    pub fn new(repo: impl Into<String>) -> Self {
        Self { repo: repo.into() }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Extract entities, call sites and imports from a parsed file.
    pub fn extract(&self, tree: &SyntaxTree, file_path: &str) -> FileExtraction {
        let mut walk = Walk::new(tree, &self.repo, file_path);
        walk.run(tree.root());
        walk.attach_detached();
        let imports = walk.imports();

        FileExtraction {
            file_path: file_path.to_string(),
            language: tree.language(),
            fingerprint: crate::entity::content_hash(tree.source()),
            line_count: tree.source().lines().count(),
            entities: walk.entities,
            calls: walk.calls,
            imports,
        }
    }
}

/// Nodes waiting to be visited, with the index of their frame.
type Pending<'t> = Vec<(Node<'t>, usize)>;

/// Lexical context of the walk.
#[derive(Debug, Clone, Default)]
struct Frame {
    /// Index of the entity owning this frame; `None` is the file
    entity: Option<usize>,
    /// Qualified name prefix for definitions made here
    prefix: String,
    /// Qualified name of the class whose members are defined here
    class: Option<String>,
    /// Definitions here are members of `class`
    in_class_body: bool,
    /// Members of a class declared elsewhere (`impl` blocks)
    detached: bool,
    /// Interface and trait-impl members are public regardless of modifiers
    members_public: bool,
    /// Local variable name to syntactic type
    bindings: HashMap<String, String>,
}

impl Frame {
    fn root() -> Self {
        Self::default()
    }
}

struct Walk<'t> {
    tree: &'t SyntaxTree,
    rules: &'static LanguageRules,
    repo: &'t str,
    path: &'t str,
    file_id: EntityId,
    entities: Vec<Entity>,
    calls: Vec<CallInfo>,
    seen: HashMap<String, usize>,
    /// Every frame opened so far; the file frame is first
    frames: Vec<Frame>,
    /// Methods whose class is attached after the walk: (entity, class name)
    detached: Vec<(usize, String)>,
    /// Trait or interface implementations found in impl blocks: (type, trait)
    impls: Vec<(String, String)>,
}

impl<'t> Walk<'t> {
    fn new(tree: &'t SyntaxTree, repo: &'t str, path: &'t str) -> Self {
        Self {
            tree,
            rules: tree.language().rules(),
            repo,
            path,
            file_id: file_id(repo, path),
            entities: Vec::new(),
            calls: Vec::new(),
            seen: HashMap::new(),
            frames: vec![Frame::root()],
            detached: Vec::new(),
            impls: Vec::new(),
        }
    }

    fn text(&self, node: Node<'t>) -> &'t str {
        self.tree.text(node)
    }

    /// Pre-order walk with an explicit stack, so nesting depth in the source
    /// never grows the call stack.
    fn run(&mut self, root: Node<'t>) {
        let mut pending = Pending::new();
        schedule_children(&mut pending, root, 0);
        while let Some((node, frame)) = pending.pop() {
            self.visit(node, frame, &mut pending);
        }
    }

    fn open_frame(&mut self, frame: Frame) -> usize {
        self.frames.push(frame);
        self.frames.len() - 1
    }

    fn visit(&mut self, node: Node<'t>, frame: usize, pending: &mut Pending<'t>) {
        let rules = self.rules;
        let kind = node.kind();

        if rules.is_function(kind) {
            self.function(node, node, None, frame, pending);
            return;
        }
        if let Some((value, name)) = self.bound_function(node) {
            self.function(value, node, Some(name), frame, pending);
            return;
        }
        if rules.is_class(kind) && self.passes_class_filter(node) {
            self.class(node, frame, pending);
            return;
        }
        if let Some(rule) = rules.impl_blocks.iter().find(|r| r.kind == kind) {
            self.impl_block(node, rule, frame, pending);
            return;
        }
        if rules.is_decorator(kind) {
            self.schedule_decorator_arguments(node, frame, pending);
            return;
        }
        if rules.import_kinds.contains(&kind) {
            return;
        }
        if let Some(rule) = rules.call_rule(kind) {
            if let Some(call) = self.call_info(node, rule, &self.frames[frame]) {
                self.calls.push(call);
            }
        }
        if let Some(rule) = rules.bindings.iter().find(|r| r.kind == kind) {
            if let Some((name, ty)) = self.binding(node, rule, &self.frames[frame]) {
                let bindings = &mut self.frames[frame].bindings;
                match ty {
                    Some(ty) => {
                        bindings.insert(name, ty);
                    }
                    None => {
                        bindings.remove(&name);
                    }
                }
            }
        }
        schedule_children(pending, node, frame);
    }

    // ----- definitions -----

    fn bound_function(&self, node: Node<'t>) -> Option<(Node<'t>, Node<'t>)> {
        let rule = self.rules.bound_functions.iter().find(|r| r.kind == node.kind())?;
        let value = node.child_by_field_name(rule.value_field)?;
        if !rule.value_kinds.contains(&value.kind()) {
            return None;
        }
        let name = node.child_by_field_name(rule.name_field)?;
        Some((value, name))
    }

    fn passes_class_filter(&self, node: Node<'t>) -> bool {
        match self.rules.class_type_filter {
            Some((field, kinds)) => node
                .child_by_field_name(field)
                .is_some_and(|t| kinds.contains(&t.kind())),
            None => true,
        }
    }

    fn function(
        &mut self,
        def: Node<'t>,
        span_node: Node<'t>,
        name_node: Option<Node<'t>>,
        frame_index: usize,
        pending: &mut Pending<'t>,
    ) {
        let rules = self.rules;
        let Some(name_node) = name_node.or_else(|| def.child_by_field_name("name")) else {
            schedule_children(pending, def, frame_index);
            return;
        };
        let frame = self.frames[frame_index].clone();
        let name = self.text(name_node).to_string();

        let receiver = rules.receiver_field.and_then(|f| def.child_by_field_name(f));
        let receiver_type = receiver.and_then(|r| self.receiver_param_type(r));
        let detached_class = receiver_type
            .clone()
            .or_else(|| frame.detached.then(|| frame.class.clone()).flatten());
        let class_name = detached_class
            .clone()
            .or_else(|| frame.in_class_body.then(|| frame.class.clone()).flatten());

        let qualified = match &receiver_type {
            Some(ty) => format!("{}.{}", ty, name),
            None => join(&frame.prefix, &name),
        };
        let qualified = self.unique(qualified);
        let parent = if detached_class.is_some() {
            None
        } else {
            frame.entity.map(|i| self.entities[i].id.clone())
        };

        let decorators = self.decorators(span_node);
        let decorator_names: Vec<String> = decorators.iter().map(|(n, _)| n.clone()).collect();
        let in_class = class_name.is_some();

        let mut flags = EntityFlags {
            is_async: self.has_keyword(def, "async") || self.has_keyword(span_node, "async"),
            ..EntityFlags::default()
        };
        flags.is_static = in_class
            && (decorator_names
                .iter()
                .any(|d| rules.static_decorators.contains(&d.as_str()))
                || self.has_keyword(def, "static")
                || rules
                    .self_parameter_kind
                    .is_some_and(|k| !self.has_parameter_kind(def, k)));
        flags.is_abstract = decorator_names
            .iter()
            .any(|d| rules.abstract_decorators.contains(&d.as_str()))
            || self.has_keyword(def, "abstract")
            || def.kind().starts_with("abstract")
            || def.child_by_field_name(rules.body_field).is_none();
        let class_simple = class_name
            .as_deref()
            .map(|c| c.rsplit('.').next().unwrap_or(c));
        flags.is_constructor = (in_class && rules.constructor_names.contains(&name.as_str()))
            || (rules.constructor_matches_class && class_simple == Some(name.as_str()))
            || (!in_class
                && matches!(rules.constructor_calls, ConstructorConvention::Prefixed(_))
                && rules.constructed_type(&name).is_some());

        let mut entity = Entity::new(
            self.repo,
            EntityKind::Function,
            name.clone(),
            qualified.clone(),
            self.path,
            self.tree.language(),
        )
        .with_span(span(span_node))
        .with_parent(parent)
        .with_code(self.text(span_node));
        entity.class_name = class_name.clone();
        entity.signature = self.signature(def, span_node);
        entity.docstring = self.docstring(def, span_node);
        entity.decorators = decorator_names;
        entity.access = self.access(def, &name, &frame);
        entity.flags = flags;
        entity.type_parameters = self.type_parameters(def);
        entity.return_type = rules
            .return_type_field
            .and_then(|f| def.child_by_field_name(f))
            .map(|n| clean_type_annotation(self.text(n)))
            .filter(|s| !s.is_empty());

        let id = entity.id.clone();
        self.entities.push(entity);
        let index = self.entities.len() - 1;
        if let Some(class) = detached_class {
            self.detached.push((index, class));
        }
        self.decorator_calls(&decorators, &id);

        let mut inner = Frame {
            entity: Some(index),
            prefix: qualified,
            class: class_name,
            in_class_body: false,
            detached: false,
            members_public: false,
            bindings: frame.bindings,
        };
        if let Some(receiver) = receiver {
            self.bind_parameters(receiver, &mut inner);
        }
        if let Some(params) = def.child_by_field_name(rules.parameters_field) {
            self.bind_parameters(params, &mut inner);
        }
        let inner = self.open_frame(inner);
        schedule_children(pending, def, inner);
    }

    fn class(&mut self, node: Node<'t>, frame_index: usize, pending: &mut Pending<'t>) {
        let rules = self.rules;
        let Some(name_node) = node.child_by_field_name("name") else {
            schedule_children(pending, node, frame_index);
            return;
        };
        let frame = self.frames[frame_index].clone();
        let name = self.text(name_node).to_string();
        let qualified = self.unique(join(&frame.prefix, &name));
        let parent = frame.entity.map(|i| self.entities[i].id.clone());

        let is_interface = rules.interface_kinds.contains(&node.kind())
            || rules.class_type_filter.is_some_and(|(field, _)| {
                node.child_by_field_name(field)
                    .is_some_and(|t| t.kind().contains("interface"))
            });
        let decorators = self.decorators(node);
        let (bases, implements) = self.bases(node);

        let mut entity = Entity::new(
            self.repo,
            EntityKind::Class,
            name.clone(),
            qualified.clone(),
            self.path,
            self.tree.language(),
        )
        .with_span(span(node))
        .with_parent(parent)
        .with_code(self.text(node));
        entity.signature = self.signature(node, node);
        entity.docstring = self.docstring(node, node);
        entity.decorators = decorators.iter().map(|(n, _)| n.clone()).collect();
        entity.access = self.access(node, &name, &frame);
        entity.flags = EntityFlags {
            is_interface,
            is_abstract: node.kind().starts_with("abstract") || self.has_keyword(node, "abstract"),
            ..EntityFlags::default()
        };
        entity.type_parameters = self.type_parameters(node);
        entity.bases = bases;
        entity.implements = implements;

        let id = entity.id.clone();
        self.entities.push(entity);
        let index = self.entities.len() - 1;
        self.decorator_calls(&decorators, &id);

        let inner = self.open_frame(Frame {
            entity: Some(index),
            prefix: qualified.clone(),
            class: Some(qualified),
            in_class_body: true,
            detached: false,
            members_public: is_interface,
            bindings: HashMap::new(),
        });
        schedule_children(pending, node, inner);
    }

    fn impl_block(&mut self, node: Node<'t>, rule: &ImplRule, frame: usize, pending: &mut Pending<'t>) {
        let Some(type_node) = node.child_by_field_name(rule.type_field) else {
            schedule_children(pending, node, frame);
            return;
        };
        let type_name = normalize_type(self.text(type_node));
        let trait_name = rule
            .trait_field
            .and_then(|f| node.child_by_field_name(f))
            .map(|t| normalize_type(self.text(t)));
        if let Some(t) = &trait_name {
            self.impls.push((type_name.clone(), t.clone()));
        }

        let inner = self.open_frame(Frame {
            entity: self.frames[frame].entity,
            prefix: type_name.clone(),
            class: Some(type_name),
            in_class_body: true,
            detached: true,
            members_public: trait_name.is_some(),
            bindings: HashMap::new(),
        });
        schedule_children(pending, node, inner);
    }

    /// Link methods declared outside their class body to the class, when the
    /// class lives in this file.
    fn attach_detached(&mut self) {
        let classes: HashMap<String, usize> = self
            .entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == EntityKind::Class)
            .map(|(i, e)| (e.qualified_name.clone(), i))
            .collect();

        for (index, class) in std::mem::take(&mut self.detached) {
            if let Some(&ci) = classes.get(&class) {
                let class_id = self.entities[ci].id.clone();
                self.entities[index].parent = Some(class_id);
            }
        }
        for (ty, tr) in std::mem::take(&mut self.impls) {
            if let Some(&ci) = classes.get(&ty) {
                let implements = &mut self.entities[ci].implements;
                if !implements.contains(&tr) {
                    implements.push(tr);
                }
            }
        }
    }

    fn unique(&mut self, qualified: String) -> String {
        let count = self.seen.entry(qualified.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            qualified
        } else {
            format!("{}#{}", qualified, count)
        }
    }

    // ----- metadata -----

    fn has_keyword(&self, node: Node<'t>, keyword: &str) -> bool {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if !child.is_named() && child.kind() == keyword {
                return true;
            }
            if self.rules.modifier_kinds.contains(&child.kind()) {
                let mut inner = child.walk();
                if child
                    .children(&mut inner)
                    .any(|m| m.kind() == keyword || self.text(m) == keyword)
                {
                    return true;
                }
            }
        }
        false
    }

    fn has_parameter_kind(&self, def: Node<'t>, kind: &str) -> bool {
        let Some(params) = def.child_by_field_name(self.rules.parameters_field) else {
            return false;
        };
        let mut cursor = params.walk();
        let found = params.named_children(&mut cursor).any(|p| p.kind() == kind);
        found
    }

    fn access(&self, node: Node<'t>, name: &str, frame: &Frame) -> AccessModifier {
        if frame.members_public {
            return AccessModifier::Public;
        }
        match self.rules.visibility {
            Visibility::Underscore => {
                let dunder = name.len() > 4 && name.starts_with("__") && name.ends_with("__");
                if dunder {
                    AccessModifier::Public
                } else if name.starts_with("__") {
                    AccessModifier::Private
                } else if name.starts_with('_') {
                    AccessModifier::Protected
                } else {
                    AccessModifier::Public
                }
            }
            Visibility::HashPrivate => {
                if name.starts_with('#') {
                    AccessModifier::Private
                } else {
                    AccessModifier::Public
                }
            }
            Visibility::Accessibility => {
                let declared = self
                    .child_of_kind(node, "accessibility_modifier")
                    .map(|m| keyword_access(self.text(m)));
                match declared {
                    Some(Some(access)) => access,
                    _ if name.starts_with('#') => AccessModifier::Private,
                    _ => AccessModifier::Public,
                }
            }
            Visibility::Capitalized => {
                if starts_uppercase(name) {
                    AccessModifier::Public
                } else {
                    AccessModifier::Package
                }
            }
            Visibility::PubModifier => match self.child_of_kind(node, "visibility_modifier") {
                Some(m) if self.text(m) == "pub" => AccessModifier::Public,
                Some(_) => AccessModifier::Internal,
                None => AccessModifier::Private,
            },
            Visibility::Modifiers => {
                for keyword in ["public", "private", "protected"] {
                    if self.has_keyword(node, keyword) {
                        if let Some(access) = keyword_access(keyword) {
                            return access;
                        }
                    }
                }
                AccessModifier::Package
            }
        }
    }

    fn child_of_kind(&self, node: Node<'t>, kind: &str) -> Option<Node<'t>> {
        let mut cursor = node.walk();
        let found = node.children(&mut cursor).find(|c| c.kind() == kind);
        found
    }

    fn signature(&self, def: Node<'t>, span_node: Node<'t>) -> Option<String> {
        let source = self.tree.source();
        let start = span_node.start_byte().min(def.start_byte());
        let end = def
            .child_by_field_name(self.rules.body_field)
            .map(|b| b.start_byte())
            .unwrap_or_else(|| def.end_byte());
        let raw = source.get(start..end)?;
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let trimmed = collapsed
            .trim_end_matches(|c: char| c == '{' || c == ':' || c == '=' || c == '>' || c.is_whitespace())
            .to_string();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.chars().take(MAX_SIGNATURE_CHARS).collect())
    }

    fn docstring(&self, def: Node<'t>, span_node: Node<'t>) -> Option<String> {
        match self.rules.docstrings {
            DocStyle::FirstString => {
                let body = def.child_by_field_name(self.rules.body_field)?;
                let first = body.named_child(0)?;
                if first.kind() != "expression_statement" {
                    return None;
                }
                let string = first.named_child(0).filter(|s| s.kind() == "string")?;
                clean_string_literal(self.text(string))
            }
            DocStyle::LeadingComments => {
                let mut anchor = span_node;
                while let Some(parent) = anchor.parent() {
                    if DOC_ANCHOR_WRAPPERS.contains(&parent.kind()) {
                        anchor = parent;
                    } else {
                        break;
                    }
                }
                let mut lines = Vec::new();
                let mut expected_row = anchor.start_position().row;
                let mut cursor = anchor.prev_sibling();
                while let Some(prev) = cursor {
                    let adjacent = prev.end_position().row + 1 >= expected_row;
                    if self.rules.comment_kinds.contains(&prev.kind()) && adjacent {
                        lines.push(clean_comment(self.text(prev)));
                    } else if !(self.rules.is_decorator(prev.kind()) && adjacent) {
                        break;
                    }
                    expected_row = prev.start_position().row;
                    cursor = prev.prev_sibling();
                }
                lines.reverse();
                let doc = lines.join("\n").trim().to_string();
                (!doc.is_empty()).then_some(doc)
            }
        }
    }

    fn type_parameters(&self, def: Node<'t>) -> Vec<TypeParameter> {
        let Some(list) = def.child_by_field_name("type_parameters") else {
            return Vec::new();
        };
        let mut cursor = list.walk();
        let params: Vec<Node<'t>> = list.named_children(&mut cursor).collect();
        params
            .into_iter()
            .filter(|p| !self.rules.comment_kinds.contains(&p.kind()))
            .map(|p| {
                let name = ["name", "left"]
                    .iter()
                    .find_map(|f| p.child_by_field_name(f))
                    .or_else(|| p.named_child(0).filter(|_| p.named_child_count() > 1))
                    .map(|n| self.text(n))
                    .unwrap_or_else(|| self.text(p))
                    .to_string();
                let constraint = ["constraint", "bounds", "type"]
                    .iter()
                    .find_map(|f| p.child_by_field_name(f))
                    .or_else(|| self.child_of_kind(p, "type_bound"))
                    .map(|n| clean_type_annotation(self.text(n)))
                    .filter(|s| !s.is_empty());
                let default = ["value", "default_type", "default"]
                    .iter()
                    .find_map(|f| p.child_by_field_name(f))
                    .map(|n| clean_type_annotation(self.text(n)));
                TypeParameter {
                    name,
                    constraint,
                    default,
                }
            })
            .collect()
    }

    fn bases(&self, node: Node<'t>) -> (Vec<String>, Vec<String>) {
        let mut bases = Vec::new();
        let mut implements = Vec::new();
        for rule in self.rules.bases {
            let Some(container) = self.follow(node, rule.path) else {
                continue;
            };
            let target = if rule.implements { &mut implements } else { &mut bases };
            self.collect_type_names(container, target);
        }
        (bases, implements)
    }

    fn follow(&self, node: Node<'t>, path: &[&str]) -> Option<Node<'t>> {
        let mut current = node;
        for segment in path {
            current = current
                .child_by_field_name(segment)
                .or_else(|| self.child_of_kind(current, segment))?;
        }
        Some(current)
    }

    fn collect_type_names(&self, container: Node<'t>, out: &mut Vec<String>) {
        let mut cursor = container.walk();
        let children: Vec<Node<'t>> = container.named_children(&mut cursor).collect();
        for child in children {
            let kind = child.kind();
            if matches!(kind, "keyword_argument" | "type_arguments" | "type_parameters")
                || self.rules.comment_kinds.contains(&kind)
            {
                continue;
            }
            if (kind.ends_with("_list") || kind.ends_with("_clause")) && child.named_child_count() > 0 {
                self.collect_type_names(child, out);
                continue;
            }
            let name = normalize_type(self.text(child));
            if !name.is_empty() && !out.contains(&name) {
                out.push(name);
            }
        }
    }

    // ----- decorators -----

    /// Decorators attached to a definition, in source order, with their base
    /// names.
    fn decorators(&self, node: Node<'t>) -> Vec<(String, Node<'t>)> {
        let rule = self.rules.decorators;
        if rule.kinds.is_empty() {
            return Vec::new();
        }
        let mut found = Vec::new();

        // inside a wrapper the preceding siblings are the wrapper's decorators
        if let Some(parent) = node.parent().filter(|p| rule.wrapper_kinds.contains(&p.kind())) {
            let mut cursor = parent.walk();
            found.extend(parent.children(&mut cursor).filter(|c| rule.kinds.contains(&c.kind())));
        } else {
            let mut preceding = Vec::new();
            let mut cursor = node.prev_named_sibling();
            while let Some(prev) = cursor {
                if rule.kinds.contains(&prev.kind()) {
                    preceding.push(prev);
                } else if !self.rules.comment_kinds.contains(&prev.kind()) {
                    break;
                }
                cursor = prev.prev_named_sibling();
            }
            preceding.reverse();
            found.extend(preceding);
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if rule.kinds.contains(&child.kind()) {
                found.push(child);
            } else if self.rules.modifier_kinds.contains(&child.kind()) {
                let mut inner = child.walk();
                found.extend(child.children(&mut inner).filter(|c| rule.kinds.contains(&c.kind())));
            }
        }

        found
            .into_iter()
            .filter_map(|d| self.decorator_base(d).map(|name| (name, d)))
            .collect()
    }

    /// Base name of a decorator expression: `@mod.outer(inner(x))` is
    /// `mod.outer`. Walks callee fields of the syntax tree, so arguments never
    /// leak into the name.
    fn decorator_base(&self, decorator: Node<'t>) -> Option<String> {
        let mut expr = decorator
            .child_by_field_name("name")
            .or_else(|| decorator.named_child(0))?;
        loop {
            if let Some(rule) = self.rules.call_rule(expr.kind()) {
                match rule.callee_field.and_then(|f| expr.child_by_field_name(f)) {
                    Some(callee) => expr = callee,
                    None => break,
                }
            } else if expr.kind() == "attribute" && expr.child_by_field_name("object").is_none() {
                match expr.named_child(0) {
                    Some(path) => expr = path,
                    None => break,
                }
            } else {
                break;
            }
        }
        let name = compact(self.text(expr));
        (!name.is_empty()).then_some(name)
    }

    fn decorator_calls(&mut self, decorators: &[(String, Node<'t>)], caller: &str) {
        if !self.rules.decorators.is_call {
            return;
        }
        for (base, node) in decorators {
            let (receiver, name) = split_last_segment(base);
            self.calls.push(CallInfo {
                caller: caller.to_string(),
                name: name.to_string(),
                receiver: receiver.map(str::to_string),
                receiver_type: None,
                receiver_is_call: false,
                syntax: CallSyntax::Decorator,
                chain_depth: 0,
                is_nested: false,
                line: node.start_position().row + 1,
                text: base.clone(),
            });
        }
    }

    /// Calls inside decorator arguments still belong to the enclosing scope.
    fn schedule_decorator_arguments(&self, decorator: Node<'t>, frame: usize, pending: &mut Pending<'t>) {
        if let Some(args) = decorator.child_by_field_name("arguments") {
            pending.push((args, frame));
            return;
        }
        let Some(expr) = decorator.named_child(0) else {
            return;
        };
        if let Some(rule) = self.rules.call_rule(expr.kind()) {
            let callee = rule.callee_field.and_then(|f| expr.child_by_field_name(f));
            let mut cursor = expr.walk();
            let children: Vec<Node<'t>> = expr.named_children(&mut cursor).collect();
            for child in children.into_iter().rev() {
                if Some(child) != callee {
                    pending.push((child, frame));
                }
            }
        }
    }

    // ----- calls -----

    fn caller_id(&self, frame: &Frame) -> EntityId {
        match frame.entity {
            Some(i) => self.entities[i].id.clone(),
            None => self.file_id.clone(),
        }
    }

    fn call_info(&self, node: Node<'t>, rule: &CallRule, frame: &Frame) -> Option<CallInfo> {
        let rules = self.rules;
        let (name, receiver, syntax, text) = if let Some(name_field) = rule.name_field {
            let name_node = node.child_by_field_name(name_field)?;
            let receiver = rule.receiver_field.and_then(|f| node.child_by_field_name(f));
            let name = self.text(name_node).to_string();
            let text = match receiver {
                Some(r) => format!("{}.{}", compact(self.text(r)), name),
                None => name.clone(),
            };
            (name, receiver, rule.syntax, text)
        } else {
            let callee = self.unwrap_callee(node.child_by_field_name(rule.callee_field?)?);
            let text = truncate(compact(self.text(callee)));
            if rule.syntax == CallSyntax::New {
                let ty = normalize_type(&text);
                let name = ty.rsplit('.').next().unwrap_or(&ty).to_string();
                (name, None, CallSyntax::New, text)
            } else if let Some(member) = rules.member_rule(callee.kind()) {
                let property = callee.child_by_field_name(member.property_field)?;
                let object = callee.child_by_field_name(member.object_field);
                (self.text(property).to_string(), object, CallSyntax::Plain, text)
            } else if let Some(path) = rules.scoped_path_rule(callee.kind()) {
                let name = callee
                    .child_by_field_name(path.property_field)
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_else(|| text.clone());
                match callee.child_by_field_name(path.object_field) {
                    Some(prefix) => (name, Some(prefix), CallSyntax::Path, text),
                    None => (name, None, CallSyntax::Plain, text),
                }
            } else {
                (text.clone(), None, CallSyntax::Plain, text)
            }
        };

        let (receiver_text, receiver_type, chain_depth) = match receiver {
            Some(r) => {
                let depth = self.chain_depth(r);
                let r_text = truncate(compact(self.text(r)));
                let ty = if depth > 0 {
                    None
                } else {
                    self.receiver_type(&r_text, syntax, frame)
                };
                (Some(r_text), ty, depth)
            }
            None => (None, None, 0),
        };

        Some(CallInfo {
            caller: self.caller_id(frame),
            name,
            receiver: receiver_text,
            receiver_type,
            receiver_is_call: chain_depth > 0,
            syntax,
            chain_depth,
            is_nested: self.is_nested(node),
            line: node.start_position().row + 1,
            text,
        })
    }

    fn unwrap_callee(&self, mut callee: Node<'t>) -> Node<'t> {
        while let Some((_, field)) = self
            .rules
            .callee_wrappers
            .iter()
            .find(|(kind, _)| *kind == callee.kind())
        {
            match callee.child_by_field_name(field) {
                Some(inner) => callee = inner,
                None => break,
            }
        }
        callee
    }

    fn unwrap_value(&self, mut node: Node<'t>) -> Node<'t> {
        while self.rules.value_wrappers.contains(&node.kind()) {
            let inner = node
                .child_by_field_name("value")
                .or_else(|| node.child_by_field_name("operand"))
                .or_else(|| node.named_child(0));
            match inner {
                Some(inner) => node = inner,
                None => break,
            }
        }
        node
    }

    /// Receiver of a call node, if it has one.
    fn call_receiver(&self, call: Node<'t>, rule: &CallRule) -> Option<Node<'t>> {
        if rule.name_field.is_some() {
            return rule.receiver_field.and_then(|f| call.child_by_field_name(f));
        }
        let callee = self.unwrap_callee(call.child_by_field_name(rule.callee_field?)?);
        let member = self.rules.member_rule(callee.kind())?;
        callee.child_by_field_name(member.object_field)
    }

    /// Number of calls under a receiver expression (`a().b()` is 2).
    fn chain_depth(&self, receiver: Node<'t>) -> usize {
        let mut depth = 0;
        let mut current = Some(receiver);
        while let Some(node) = current {
            let node = self.unwrap_value(node);
            if let Some(rule) = self.rules.call_rule(node.kind()) {
                depth += 1;
                current = self.call_receiver(node, rule);
            } else if let Some(member) = self.rules.member_rule(node.kind()) {
                current = node.child_by_field_name(member.object_field);
            } else {
                break;
            }
        }
        depth
    }

    fn receiver_type(&self, receiver: &str, syntax: CallSyntax, frame: &Frame) -> Option<String> {
        if self.rules.is_self(receiver) {
            return frame.class.clone();
        }
        if syntax == CallSyntax::Path {
            return Some(normalize_type(receiver));
        }
        if is_identifier(receiver) {
            return frame.bindings.get(receiver).cloned();
        }
        None
    }

    fn is_nested(&self, node: Node<'t>) -> bool {
        let mut current = node.parent();
        while let Some(parent) = current {
            let kind = parent.kind();
            if self.rules.is_function(kind) || self.rules.is_class(kind) {
                return false;
            }
            if self.rules.argument_kinds.contains(&kind) {
                return true;
            }
            current = parent.parent();
        }
        false
    }

    // ----- receiver type inference -----

    fn receiver_param_type(&self, receiver: Node<'t>) -> Option<String> {
        let mut cursor = receiver.walk();
        let param = receiver.named_children(&mut cursor).next()?;
        let ty = param.child_by_field_name("type")?;
        let name = normalize_type(self.text(ty));
        (!name.is_empty()).then_some(name)
    }

    fn bind_parameters(&self, params: Node<'t>, frame: &mut Frame) {
        let mut cursor = params.walk();
        let children: Vec<Node<'t>> = params.named_children(&mut cursor).collect();
        for param in children {
            let rule = self.rules.parameters.iter().find(|r| r.kind == param.kind());
            let name = match rule.map(|r| r.name_field) {
                Some(Some(field)) => param.child_by_field_name(field),
                Some(None) => self.child_of_kind(param, "identifier"),
                None => self.untyped_parameter_name(param),
            };
            let Some(name) = name.map(|n| clean_binding_name(self.text(n))) else {
                continue;
            };
            if !is_identifier(&name) {
                continue;
            }
            // a parameter shadows any binding of the enclosing function
            frame.bindings.remove(&name);
            let ty = rule
                .and_then(|r| param.child_by_field_name(r.type_field))
                .map(|t| normalize_type(self.text(t)))
                .filter(|t| !t.is_empty());
            if let Some(ty) = ty {
                frame.bindings.insert(name, ty);
            }
        }
    }

    fn untyped_parameter_name(&self, param: Node<'t>) -> Option<Node<'t>> {
        if param.kind() == "identifier" {
            return Some(param);
        }
        param
            .child_by_field_name("name")
            .or_else(|| param.child_by_field_name("pattern"))
            .or_else(|| param.child_by_field_name("left"))
            .or_else(|| self.child_of_kind(param, "identifier"))
    }

    /// Name bound by a declaration and its type; `None` as the type means the
    /// name no longer has a known type.
    fn binding(&self, node: Node<'t>, rule: &BindingRule, frame: &Frame) -> Option<(String, Option<String>)> {
        let holder = match rule.declarator_field {
            Some(field) => node.child_by_field_name(field)?,
            None => node,
        };
        let name_node = holder.child_by_field_name(rule.name_field)?;
        let name = clean_binding_name(self.text(self.unwrap_value(name_node)));
        if !is_identifier(&name) {
            return None;
        }
        let declared = rule
            .type_field
            .and_then(|f| node.child_by_field_name(f).or_else(|| holder.child_by_field_name(f)))
            .map(|t| normalize_type(self.text(t)))
            .filter(|t| !t.is_empty());
        let inferred = || {
            rule.value_field
                .and_then(|f| holder.child_by_field_name(f))
                .and_then(|v| self.value_type(v, frame))
        };
        Some((name, declared.or_else(inferred)))
    }

    /// Type of an initializer when the syntax makes it evident.
    fn value_type(&self, value: Node<'t>, frame: &Frame) -> Option<String> {
        let rules = self.rules;
        let value = self.unwrap_value(value);
        let kind = value.kind();

        if let Some((_, field)) = rules.literal_types.iter().find(|(k, _)| *k == kind) {
            return value
                .child_by_field_name(field)
                .map(|t| normalize_type(self.text(t)));
        }
        if let Some(rule) = rules.call_rule(kind) {
            if rule.syntax == CallSyntax::New {
                let callee = value.child_by_field_name(rule.callee_field?)?;
                let ty = normalize_type(self.text(callee));
                return Some(ty.rsplit('.').next().unwrap_or(&ty).to_string());
            }
            if rule.name_field.is_some() {
                return None;
            }
            let callee = self.unwrap_callee(value.child_by_field_name(rule.callee_field?)?);
            if let Some(path) = rules.scoped_path_rule(callee.kind()) {
                let prefix = callee.child_by_field_name(path.object_field)?;
                let ty = normalize_type(self.text(prefix));
                if rules.is_self(&ty) {
                    return frame.class.clone();
                }
                return starts_uppercase(&ty).then_some(ty);
            }
            if rules.member_rule(callee.kind()).is_some() {
                return None;
            }
            let name = self.text(callee);
            return rules.constructed_type(name).map(str::to_string);
        }
        let text = self.text(value);
        if is_identifier(text) {
            return frame.bindings.get(text).cloned();
        }
        None
    }

    // ----- imports -----

    fn imports(&self) -> Vec<ImportStmt> {
        let mut out = Vec::new();
        for node in self.tree.query(self.rules.import_kinds) {
            let line = node.start_position().row + 1;
            match self.rules.imports.style {
                ImportStyle::Python => self.python_import(node, line, &mut out),
                ImportStyle::EcmaScript => self.ecma_import(node, line, &mut out),
                ImportStyle::Go => self.go_import(node, &mut out),
                ImportStyle::Rust => {
                    if let Some(arg) = node.child_by_field_name("argument") {
                        self.rust_use(arg, &[], line, &mut out);
                    }
                }
                ImportStyle::Java => self.java_import(node, line, &mut out),
            }
        }
        out
    }

    fn python_import(&self, node: Node<'t>, line: usize, out: &mut Vec<ImportStmt>) {
        let mut cursor = node.walk();
        let names: Vec<Node<'t>> = node.children_by_field_name("name", &mut cursor).collect();
        let aliased = |n: Node<'t>| -> (String, Option<String>) {
            if n.kind() == "aliased_import" {
                let name = n.child_by_field_name("name").map(|x| self.text(x)).unwrap_or("");
                let alias = n.child_by_field_name("alias").map(|x| self.text(x).to_string());
                (name.to_string(), alias)
            } else {
                (self.text(n).to_string(), None)
            }
        };

        if node.kind() == "import_statement" {
            for n in names {
                let (module, alias) = aliased(n);
                out.push(ImportStmt {
                    module: module.clone(),
                    names: Vec::new(),
                    module_alias: Some(alias.unwrap_or(module)),
                    is_wildcard: false,
                    line,
                });
            }
            return;
        }

        let Some(module) = node.child_by_field_name("module_name") else {
            return;
        };
        let is_wildcard = self.child_of_kind(node, "wildcard_import").is_some();
        out.push(ImportStmt {
            module: compact(self.text(module)),
            names: names
                .into_iter()
                .map(|n| {
                    let (name, alias) = aliased(n);
                    ImportedName::new(name, alias)
                })
                .collect(),
            module_alias: None,
            is_wildcard,
            line,
        });
    }

    fn ecma_import(&self, node: Node<'t>, line: usize, out: &mut Vec<ImportStmt>) {
        let Some(source) = node.child_by_field_name("source") else {
            return;
        };
        let mut stmt = ImportStmt {
            module: strip_quotes(self.text(source)).to_string(),
            names: Vec::new(),
            module_alias: None,
            is_wildcard: false,
            line,
        };
        if let Some(clause) = self.child_of_kind(node, "import_clause") {
            let mut cursor = clause.walk();
            let parts: Vec<Node<'t>> = clause.named_children(&mut cursor).collect();
            for part in parts {
                match part.kind() {
                    "identifier" => stmt
                        .names
                        .push(ImportedName::new("default", Some(self.text(part).to_string()))),
                    "named_imports" => {
                        let mut inner = part.walk();
                        for spec in part.named_children(&mut inner) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            let Some(name) = spec.child_by_field_name("name") else {
                                continue;
                            };
                            let alias = spec.child_by_field_name("alias").map(|a| self.text(a).to_string());
                            stmt.names.push(ImportedName::new(strip_quotes(self.text(name)), alias));
                        }
                    }
                    "namespace_import" => {
                        stmt.module_alias = self
                            .child_of_kind(part, "identifier")
                            .map(|i| self.text(i).to_string());
                    }
                    _ => {}
                }
            }
        }
        out.push(stmt);
    }

    fn go_import(&self, node: Node<'t>, out: &mut Vec<ImportStmt>) {
        let mut specs = Vec::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            let mut cursor = n.walk();
            for child in n.named_children(&mut cursor) {
                match child.kind() {
                    "import_spec" => specs.push(child),
                    "import_spec_list" => stack.push(child),
                    _ => {}
                }
            }
        }
        specs.sort_by_key(|s| s.start_byte());

        for spec in specs {
            let Some(path) = spec.child_by_field_name("path") else {
                continue;
            };
            let module = strip_quotes(self.text(path)).to_string();
            let name = spec.child_by_field_name("name");
            let is_wildcard = name.is_some_and(|n| n.kind() == "dot");
            let module_alias = match name {
                Some(n) if n.kind() == "package_identifier" => Some(self.text(n).to_string()),
                Some(_) => None,
                None => module.rsplit('/').next().map(str::to_string),
            };
            out.push(ImportStmt {
                module,
                names: Vec::new(),
                module_alias,
                is_wildcard,
                line: spec.start_position().row + 1,
            });
        }
    }

    fn rust_use(&self, node: Node<'t>, prefix: &[String], line: usize, out: &mut Vec<ImportStmt>) {
        match node.kind() {
            "use_list" => {
                let mut cursor = node.walk();
                let items: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
                for item in items {
                    self.rust_use(item, prefix, line, out);
                }
            }
            "scoped_use_list" => {
                let mut path = prefix.to_vec();
                if let Some(p) = node.child_by_field_name("path") {
                    path.extend(path_segments(self.text(p)));
                }
                if let Some(list) = node.child_by_field_name("list") {
                    self.rust_use(list, &path, line, out);
                }
            }
            "use_as_clause" => {
                let Some(p) = node.child_by_field_name("path") else {
                    return;
                };
                let mut segments = prefix.to_vec();
                segments.extend(path_segments(self.text(p)));
                let alias = node.child_by_field_name("alias").map(|a| self.text(a).to_string());
                push_use_leaf(segments, alias, line, out);
            }
            "use_wildcard" => {
                let mut segments = prefix.to_vec();
                if let Some(p) = node.named_child(0) {
                    segments.extend(path_segments(self.text(p)));
                }
                out.push(ImportStmt {
                    module: segments.join("::"),
                    names: Vec::new(),
                    module_alias: None,
                    is_wildcard: true,
                    line,
                });
            }
            _ => {
                let mut segments = prefix.to_vec();
                segments.extend(path_segments(self.text(node)));
                push_use_leaf(segments, None, line, out);
            }
        }
    }

    fn java_import(&self, node: Node<'t>, line: usize, out: &mut Vec<ImportStmt>) {
        let Some(path) = self
            .child_of_kind(node, "scoped_identifier")
            .or_else(|| self.child_of_kind(node, "identifier"))
        else {
            return;
        };
        let full = compact(self.text(path));
        if self.child_of_kind(node, "asterisk").is_some() {
            out.push(ImportStmt {
                module: full,
                names: Vec::new(),
                module_alias: None,
                is_wildcard: true,
                line,
            });
            return;
        }
        let (module, name) = split_last_segment(&full);
        out.push(ImportStmt {
            module: module.unwrap_or("").to_string(),
            names: vec![ImportedName::new(name, None)],
            module_alias: None,
            is_wildcard: false,
            line,
        });
    }
}

fn push_use_leaf(mut segments: Vec<String>, alias: Option<String>, line: usize, out: &mut Vec<ImportStmt>) {
    let Some(last) = segments.last().cloned() else {
        return;
    };
    if last == "self" {
        segments.pop();
        let module_alias = alias.or_else(|| segments.last().cloned());
        out.push(ImportStmt {
            module: segments.join("::"),
            names: Vec::new(),
            module_alias,
            is_wildcard: false,
            line,
        });
    } else if segments.len() == 1 {
        out.push(ImportStmt {
            module: last.clone(),
            names: Vec::new(),
            module_alias: Some(alias.unwrap_or(last)),
            is_wildcard: false,
            line,
        });
    } else {
        segments.pop();
        out.push(ImportStmt {
            module: segments.join("::"),
            names: vec![ImportedName::new(last, alias)],
            module_alias: None,
            is_wildcard: false,
            line,
        });
    }
}

fn span(node: Node<'_>) -> Span {
    Span {
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
    }
}

/// Queue the children of `node` so they pop in document order.
fn schedule_children<'t>(pending: &mut Pending<'t>, node: Node<'t>, frame: usize) {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
    pending.extend(children.into_iter().rev().map(|child| (child, frame)));
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn keyword_access(text: &str) -> Option<AccessModifier> {
    match text.trim() {
        "public" => Some(AccessModifier::Public),
        "private" => Some(AccessModifier::Private),
        "protected" => Some(AccessModifier::Protected),
        "internal" => Some(AccessModifier::Internal),
        _ => None,
    }
}

/// Remove all whitespace from an expression.
pub(crate) fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn truncate(text: String) -> String {
    if text.chars().count() <= MAX_EXPRESSION_CHARS {
        text
    } else {
        text.chars().take(MAX_EXPRESSION_CHARS).collect()
    }
}

/// Split `a.b.c` into (`a.b`, `c`); also understands `::`.
pub(crate) fn split_last_segment(path: &str) -> (Option<&str>, &str) {
    let dot = path.rfind('.').map(|i| (i, 1));
    let colons = path.rfind("::").map(|i| (i, 2));
    match dot.max(colons) {
        Some((i, width)) => (Some(&path[..i]), &path[i + width..]),
        None => (None, path),
    }
}

fn path_segments(text: &str) -> Vec<String> {
    compact(text)
        .split("::")
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn clean_binding_name(text: &str) -> String {
    text.trim()
        .trim_start_matches("mut ")
        .trim_start_matches('&')
        .trim()
        .to_string()
}

/// Reduce a written type to the name used for class lookup:
/// `&mut Box<Foo>` is `Box`, `*Server` is `Server`, `crate::a::Bar` is `Bar`,
/// `pkg.Type` stays `pkg.Type`.
pub fn normalize_type(text: &str) -> String {
    let mut t = text.trim().trim_start_matches(':').trim();
    loop {
        let next = t
            .trim_start_matches('&')
            .trim_start_matches('*')
            .trim_start_matches("mut ")
            .trim_start_matches("dyn ")
            .trim_start_matches("impl ")
            .trim_start_matches("const ")
            .trim_start_matches("readonly ")
            .trim_start();
        if next == t {
            break;
        }
        t = next;
    }
    let end = t
        .find(|c: char| matches!(c, '<' | '[' | '(' | '{' | '|' | ',' | ' ' | '?'))
        .unwrap_or(t.len());
    let base = &t[..end];
    base.rsplit("::").next().unwrap_or(base).trim().to_string()
}

fn clean_type_annotation(text: &str) -> String {
    text.trim()
        .trim_start_matches(':')
        .trim_start_matches("->")
        .trim_start_matches("extends ")
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_quotes(text: &str) -> &str {
    text.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

fn clean_string_literal(text: &str) -> Option<String> {
    let t = text
        .trim()
        .trim_start_matches(|c: char| matches!(c, 'r' | 'R' | 'b' | 'B' | 'u' | 'U' | 'f' | 'F'));
    let t = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|q| t.strip_prefix(q).and_then(|s| s.strip_suffix(q)))
        .unwrap_or(t)
        .trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn clean_comment(text: &str) -> String {
    text.lines()
        .map(|line| {
            let l = line.trim();
            let l = ["///", "//!", "//", "/**", "/*", "#"]
                .iter()
                .find_map(|p| l.strip_prefix(p))
                .unwrap_or(l);
            let l = l.trim_end_matches("*/").trim();
            l.strip_prefix('*').unwrap_or(l).trim().to_string()
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::Language;
    use crate::syntax::SyntaxParser;

    fn extract(source: &str, language: Language, path: &str) -> FileExtraction {
        let tree = SyntaxParser::new().parse(source, language).unwrap();
        EntityExtractor::new("repo").extract(&tree, path)
    }

    fn find<'a>(ext: &'a FileExtraction, qualified: &str) -> &'a Entity {
        ext.entities
            .iter()
            .find(|e| e.qualified_name == qualified)
            .unwrap_or_else(|| panic!("no entity {}", qualified))
    }

    fn calls_named<'a>(ext: &'a FileExtraction, name: &str) -> Vec<&'a CallInfo> {
        ext.calls.iter().filter(|c| c.name == name).collect()
    }

    #[test]
    fn test_python_functions_and_classes() {
        let src = "\
class Outer:
    class Inner:
        def method(self):
            \"\"\"Does things.\"\"\"
            return 1

def foo(x: int) -> str:
    return bar(x)
";
        let ext = extract(src, Language::Python, "pkg/mod.py");
        let inner = find(&ext, "Outer.Inner");
        assert_eq!(inner.id, "repo:pkg/mod.py:Outer.Inner");
        assert_eq!(inner.parent.as_deref(), Some("repo:pkg/mod.py:Outer"));

        let method = find(&ext, "Outer.Inner.method");
        assert_eq!(method.class_name.as_deref(), Some("Outer.Inner"));
        assert_eq!(method.parent.as_deref(), Some("repo:pkg/mod.py:Outer.Inner"));
        assert_eq!(method.docstring.as_deref(), Some("Does things."));

        let foo = find(&ext, "foo");
        assert_eq!(foo.return_type.as_deref(), Some("str"));
        assert_eq!(foo.signature.as_deref(), Some("def foo(x: int) -> str"));
        assert!(foo.parent.is_none());

        let bar = calls_named(&ext, "bar");
        assert_eq!(bar.len(), 1);
        assert_eq!(bar[0].caller, "repo:pkg/mod.py:foo");
        assert_eq!(bar[0].line, 8);
    }

    #[test]
    fn test_decorator_base_name_is_structural() {
        let src = "\
@mod.outer(inner(x, y))
def handler():
    pass
";
        let ext = extract(src, Language::Python, "a.py");
        let handler = find(&ext, "handler");
        assert_eq!(handler.decorators, vec!["mod.outer".to_string()]);

        let deco = ext
            .calls
            .iter()
            .find(|c| c.syntax == CallSyntax::Decorator)
            .unwrap();
        assert_eq!(deco.text, "mod.outer");
        assert_eq!(deco.name, "outer");
        assert_eq!(deco.receiver.as_deref(), Some("mod"));
        assert_eq!(deco.caller, "repo:a.py:handler");

        let inner = calls_named(&ext, "inner");
        assert_eq!(inner.len(), 1);
        assert!(inner[0].is_nested);
        assert_eq!(inner[0].caller, "repo:a.py");
    }

    #[test]
    fn test_python_flags() {
        let src = "\
class Service:
    def __init__(self):
        pass

    @staticmethod
    def build():
        pass

    async def fetch(self):
        pass

    def _helper(self):
        pass

    def __secret(self):
        pass
";
        let ext = extract(src, Language::Python, "s.py");
        assert!(find(&ext, "Service.__init__").flags.is_constructor);
        assert!(find(&ext, "Service.build").flags.is_static);
        let fetch = find(&ext, "Service.fetch");
        assert!(fetch.flags.is_async);
        assert!(fetch.decorators.is_empty());
        assert_eq!(find(&ext, "Service._helper").access, AccessModifier::Protected);
        assert_eq!(find(&ext, "Service.__secret").access, AccessModifier::Private);
        assert_eq!(find(&ext, "Service.__init__").access, AccessModifier::Public);
    }

    #[test]
    fn test_receiver_type_inference() {
        let src = "\
def foo():
    obj = Processor()
    obj.process()
    other.process()

class Processor:
    def run(self):
        self.process()
";
        let ext = extract(src, Language::Python, "a.py");
        let calls = calls_named(&ext, "process");
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].receiver_type.as_deref(), Some("Processor"));
        assert_eq!(calls[1].receiver.as_deref(), Some("other"));
        assert_eq!(calls[1].receiver_type, None);
        assert_eq!(calls[2].receiver_type.as_deref(), Some("Processor"));
        assert_eq!(calls[2].caller, "repo:a.py:Processor.run");
    }

    #[test]
    fn test_untyped_rebinding_drops_receiver_type() {
        let src = "\
def foo():
    obj = Processor()
    obj = make()
    obj.process()

def outer():
    obj = Processor()
    def inner(obj):
        obj.process()
    obj.process()
";
        let ext = extract(src, Language::Python, "a.py");
        let calls = calls_named(&ext, "process");
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].caller, "repo:a.py:foo");
        assert_eq!(calls[0].receiver_type, None);
        assert_eq!(calls[1].caller, "repo:a.py:outer.inner");
        assert_eq!(calls[1].receiver_type, None);
        assert_eq!(calls[2].caller, "repo:a.py:outer");
        assert_eq!(calls[2].receiver_type.as_deref(), Some("Processor"));
    }

    #[test]
    fn test_typed_parameter_replaces_outer_binding() {
        let src = "\
def outer():
    obj = Processor()
    def inner(obj: Reader):
        obj.process()
";
        let ext = extract(src, Language::Python, "a.py");
        let calls = calls_named(&ext, "process");
        assert_eq!(calls[0].receiver_type.as_deref(), Some("Reader"));
    }

    #[test]
    fn test_stacked_decorators_are_collected_once() {
        let ext = extract("@a.b(c(d))\n@e\ndef f():\n    pass\n", Language::Python, "a.py");
        assert_eq!(find(&ext, "f").decorators, vec!["a.b".to_string(), "e".to_string()]);
        let decorator_calls = ext.calls.iter().filter(|c| c.syntax == CallSyntax::Decorator).count();
        assert_eq!(decorator_calls, 2);
    }

    #[test]
    fn test_deep_nesting_runs_on_a_small_stack() {
        let depth = 1500;
        let src = format!("def f(x):\n    return {}x{}\n", "f(".repeat(depth), ")".repeat(depth));
        let handle = std::thread::Builder::new()
            .stack_size(512 * 1024)
            .spawn(move || {
                let ext = extract(&src, Language::Python, "deep.py");
                (ext.calls.len(), ext.calls.iter().all(|c| c.caller == "repo:deep.py:f"))
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), (depth, true));
    }

    #[test]
    fn test_chained_calls_have_depth() {
        let ext = extract("def f():\n    a().b().c()\n", Language::Python, "a.py");
        let depth = |name: &str| calls_named(&ext, name)[0].chain_depth;
        assert_eq!(depth("a"), 0);
        assert_eq!(depth("b"), 1);
        assert_eq!(depth("c"), 2);
        let c = calls_named(&ext, "c")[0];
        assert!(c.receiver_is_call);
        assert_eq!(c.receiver.as_deref(), Some("a().b()"));
        assert_eq!(c.receiver_type, None);
    }

    #[test]
    fn test_python_imports() {
        let src = "\
import os
import numpy as np
from . import utils
from ..pkg.mod import bar as baz, qux
from b import *
";
        let ext = extract(src, Language::Python, "x/y/a.py");
        assert_eq!(ext.imports.len(), 5);
        assert_eq!(ext.imports[0].module, "os");
        assert_eq!(ext.imports[1].module_alias.as_deref(), Some("np"));
        assert_eq!(ext.imports[2].module, ".");
        assert_eq!(ext.imports[2].names[0].name, "utils");
        assert_eq!(ext.imports[3].module, "..pkg.mod");
        assert_eq!(ext.imports[3].names[0].local(), "baz");
        assert_eq!(ext.imports[3].names[1].local(), "qux");
        assert!(ext.imports[4].is_wildcard);
    }

    #[test]
    fn test_duplicate_names_get_ordinal_suffix() {
        let ext = extract("def f():\n    pass\n\ndef f():\n    pass\n", Language::Python, "a.py");
        let ids: Vec<&str> = ext.entities.iter().map(|e| e.qualified_name.as_str()).collect();
        assert_eq!(ids, vec!["f", "f#2"]);
    }

    #[test]
    fn test_nested_function_qualified_name() {
        let ext = extract("def outer():\n    def inner():\n        pass\n    inner()\n", Language::Python, "a.py");
        let inner = find(&ext, "outer.inner");
        assert_eq!(inner.parent.as_deref(), Some("repo:a.py:outer"));
        assert_eq!(calls_named(&ext, "inner")[0].caller, "repo:a.py:outer");
    }

    #[test]
    fn test_javascript_entities_and_new() {
        let src = "\
import { helper as h } from './util';
// Builds widgets.
class Widget extends Base {
  constructor() { super(); }
  static create() { return new Widget(); }
  async load() { this.render(); }
}
const run = async () => { h(); };
";
        let ext = extract(src, Language::JavaScript, "src/w.js");
        let widget = find(&ext, "Widget");
        assert_eq!(widget.bases, vec!["Base".to_string()]);
        assert_eq!(widget.docstring.as_deref(), Some("Builds widgets."));
        assert!(find(&ext, "Widget.constructor").flags.is_constructor);
        assert!(find(&ext, "Widget.create").flags.is_static);
        assert!(find(&ext, "Widget.load").flags.is_async);
        assert!(find(&ext, "run").flags.is_async);

        let new_call = ext.calls.iter().find(|c| c.syntax == CallSyntax::New).unwrap();
        assert_eq!(new_call.name, "Widget");
        let render = calls_named(&ext, "render")[0];
        assert_eq!(render.receiver_type.as_deref(), Some("Widget"));

        assert_eq!(ext.imports[0].module, "./util");
        assert_eq!(ext.imports[0].names[0].local(), "h");
    }

    #[test]
    fn test_typescript_interfaces_and_access() {
        let src = "\
interface Shape { area(): number; }
class Circle implements Shape {
  private radius: number = 1;
  private compute(): number { return 1; }
  area(): number { return this.compute(); }
}
";
        let ext = extract(src, Language::TypeScript, "c.ts");
        let shape = find(&ext, "Shape");
        assert!(shape.flags.is_interface);
        assert!(find(&ext, "Shape.area").flags.is_abstract);
        let circle = find(&ext, "Circle");
        assert_eq!(circle.implements, vec!["Shape".to_string()]);
        assert_eq!(find(&ext, "Circle.compute").access, AccessModifier::Private);
        assert_eq!(find(&ext, "Circle.area").return_type.as_deref(), Some("number"));
    }

    #[test]
    fn test_go_methods_attach_to_receiver_type() {
        let src = "\
package main

import (
\t\"fmt\"
\tdb \"example.com/app/internal/db\"
)

type Server struct{}

func NewServer() *Server { return &Server{} }

func (s *Server) Run() {
\tfmt.Println(\"x\")
\ts.stop()
}

func (s *Server) stop() {}
";
        let ext = extract(src, Language::Go, "main.go");
        let run = find(&ext, "Server.Run");
        assert_eq!(run.parent.as_deref(), Some("repo:main.go:Server"));
        assert_eq!(run.class_name.as_deref(), Some("Server"));
        assert_eq!(run.access, AccessModifier::Public);
        assert_eq!(find(&ext, "Server.stop").access, AccessModifier::Package);
        assert!(find(&ext, "NewServer").flags.is_constructor);

        let stop = calls_named(&ext, "stop")[0];
        assert_eq!(stop.receiver_type.as_deref(), Some("Server"));

        assert_eq!(ext.imports.len(), 2);
        assert_eq!(ext.imports[0].module, "fmt");
        assert_eq!(ext.imports[0].module_alias.as_deref(), Some("fmt"));
        assert_eq!(ext.imports[1].module_alias.as_deref(), Some("db"));
    }

    #[test]
    fn test_rust_impl_and_use() {
        let src = "\
use crate::graph::{CodeGraph, Edge as GraphEdge};
use std::collections::HashMap;

/// A store.
pub struct Store {}

impl Store {
    pub fn new() -> Self { Store {} }
    fn helper(&self) {}
    pub async fn load(&self) { self.helper(); Store::new(); }
}

impl Default for Store {
    fn default() -> Self { Self::new() }
}
";
        let ext = extract(src, Language::Rust, "src/store.rs");
        let store = find(&ext, "Store");
        assert_eq!(store.docstring.as_deref(), Some("A store."));
        assert_eq!(store.implements, vec!["Default".to_string()]);
        assert_eq!(store.access, AccessModifier::Public);

        let new = find(&ext, "Store.new");
        assert_eq!(new.parent.as_deref(), Some("repo:src/store.rs:Store"));
        assert!(new.flags.is_static);
        assert!(new.flags.is_constructor);
        assert_eq!(find(&ext, "Store.helper").access, AccessModifier::Private);
        assert!(find(&ext, "Store.load").flags.is_async);
        assert_eq!(find(&ext, "Store.default").access, AccessModifier::Public);

        let helper = calls_named(&ext, "helper")[0];
        assert_eq!(helper.receiver_type.as_deref(), Some("Store"));
        let news = calls_named(&ext, "new");
        assert!(news.iter().all(|c| c.syntax == CallSyntax::Path));
        assert!(news.iter().all(|c| c.receiver_type.as_deref() == Some("Store")));

        let modules: Vec<(&str, &str)> = ext
            .imports
            .iter()
            .map(|i| (i.module.as_str(), i.names[0].local()))
            .collect();
        assert_eq!(
            modules,
            vec![
                ("crate::graph", "CodeGraph"),
                ("crate::graph", "GraphEdge"),
                ("std::collections", "HashMap"),
            ]
        );
    }

    #[test]
    fn test_java_classes() {
        let src = "\
import java.util.List;
import com.acme.Repo;

public class UserService extends BaseService implements Service {
    private Repo repo;

    public UserService() {}

    @Override
    public void save(User user) {
        Repo r = new Repo();
        r.store(user);
        helper();
    }

    private static void helper() {}
}
";
        let ext = extract(src, Language::Java, "src/main/java/com/acme/UserService.java");
        let class = find(&ext, "UserService");
        assert_eq!(class.bases, vec!["BaseService".to_string()]);
        assert_eq!(class.implements, vec!["Service".to_string()]);
        assert!(find(&ext, "UserService.UserService").flags.is_constructor);

        let save = find(&ext, "UserService.save");
        assert_eq!(save.decorators, vec!["Override".to_string()]);
        assert_eq!(save.access, AccessModifier::Public);
        assert_eq!(save.return_type.as_deref(), Some("void"));
        let helper = find(&ext, "UserService.helper");
        assert!(helper.flags.is_static);
        assert_eq!(helper.access, AccessModifier::Private);

        let store = calls_named(&ext, "store")[0];
        assert_eq!(store.receiver_type.as_deref(), Some("Repo"));
        assert_eq!(ext.imports[1].module, "com.acme");
        assert_eq!(ext.imports[1].names[0].name, "Repo");
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let src = "def a():\n    b()\n\ndef b():\n    a()\n";
        assert_eq!(
            extract(src, Language::Python, "a.py"),
            extract(src, Language::Python, "a.py")
        );
    }

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("&mut Box<Foo>"), "Box");
        assert_eq!(normalize_type("*Server"), "Server");
        assert_eq!(normalize_type("crate::a::Bar"), "Bar");
        assert_eq!(normalize_type(": Foo | null"), "Foo");
        assert_eq!(normalize_type("pkg.Type"), "pkg.Type");
        assert_eq!(normalize_type("List[int]"), "List");
    }

    #[test]
    fn test_split_last_segment() {
        assert_eq!(split_last_segment("mod.outer"), (Some("mod"), "outer"));
        assert_eq!(split_last_segment("a::b::c"), (Some("a::b"), "c"));
        assert_eq!(split_last_segment("plain"), (None, "plain"));
    }
}
