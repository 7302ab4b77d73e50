//! Per-language rule tables.
//!
//! Extraction and import resolution are driven entirely by the
//! [`LanguageRules`] registered for a [`Language`]: node kinds, field names
//! and naming conventions. Adding a language means adding a rule set here,
//! not new control flow in the extractor.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::entity::CallSyntax;

/// Supported source languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    /// TypeScript with JSX syntax
    Tsx,
    Go,
    Rust,
    Java,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Tsx,
        Language::Go,
        Language::Rust,
        Language::Java,
    ];

    pub fn name(&self) -> &'static str {
        self.rules().name
    }

    /// Detect language from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Language> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.rules().extensions.contains(&ext))
    }

    /// Detect language from a path.
    pub fn from_path(path: &Path) -> Option<Language> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Language::from_extension)
    }

    /// Tree-sitter grammar for this language.
    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
        }
    }

    pub fn rules(&self) -> &'static LanguageRules {
        match self {
            Language::Python => &PYTHON,
            Language::JavaScript => &JAVASCRIPT,
            Language::TypeScript => &TYPESCRIPT,
            Language::Tsx => &TSX,
            Language::Go => &GO,
            Language::Rust => &RUST,
            Language::Java => &JAVA,
        }
    }

    /// Every extension handled by some language.
    pub fn all_extensions() -> Vec<&'static str> {
        Language::ALL
            .iter()
            .flat_map(|lang| lang.rules().extensions.iter().copied())
            .collect()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Directories never walked when scanning a repository.
pub const IGNORED_DIRECTORIES: &[&str] = &[
    "node_modules",
    ".next",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    "target",
    "vendor",
    ".git",
    "dist",
    "build",
    "out",
    "coverage",
    ".mypy_cache",
    ".pytest_cache",
    ".tox",
    ".idea",
    ".vscode",
    ".ragnar",
];

/// Hidden directories that are still indexed.
pub const ALLOWED_HIDDEN_DIRECTORIES: &[&str] = &[".github", ".gitlab"];

/// Whether a directory name should be skipped during a scan.
pub fn is_ignored_dir(name: &str) -> bool {
    IGNORED_DIRECTORIES.contains(&name)
        || (name.starts_with('.') && name.len() > 1 && !ALLOWED_HIDDEN_DIRECTORIES.contains(&name))
}

/// A call node and where its callee lives.
#[derive(Debug, Clone, Copy)]
pub struct CallRule {
    pub kind: &'static str,
    /// Field holding the whole callee expression
    pub callee_field: Option<&'static str>,
    /// Field holding just the called name (Java `method_invocation`)
    pub name_field: Option<&'static str>,
    /// Field holding the receiver when the name is split out
    pub receiver_field: Option<&'static str>,
    pub syntax: CallSyntax,
}

/// A `object.property` or `Path::name` expression.
#[derive(Debug, Clone, Copy)]
pub struct MemberRule {
    pub kind: &'static str,
    pub object_field: &'static str,
    pub property_field: &'static str,
}

/// A function value bound to a name (`const f = () => {}`).
#[derive(Debug, Clone, Copy)]
pub struct BoundFunctionRule {
    pub kind: &'static str,
    pub name_field: &'static str,
    pub value_field: &'static str,
    pub value_kinds: &'static [&'static str],
}

/// A block that attaches methods to a type declared elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct ImplRule {
    pub kind: &'static str,
    pub type_field: &'static str,
    pub trait_field: Option<&'static str>,
}

/// A local variable declaration used to infer receiver types.
#[derive(Debug, Clone, Copy)]
pub struct BindingRule {
    pub kind: &'static str,
    /// Child holding name and value (Java `variable_declarator`)
    pub declarator_field: Option<&'static str>,
    pub name_field: &'static str,
    pub type_field: Option<&'static str>,
    pub value_field: Option<&'static str>,
}

/// A typed parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamRule {
    pub kind: &'static str,
    /// `None` means the first identifier child
    pub name_field: Option<&'static str>,
    pub type_field: &'static str,
}

/// Where base classes are listed, as a path of fields or child kinds.
#[derive(Debug, Clone, Copy)]
pub struct BaseRule {
    pub path: &'static [&'static str],
    pub implements: bool,
}

/// How decorators/annotations/attributes attach to definitions.
#[derive(Debug, Clone, Copy)]
pub struct DecoratorRule {
    pub kinds: &'static [&'static str],
    /// Wrapper nodes holding decorators next to the definition
    pub wrapper_kinds: &'static [&'static str],
    /// Decorator application is a call site
    pub is_call: bool,
}

/// Visibility convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// `_protected`, `__private`
    Underscore,
    /// `#private` members
    HashPrivate,
    /// `public` / `private` / `protected` accessibility modifier nodes
    Accessibility,
    /// Exported when capitalized
    Capitalized,
    /// `pub` visibility modifier
    PubModifier,
    /// Java-style modifier keywords, package-private by default
    Modifiers,
}

/// Which plain call sites count as constructor calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructorConvention {
    /// `Foo()` with a capitalized name
    Capitalized,
    /// Only explicit `new Foo()`
    NewKeyword,
    /// Factory functions such as `NewServer()`
    Prefixed(&'static [&'static str]),
    /// Associated functions `Foo::new()` / `Foo::new_with()`
    AssociatedNew,
}

/// Where documentation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStyle {
    /// First string statement of the body
    FirstString,
    /// Comment block right above the definition
    LeadingComments,
}

/// Import statement grammar family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStyle {
    Python,
    EcmaScript,
    Go,
    Rust,
    Java,
}

/// How import specifiers map onto repository files.
#[derive(Debug, Clone, Copy)]
pub struct ImportRules {
    pub style: ImportStyle,
    /// Module path separator in specifiers
    pub separator: &'static str,
    /// Top-level modules of the standard library
    pub stdlib: &'static [&'static str],
    /// Specifier prefixes that always denote the standard library
    pub stdlib_prefixes: &'static [&'static str],
    /// Directories tried for absolute specifiers
    pub search_roots: &'static [&'static str],
    /// File suffixes tried for a module path (`{path}.py`, `{path}/__init__.py`)
    pub module_files: &'static [&'static str],
}

/// The complete rule set for one language.
#[derive(Debug)]
pub struct LanguageRules {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub function_kinds: &'static [&'static str],
    pub class_kinds: &'static [&'static str],
    pub interface_kinds: &'static [&'static str],
    /// Class kinds only count when this field holds one of these kinds
    pub class_type_filter: Option<(&'static str, &'static [&'static str])>,
    pub bound_functions: &'static [BoundFunctionRule],
    pub impl_blocks: &'static [ImplRule],
    /// Method receiver field (`func (s *Server) Run()`)
    pub receiver_field: Option<&'static str>,
    pub calls: &'static [CallRule],
    pub members: &'static [MemberRule],
    pub scoped_paths: &'static [MemberRule],
    /// Wrappers around a callee that only add type arguments
    pub callee_wrappers: &'static [(&'static str, &'static str)],
    pub argument_kinds: &'static [&'static str],
    pub decorators: DecoratorRule,
    pub import_kinds: &'static [&'static str],
    pub imports: ImportRules,
    pub bindings: &'static [BindingRule],
    pub parameters: &'static [ParamRule],
    /// Expression kinds that just wrap the interesting value
    pub value_wrappers: &'static [&'static str],
    /// Literal kinds whose field names their type (`Foo{}`)
    pub literal_types: &'static [(&'static str, &'static str)],
    pub bases: &'static [BaseRule],
    pub self_names: &'static [&'static str],
    pub visibility: Visibility,
    pub constructor_calls: ConstructorConvention,
    /// Method names that construct their class
    pub constructor_names: &'static [&'static str],
    /// A method named like its class is a constructor
    pub constructor_matches_class: bool,
    pub static_decorators: &'static [&'static str],
    pub abstract_decorators: &'static [&'static str],
    /// Nodes whose tokens are modifiers (`modifiers`, `function_modifiers`)
    pub modifier_kinds: &'static [&'static str],
    /// Methods without this parameter kind are static
    pub self_parameter_kind: Option<&'static str>,
    /// Class members are visible unqualified inside methods
    pub class_members_in_scope: bool,
    pub docstrings: DocStyle,
    pub comment_kinds: &'static [&'static str],
    pub body_field: &'static str,
    pub parameters_field: &'static str,
    pub return_type_field: Option<&'static str>,
}

impl LanguageRules {
    pub fn call_rule(&self, kind: &str) -> Option<&CallRule> {
        self.calls.iter().find(|r| r.kind == kind)
    }

    pub fn member_rule(&self, kind: &str) -> Option<&MemberRule> {
        self.members.iter().find(|r| r.kind == kind)
    }

    pub fn scoped_path_rule(&self, kind: &str) -> Option<&MemberRule> {
        self.scoped_paths.iter().find(|r| r.kind == kind)
    }

    pub fn is_function(&self, kind: &str) -> bool {
        self.function_kinds.contains(&kind)
    }

    pub fn is_class(&self, kind: &str) -> bool {
        self.class_kinds.contains(&kind)
    }

    pub fn is_decorator(&self, kind: &str) -> bool {
        self.decorators.kinds.contains(&kind)
    }

    pub fn is_self(&self, text: &str) -> bool {
        self.self_names.contains(&text)
    }

    /// Whether `name` is conventionally a constructor when called plainly.
    pub fn looks_like_constructor(&self, name: &str) -> bool {
        match self.constructor_calls {
            ConstructorConvention::Capitalized => starts_uppercase(name),
            ConstructorConvention::NewKeyword => false,
            ConstructorConvention::Prefixed(prefixes) => prefixed_type(name, prefixes).is_some(),
            ConstructorConvention::AssociatedNew => name == "new" || name.starts_with("new_"),
        }
    }

    /// Type constructed by a factory call, when the convention names it.
    pub fn constructed_type<'a>(&self, name: &'a str) -> Option<&'a str> {
        match self.constructor_calls {
            ConstructorConvention::Capitalized if starts_uppercase(name) => Some(name),
            ConstructorConvention::Prefixed(prefixes) => prefixed_type(name, prefixes),
            _ => None,
        }
    }
}

pub(crate) fn starts_uppercase(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

fn prefixed_type<'a>(name: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes.iter().find_map(|p| {
        name.strip_prefix(p)
            .filter(|rest| starts_uppercase(rest))
    })
}

const PLAIN: CallSyntax = CallSyntax::Plain;

static PYTHON: LanguageRules = LanguageRules {
    name: "python",
    extensions: &["py", "pyw"],
    function_kinds: &["function_definition"],
    class_kinds: &["class_definition"],
    interface_kinds: &[],
    class_type_filter: None,
    bound_functions: &[],
    impl_blocks: &[],
    receiver_field: None,
    calls: &[CallRule {
        kind: "call",
        callee_field: Some("function"),
        name_field: None,
        receiver_field: None,
        syntax: PLAIN,
    }],
    members: &[MemberRule {
        kind: "attribute",
        object_field: "object",
        property_field: "attribute",
    }],
    scoped_paths: &[],
    callee_wrappers: &[],
    argument_kinds: &["argument_list"],
    decorators: DecoratorRule {
        kinds: &["decorator"],
        wrapper_kinds: &["decorated_definition"],
        is_call: true,
    },
    import_kinds: &["import_statement", "import_from_statement"],
    imports: ImportRules {
        style: ImportStyle::Python,
        separator: ".",
        stdlib: &[
            "os", "sys", "re", "json", "logging", "pathlib", "typing", "collections",
            "itertools", "functools", "dataclasses", "abc", "hashlib", "datetime", "time",
            "unittest", "asyncio", "enum", "copy", "io", "tempfile", "shutil", "glob",
            "subprocess", "math", "random", "threading", "argparse", "contextlib", "uuid",
            "string", "struct", "socket", "pickle", "inspect", "traceback", "warnings",
            "weakref", "operator", "base64", "csv", "http", "urllib", "queue", "signal",
            "textwrap", "decimal", "fractions", "statistics", "concurrent", "multiprocessing",
            "sqlite3", "xml", "email", "platform", "getpass", "secrets", "pprint", "heapq",
            "bisect", "array", "types", "builtins", "__future__",
        ],
        stdlib_prefixes: &[],
        search_roots: &["", "src/"],
        module_files: &[".py", "/__init__.py"],
    },
    bindings: &[BindingRule {
        kind: "assignment",
        declarator_field: None,
        name_field: "left",
        type_field: Some("type"),
        value_field: Some("right"),
    }],
    parameters: &[
        ParamRule {
            kind: "typed_parameter",
            name_field: None,
            type_field: "type",
        },
        ParamRule {
            kind: "typed_default_parameter",
            name_field: Some("name"),
            type_field: "type",
        },
    ],
    value_wrappers: &["parenthesized_expression", "await"],
    literal_types: &[],
    bases: &[BaseRule {
        path: &["superclasses"],
        implements: false,
    }],
    self_names: &["self", "cls"],
    visibility: Visibility::Underscore,
    constructor_calls: ConstructorConvention::Capitalized,
    constructor_names: &["__init__", "__new__"],
    constructor_matches_class: false,
    static_decorators: &["staticmethod", "classmethod"],
    abstract_decorators: &["abstractmethod", "abc.abstractmethod"],
    modifier_kinds: &[],
    self_parameter_kind: None,
    class_members_in_scope: false,
    docstrings: DocStyle::FirstString,
    comment_kinds: &["comment"],
    body_field: "body",
    parameters_field: "parameters",
    return_type_field: Some("return_type"),
};

const ECMA_CALLS: &[CallRule] = &[
    CallRule {
        kind: "call_expression",
        callee_field: Some("function"),
        name_field: None,
        receiver_field: None,
        syntax: PLAIN,
    },
    CallRule {
        kind: "new_expression",
        callee_field: Some("constructor"),
        name_field: None,
        receiver_field: None,
        syntax: CallSyntax::New,
    },
];

const ECMA_MEMBERS: &[MemberRule] = &[MemberRule {
    kind: "member_expression",
    object_field: "object",
    property_field: "property",
}];

const ECMA_BOUND_FUNCTIONS: &[BoundFunctionRule] = &[
    BoundFunctionRule {
        kind: "variable_declarator",
        name_field: "name",
        value_field: "value",
        value_kinds: &[
            "arrow_function",
            "function_expression",
            "function",
            "generator_function",
        ],
    },
    BoundFunctionRule {
        kind: "public_field_definition",
        name_field: "name",
        value_field: "value",
        value_kinds: &["arrow_function", "function_expression", "function"],
    },
    BoundFunctionRule {
        kind: "field_definition",
        name_field: "property",
        value_field: "value",
        value_kinds: &["arrow_function", "function_expression", "function"],
    },
];

const ECMA_IMPORTS: ImportRules = ImportRules {
    style: ImportStyle::EcmaScript,
    separator: "/",
    stdlib: &[
        "fs", "path", "http", "https", "os", "crypto", "url", "util", "events", "stream",
        "child_process", "assert", "buffer", "zlib", "net", "readline", "worker_threads",
        "cluster", "dns", "querystring", "timers", "tty", "vm", "process",
    ],
    stdlib_prefixes: &["node:"],
    search_roots: &[""],
    module_files: &[
        ".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", "/index.ts", "/index.tsx", "/index.js",
        "/index.jsx",
    ],
};

const ECMA_BINDINGS: &[BindingRule] = &[BindingRule {
    kind: "variable_declarator",
    declarator_field: None,
    name_field: "name",
    type_field: Some("type"),
    value_field: Some("value"),
}];

static JAVASCRIPT: LanguageRules = LanguageRules {
    name: "javascript",
    extensions: &["js", "jsx", "mjs", "cjs"],
    function_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
    ],
    class_kinds: &["class_declaration", "class"],
    interface_kinds: &[],
    class_type_filter: None,
    bound_functions: ECMA_BOUND_FUNCTIONS,
    impl_blocks: &[],
    receiver_field: None,
    calls: ECMA_CALLS,
    members: ECMA_MEMBERS,
    scoped_paths: &[],
    callee_wrappers: &[],
    argument_kinds: &["arguments"],
    decorators: DecoratorRule {
        kinds: &["decorator"],
        wrapper_kinds: &[],
        is_call: true,
    },
    import_kinds: &["import_statement"],
    imports: ECMA_IMPORTS,
    bindings: ECMA_BINDINGS,
    parameters: &[],
    value_wrappers: &["parenthesized_expression", "await_expression"],
    literal_types: &[],
    bases: &[BaseRule {
        path: &["class_heritage"],
        implements: false,
    }],
    self_names: &["this"],
    visibility: Visibility::HashPrivate,
    constructor_calls: ConstructorConvention::NewKeyword,
    constructor_names: &["constructor"],
    constructor_matches_class: false,
    static_decorators: &[],
    abstract_decorators: &[],
    modifier_kinds: &[],
    self_parameter_kind: None,
    class_members_in_scope: false,
    docstrings: DocStyle::LeadingComments,
    comment_kinds: &["comment"],
    body_field: "body",
    parameters_field: "parameters",
    return_type_field: None,
};

macro_rules! typescript_rules {
    ($name:expr, $exts:expr) => {
        LanguageRules {
            name: $name,
            extensions: $exts,
            function_kinds: &[
                "function_declaration",
                "generator_function_declaration",
                "method_definition",
                "method_signature",
                "abstract_method_signature",
                "function_signature",
            ],
            class_kinds: &[
                "class_declaration",
                "abstract_class_declaration",
                "interface_declaration",
                "class",
            ],
            interface_kinds: &["interface_declaration"],
            class_type_filter: None,
            bound_functions: ECMA_BOUND_FUNCTIONS,
            impl_blocks: &[],
            receiver_field: None,
            calls: ECMA_CALLS,
            members: ECMA_MEMBERS,
            scoped_paths: &[],
            callee_wrappers: &[],
            argument_kinds: &["arguments"],
            decorators: DecoratorRule {
                kinds: &["decorator"],
                wrapper_kinds: &[],
                is_call: true,
            },
            import_kinds: &["import_statement"],
            imports: ECMA_IMPORTS,
            bindings: ECMA_BINDINGS,
            parameters: &[
                ParamRule {
                    kind: "required_parameter",
                    name_field: Some("pattern"),
                    type_field: "type",
                },
                ParamRule {
                    kind: "optional_parameter",
                    name_field: Some("pattern"),
                    type_field: "type",
                },
            ],
            value_wrappers: &[
                "parenthesized_expression",
                "await_expression",
                "as_expression",
                "non_null_expression",
            ],
            literal_types: &[],
            bases: &[
                BaseRule {
                    path: &["class_heritage", "extends_clause"],
                    implements: false,
                },
                BaseRule {
                    path: &["class_heritage", "implements_clause"],
                    implements: true,
                },
                BaseRule {
                    path: &["extends_type_clause"],
                    implements: false,
                },
            ],
            self_names: &["this"],
            visibility: Visibility::Accessibility,
            constructor_calls: ConstructorConvention::NewKeyword,
            constructor_names: &["constructor"],
            constructor_matches_class: false,
            static_decorators: &[],
            abstract_decorators: &[],
            modifier_kinds: &[],
            self_parameter_kind: None,
            class_members_in_scope: false,
            docstrings: DocStyle::LeadingComments,
            comment_kinds: &["comment"],
            body_field: "body",
            parameters_field: "parameters",
            return_type_field: Some("return_type"),
        }
    };
}

static TYPESCRIPT: LanguageRules = typescript_rules!("typescript", &["ts", "mts", "cts"]);
static TSX: LanguageRules = typescript_rules!("tsx", &["tsx"]);

static GO: LanguageRules = LanguageRules {
    name: "go",
    extensions: &["go"],
    function_kinds: &["function_declaration", "method_declaration"],
    class_kinds: &["type_spec"],
    interface_kinds: &[],
    class_type_filter: Some(("type", &["struct_type", "interface_type"])),
    bound_functions: &[],
    impl_blocks: &[],
    receiver_field: Some("receiver"),
    calls: &[CallRule {
        kind: "call_expression",
        callee_field: Some("function"),
        name_field: None,
        receiver_field: None,
        syntax: PLAIN,
    }],
    members: &[MemberRule {
        kind: "selector_expression",
        object_field: "operand",
        property_field: "field",
    }],
    scoped_paths: &[],
    callee_wrappers: &[],
    argument_kinds: &["argument_list"],
    decorators: DecoratorRule {
        kinds: &[],
        wrapper_kinds: &[],
        is_call: false,
    },
    import_kinds: &["import_declaration"],
    imports: ImportRules {
        style: ImportStyle::Go,
        separator: "/",
        stdlib: &[
            "fmt", "os", "io", "net", "sync", "context", "strings", "strconv", "time", "errors",
            "bytes", "bufio", "encoding", "path", "sort", "math", "regexp", "testing", "log",
            "flag", "reflect", "runtime", "unicode", "crypto", "hash", "html", "text", "mime",
            "archive", "compress", "container", "database", "debug", "embed", "go", "image",
            "index", "plugin", "slices", "maps", "cmp", "iter", "unsafe", "syscall",
        ],
        stdlib_prefixes: &[],
        search_roots: &["", "pkg/", "internal/", "cmd/"],
        module_files: &[".go", "/main.go"],
    },
    bindings: &[
        BindingRule {
            kind: "short_var_declaration",
            declarator_field: None,
            name_field: "left",
            type_field: None,
            value_field: Some("right"),
        },
        BindingRule {
            kind: "var_spec",
            declarator_field: None,
            name_field: "name",
            type_field: Some("type"),
            value_field: Some("value"),
        },
    ],
    parameters: &[ParamRule {
        kind: "parameter_declaration",
        name_field: Some("name"),
        type_field: "type",
    }],
    value_wrappers: &["expression_list", "unary_expression", "parenthesized_expression"],
    literal_types: &[("composite_literal", "type")],
    bases: &[],
    self_names: &[],
    visibility: Visibility::Capitalized,
    constructor_calls: ConstructorConvention::Prefixed(&["New", "Make"]),
    constructor_names: &[],
    constructor_matches_class: false,
    static_decorators: &[],
    abstract_decorators: &[],
    modifier_kinds: &[],
    self_parameter_kind: None,
    class_members_in_scope: false,
    docstrings: DocStyle::LeadingComments,
    comment_kinds: &["comment"],
    body_field: "body",
    parameters_field: "parameters",
    return_type_field: Some("result"),
};

static RUST: LanguageRules = LanguageRules {
    name: "rust",
    extensions: &["rs"],
    function_kinds: &["function_item", "function_signature_item"],
    class_kinds: &["struct_item", "enum_item", "trait_item", "union_item"],
    interface_kinds: &["trait_item"],
    class_type_filter: None,
    bound_functions: &[],
    impl_blocks: &[ImplRule {
        kind: "impl_item",
        type_field: "type",
        trait_field: Some("trait"),
    }],
    receiver_field: None,
    calls: &[CallRule {
        kind: "call_expression",
        callee_field: Some("function"),
        name_field: None,
        receiver_field: None,
        syntax: PLAIN,
    }],
    members: &[MemberRule {
        kind: "field_expression",
        object_field: "value",
        property_field: "field",
    }],
    scoped_paths: &[MemberRule {
        kind: "scoped_identifier",
        object_field: "path",
        property_field: "name",
    }],
    callee_wrappers: &[("generic_function", "function")],
    argument_kinds: &["arguments"],
    decorators: DecoratorRule {
        kinds: &["attribute_item"],
        wrapper_kinds: &[],
        is_call: false,
    },
    import_kinds: &["use_declaration"],
    imports: ImportRules {
        style: ImportStyle::Rust,
        separator: "::",
        stdlib: &["std", "core", "alloc"],
        stdlib_prefixes: &[],
        search_roots: &[""],
        module_files: &[".rs", "/mod.rs"],
    },
    bindings: &[BindingRule {
        kind: "let_declaration",
        declarator_field: None,
        name_field: "pattern",
        type_field: Some("type"),
        value_field: Some("value"),
    }],
    parameters: &[ParamRule {
        kind: "parameter",
        name_field: Some("pattern"),
        type_field: "type",
    }],
    value_wrappers: &["reference_expression", "parenthesized_expression", "try_expression"],
    literal_types: &[("struct_expression", "name")],
    bases: &[],
    self_names: &["self", "Self"],
    visibility: Visibility::PubModifier,
    constructor_calls: ConstructorConvention::AssociatedNew,
    constructor_names: &["new"],
    constructor_matches_class: false,
    static_decorators: &[],
    abstract_decorators: &[],
    modifier_kinds: &["function_modifiers"],
    self_parameter_kind: Some("self_parameter"),
    class_members_in_scope: false,
    docstrings: DocStyle::LeadingComments,
    comment_kinds: &["line_comment", "block_comment"],
    body_field: "body",
    parameters_field: "parameters",
    return_type_field: Some("return_type"),
};

static JAVA: LanguageRules = LanguageRules {
    name: "java",
    extensions: &["java"],
    function_kinds: &["method_declaration", "constructor_declaration"],
    class_kinds: &[
        "class_declaration",
        "interface_declaration",
        "enum_declaration",
        "record_declaration",
    ],
    interface_kinds: &["interface_declaration"],
    class_type_filter: None,
    bound_functions: &[],
    impl_blocks: &[],
    receiver_field: None,
    calls: &[
        CallRule {
            kind: "method_invocation",
            callee_field: None,
            name_field: Some("name"),
            receiver_field: Some("object"),
            syntax: PLAIN,
        },
        CallRule {
            kind: "object_creation_expression",
            callee_field: Some("type"),
            name_field: None,
            receiver_field: None,
            syntax: CallSyntax::New,
        },
    ],
    members: &[MemberRule {
        kind: "field_access",
        object_field: "object",
        property_field: "field",
    }],
    scoped_paths: &[],
    callee_wrappers: &[],
    argument_kinds: &["argument_list"],
    decorators: DecoratorRule {
        kinds: &["marker_annotation", "annotation"],
        wrapper_kinds: &[],
        is_call: false,
    },
    import_kinds: &["import_declaration"],
    imports: ImportRules {
        style: ImportStyle::Java,
        separator: ".",
        stdlib: &[],
        stdlib_prefixes: &["java.", "javax.", "sun.", "jdk."],
        search_roots: &["", "src/", "src/main/java/", "src/test/java/"],
        module_files: &[".java"],
    },
    bindings: &[BindingRule {
        kind: "local_variable_declaration",
        declarator_field: Some("declarator"),
        name_field: "name",
        type_field: Some("type"),
        value_field: Some("value"),
    }],
    parameters: &[ParamRule {
        kind: "formal_parameter",
        name_field: Some("name"),
        type_field: "type",
    }],
    value_wrappers: &["parenthesized_expression", "cast_expression"],
    literal_types: &[],
    bases: &[
        BaseRule {
            path: &["superclass"],
            implements: false,
        },
        BaseRule {
            path: &["interfaces"],
            implements: true,
        },
        BaseRule {
            path: &["extends_interfaces"],
            implements: false,
        },
    ],
    self_names: &["this"],
    visibility: Visibility::Modifiers,
    constructor_calls: ConstructorConvention::NewKeyword,
    constructor_names: &[],
    constructor_matches_class: true,
    static_decorators: &[],
    abstract_decorators: &[],
    modifier_kinds: &["modifiers"],
    self_parameter_kind: None,
    class_members_in_scope: true,
    docstrings: DocStyle::LeadingComments,
    comment_kinds: &["line_comment", "block_comment"],
    body_field: "body",
    parameters_field: "parameters",
    return_type_field: Some("type"),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(Language::from_path(Path::new("a/b.py")), Some(Language::Python));
        assert_eq!(Language::from_path(Path::new("x.tsx")), Some(Language::Tsx));
        assert_eq!(Language::from_path(Path::new("x.ts")), Some(Language::TypeScript));
        assert_eq!(Language::from_path(Path::new("x.mjs")), Some(Language::JavaScript));
        assert_eq!(Language::from_path(Path::new("main.go")), Some(Language::Go));
        assert_eq!(Language::from_path(Path::new("lib.rs")), Some(Language::Rust));
        assert_eq!(Language::from_path(Path::new("A.java")), Some(Language::Java));
        assert_eq!(Language::from_path(Path::new("README.md")), None);
        assert_eq!(Language::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_ignored_dirs() {
        assert!(is_ignored_dir("node_modules"));
        assert!(is_ignored_dir(".cache"));
        assert!(!is_ignored_dir(".github"));
        assert!(!is_ignored_dir("src"));
    }

    #[test]
    fn test_constructor_conventions() {
        assert!(Language::Python.rules().looks_like_constructor("Foo"));
        assert!(!Language::Python.rules().looks_like_constructor("foo"));
        assert!(Language::Go.rules().looks_like_constructor("NewServer"));
        assert!(!Language::Go.rules().looks_like_constructor("Newline"));
        assert_eq!(Language::Go.rules().constructed_type("NewServer"), Some("Server"));
        assert!(Language::Rust.rules().looks_like_constructor("new_with"));
        assert!(!Language::JavaScript.rules().looks_like_constructor("Foo"));
    }

    #[test]
    fn test_every_language_has_grammar_and_rules() {
        for lang in Language::ALL {
            let rules = lang.rules();
            assert!(!rules.extensions.is_empty());
            assert!(!rules.function_kinds.is_empty());
            assert!(!rules.calls.is_empty());
            let mut parser = tree_sitter::Parser::new();
            assert!(parser.set_language(&lang.grammar()).is_ok(), "{}", lang);
        }
    }

    #[test]
    fn test_all_extensions() {
        let exts = Language::all_extensions();
        assert!(exts.contains(&"py"));
        assert!(exts.contains(&"java"));
    }
}
