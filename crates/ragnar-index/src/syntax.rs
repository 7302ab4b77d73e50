//! Syntax capability: source text in, concrete syntax tree out.
//!
//! The rest of the crate only needs two operations from the grammar engine:
//! [`SyntaxParser::parse`] and [`SyntaxTree::query`]. Both are implemented on
//! top of tree-sitter; a `query` pattern is a set of node kinds taken from the
//! language's rule table.

use thiserror::Error;
use tree_sitter::{Node, Parser, Tree};

use crate::languages::Language;

/// Malformed source. The file is kept out of the graph until it parses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unsupported language for {0}")]
    UnsupportedLanguage(String),

    #[error("Failed to load {language} grammar: {reason}")]
    Grammar { language: Language, reason: String },

    #[error("Parser produced no tree")]
    NoTree,

    #[error("Syntax error at line {line}, column {column}")]
    Syntax { line: usize, column: usize },
}

/// A parsed file.
pub struct SyntaxTree {
    tree: Tree,
    source: String,
    language: Language,
}

impl SyntaxTree {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Text covered by a node.
    pub fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    /// All nodes whose kind is in `kinds`, in document order.
    pub fn query(&self, kinds: &[&str]) -> Vec<Node<'_>> {
        let mut matches = Vec::new();
        if kinds.is_empty() {
            return matches;
        }
        let mut cursor = self.tree.walk();
        loop {
            let node = cursor.node();
            if kinds.contains(&node.kind()) {
                matches.push(node);
            }
            if cursor.goto_first_child() {
                continue;
            }
            loop {
                if cursor.goto_next_sibling() {
                    break;
                }
                if !cursor.goto_parent() {
                    return matches;
                }
            }
        }
    }
}

/// Stateless parser front end; a tree-sitter parser is created per call so
/// the value can be shared across blocking tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxParser;

impl SyntaxParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse source text, rejecting trees that contain syntax errors.
    pub fn parse(&self, source: impl Into<String>, language: Language) -> Result<SyntaxTree, ParseError> {
        let source = source.into();
        let mut parser = Parser::new();
        parser
            .set_language(&language.grammar())
            .map_err(|e| ParseError::Grammar {
                language,
                reason: e.to_string(),
            })?;

        let tree = parser.parse(&source, None).ok_or(ParseError::NoTree)?;
        let root = tree.root_node();
        if root.has_error() {
            let (line, column) = first_error(root)
                .map(|n| {
                    let p = n.start_position();
                    (p.row + 1, p.column + 1)
                })
                .unwrap_or((1, 1));
            return Err(ParseError::Syntax { line, column });
        }

        Ok(SyntaxTree {
            tree,
            source,
            language,
        })
    }
}

/// Locate the first ERROR or MISSING node, without recursion.
fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_python() {
        let tree = SyntaxParser::new()
            .parse("def foo():\n    return 1\n", Language::Python)
            .unwrap();
        assert_eq!(tree.root().kind(), "module");
        assert_eq!(tree.language(), Language::Python);
    }

    #[test]
    fn test_parse_error_reports_position() {
        let err = SyntaxParser::new()
            .parse("def foo(:\n    pass\n", Language::Python)
            .err()
            .unwrap();
        assert!(matches!(err, ParseError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_query_returns_document_order() {
        let tree = SyntaxParser::new()
            .parse("def a():\n    pass\n\ndef b():\n    pass\n", Language::Python)
            .unwrap();
        let names: Vec<&str> = tree
            .query(&["function_definition"])
            .into_iter()
            .filter_map(|n| n.child_by_field_name("name"))
            .map(|n| tree.text(n))
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_query_empty_pattern() {
        let tree = SyntaxParser::new().parse("x = 1\n", Language::Python).unwrap();
        assert!(tree.query(&[]).is_empty());
    }
}
