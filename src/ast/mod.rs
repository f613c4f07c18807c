/// AST (Abstract Syntax Tree) module
///
/// This module defines the AST data structures and parser for SLisp.
/// - AST node types (Node, Primitive)
/// - Source spans so diagnostics can point back into a fragment
/// - Parser to convert source text to AST
pub mod parser;

// Re-export the main types for convenience
pub use parser::{parse_fragment, parse_fragment_with_depth, ParseError, DEFAULT_MAX_DEPTH};

/// Byte range of a node inside the source it was parsed from.
///
/// Nodes built by hand (for example by a compile-time transform) use
/// `Span::default()`.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub enum Primitive {
    Number(i64),
    String(String),
}

#[derive(PartialEq, Debug, Clone)]
pub enum Node {
    List { root: Vec<Node>, span: Span },
    Vector { root: Vec<Node>, span: Span },
    Primitive { value: Primitive, span: Span },
    Symbol { value: String, span: Span },
}

impl Node {
    pub fn new_number(number: i64) -> Node {
        Node::Primitive {
            value: Primitive::Number(number),
            span: Span::default(),
        }
    }

    pub fn new_string(value: &str) -> Node {
        Node::Primitive {
            value: Primitive::String(value.to_string()),
            span: Span::default(),
        }
    }

    pub fn new_symbol(value: &str) -> Node {
        Node::Symbol {
            value: value.to_string(),
            span: Span::default(),
        }
    }

    pub fn new_list_from_raw(nodes: Vec<Node>) -> Node {
        Node::List {
            root: nodes,
            span: Span::default(),
        }
    }

    pub fn new_vector_from_raw(nodes: Vec<Node>) -> Node {
        Node::Vector {
            root: nodes,
            span: Span::default(),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Node::List { span, .. } | Node::Vector { span, .. } | Node::Primitive { span, .. } | Node::Symbol { span, .. } => *span,
        }
    }

    /// Symbol name if this node is a symbol
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Node::Symbol { value, .. } => Some(value.as_str()),
            _ => None,
        }
    }

    /// Number of nested lists and vectors down to the deepest leaf; atoms are 0.
    ///
    /// Walks with an explicit stack, so arbitrarily deep trees are measured
    /// without recursion.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1)];
        while let Some((node, level)) = pending.pop() {
            if let Node::List { root, .. } | Node::Vector { root, .. } = node {
                deepest = deepest.max(level);
                pending.extend(root.iter().map(|child| (child, level + 1)));
            }
        }
        deepest
    }

    /// Operator name if this node is a list whose head is a symbol
    pub fn head_symbol(&self) -> Option<&str> {
        match self {
            Node::List { root, .. } => root.first().and_then(Node::as_symbol),
            _ => None,
        }
    }
}
