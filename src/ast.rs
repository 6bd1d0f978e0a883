//! Abstract syntax tree
//!
//! Nodes live in an arena owned by [`Ast`] and refer to their children by
//! [`NodeId`]. Nodes are never mutated after construction; a parent's span
//! always covers its children's spans.

use crate::builtins::Constant;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Character span `[start, end)` in the source expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub start: usize,
    pub end: usize,
}

impl Position {
    pub fn new(start: usize, end: usize) -> Self {
        Position { start, end }
    }

    /// Whether `other` lies entirely inside this span
    pub fn contains(&self, other: &Position) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Index of a node inside its [`Ast`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOperator {
    pub fn from_symbol(symbol: &str) -> Option<BinaryOperator> {
        match symbol {
            "+" => Some(BinaryOperator::Add),
            "-" => Some(BinaryOperator::Sub),
            "*" => Some(BinaryOperator::Mul),
            "/" => Some(BinaryOperator::Div),
            "%" => Some(BinaryOperator::Mod),
            "^" => Some(BinaryOperator::Pow),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Pow => "^",
        }
    }

    /// Binding strength, shared by the parser and the pretty-printer
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOperator::Add | BinaryOperator::Sub => 1,
            BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod => 2,
            BinaryOperator::Pow => 3,
        }
    }

    pub fn is_right_associative(&self) -> bool {
        matches!(self, BinaryOperator::Pow)
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Unary operators: prefix `+`/`-`, postfix `!`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Plus,
    Minus,
    Factorial,
}

impl UnaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOperator::Plus => "+",
            UnaryOperator::Minus => "-",
            UnaryOperator::Factorial => "!",
        }
    }

    pub fn is_postfix(&self) -> bool {
        matches!(self, UnaryOperator::Factorial)
    }
}

/// Node payload
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Numeric literal; `raw` is the literal as written
    Number { value: f64, raw: String },
    Constant(Constant),
    Variable(String),
    UnaryOp {
        operator: UnaryOperator,
        operand: NodeId,
    },
    BinaryOp {
        operator: BinaryOperator,
        left: NodeId,
        right: NodeId,
    },
    FunctionCall { name: String, args: Vec<NodeId> },
    /// Row-major matrix literal (evaluation not implemented)
    Matrix { rows: Vec<Vec<NodeId>> },
    /// Complex literal `real + imaginary*i` (evaluation not implemented)
    Complex { real: NodeId, imaginary: NodeId },
}

impl NodeKind {
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Number { .. } | NodeKind::Constant(_) | NodeKind::Variable(_) => Vec::new(),
            NodeKind::UnaryOp { operand, .. } => vec![*operand],
            NodeKind::BinaryOp { left, right, .. } => vec![*left, *right],
            NodeKind::FunctionCall { args, .. } => args.clone(),
            NodeKind::Matrix { rows } => rows.iter().flatten().copied().collect(),
            NodeKind::Complex { real, imaginary } => vec![*real, *imaginary],
        }
    }
}

/// A node with its source span
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub position: Position,
}

/// Arena-backed syntax tree
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Ast {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn root_node(&self) -> &Node {
        self.node(self.root)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct children of a node, left to right
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).kind.children()
    }

    /// Structural equality between two subtrees, numbers compared within `tolerance`
    pub fn structurally_equal(&self, id: NodeId, other: &Ast, other_id: NodeId, tolerance: f64) -> bool {
        let (a, b) = (&self.node(id).kind, &other.node(other_id).kind);
        let same_shape = match (a, b) {
            (NodeKind::Number { value: x, .. }, NodeKind::Number { value: y, .. }) => {
                return x == y || (x - y).abs() <= tolerance;
            }
            (NodeKind::Constant(x), NodeKind::Constant(y)) => return x == y,
            (NodeKind::Variable(x), NodeKind::Variable(y)) => return x == y,
            (NodeKind::UnaryOp { operator: x, .. }, NodeKind::UnaryOp { operator: y, .. }) => x == y,
            (NodeKind::BinaryOp { operator: x, .. }, NodeKind::BinaryOp { operator: y, .. }) => x == y,
            (NodeKind::FunctionCall { name: x, args: xa }, NodeKind::FunctionCall { name: y, args: ya }) => {
                x == y && xa.len() == ya.len()
            }
            (NodeKind::Matrix { rows: x }, NodeKind::Matrix { rows: y }) => {
                x.len() == y.len() && x.iter().zip(y).all(|(rx, ry)| rx.len() == ry.len())
            }
            (NodeKind::Complex { .. }, NodeKind::Complex { .. }) => true,
            _ => false,
        };
        same_shape
            && self
                .children(id)
                .into_iter()
                .zip(other.children(other_id))
                .all(|(c, oc)| self.structurally_equal(c, other, oc, tolerance))
    }

    /// Whole-tree structural equality
    pub fn equivalent(&self, other: &Ast, tolerance: f64) -> bool {
        self.structurally_equal(self.root, other, other.root, tolerance)
    }
}

/// Incremental arena construction; children must be added before parents
#[derive(Debug, Default)]
pub struct AstBuilder {
    nodes: Vec<Node>,
    heights: Vec<usize>,
}

impl AstBuilder {
    pub fn new() -> Self {
        AstBuilder::default()
    }

    pub fn push(&mut self, kind: NodeKind, position: Position) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let height = 1 + kind
            .children()
            .iter()
            .map(|child| self.heights[child.index()])
            .max()
            .unwrap_or(0);
        self.nodes.push(Node { kind, position });
        self.heights.push(height);
        id
    }

    /// Levels in the subtree rooted at `id`, counting the node itself
    pub fn height(&self, id: NodeId) -> usize {
        self.heights[id.index()]
    }

    pub fn position(&self, id: NodeId) -> Position {
        self.nodes[id.index()].position
    }

    pub fn number(&mut self, value: f64, raw: impl Into<String>, position: Position) -> NodeId {
        self.push(
            NodeKind::Number {
                value,
                raw: raw.into(),
            },
            position,
        )
    }

    pub fn unary(&mut self, operator: UnaryOperator, operand: NodeId, position: Position) -> NodeId {
        self.push(NodeKind::UnaryOp { operator, operand }, position)
    }

    /// Binary node spanning both operands
    pub fn binary(&mut self, operator: BinaryOperator, left: NodeId, right: NodeId) -> NodeId {
        let (l, r) = (self.position(left), self.position(right));
        let position = Position::new(l.start.min(r.start), l.end.max(r.end));
        self.push(
            NodeKind::BinaryOp {
                operator,
                left,
                right,
            },
            position,
        )
    }

    pub fn finish(self, root: NodeId) -> Ast {
        Ast {
            nodes: self.nodes,
            root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_table() {
        assert_eq!(BinaryOperator::Add.precedence(), 1);
        assert_eq!(BinaryOperator::Sub.precedence(), 1);
        assert_eq!(BinaryOperator::Mul.precedence(), 2);
        assert_eq!(BinaryOperator::Div.precedence(), 2);
        assert_eq!(BinaryOperator::Mod.precedence(), 2);
        assert_eq!(BinaryOperator::Pow.precedence(), 3);
    }

    #[test]
    fn test_builder_spans_cover_children() {
        let mut b = AstBuilder::new();
        let one = b.number(1.0, "1", Position::new(0, 1));
        let two = b.number(2.0, "2", Position::new(4, 5));
        let sum = b.binary(BinaryOperator::Add, one, two);
        let ast = b.finish(sum);

        assert_eq!(ast.root_node().position, Position::new(0, 5));
        for child in ast.children(ast.root()) {
            assert!(ast.root_node().position.contains(&ast.node(child).position));
        }
    }

    #[test]
    fn test_structural_equality_tolerance() {
        let build = |v: f64| {
            let mut b = AstBuilder::new();
            let n = b.number(v, v.to_string(), Position::new(0, 1));
            let x = b.push(NodeKind::Variable("x".into()), Position::new(2, 3));
            let root = b.binary(BinaryOperator::Mul, n, x);
            b.finish(root)
        };
        assert!(build(0.1).equivalent(&build(0.1 + 1e-12), 1e-10));
        assert!(!build(0.1).equivalent(&build(0.2), 1e-10));
    }
}
