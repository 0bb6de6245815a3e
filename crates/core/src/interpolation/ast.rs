//! Abstract syntax tree for interpolated text.
//!
//! Trees are plain data with no execution side effects, so identical source
//! text always yields structurally equal trees and they can be cached by
//! content hash.

use serde::Serialize;
use serde_json::Value;

/// Byte range into the parsed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Parsed template: a sequence of nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ast {
    pub nodes: Vec<Node>,
}

impl Ast {
    /// True when the template contains no references or blocks.
    pub fn is_static(&self) -> bool {
        self.nodes.iter().all(|n| matches!(n, Node::Literal { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Plain text.
    Literal { text: String },
    /// `@name.path|formatter`
    VariableRef(VarRef),
    /// `{{#if cond}}then{{else}}otherwise{{/if}}`
    Conditional { cond: Expr, then_branch: Vec<Node>, else_branch: Vec<Node> },
    /// `{{ expr | formatter }}`
    Expression { expr: Expr, formatters: Vec<Formatter> },
}

impl Node {
    pub fn literal(text: impl Into<String>) -> Self {
        Node::Literal { text: text.into() }
    }
}

/// A reference to a variable, with optional path access and formatters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarRef {
    pub name: String,
    pub path: Vec<PathSegment>,
    pub formatters: Vec<Formatter>,
}

impl VarRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), path: Vec::new(), formatters: Vec::new() }
    }
}

/// One step of object/array access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    /// `.field`
    Field(String),
    /// `[0]`
    Index(usize),
    /// `["some key"]`
    Key(String),
}

/// `|name` or `|name(arg, ...)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Formatter {
    pub name: String,
    pub args: Vec<Value>,
}

impl Formatter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), args: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Neg,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub | Self::Neg => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Not => "!",
        }
    }

    pub fn is_unary(&self) -> bool {
        matches!(self, Self::Not | Self::Neg)
    }
}

/// Expression inside `{{ }}` blocks and `#if` conditions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Literal { value: Value },
    /// Variable with path access. Formatters apply to whole blocks instead.
    Var { name: String, path: Vec<PathSegment> },
    Op { op: Operator, operands: Vec<Expr> },
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var { name: name.into(), path: Vec::new() }
    }

    pub fn op(op: Operator, operands: Vec<Expr>) -> Self {
        Expr::Op { op, operands }
    }
}

/// Category of a recoverable parse problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// `{{` with no closing `}}`.
    UnterminatedBlock,
    /// `{{#if}}` with no matching `{{/if}}`.
    UnclosedConditional,
    /// `{{else}}` outside a conditional.
    StrayElse,
    /// `{{/if}}` outside a conditional.
    StrayEndIf,
    /// `{{ }}` with nothing inside.
    EmptyExpression,
    /// Tokens that do not form an expression.
    InvalidExpression,
    /// `@name[` or `|fmt(` left open, or a bad path step.
    MalformedReference,
}

/// A recoverable problem found while parsing. The affected source is kept as
/// literal text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseDiagnostic {
    pub kind: ParseErrorKind,
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}: {}", self.span.start, self.span.end, self.message)
    }
}

/// Output of [`super::parse`]. Parsing never fails outright.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseResult {
    pub ast: Ast,
    pub errors: Vec<ParseDiagnostic>,
}

impl ParseResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
