//! Abstract syntax tree consumed by the evaluator.
//!
//! Lexing and parsing are out of scope for the core (spec §1): this
//! module only defines the shape of the tree the evaluator walks, and
//! the narrow `Parser` trait the module loader (C7) calls out to. An
//! embedder supplies a real implementation; nothing in this crate
//! builds an `AstNode` from text.

use std::sync::Arc;

use crate::pattern::Pattern;

/// Source location, carried by nodes that can raise a `RuntimeError`
/// so the formatter in `error::format_error` can render a caret.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Token {
    pub line: usize,
    pub column: usize,
    pub file: Option<String>,
}

impl Token {
    pub fn new(line: usize, column: usize, file: Option<String>) -> Self {
        Self { line, column, file }
    }
}

pub type Program = Vec<AstNode>;

/// One arm of a `match` expression.
#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Box<AstNode>>,
    pub body: Box<AstNode>,
}

/// A key/value pair in an object literal, or a spread.
#[derive(Debug, Clone)]
pub enum ObjectEntry {
    Pair { key: String, value: AstNode },
    Spread(AstNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Eqv,
    NotEqv,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    AddSet,
    SubSet,
    MulSet,
    DivSet,
    ModSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    Inc,
    Dec,
}

/// An assignable expression: identifier, member, or index.
#[derive(Debug, Clone)]
pub enum AssignTarget {
    Identifier(String),
    Member { object: Box<AstNode>, key: String },
    Index { object: Box<AstNode>, index: Box<AstNode> },
}

/// One AST node. The evaluator's `match` in `eval::evaluate` has one
/// arm per variant (grounded on the teacher's `tick_fiber` dispatch
/// over `Instr` in `bpmn-lite-core/src/vm.rs`).
#[derive(Debug, Clone)]
pub enum AstNode {
    IntLiteral(i64),
    FloatLiteral(f64),
    BoolLiteral(bool),
    StringLiteral(String),
    CharLiteral(String),
    NullLiteral,
    UnitLiteral,
    Identifier(String, Token),

    Let {
        pattern: Pattern,
        value: Box<AstNode>,
    },

    Prefix {
        op: PrefixOp,
        expr: Box<AstNode>,
        token: Token,
    },
    Infix {
        op: InfixOp,
        left: Box<AstNode>,
        right: Box<AstNode>,
        token: Token,
    },
    Assign {
        target: AssignTarget,
        op: AssignOp,
        value: Box<AstNode>,
        token: Token,
    },
    Postfix {
        target: AssignTarget,
        op: PostfixOp,
        token: Token,
    },

    If {
        condition: Box<AstNode>,
        then_branch: Box<AstNode>,
        else_branch: Option<Box<AstNode>>,
    },
    Block(Vec<AstNode>),
    Match {
        scrutinee: Box<AstNode>,
        arms: Vec<MatchArm>,
        token: Token,
    },
    For {
        pre: Option<Box<AstNode>>,
        condition: Option<Box<AstNode>>,
        step: Option<Box<AstNode>>,
        body: Box<AstNode>,
        then_block: Option<Box<AstNode>>,
    },
    Break {
        value: Option<Box<AstNode>>,
        token: Token,
    },
    Continue(Token),

    Lambda {
        params: Vec<Pattern>,
        body: Box<AstNode>,
        name: Option<String>,
    },
    Call {
        callee: Box<AstNode>,
        args: Vec<CallArg>,
        token: Token,
    },

    Member {
        object: Box<AstNode>,
        key: String,
        token: Token,
    },
    Index {
        object: Box<AstNode>,
        index: Box<AstNode>,
        token: Token,
    },
    Slice {
        object: Box<AstNode>,
        start: Option<Box<AstNode>>,
        end: Option<Box<AstNode>>,
        token: Token,
    },

    Range {
        start: Box<AstNode>,
        end: Box<AstNode>,
        step: Option<Box<AstNode>>,
        token: Token,
    },

    ArrayLiteral(Vec<AstNode>),
    ObjectLiteral(Vec<ObjectEntry>),

    Query {
        source: Box<AstNode>,
        binding: String,
        wheres: Vec<AstNode>,
        order_by: Option<Box<AstNode>>,
        select: Box<AstNode>,
        token: Token,
    },

    Recover {
        target: Box<AstNode>,
        fallback: Box<AstNode>,
    },

    Await {
        target: Box<AstNode>,
        token: Token,
    },
    Spawn {
        body: Vec<AstNode>,
        token: Token,
    },
    Race {
        arms: Vec<AstNode>,
        token: Token,
    },

    Import {
        path: String,
        token: Token,
    },
}

/// A call argument. `Placeholder` (`_`) marks a currying hole.
#[derive(Debug, Clone)]
pub enum CallArg {
    Value(AstNode),
    Placeholder,
}

/// Parse errors are reported with file and line (spec §4.7).
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error in {file}:{line}: {message}")]
pub struct ParseError {
    pub file: String,
    pub line: usize,
    pub message: String,
}

/// The external collaborator the module loader calls out to (spec §1:
/// "the core receives a pre-built AST"). An embedder wires a concrete
/// lexer/parser behind this trait; the core never constructs one.
pub trait Parser: Send + Sync {
    fn parse(&self, source: &str, filename: &str) -> Result<Arc<Program>, ParseError>;
}
