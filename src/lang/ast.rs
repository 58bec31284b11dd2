//! AST for the embedded debuggee language.
//!
//! The language is deliberately small: variables, arithmetic, records,
//! arrays, `if`/`while`, and function declarations/calls. It exists to give
//! the DAP bridge a real tree-walking target, not to be a language in its
//! own right.

use std::fmt;

pub type NodeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Bool(bool),
    Str(String),
    Ident(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Record(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// A single executable statement, tagged with its source position.
///
/// The interpreter's stop predicate is evaluated once per `Stmt`, never
/// per sub-expression — this is the "executable line" granularity
/// breakpoint verification resolves against.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub id: NodeId,
    pub pos: Pos,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Let(String, Expr),
    Assign(String, Expr),
    Print(Expr),
    If(Expr, Block, Option<Block>),
    While(Expr, Block),
    Return(Option<Expr>),
    ExprStmt(Expr),
    FnDecl(FnDecl),
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub body: Block,
}

impl Program {
    /// Every line that carries an executable statement, across nested
    /// blocks (`if`/`while`/function bodies). Used to resolve a requested
    /// breakpoint line to the nearest one the interpreter's stop predicate
    /// can actually fire on.
    pub fn executable_lines(&self) -> std::collections::BTreeSet<u32> {
        let mut lines = std::collections::BTreeSet::new();
        collect_lines(&self.body, &mut lines);
        lines
    }

    /// Resolves a requested line to the line an executable statement sits
    /// on. `None` if the requested line has no statement — the breakpoint
    /// is then accepted but left unverified, per the protocol's contract
    /// that clients may set breakpoints on blank or non-executable lines.
    pub fn nearest_executable_line(&self, requested: u32) -> Option<u32> {
        self.executable_lines().contains(&requested).then_some(requested)
    }
}

fn collect_lines(block: &Block, lines: &mut std::collections::BTreeSet<u32>) {
    for stmt in block {
        lines.insert(stmt.pos.line);
        match &stmt.kind {
            StmtKind::If(_, then, otherwise) => {
                collect_lines(then, lines);
                if let Some(otherwise) = otherwise {
                    collect_lines(otherwise, lines);
                }
            }
            StmtKind::While(_, body) => collect_lines(body, lines),
            StmtKind::FnDecl(decl) => collect_lines(&decl.body, lines),
            _ => {}
        }
    }
}
