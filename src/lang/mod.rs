//! The embedded debuggee language: lexer/parser, AST, and tree-walking
//! evaluator. An opaque capability from the DAP bridge's point of view — it
//! only ever touches this module through [`interp::StopHook`] and the
//! handful of frame/eval/assign methods on [`interp::Interpreter`].

pub mod ast;
pub mod interp;
pub mod parser;
pub mod value;

pub use ast::Program;
pub use interp::{FrameInfo, InterpError, Interpreter, ScopeKind, StopContext, StopHook};
pub use value::Value;
