//! Tree-walking evaluator for the embedded debuggee language.
//!
//! An opaque capability from the DAP bridge's point of view: the bridge
//! never reaches into the AST walker directly, it only calls the handful of
//! methods below (`run`, `frames`, `bindings`, `eval_in_frame`,
//! `assign_in_frame`) and installs a [`StopHook`].

use std::collections::BTreeMap;
use std::sync::Arc;

use super::ast::{BinOp, Block, Expr, Pos, Program, Stmt, StmtKind, UnOp};
use super::parser;
use super::value::{Ref, Value};

#[derive(Debug, thiserror::Error)]
pub enum InterpError {
    #[error("parse error:\n{0}")]
    Parse(String),
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    #[error("undefined function `{0}`")]
    UndefinedFunction(String),
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: &'static str, got: &'static str },
    #[error("division by zero")]
    DivisionByZero,
    #[error("`{name}` expects {expected} argument(s), got {got}")]
    Arity { name: String, expected: usize, got: usize },
    #[error("index out of bounds")]
    IndexOutOfBounds,
    #[error("no field `{0}`")]
    NoSuchField(String),
    #[error("no frame at index {0}")]
    NoSuchFrame(usize),
    #[error("program terminated")]
    Terminated,
    #[error("{0}")]
    Other(String),
}

/// Scope kind attached to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Local,
    Closure,
    Global,
}

/// A snapshot of one call frame, cheap to clone across the thread boundary
/// between the debuggee thread and the session's dispatcher thread.
#[derive(Clone)]
pub struct FrameInfo {
    pub depth: usize,
    pub name: String,
    pub source: String,
    pub pos: Pos,
    pub locals: BTreeMap<String, Value>,
    pub globals: Arc<BTreeMap<String, Value>>,
}

/// One `evaluate`/`setVariable` request a blocked hook can service; see
/// [`StopContext::request`].
pub enum FrameRequest<'q> {
    Eval { frame: usize, expr: &'q str },
    Assign { frame: usize, name: &'q str, expr: &'q str },
}

pub enum FrameResponse {
    Value(Value),
    Unit,
}

/// Everything a blocked hook needs to answer `evaluate`/`setVariable`
/// requests without the caller reaching back into the interpreter through a
/// separate lock: `request` closes over `&mut Interpreter` for the duration
/// of the (possibly blocking) `on_node` call, and may be invoked any number
/// of times while the hook is parked.
pub struct StopContext<'a> {
    pub source: &'a str,
    pub pos: Pos,
    pub depth: usize,
    pub frames: &'a [FrameInfo],
    pub request: &'a mut dyn FnMut(FrameRequest) -> Result<FrameResponse, InterpError>,
}

/// Hook invoked before executing each statement. May block the calling
/// (debuggee) thread. While blocked it may call
/// `ctx.eval`/`ctx.assign` any number of times to service `evaluate` and
/// `setVariable` requests arriving from the session's dispatcher.
pub trait StopHook: Send + Sync {
    fn on_node(&self, ctx: StopContext<'_>);
    /// Polled cooperatively; once true the interpreter unwinds at the next
    /// statement boundary instead of continuing.
    fn should_terminate(&self) -> bool;
    fn on_output(&self, line: &str);
    fn on_exception(&self, message: &str);
}

/// A hook that never stops and discards output; useful for unit tests that
/// only care about final state.
pub struct NullHook;

impl StopHook for NullHook {
    fn on_node(&self, _ctx: StopContext<'_>) {}
    fn should_terminate(&self) -> bool {
        false
    }
    fn on_output(&self, _line: &str) {}
    fn on_exception(&self, _message: &str) {}
}

enum Flow {
    Normal,
    Return(Value),
}

struct CallFrame {
    name: String,
    locals: std::collections::HashMap<String, Ref>,
    pos: Pos,
}

/// One interpreter invocation — either `Eval` (an inline source string) or
/// `EvalPath` (a module rooted at a path).
pub type Builtin = fn(&[Value]) -> Result<Value, InterpError>;

pub struct Interpreter {
    source_name: String,
    program: Program,
    functions: std::collections::HashMap<String, super::ast::FnDecl>,
    builtins: std::collections::HashMap<String, Builtin>,
    globals: std::collections::HashMap<String, Ref>,
    stack: Vec<CallFrame>,
    hook: Arc<dyn StopHook>,
}

impl Interpreter {
    pub fn new(source_name: impl Into<String>, src: &str, hook: Arc<dyn StopHook>) -> Result<Self, InterpError> {
        let program = parser::parse(src).map_err(InterpError::Parse)?;
        let mut functions = std::collections::HashMap::new();
        for stmt in &program.body {
            if let StmtKind::FnDecl(decl) = &stmt.kind {
                functions.insert(decl.name.clone(), decl.clone());
            }
        }
        Ok(Self {
            source_name: source_name.into(),
            program,
            functions,
            builtins: std::collections::HashMap::new(),
            globals: std::collections::HashMap::new(),
            stack: Vec::new(),
            hook,
        })
    }

    /// Registers a builtin callable under `name`; used by
    /// `crate::adapter` to install the stdlib/self/syscall/unsafe/
    /// unrestricted symbol sets the CLI flags install.
    /// A builtin always shadows a same-named user function.
    pub fn register_builtin(&mut self, name: impl Into<String>, f: Builtin) {
        self.builtins.insert(name.into(), f);
    }

    /// Pre-binds a top-level global before `run()`. Used by
    /// `crate::adapter` to expose the debuggee's program arguments (CLI
    /// positionals or `launch`'s `args`) as the `args` global — a plain
    /// function pointer can't close over per-session data, unlike
    /// [`Self::register_builtin`].
    pub fn define_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value.new_ref());
    }

    /// Runs the program to completion (or until `should_terminate()`).
    /// Top-level statements execute in an implicit frame named `main`.
    pub fn run(&mut self) -> Result<(), InterpError> {
        self.stack.push(CallFrame {
            name: "main".to_string(),
            locals: std::collections::HashMap::new(),
            pos: Pos { line: 1, column: 1 },
        });
        let body = self.program.body.clone();
        match self.exec_block(&body) {
            Ok(_) => Ok(()),
            Err(InterpError::Terminated) => Ok(()),
            Err(e) => {
                self.hook.on_exception(&e.to_string());
                Err(e)
            }
        }
    }

    fn exec_block(&mut self, block: &Block) -> Result<Flow, InterpError> {
        for stmt in block {
            if self.hook.should_terminate() {
                return Err(InterpError::Terminated);
            }

            if let Some(top) = self.stack.last_mut() {
                top.pos = stmt.pos;
            }
            let frames = self.snapshot_frames();
            let depth = self.stack.len() - 1;
            let pos = stmt.pos;
            let source_name = self.source_name.clone();
            let hook = self.hook.clone();
            {
                let mut request_cb = |req: FrameRequest| -> Result<FrameResponse, InterpError> {
                    match req {
                        FrameRequest::Eval { frame, expr } => {
                            self.eval_in_frame(frame, expr).map(FrameResponse::Value)
                        }
                        FrameRequest::Assign { frame, name, expr } => {
                            self.assign_in_frame(frame, name, expr).map(|()| FrameResponse::Unit)
                        }
                    }
                };
                hook.on_node(StopContext {
                    source: &source_name,
                    pos,
                    depth,
                    frames: &frames,
                    request: &mut request_cb,
                });
            }

            if self.hook.should_terminate() {
                return Err(InterpError::Terminated);
            }

            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, InterpError> {
        match &stmt.kind {
            StmtKind::Let(name, expr) => {
                let v = self.eval(expr)?;
                self.bind_local(name, v);
                Ok(Flow::Normal)
            }
            StmtKind::Assign(name, expr) => {
                let v = self.eval(expr)?;
                self.assign(name, v)?;
                Ok(Flow::Normal)
            }
            StmtKind::Print(expr) => {
                let v = self.eval(expr)?;
                self.hook.on_output(&format!("{}\n", render_plain(&v)));
                Ok(Flow::Normal)
            }
            StmtKind::If(cond, then, otherwise) => {
                if self.eval(cond)?.truthy() {
                    self.exec_block(then)
                } else if let Some(otherwise) = otherwise {
                    self.exec_block(otherwise)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While(cond, body) => {
                while self.eval(cond)?.truthy() {
                    if self.hook.should_terminate() {
                        return Err(InterpError::Terminated);
                    }
                    match self.exec_block(body)? {
                        Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Return(expr) => {
                let v = match expr {
                    Some(e) => self.eval(e)?,
                    None => Value::Unit,
                };
                Ok(Flow::Return(v))
            }
            StmtKind::ExprStmt(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            StmtKind::FnDecl(_) => Ok(Flow::Normal),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, InterpError> {
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Ident(name) => self.lookup(name),
            Expr::Unary(op, inner) => {
                let v = self.eval(inner)?;
                match (op, &v) {
                    (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
                    (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    _ => Err(InterpError::TypeMismatch {
                        expected: "int or bool",
                        got: v.type_name(),
                    }),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                eval_binop(*op, l, r)
            }
            Expr::Field(base, name) => {
                let v = self.eval(base)?;
                match v {
                    Value::Record(fields) => fields
                        .get(name)
                        .map(|r| r.lock().unwrap().clone())
                        .ok_or_else(|| InterpError::NoSuchField(name.clone())),
                    other => Err(InterpError::TypeMismatch {
                        expected: "record",
                        got: other.type_name(),
                    }),
                }
            }
            Expr::Index(base, index) => {
                let v = self.eval(base)?;
                let idx = self.eval(index)?;
                match (v, idx) {
                    (Value::Array(items), Value::Int(i)) => items
                        .get(i as usize)
                        .map(|r| r.lock().unwrap().clone())
                        .ok_or(InterpError::IndexOutOfBounds),
                    (other, _) => Err(InterpError::TypeMismatch {
                        expected: "array",
                        got: other.type_name(),
                    }),
                }
            }
            Expr::Record(fields) => {
                let mut map = BTreeMap::new();
                for (name, expr) in fields {
                    let v = self.eval(expr)?;
                    map.insert(name.clone(), v.new_ref());
                }
                Ok(Value::Record(Arc::new(map)))
            }
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?.new_ref());
                }
                Ok(Value::Array(Arc::new(out)))
            }
            Expr::Call(name, args) => self.call(name, args),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> Result<Value, InterpError> {
        if let Some(builtin) = self.builtins.get(name).copied() {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg)?);
            }
            return builtin(&values);
        }

        let decl = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| InterpError::UndefinedFunction(name.to_string()))?;

        if args.len() != decl.params.len() {
            return Err(InterpError::Arity {
                name: name.to_string(),
                expected: decl.params.len(),
                got: args.len(),
            });
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }

        let mut locals = std::collections::HashMap::new();
        for (param, value) in decl.params.iter().zip(values) {
            locals.insert(param.clone(), value.new_ref());
        }

        self.stack.push(CallFrame {
            name: name.to_string(),
            locals,
            pos: decl
                .body
                .first()
                .map(|s| s.pos)
                .unwrap_or(Pos { line: 1, column: 1 }),
        });
        let result = self.exec_block(&decl.body);
        self.stack.pop();

        match result? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::Unit),
        }
    }

    fn bind_local(&mut self, name: &str, value: Value) {
        let frame = self.stack.last_mut().expect("at least one frame");
        frame.locals.insert(name.to_string(), value.new_ref());
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), InterpError> {
        if let Some(frame) = self.stack.last() {
            if let Some(r) = frame.locals.get(name) {
                *r.lock().unwrap() = value;
                return Ok(());
            }
        }
        if let Some(r) = self.globals.get(name) {
            *r.lock().unwrap() = value;
            return Ok(());
        }
        // Top-level `let`s outside any user function live in the implicit
        // `main` frame's locals, already covered above; anything else is
        // promoted to a global so `x = 1;` at top level behaves sensibly.
        self.globals.insert(name.to_string(), value.new_ref());
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Value, InterpError> {
        if let Some(frame) = self.stack.last() {
            if let Some(r) = frame.locals.get(name) {
                return Ok(r.lock().unwrap().clone());
            }
        }
        if let Some(r) = self.globals.get(name) {
            return Ok(r.lock().unwrap().clone());
        }
        Err(InterpError::UndefinedVariable(name.to_string()))
    }

    fn snapshot_frames(&self) -> Vec<FrameInfo> {
        let globals: BTreeMap<String, Value> = self
            .globals
            .iter()
            .map(|(k, v)| (k.clone(), v.lock().unwrap().clone()))
            .collect();
        let globals = Arc::new(globals);

        self.stack
            .iter()
            .enumerate()
            .rev()
            .map(|(depth, frame)| FrameInfo {
                depth,
                name: frame.name.clone(),
                source: self.source_name.clone(),
                pos: frame.pos,
                locals: frame
                    .locals
                    .iter()
                    .map(|(k, v)| (k.clone(), v.lock().unwrap().clone()))
                    .collect(),
                globals: globals.clone(),
            })
            .collect()
    }

    /// Current call stack, deepest frame first.
    pub fn frames(&self) -> Vec<FrameInfo> {
        self.snapshot_frames()
    }

    /// Enumerates `(name, value)` bindings in one frame's scope.
    /// `Closure` is always empty: this language has no capturing
    /// closures, only top-level functions and globals.
    pub fn bindings(&self, frame_depth: usize, scope: ScopeKind) -> Result<Vec<(String, Value)>, InterpError> {
        let frames = self.snapshot_frames();
        let frame = frames
            .iter()
            .find(|f| f.depth == frame_depth)
            .ok_or(InterpError::NoSuchFrame(frame_depth))?;
        Ok(match scope {
            ScopeKind::Local => frame.locals.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ScopeKind::Closure => Vec::new(),
            ScopeKind::Global => frame.globals.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    /// Evaluates `expr_src` in the lexical environment of `frame_depth`.
    /// Never mutates state beyond what the expression itself mutates (it
    /// can't mutate anything; there are no assignment expressions, only
    /// assignment statements).
    pub fn eval_in_frame(&mut self, frame_depth: usize, expr_src: &str) -> Result<Value, InterpError> {
        let expr = parser::parse_expr(expr_src).map_err(InterpError::Parse)?;
        self.with_frame_in_scope(frame_depth, |this| this.eval(&expr))
    }

    /// Parses, type-checks against the existing binding's runtime type, and
    /// assigns, per the `setVariable` contract. Leaves state untouched on
    /// any error.
    pub fn assign_in_frame(&mut self, frame_depth: usize, name: &str, value_src: &str) -> Result<(), InterpError> {
        let expr = parser::parse_expr(value_src).map_err(InterpError::Parse)?;
        let new_value = self.with_frame_in_scope(frame_depth, |this| this.eval(&expr))?;

        let existing = self.with_frame_in_scope(frame_depth, |this| this.lookup(name))?;
        if std::mem::discriminant(&existing) != std::mem::discriminant(&new_value) {
            return Err(InterpError::TypeMismatch {
                expected: existing.type_name(),
                got: new_value.type_name(),
            });
        }

        self.with_frame_in_scope(frame_depth, |this| {
            this.assign(name, new_value.clone())
        })
    }

    /// Temporarily treats `frame_depth` as the active frame (topping the
    /// call stack) for the duration of `f`, then restores it. Only frames
    /// still on the live call stack can be focused — a stale handle from a
    /// previous stopped epoch fails with `NoSuchFrame`.
    fn with_frame_in_scope<T>(
        &mut self,
        frame_depth: usize,
        f: impl FnOnce(&mut Self) -> Result<T, InterpError>,
    ) -> Result<T, InterpError> {
        if frame_depth >= self.stack.len() {
            return Err(InterpError::NoSuchFrame(frame_depth));
        }
        let truncated = self.stack.split_off(frame_depth + 1);
        let result = f(self);
        self.stack.extend(truncated);
        result
    }
}

fn eval_binop(op: BinOp, l: Value, r: Value) -> Result<Value, InterpError> {
    use Value::*;
    Ok(match (op, l, r) {
        (BinOp::Add, Int(a), Int(b)) => Int(a + b),
        (BinOp::Add, Str(a), Str(b)) => Str(a + &b),
        (BinOp::Sub, Int(a), Int(b)) => Int(a - b),
        (BinOp::Mul, Int(a), Int(b)) => Int(a * b),
        (BinOp::Div, Int(_), Int(0)) => return Err(InterpError::DivisionByZero),
        (BinOp::Div, Int(a), Int(b)) => Int(a / b),
        (BinOp::Eq, a, b) => Bool(values_eq(&a, &b)),
        (BinOp::Neq, a, b) => Bool(!values_eq(&a, &b)),
        (BinOp::Lt, Int(a), Int(b)) => Bool(a < b),
        (BinOp::Le, Int(a), Int(b)) => Bool(a <= b),
        (BinOp::Gt, Int(a), Int(b)) => Bool(a > b),
        (BinOp::Ge, Int(a), Int(b)) => Bool(a >= b),
        (BinOp::And, Bool(a), Bool(b)) => Bool(a && b),
        (BinOp::Or, Bool(a), Bool(b)) => Bool(a || b),
        (_, a, b) => {
            return Err(InterpError::TypeMismatch {
                expected: a.type_name(),
                got: b.type_name(),
            })
        }
    })
}

fn values_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Unit, Value::Unit) => true,
        _ => false,
    }
}

fn render_plain(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        other => other.render(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingHook {
        lines: StdMutex<Vec<Pos>>,
        output: StdMutex<Vec<String>>,
    }

    impl StopHook for RecordingHook {
        fn on_node(&self, ctx: StopContext<'_>) {
            self.lines.lock().unwrap().push(ctx.pos);
        }
        fn should_terminate(&self) -> bool {
            false
        }
        fn on_output(&self, line: &str) {
            self.output.lock().unwrap().push(line.to_string());
        }
        fn on_exception(&self, _message: &str) {}
    }

    #[test]
    fn runs_sequential_assignments() {
        let hook = Arc::new(RecordingHook::default());
        let mut interp = Interpreter::new("prog.x", "let x := 1;\nx = 2;\nx = 3;\n", hook.clone()).unwrap();
        interp.run().unwrap();
        assert_eq!(hook.lines.lock().unwrap().len(), 3);
    }

    #[test]
    fn evaluates_in_frame() {
        let hook = Arc::new(NullHook);
        let mut interp = Interpreter::new("prog.x", "let x := 2;\nx = x;\n", hook).unwrap();
        interp.run().unwrap();
        let value = interp.eval_in_frame(0, "x+1").unwrap();
        assert!(matches!(value, Value::Int(3)));
    }

    #[test]
    fn set_variable_type_checks() {
        let hook = Arc::new(NullHook);
        let mut interp = Interpreter::new("prog.x", "let x := 2;\nx = x;\n", hook).unwrap();
        interp.run().unwrap();
        interp.assign_in_frame(0, "x", "42").unwrap();
        assert!(matches!(interp.lookup("x").unwrap(), Value::Int(42)));
        assert!(interp.assign_in_frame(0, "x", "\"nope\"").is_err());
    }

    #[test]
    fn calls_functions_and_returns() {
        let hook = Arc::new(NullHook);
        let mut interp =
            Interpreter::new("prog.x", "fn add(a, b) { return a + b; }\nlet r := add(1, 2);\n", hook).unwrap();
        interp.run().unwrap();
        assert!(matches!(interp.lookup("r").unwrap(), Value::Int(3)));
    }

    #[test]
    fn prints_feed_output_hook() {
        let hook = Arc::new(RecordingHook::default());
        let mut interp = Interpreter::new("prog.x", "print \"hi\";\n", hook.clone()).unwrap();
        interp.run().unwrap();
        assert_eq!(hook.output.lock().unwrap()[0], "hi\n");
    }
}
