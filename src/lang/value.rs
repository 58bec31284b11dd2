//! Runtime values for the embedded debuggee language.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A record/array cell, shared by reference so the language can express
/// aliasing — this is what makes the variable registry's cycle-safety
/// handling a real concern rather than a hypothetical.
///
/// `Arc<Mutex<_>>` rather than `Rc<RefCell<_>>`: frame and value snapshots
/// must be readable from the session's dispatcher thread while the debuggee
/// thread sits blocked inside the stop-predicate hook, so the whole value
/// graph has to be `Send`.
pub type Ref = Arc<Mutex<Value>>;

#[derive(Clone)]
pub enum Value {
    Unit,
    Int(i64),
    Bool(bool),
    Str(String),
    // `Arc`-wrapped rather than bare `Vec`/`BTreeMap`: `identity()` below
    // hands out the container's address for cycle detection, and a bare
    // container's address only survives until the next `Value::clone()`
    // (e.g. every time a `Ref` cell is locked and its contents copied out).
    // The `Arc` address is stable across clones since cloning just bumps
    // the refcount.
    Array(Arc<Vec<Ref>>),
    Record(Arc<BTreeMap<String, Ref>>),
    Pointer(Ref),
}

/// A coarse kind discriminator, mirroring the interpreter collaborator
/// contract (`primitive | aggregate | pointer | map | slice | ...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Primitive,
    Aggregate,
    Pointer,
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Unit | Value::Int(_) | Value::Bool(_) | Value::Str(_) => Kind::Primitive,
            Value::Array(_) | Value::Record(_) => Kind::Aggregate,
            Value::Pointer(_) => Kind::Pointer,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Pointer(_) => "pointer",
        }
    }

    /// Bounded textual rendering used by the variable registry: depth 1,
    /// length-capped, matching the bounded textual rendering `variables`
    /// reports for aggregate members.
    pub fn render(&self) -> String {
        const MAX_LEN: usize = 200;
        let mut s = match self {
            Value::Unit => "()".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => format!("{s:?}"),
            Value::Array(items) => format!("[{} items]", items.len()),
            Value::Record(fields) => format!("{{{} fields}}", fields.len()),
            Value::Pointer(inner) => format!("&{}", inner.lock().unwrap().type_name()),
        };
        if s.len() > MAX_LEN {
            s.truncate(MAX_LEN);
            s.push('\u{2026}');
        }
        s
    }

    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Array(items) => Some(Arc::as_ptr(items) as usize),
            Value::Record(fields) => Some(Arc::as_ptr(fields) as usize),
            Value::Pointer(r) => Some(Arc::as_ptr(r) as usize),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Unit => false,
            _ => true,
        }
    }

    pub fn new_ref(self) -> Ref {
        Arc::new(Mutex::new(self))
    }
}
