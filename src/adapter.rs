//! Launch/attach glue: constructs a debuggee interpreter per session.
//!
//! Two modes, selected by how the program is supplied:
//!
//! - **Eval mode**: the program is a textual source string. A file whose
//!   first two bytes are `#!` is auto-detected as Eval mode and its first
//!   line is rewritten to `//` so line numbers stay stable; `-as-string`
//!   forces this mode regardless.
//! - **EvalPath mode**: the program is an importable module rooted at a
//!   path. Auto-import of pre-declared symbols is disabled in this mode
//!   because this language has no module system to resolve them through —
//!   callers must declare what they use.
//!
//! Feature-flag symbol sets (`-syscall`/`-unsafe`/`-unrestricted`) mirror
//! onto process-wide environment variables (`YAEGI_SYSCALL` etc.) so a
//! debuggee that itself embeds this interpreter sees the same feature
//! surface. The mirror is write-once: nothing may mutate it after the first
//! session starts.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use crate::lang::interp::InterpError;
use crate::lang::value::Value;
use crate::lang::{Interpreter, StopHook};

#[derive(Debug, Clone, Default)]
pub struct FeatureFlags {
    pub syscall: bool,
    pub r#unsafe: bool,
    pub unrestricted: bool,
}

static MIRROR_ONCE: Once = Once::new();

impl FeatureFlags {
    /// Mirrors the flags onto `YAEGI_SYSCALL`/`YAEGI_UNSAFE`/
    /// `YAEGI_UNRESTRICTED` exactly once per process. Subsequent calls
    /// (from later sessions in `net` multi-session mode) are no-ops: the
    /// first session's flags govern the whole process.
    pub fn mirror_to_env(&self) {
        MIRROR_ONCE.call_once(|| {
            if self.syscall {
                std::env::set_var("YAEGI_SYSCALL", "1");
            }
            if self.r#unsafe {
                std::env::set_var("YAEGI_UNSAFE", "1");
            }
            if self.unrestricted {
                std::env::set_var("YAEGI_UNRESTRICTED", "1");
            }
        });
    }
}

#[derive(Debug, Clone)]
pub enum ProgramSource {
    /// Eval mode: program text plus the name to report as its source.
    Eval { name: String, source: String },
    /// EvalPath mode: a module rooted at this path.
    EvalPath(PathBuf),
}

/// Reads `path` and decides Eval vs EvalPath, per the shebang-detection
/// rule above. `force_as_string` corresponds to `-as-string`.
pub fn load_program(path: &Path, force_as_string: bool) -> std::io::Result<ProgramSource> {
    let bytes = std::fs::read(path)?;
    let name = path.display().to_string();

    if force_as_string {
        return Ok(ProgramSource::Eval {
            name,
            source: rewrite_shebang(bytes),
        });
    }

    if bytes.starts_with(b"#!") {
        return Ok(ProgramSource::Eval {
            name,
            source: rewrite_shebang(bytes),
        });
    }

    Ok(ProgramSource::EvalPath(path.to_path_buf()))
}

/// Replaces a leading `#!` with `//` so byte offsets — and therefore line
/// numbers — are unaffected.
fn rewrite_shebang(mut bytes: Vec<u8>) -> String {
    if bytes.starts_with(b"#!") {
        bytes[0] = b'/';
        bytes[1] = b'/';
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Builds an [`Interpreter`] for one session, installing the stdlib/self
/// symbol set unconditionally and the syscall/unsafe/unrestricted sets per
/// `flags`, one interpreter per session.
/// `auto_import` disables the convenience prelude in EvalPath mode.
pub fn build_interpreter(
    source: &ProgramSource,
    flags: &FeatureFlags,
    auto_import: bool,
    program_args: &[String],
    hook: Arc<dyn StopHook>,
) -> Result<Interpreter, InterpError> {
    flags.mirror_to_env();

    let (name, text);
    match source {
        ProgramSource::Eval { name: n, source: s } => {
            name = n.clone();
            text = s.clone();
        }
        ProgramSource::EvalPath(path) => {
            name = path.display().to_string();
            text = std::fs::read_to_string(path).map_err(|e| InterpError::Other(e.to_string()))?;
        }
    }

    let mut interp = Interpreter::new(name, &text, hook)?;
    register_self_symbols(&mut interp);
    register_program_args(&mut interp, program_args);
    if auto_import {
        register_stdlib_symbols(&mut interp);
    }
    if flags.syscall {
        register_syscall_symbols(&mut interp);
    }
    if flags.r#unsafe {
        register_unsafe_symbols(&mut interp);
    }
    if flags.unrestricted {
        register_unrestricted_symbols(&mut interp);
    }
    Ok(interp)
}

/// Binds the debuggee's program arguments (CLI positionals, or `launch`'s
/// `args` when the client overrides them) as the `args` global — always
/// present, regardless of `-noautoimport`, since it's data the launcher
/// supplied rather than a prelude function.
fn register_program_args(interp: &mut Interpreter, program_args: &[String]) {
    let items = program_args
        .iter()
        .map(|a| Value::Str(a.clone()).new_ref())
        .collect();
    interp.define_global("args", Value::Array(Arc::new(items)));
}

/// The "interpreter-self" symbol set: introspection builtins every session
/// gets regardless of `-noautoimport`.
fn register_self_symbols(interp: &mut Interpreter) {
    interp.register_builtin("typeof", |args| {
        let v = args.first().ok_or_else(|| arity_error("typeof", 1, args.len()))?;
        Ok(Value::Str(v.type_name().to_string()))
    });
}

/// The standard-library symbol set: small value-manipulation helpers,
/// disabled in EvalPath mode so module-resolved programs
/// must declare what they use instead of relying on an implicit prelude.
fn register_stdlib_symbols(interp: &mut Interpreter) {
    interp.register_builtin("len", |args| match args.first() {
        Some(Value::Array(items)) => Ok(Value::Int(items.len() as i64)),
        Some(Value::Str(s)) => Ok(Value::Int(s.len() as i64)),
        Some(Value::Record(fields)) => Ok(Value::Int(fields.len() as i64)),
        Some(other) => Err(InterpError::TypeMismatch {
            expected: "array, string, or record",
            got: other.type_name(),
        }),
        None => Err(arity_error("len", 1, 0)),
    });
    interp.register_builtin("abs", |args| match args.first() {
        Some(Value::Int(i)) => Ok(Value::Int(i.abs())),
        Some(other) => Err(InterpError::TypeMismatch {
            expected: "int",
            got: other.type_name(),
        }),
        None => Err(arity_error("abs", 1, 0)),
    });
    interp.register_builtin("str", |args| match args.first() {
        Some(v) => Ok(Value::Str(v.render())),
        None => Err(arity_error("str", 1, 0)),
    });
}

/// The syscall symbol set (`-syscall`/`YAEGI_SYSCALL`): host environment
/// access.
fn register_syscall_symbols(interp: &mut Interpreter) {
    interp.register_builtin("env", |args| match args.first() {
        Some(Value::Str(name)) => Ok(Value::Str(std::env::var(name).unwrap_or_default())),
        Some(other) => Err(InterpError::TypeMismatch {
            expected: "string",
            got: other.type_name(),
        }),
        None => Err(arity_error("env", 1, 0)),
    });
}

/// The unsafe symbol set (`-unsafe`/`YAEGI_UNSAFE`): raw identity
/// introspection, useful for watching pointer aliasing while debugging.
fn register_unsafe_symbols(interp: &mut Interpreter) {
    interp.register_builtin("addr", |args| match args.first() {
        Some(v) => Ok(Value::Int(v.identity().unwrap_or(0) as i64)),
        None => Err(arity_error("addr", 1, 0)),
    });
}

/// The unrestricted symbol set (`-unrestricted`/`YAEGI_UNRESTRICTED`):
/// anything gated behind both of the above, here just wall-clock access.
fn register_unrestricted_symbols(interp: &mut Interpreter) {
    interp.register_builtin("now", |_args| {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(Value::Int(secs))
    });
}

fn arity_error(name: &str, expected: usize, got: usize) -> InterpError {
    InterpError::Arity { name: name.to_string(), expected, got }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::interp::NullHook;
    use std::io::Write;

    #[test]
    fn shebang_file_is_eval_mode() {
        let mut f = tempfile::Builder::new().suffix(".x").tempfile().unwrap();
        writeln!(f, "#!/usr/bin/env langdap").unwrap();
        writeln!(f, "let x := 1;").unwrap();
        let src = load_program(f.path(), false).unwrap();
        match src {
            ProgramSource::Eval { source, .. } => {
                assert!(source.starts_with("//"));
                assert!(source.contains("let x := 1;"));
            }
            ProgramSource::EvalPath(_) => panic!("expected eval mode"),
        }
    }

    #[test]
    fn plain_file_is_eval_path_mode() {
        let mut f = tempfile::Builder::new().suffix(".x").tempfile().unwrap();
        writeln!(f, "let x := 1;").unwrap();
        let src = load_program(f.path(), false).unwrap();
        assert!(matches!(src, ProgramSource::EvalPath(_)));
    }

    #[test]
    fn stdlib_symbols_are_absent_in_eval_path_mode() {
        let hook: Arc<dyn StopHook> = Arc::new(NullHook);
        let source = ProgramSource::Eval {
            name: "prog.x".to_string(),
            source: "let xs := [1,2,3];\nlet n := len(xs);\n".to_string(),
        };
        let mut interp =
            build_interpreter(&source, &FeatureFlags::default(), false, &[], hook).unwrap();
        assert!(interp.run().is_err());
    }

    #[test]
    fn stdlib_symbols_are_present_when_auto_import_enabled() {
        let hook: Arc<dyn StopHook> = Arc::new(NullHook);
        let source = ProgramSource::Eval {
            name: "prog.x".to_string(),
            source: "let xs := [1,2,3];\nlet n := len(xs);\n".to_string(),
        };
        let mut interp =
            build_interpreter(&source, &FeatureFlags::default(), true, &[], hook).unwrap();
        interp.run().unwrap();
    }

    #[test]
    fn program_args_are_bound_as_a_global() {
        let hook: Arc<dyn StopHook> = Arc::new(NullHook);
        let source = ProgramSource::Eval {
            name: "prog.x".to_string(),
            source: "let n := len(args);\nlet first := args[0];\n".to_string(),
        };
        let program_args = vec!["one".to_string(), "two".to_string()];
        let mut interp =
            build_interpreter(&source, &FeatureFlags::default(), true, &program_args, hook).unwrap();
        interp.run().unwrap();
    }
}
