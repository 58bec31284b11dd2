//! Adapter CLI surface.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Stdio,
    Net,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Listening mode.
    #[arg(long, value_enum, default_value = "stdio")]
    pub mode: Mode,

    /// Net address to listen on, `tcp://host:port` or `unix:///path`.
    /// Only meaningful in `net` mode.
    #[arg(long, default_value = "tcp://localhost:16348")]
    pub addr: String,

    /// Log protocol frames to a file, or `-` for stderr.
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Stop at program entry before executing the first statement.
    #[arg(long)]
    pub stop_at_entry: bool,

    /// Accept more than one debug session in sequence instead of exiting
    /// after the first one ends. The original defaults to single-session;
    /// this flag opts into the opposite since clap's derive can't express a
    /// bare flag that already defaults to true and flips to false.
    #[arg(long)]
    pub multi_session: bool,

    /// Treat the script path as an inline source string (Eval mode)
    /// regardless of shebang detection.
    #[arg(long)]
    pub as_string: bool,

    /// Comma-separated build tags passed to the interpreter.
    #[arg(long, default_value = "")]
    pub tags: String,

    /// Include syscall symbols. Also settable via `YAEGI_SYSCALL`.
    #[arg(long, env = "YAEGI_SYSCALL")]
    pub syscall: bool,

    /// Include unsafe symbols. Also settable via `YAEGI_UNSAFE`.
    #[arg(long, env = "YAEGI_UNSAFE")]
    pub r#unsafe: bool,

    /// Include unrestricted symbols. Also settable via `YAEGI_UNRESTRICTED`.
    #[arg(long, env = "YAEGI_UNRESTRICTED")]
    pub unrestricted: bool,

    /// Do not auto-import pre-declared symbols.
    #[arg(long)]
    pub noautoimport: bool,

    /// Script path to debug.
    pub script_path: PathBuf,

    /// Arguments passed to the debuggee program.
    pub args: Vec<String>,
}

impl Args {
    /// Whether the adapter should exit after the first debug session ends.
    /// True unless `--multi-session` was passed, matching the original
    /// `yaegi-dap`'s `-single-session` default of `true`.
    pub fn single_session(&self) -> bool {
        !self.multi_session
    }
}
