//! Generated by `cargo run -p xtask -- generate-schema`.
//! Do not hand-edit; edit `xtask/schema/launch.json` and regenerate.

use std::collections::HashMap;

/// additionalData payload of a DAP `launch` request.
#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct LaunchArguments {
    /// Arguments passed to the debuggee program. Defaults to the adapter's
    /// CLI positional arguments when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Force Eval mode regardless of shebang detection.
    #[serde(rename = "asString")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_string: Option<bool>,
    /// Disable the stdlib prelude (implied in EvalPath mode).
    #[serde(rename = "noAutoImport")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_auto_import: Option<bool>,
    /// Path to the script to debug. Defaults to the adapter's CLI
    /// script-path argument when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    /// Client-path-prefix to target-path-prefix remapping.
    #[serde(rename = "sourceMap")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_map: Option<HashMap<String, String>>,
    /// Stop at the first statement before running.
    #[serde(rename = "stopOnEntry")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_entry: Option<bool>,
    /// Install the syscall symbol set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syscall: Option<bool>,
    /// Install the unrestricted symbol set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unrestricted: Option<bool>,
    /// Install the unsafe symbol set.
    #[serde(rename = "unsafe")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#unsafe: Option<bool>,
}
