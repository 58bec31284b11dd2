//! Source index: maps between client paths and interpreter source identifiers.
//!
//! Normalizes client-supplied paths (absolute, case-preserving, OS-canonical
//! separator) to the interpreter's source identifier — here, simply the
//! normalized path string, since `lang::Interpreter` is single-source per
//! session. Also carries the `sourceMap` launch argument for longest-prefix-
//! wins prefix remapping, needed for launch handling and path normalization.
//!
//! Missing sources during `setBreakpoints` are not fatal: breakpoints are
//! held unverified by [`crate::debugger::breakpoint::BreakpointTable`] and
//! re-resolved if the source is later loaded under the normalized path.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct SourceMap {
    /// Longest-prefix-wins, client path prefix -> interpreter path prefix.
    client_to_target: Vec<(String, String)>,
    target_to_client: Vec<(String, String)>,
}

impl SourceMap {
    /// Builds a source map from a launch argument's `sourceMap` object:
    /// `{ "<target-prefix>": "<client-prefix>" }`.
    pub fn from_launch_arg(entries: &HashMap<String, String>) -> Self {
        let mut sm = SourceMap::default();
        for (target_prefix, client_prefix) in entries {
            let target_norm = normalize_prefix(target_prefix);
            let client_norm = normalize_prefix(client_prefix);
            sm.target_to_client
                .push((target_norm.clone(), client_prefix.clone()));
            sm.client_to_target
                .push((client_norm, target_prefix.clone()));
        }
        sm.target_to_client.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        sm.client_to_target.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        sm
    }

    /// Normalizes a client-supplied path to the interpreter source
    /// identifier: separators canonicalized to `/`, then any matching
    /// prefix remapped onto the interpreter-side prefix.
    pub fn to_source_id(&self, client_path: &str) -> String {
        apply(&normalize(client_path), &self.client_to_target)
    }

    /// The reverse direction, used when reporting a stack frame's `source`
    /// back to the client.
    pub fn to_client_path(&self, source_id: &str) -> String {
        apply(&normalize(source_id), &self.target_to_client)
    }
}

fn apply(path: &str, mapping: &[(String, String)]) -> String {
    for (from, to) in mapping {
        if let Some(suffix) = path.strip_prefix(from.as_str()) {
            return join(to, suffix);
        }
    }
    path.to_string()
}

fn join(prefix: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return prefix.to_string();
    }
    let sep = if prefix.ends_with('/') || prefix.ends_with('\\') {
        ""
    } else if prefix.contains('\\') {
        "\\"
    } else {
        "/"
    };
    format!("{prefix}{sep}{suffix}")
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

fn normalize_prefix(path: &str) -> String {
    let mut p = normalize(path);
    if !p.ends_with('/') {
        p.push('/');
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_without_any_mapping() {
        let sm = SourceMap::default();
        assert_eq!(sm.to_source_id("/home/user/prog.x"), "/home/user/prog.x");
    }

    #[test]
    fn remaps_longest_matching_prefix() {
        let mut entries = HashMap::new();
        entries.insert("/build/app".to_string(), "/home/user/app".to_string());
        entries.insert("/build".to_string(), "/home/user".to_string());
        let sm = SourceMap::from_launch_arg(&entries);
        assert_eq!(
            sm.to_source_id("/home/user/app/main.x"),
            "/build/app/main.x"
        );
    }

    #[test]
    fn windows_separators_are_normalized() {
        let sm = SourceMap::default();
        assert_eq!(sm.to_source_id(r"C:\prog\main.x"), "C:/prog/main.x");
    }
}
