//! Breakpoint table and breakpoint verification.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub id: i64,
    pub source_path: String,
    pub line: u32,
    pub verified: bool,
    pub hit_count: u32,
}

/// Keyed by `(normalized_source_path, line)`. Replaced wholesale per source
/// on each `setBreakpoints` call, per the DAP contract the client resends
/// the full set for a source.
#[derive(Default)]
pub struct BreakpointTable {
    by_source: BTreeMap<String, Vec<Breakpoint>>,
    next_id: i64,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self {
            by_source: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Replaces the breakpoint set for `source_path`. `resolvable` decides,
    /// for each requested line, whether the nearest executable line exists
    /// (and what it resolves to) — callers pass a closure backed by the
    /// interpreter's statement position table.
    pub fn set_breakpoints(
        &mut self,
        source_path: &str,
        lines: &[u32],
        mut resolvable: impl FnMut(u32) -> Option<u32>,
    ) -> Vec<Breakpoint> {
        let breakpoints: Vec<Breakpoint> = lines
            .iter()
            .map(|&requested| {
                let id = self.next_id;
                self.next_id += 1;
                match resolvable(requested) {
                    Some(resolved) => Breakpoint {
                        id,
                        source_path: source_path.to_string(),
                        line: resolved,
                        verified: true,
                        hit_count: 0,
                    },
                    None => Breakpoint {
                        id,
                        source_path: source_path.to_string(),
                        line: requested,
                        verified: false,
                        hit_count: 0,
                    },
                }
            })
            .collect();

        self.by_source.insert(source_path.to_string(), breakpoints.clone());
        breakpoints
    }

    /// Breakpoints matching `(source_path, line)` that have not yet fired on
    /// this node visit. Returns their ids and bumps hit counts.
    pub fn hits(&mut self, source_path: &str, line: u32) -> Vec<i64> {
        let Some(breakpoints) = self.by_source.get_mut(source_path) else {
            return Vec::new();
        };
        breakpoints
            .iter_mut()
            .filter(|bp| bp.verified && bp.line == line)
            .map(|bp| {
                bp.hit_count += 1;
                bp.id
            })
            .collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Breakpoint> {
        self.by_source.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolvable_line_is_unverified() {
        let mut table = BreakpointTable::new();
        let bps = table.set_breakpoints("prog.x", &[7], |_| None);
        assert!(!bps[0].verified);
        assert_eq!(bps[0].line, 7);
    }

    #[test]
    fn resend_replaces_prior_set() {
        let mut table = BreakpointTable::new();
        table.set_breakpoints("prog.x", &[2, 3], |l| Some(l));
        let second = table.set_breakpoints("prog.x", &[3], |l| Some(l));
        assert_eq!(second.len(), 1);
        assert_eq!(table.all().count(), 1);
    }

    #[test]
    fn hits_only_fire_for_verified_matching_line() {
        let mut table = BreakpointTable::new();
        table.set_breakpoints("prog.x", &[2], |l| Some(l));
        assert_eq!(table.hits("prog.x", 2).len(), 1);
        assert!(table.hits("prog.x", 3).is_empty());
    }
}
