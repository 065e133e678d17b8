//! Breakpoint registry and line-snapping (§4.5).
//!
//! A breakpoint's requested line rarely lands on something Ansible can
//! actually stop at (`block`/`rescue`/`always`, an `import_*` task, a role
//! boundary). Snapping walks a per-source map of line classifications built
//! up as the playbook runs tasks, to decide what line a breakpoint really
//! verifies against.

use std::collections::HashMap;

use dap::types::{Breakpoint, Source, SourceBreakpoint};

/// How a line in a source classifies for breakpoint purposes, indexed by
/// (1-based) line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// A breakpoint cannot be set at or derived from this line.
    Invalid,
    /// The first line of a task/entry a breakpoint can snap to.
    Valid,
    /// Continues the classification of the nearest preceding non-continuation
    /// line; used for the body lines of a multi-line task.
    Continuation,
}

/// Per-source line classification, built incrementally as the playbook
/// strategy processes tasks (`register_path_breakpoint`).
#[derive(Debug, Default)]
pub struct SourceInfoMap {
    lines: HashMap<String, Vec<Option<LineKind>>>,
}

impl SourceInfoMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `line` in `path` as either a valid snap target (`valid =
    /// true`) or an explicitly invalid one, extending the file's line vector
    /// (new slots default to `Continuation` so an unregistered run of lines
    /// falls through to the nearest earlier classification) and entry 0 to
    /// `Invalid` so nothing before the first registered line can ever snap.
    pub fn register(&mut self, path: &str, line: usize, valid: bool) {
        let entry = self
            .lines
            .entry(path.to_string())
            .or_insert_with(|| vec![Some(LineKind::Invalid)]);

        if line >= entry.len() {
            entry.resize(line + 1, None);
        }
        entry[line] = Some(if valid { LineKind::Valid } else { LineKind::Invalid });
    }

    pub fn get(&self, path: &str) -> Option<&[Option<LineKind>]> {
        self.lines.get(path).map(Vec::as_slice)
    }

    /// Snaps `requested_line` in `path` to the breakpoint range it really
    /// belongs to, if any source info has been registered for that path yet.
    /// Returns `(start_line, end_line, verified, message)`.
    pub fn snap(&self, path: &str, requested_line: i64) -> SnapResult {
        let Some(file_lines) = self.get(path) else {
            return SnapResult {
                start_line: requested_line,
                end_line: requested_line,
                verified: false,
                message: Some(
                    "File has not been loaded by Ansible, cannot detect breakpoints yet."
                        .to_string(),
                ),
            };
        };

        let mut start_line = (requested_line as usize).min(file_lines.len() - 1);
        while file_lines[start_line].is_none() && start_line > 0 {
            start_line -= 1;
        }

        let mut end_line = start_line + 1;
        while end_line < file_lines.len() && file_lines[end_line].is_none() {
            end_line += 1;
        }
        end_line = end_line.saturating_sub(1).min(file_lines.len());

        let verified = !matches!(file_lines[start_line], Some(LineKind::Invalid));
        let message = if verified {
            None
        } else {
            Some("Breakpoint cannot be set here.".to_string())
        };

        SnapResult {
            start_line: start_line as i64,
            end_line: end_line as i64,
            verified,
            message,
        }
    }
}

pub struct SnapResult {
    pub start_line: i64,
    pub end_line: i64,
    pub verified: bool,
    pub message: Option<String>,
}

/// One client breakpoint, keyed by the id returned in `SetBreakpointsResponse`.
#[derive(Debug, Clone)]
pub struct LineBreakpoint {
    pub id: i64,
    pub source: Source,
    pub source_breakpoint: SourceBreakpoint,
    pub breakpoint: Breakpoint,
}

impl LineBreakpoint {
    pub fn path(&self) -> &str {
        self.source.path.as_deref().unwrap_or("")
    }

    /// Whether this breakpoint's verified range covers `line` in `path`.
    pub fn covers(&self, path: &str, line: i64) -> bool {
        self.path() == path
            && self.breakpoint.line.map_or(true, |l| l <= line)
            && self.breakpoint.end_line.map_or(true, |l| l >= line)
    }
}

/// The full set of client-set breakpoints, plus the [`SourceInfoMap`] used
/// to verify/snap them.
#[derive(Default)]
pub struct BreakpointRegistry {
    breakpoints: HashMap<i64, LineBreakpoint>,
    next_id: i64,
    source_info: SourceInfoMap,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        BreakpointRegistry {
            breakpoints: HashMap::new(),
            next_id: 1,
            source_info: SourceInfoMap::new(),
        }
    }

    /// Replaces all breakpoints for `source`'s path with a fresh set built
    /// from `requested`, snapping each against the current source info.
    /// Mirrors the `SetBreakpointsRequest` handler exactly: clear-then-add.
    pub fn set_breakpoints(
        &mut self,
        source: &Source,
        requested: &[SourceBreakpoint],
        source_modified: bool,
    ) -> Vec<Breakpoint> {
        let path = source.path.clone().unwrap_or_default();
        self.breakpoints.retain(|_, b| b.path() != path);

        let mut result = Vec::with_capacity(requested.len());
        for source_bp in requested {
            let id = self.next_id;
            self.next_id += 1;

            let bp = if source_modified {
                Breakpoint {
                    id: Some(id),
                    verified: false,
                    message: Some("Cannot set breakpoint on a modified source.".to_string()),
                    source: Some(source.clone()),
                    ..Default::default()
                }
            } else {
                let snap = self.source_info.snap(&path, source_bp.line);
                Breakpoint {
                    id: Some(id),
                    verified: snap.verified,
                    message: snap.message,
                    source: Some(source.clone()),
                    line: Some(snap.start_line),
                    end_line: Some(snap.end_line),
                    ..Default::default()
                }
            };

            self.breakpoints.insert(
                id,
                LineBreakpoint {
                    id,
                    source: source.clone(),
                    source_breakpoint: source_bp.clone(),
                    breakpoint: bp.clone(),
                },
            );
            result.push(bp);
        }

        result
    }

    /// Finds the breakpoint (if any) whose verified range covers `path`/`line`,
    /// i.e. whether the playbook should stop here.
    pub fn breakpoint_at(&self, path: &str, line: i64) -> Option<&LineBreakpoint> {
        self.breakpoints.values().find(|b| b.covers(path, line))
    }

    /// All breakpoints whose verified range covers `path`/`line`. Two
    /// breakpoints can legitimately cover the same line (e.g. one set before
    /// and one after a reload that didn't change verification); per spec
    /// all of their ids are reported in `hit_breakpoint_ids`, not just one.
    pub fn matching(&self, path: &str, line: i64) -> impl Iterator<Item = &LineBreakpoint> {
        self.breakpoints.values().filter(move |b| b.covers(path, line))
    }

    /// Registers a task/entry starting at `path`:`line` as a valid or
    /// invalid snap target, re-verifying and re-snapping every breakpoint
    /// already set against that path. Returns the breakpoints whose
    /// verified/line/end_line changed, to be sent as `BreakpointEvent`s.
    pub fn register_path_entry(&mut self, path: &str, line: usize, valid: bool) -> Vec<Breakpoint> {
        self.source_info.register(path, line, valid);

        let mut changed = Vec::new();
        for bp in self.breakpoints.values_mut() {
            if bp.path() != path {
                continue;
            }

            let snap = self.source_info.snap(path, bp.source_breakpoint.line);
            let new_bp = Breakpoint {
                id: Some(bp.id),
                verified: snap.verified,
                message: snap.message,
                source: Some(bp.source.clone()),
                line: Some(snap.start_line),
                end_line: Some(snap.end_line),
                ..Default::default()
            };

            if new_bp.verified != bp.breakpoint.verified
                || new_bp.line != bp.breakpoint.line
                || new_bp.end_line != bp.breakpoint.end_line
            {
                bp.breakpoint = new_bp.clone();
                changed.push(new_bp);
            }
        }

        changed
    }
}
