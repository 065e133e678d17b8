//! Breakpoint snapping and re-verification (§4.5.1), matching §8's
//! "Breakpoint lifecycle" concrete scenario 3 exactly.

use ansibug::debuggee::breakpoints::BreakpointRegistry;
use dap::types::{Source, SourceBreakpoint};

fn source(path: &str) -> Source {
    Source {
        path: Some(path.to_string()),
        ..Default::default()
    }
}

fn source_bp(line: i64) -> SourceBreakpoint {
    SourceBreakpoint {
        line,
        ..Default::default()
    }
}

#[test]
fn unregistered_source_cannot_verify_yet() {
    let mut registry = BreakpointRegistry::new();
    let result = registry.set_breakpoints(&source("/p/main.yml"), &[source_bp(6)], false);

    assert_eq!(result.len(), 1);
    let bp = &result[0];
    assert_eq!(bp.id, Some(1));
    assert!(!bp.verified);
    assert_eq!(
        bp.message.as_deref(),
        Some("File has not been loaded by Ansible, cannot detect breakpoints yet.")
    );
}

#[test]
fn breakpoint_events_snap_as_lines_are_discovered() {
    let mut registry = BreakpointRegistry::new();
    registry.set_breakpoints(&source("/p/main.yml"), &[source_bp(6)], false);

    let first = registry.register_path_entry("/p/main.yml", 5, true);
    assert_eq!(first.len(), 1);
    assert!(first[0].verified);
    assert_eq!(first[0].line, Some(5));
    assert_eq!(first[0].end_line, Some(5));

    let second = registry.register_path_entry("/p/main.yml", 8, true);
    assert_eq!(second.len(), 1);
    assert!(second[0].verified);
    assert_eq!(second[0].line, Some(5));
    assert_eq!(second[0].end_line, Some(7));
}

#[test]
fn source_modified_invalidates_every_breakpoint_in_that_source() {
    let mut registry = BreakpointRegistry::new();
    registry.register_path_entry("/p/main.yml", 5, true);
    let result = registry.set_breakpoints(&source("/p/main.yml"), &[source_bp(5)], true);

    assert_eq!(result.len(), 1);
    assert!(!result[0].verified);
    assert_eq!(
        result[0].message.as_deref(),
        Some("Cannot set breakpoint on a modified source.")
    );
}

#[test]
fn invalid_line_does_not_verify() {
    let mut registry = BreakpointRegistry::new();
    registry.register_path_entry("/p/main.yml", 3, false);
    let result = registry.set_breakpoints(&source("/p/main.yml"), &[source_bp(3)], false);

    assert!(!result[0].verified);
    assert_eq!(result[0].message.as_deref(), Some("Breakpoint cannot be set here."));
}

#[test]
fn replacing_breakpoints_for_a_source_drops_the_old_set() {
    let mut registry = BreakpointRegistry::new();
    registry.register_path_entry("/p/main.yml", 5, true);
    registry.set_breakpoints(&source("/p/main.yml"), &[source_bp(5)], false);
    let second = registry.set_breakpoints(&source("/p/main.yml"), &[source_bp(5), source_bp(5)], false);

    assert_eq!(second.len(), 2);
    assert!(registry.matching("/p/main.yml", 5).count() == 2);
}
