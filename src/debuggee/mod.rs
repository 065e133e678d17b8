//! The debuggee side of the session (§4.5): everything that lives inside
//! the playbook engine process itself, as opposed to the broker (§4.4) that
//! sits between it and the DAP client.

pub mod bootstrap;
pub mod breakpoints;
pub mod controller;
pub mod strategy;
pub mod threads;
pub mod variables;

pub use controller::{AnsibleDebugger, ExceptionBreakpointFilters, Outbound};
pub use strategy::{DebugState, StrategyHost, TaskInfo, TaskOutcome, TemplateEngine};
