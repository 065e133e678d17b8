//! The `StrategyHost` capability (§6.7) consumed from the playbook engine,
//! and the concrete strategy adapter that bridges its task-lifecycle
//! callbacks into the controller (§2's "Strategy adapter" component).
//!
//! The playbook engine itself - its iterator, host inventory, task objects,
//! templating engine - is out of scope (§1); this module only defines the
//! narrow interface the controller needs from it and the glue that turns
//! engine callbacks into controller method calls.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;

/// Uniquely identifies a task within a play, independent of which host is
/// currently executing it - the same `TaskId` appears once per host thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub uuid::Uuid);

/// The minimal view of a playbook task the controller needs: where it lives
/// in source, its identity, and whether it is an include-style action whose
/// frame should persist until its dynamically-loaded children finish (§3).
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub uuid: uuid::Uuid,
    pub parent_uuid: Option<uuid::Uuid>,
    pub path: Option<String>,
    pub line: Option<i64>,
    pub name: String,
    pub action: String,
    pub args: Value,
}

impl TaskInfo {
    /// Whether this task's action expands into dynamically-loaded child
    /// tasks (`include_tasks`, `import_tasks`, `include_role`,
    /// `import_role`, `include`), per the GLOSSARY's "Include task" entry.
    pub fn is_include(&self) -> bool {
        matches!(
            self.action.as_str(),
            "include_tasks" | "import_tasks" | "include_role" | "import_role" | "include"
        )
    }
}

/// The outcome of a task, as reported to `process_task_result`. Distinguishes
/// the three exception-filter categories (§11) from an ordinary success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Ok,
    Failed,
    Skipped,
    Unreachable,
}

/// A templating collaborator exposing the one operation the controller
/// needs: evaluating an expression against a task's variables, in either
/// "native types" mode (so the result parses back into JSON-shaped values
/// for `SetVariable`) or bare-expression/fail-on-undefined mode (for
/// `Evaluate`/breakpoint conditions), per §6.7 and §4.5.3.
pub trait TemplateEngine: Send + Sync {
    fn template(
        &self,
        expr: &str,
        task_vars: &Value,
        native: bool,
        fail_on_undefined: bool,
    ) -> Result<Value>;
}

/// The capability the controller consumes from the playbook engine (§6.7):
/// task path/identity, an include-task test, and a templating engine. The
/// engine's iterator/inventory/task objects beyond this are out of scope.
pub trait StrategyHost: Send + Sync {
    fn template_engine(&self) -> Arc<dyn TemplateEngine>;
}

/// A pending callback the engine hands the controller once per task, before
/// and after it runs. This is the seam `register_play`/`register_included`/
/// `process_task`/`process_task_result` (§6.7) attach to; a real playbook
/// engine implementation owns the loop that calls these, the controller only
/// reacts.
pub trait DebugState: Send + Sync {
    /// Registers the task list of a newly started play, so any breakpoints
    /// snapped against tasks that haven't executed yet can already resolve
    /// their source lines - mirrors `register_play`.
    fn register_play(&self, tasks: &[TaskInfo]);

    /// Registers tasks discovered by expanding an include-style action at
    /// runtime - these are not known until the engine actually loads the
    /// included file, which is why §3's source-info map "grows monotonically
    /// ... as the engine executes" rather than being built upfront.
    fn register_included(&self, tasks: &[TaskInfo]);

    /// Called immediately before `task` runs on `host`. May block the
    /// calling (engine worker) thread if a breakpoint or step fires.
    fn process_task(&self, host: &str, task: &TaskInfo, task_vars: Value) -> Result<()>;

    /// Called immediately after `task` finishes on `host` with `outcome`.
    fn process_task_result(
        &self,
        host: &str,
        task: &TaskInfo,
        outcome: TaskOutcome,
        result: Value,
    ) -> Result<()>;
}
