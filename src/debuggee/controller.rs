//! The debuggee controller (§4.5): the singleton-in-spirit (but explicitly
//! owned, per §9's redesign note) object living inside the playbook process
//! that the strategy adapter drives and that answers every DAP request the
//! broker forwards.
//!
//! Built as an explicit `Arc<AnsibleDebugger>` created at strategy bootstrap
//! rather than a module-level singleton, so its lifetime is tied to the
//! session instead of the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use dap::events::{
    BreakpointEventBody, Event, ExitedEventBody, OutputEventBody, StoppedEventBody,
    ThreadEventBody,
};
use dap::requests::Command;
use dap::responses::{
    ContinueResponse, EvaluateResponse, ResponseBody, ScopesResponse, SetBreakpointsResponse,
    SetExceptionBreakpointsResponse, SetVariableResponse, StackTraceResponse, ThreadsResponse,
    VariablesResponse,
};
use dap::types::{
    self, BreakpointEventReason, Scope, ScopePresentationhint, Source, StackFrame,
    StackFramePresentationhint, StoppedEventReason, Thread as DapThread, ThreadEventReason,
    Variable as DapVariable,
};
use serde_json::Value;

use crate::adapter::DebugMessage;
use crate::debuggee::breakpoints::BreakpointRegistry;
use crate::debuggee::strategy::{DebugState, StrategyHost, TaskInfo, TaskOutcome};
use crate::debuggee::threads::{StepKind, StepState, ThreadRegistry};
use crate::debuggee::variables::{parse_meta_command, Child, MetaCommand, ScopeKind, VariableRegistry};
use crate::error::{Error, Result};
use crate::pathmap::PathMapper;

/// The three `SetExceptionBreakpointsRequest` filters named in §11.
/// `on_error` defaults on, matching a failed task being the common case
/// worth stopping for.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionBreakpointFilters {
    pub on_error: bool,
    pub on_unreachable: bool,
    pub on_skipped: bool,
}

impl Default for ExceptionBreakpointFilters {
    fn default() -> Self {
        ExceptionBreakpointFilters {
            on_error: true,
            on_unreachable: false,
            on_skipped: false,
        }
    }
}

impl ExceptionBreakpointFilters {
    fn from_ids(filters: &[String]) -> Self {
        ExceptionBreakpointFilters {
            on_error: filters.iter().any(|f| f == "on_error"),
            on_unreachable: filters.iter().any(|f| f == "on_unreachable"),
            on_skipped: filters.iter().any(|f| f == "on_skipped"),
        }
    }

    fn stops_for(&self, outcome: TaskOutcome) -> bool {
        match outcome {
            TaskOutcome::Ok => false,
            TaskOutcome::Failed => self.on_error,
            TaskOutcome::Unreachable => self.on_unreachable,
            TaskOutcome::Skipped => self.on_skipped,
        }
    }
}

/// Something the controller can push a `DebugMessage` onto, abstracting over
/// whether this debuggee is the client side (`connect` mode, §6.3) or server
/// side (`listen` mode) of the §4.3 transport.
pub trait Outbound: Send + Sync {
    fn send(&self, msg: DebugMessage) -> Result<()>;
}

/// The controller itself. One instance per debuggee process (§9); created at
/// strategy bootstrap and handed down to whatever drives the playbook
/// engine, rather than reached via a global.
pub struct AnsibleDebugger {
    breakpoints: Mutex<BreakpointRegistry>,
    threads: Arc<ThreadRegistry>,
    variables: VariableRegistry,
    exception_filters: Mutex<ExceptionBreakpointFilters>,
    path_mapper: Mutex<PathMapper>,
    outbound: OnceLock<Box<dyn Outbound>>,
    strategy: OnceLock<Arc<dyn StrategyHost>>,
    /// Steps requested while a thread was suspended (§4.5.2), consumed the
    /// next time `process_task` runs for that thread.
    pending_steps: Mutex<HashMap<i64, StepState>>,
    terminated: AtomicBool,
}

impl Default for AnsibleDebugger {
    fn default() -> Self {
        Self::new()
    }
}

impl AnsibleDebugger {
    pub fn new() -> Self {
        AnsibleDebugger {
            breakpoints: Mutex::new(BreakpointRegistry::new()),
            threads: Arc::new(ThreadRegistry::new()),
            variables: VariableRegistry::new(),
            exception_filters: Mutex::new(ExceptionBreakpointFilters::default()),
            path_mapper: Mutex::new(PathMapper::default()),
            outbound: OnceLock::new(),
            strategy: OnceLock::new(),
            pending_steps: Mutex::new(HashMap::new()),
            terminated: AtomicBool::new(false),
        }
    }

    /// Wires the transport handle the controller sends Response/Event
    /// messages through. Set once, right after the §4.3 queue connects.
    pub fn bind_outbound(&self, outbound: Box<dyn Outbound>) {
        let _ = self.outbound.set(outbound);
    }

    /// Wires the strategy/templating capability (§6.7). Set once at
    /// bootstrap, before the engine starts running tasks.
    pub fn bind_strategy(&self, strategy: Arc<dyn StrategyHost>) {
        let _ = self.strategy.set(strategy);
    }

    fn send(&self, msg: DebugMessage) {
        if let Some(outbound) = self.outbound.get() {
            if let Err(e) = outbound.send(msg) {
                log::warn!("failed to send debuggee message: {e}");
            }
        }
    }

    fn respond_success(&self, request_seq: i64, body: ResponseBody) {
        self.send(DebugMessage::Response(dap::responses::Response {
            request_seq,
            success: true,
            message: None,
            body: Some(body),
            error: None,
        }));
    }

    fn respond_error(&self, request_seq: i64, error: impl Into<String>) {
        self.send(DebugMessage::Response(dap::responses::Response {
            request_seq,
            success: false,
            message: Some(dap::responses::ResponseMessage::Error(error.into())),
            body: None,
            error: None,
        }));
    }

    fn template_engine(&self) -> Option<Arc<dyn crate::debuggee::strategy::TemplateEngine>> {
        self.strategy.get().map(|s| s.template_engine())
    }

    /// Applies the configured path mapping to an inbound client path,
    /// client→debuggee direction (§4.6).
    fn remote_path(&self, local: &str) -> String {
        self.path_mapper
            .lock()
            .unwrap()
            .to_remote(std::path::Path::new(local))
            .to_string_lossy()
            .into_owned()
    }

    /// Applies the configured path mapping to an outbound debuggee path,
    /// debuggee→client direction (§4.6).
    fn local_path(&self, remote: &str) -> String {
        self.path_mapper
            .lock()
            .unwrap()
            .to_local(std::path::Path::new(remote))
            .to_string_lossy()
            .into_owned()
    }

    /// Handles one request forwarded by the broker, dispatching by command
    /// (§6.1's required forwarded requests).
    pub fn handle_request(&self, req: dap::requests::Request) {
        let seq = req.seq;
        match req.command {
            Command::ConfigurationDone => {
                self.respond_success(seq, ResponseBody::ConfigurationDone);
            }
            Command::SetBreakpoints(args) => self.handle_set_breakpoints(seq, args),
            Command::SetExceptionBreakpoints(args) => {
                self.handle_set_exception_breakpoints(seq, args)
            }
            Command::Continue(args) => self.handle_continue(seq, args),
            Command::Next(args) => self.handle_step(seq, args.thread_id, StepKind::StepOver),
            Command::StepIn(args) => self.handle_step(seq, args.thread_id, StepKind::StepIn),
            Command::StepOut(args) => self.handle_step(seq, args.thread_id, StepKind::StepOut),
            Command::Threads => self.handle_threads(seq),
            Command::StackTrace(args) => self.handle_stack_trace(seq, args),
            Command::Scopes(args) => self.handle_scopes(seq, args),
            Command::Variables(args) => self.handle_variables(seq, args),
            Command::SetVariable(args) => self.handle_set_variable(seq, args),
            Command::Evaluate(args) => self.handle_evaluate(seq, args),
            Command::Disconnect(_) => self.handle_disconnect(seq),
            Command::Terminate(_) => self.handle_disconnect(seq),
            other => {
                log::warn!("debuggee received unsupported command: {other:?}");
                self.respond_error(seq, "unsupported command");
            }
        }
    }

    fn handle_set_breakpoints(&self, seq: i64, args: dap::requests::SetBreakpointsArguments) {
        let mut source = args.source;
        if let Some(path) = &source.path {
            source.path = Some(self.remote_path(path));
        }
        let requested = args.breakpoints.unwrap_or_default();
        let source_modified = args.source_modified.unwrap_or(false);

        let mut breakpoints = self
            .breakpoints
            .lock()
            .unwrap()
            .set_breakpoints(&source, &requested, source_modified);

        for bp in &mut breakpoints {
            if let Some(s) = &mut bp.source {
                if let Some(path) = &s.path {
                    s.path = Some(self.local_path(path));
                }
            }
        }

        self.respond_success(
            seq,
            ResponseBody::SetBreakpoints(SetBreakpointsResponse { breakpoints }),
        );
    }

    fn handle_set_exception_breakpoints(
        &self,
        seq: i64,
        args: dap::requests::SetExceptionBreakpointsArguments,
    ) {
        *self.exception_filters.lock().unwrap() =
            ExceptionBreakpointFilters::from_ids(&args.filters);
        self.respond_success(
            seq,
            ResponseBody::SetExceptionBreakpoints(SetExceptionBreakpointsResponse {
                breakpoints: None,
            }),
        );
    }

    fn handle_continue(&self, seq: i64, args: dap::requests::ContinueArguments) {
        let single_thread = args.single_thread.unwrap_or(false);
        self.threads
            .release(if single_thread { Some(args.thread_id) } else { None });
        self.respond_success(
            seq,
            ResponseBody::Continue(ContinueResponse {
                all_threads_continued: Some(!single_thread),
            }),
        );
    }

    /// Stores the step kind/anchor for `thread_id` and releases it. The
    /// anchor is resolved from the thread's current stack before release so
    /// `process_task` (§4.5.2) can compare against it once a new task
    /// arrives.
    fn handle_step(&self, seq: i64, thread_id: i64, kind: StepKind) {
        let frames = self.threads.stack_frames(thread_id);
        let anchor_task = match kind {
            StepKind::StepIn => frames.first().map(|f| f.task_uuid),
            StepKind::StepOver => frames.get(1).map(|f| f.task_uuid),
            StepKind::StepOut => frames
                .get(1)
                .or_else(|| frames.first())
                .map(|f| f.task_uuid),
        };

        if let Some(anchor_task) = anchor_task {
            self.threads.release(Some(thread_id));
            // Stash the step state back for process_task to pick up on the
            // thread's next suspend/inspect cycle.
            self.pending_steps_insert(thread_id, StepState { kind, anchor_task });
        } else {
            self.threads.release(Some(thread_id));
        }

        let body = match kind {
            StepKind::StepOver => ResponseBody::Next,
            StepKind::StepIn => ResponseBody::StepIn,
            StepKind::StepOut => ResponseBody::StepOut,
        };
        self.respond_success(seq, body);
    }

    /// Small side-table of steps waiting to take effect on the *next*
    /// `process_task` call, distinct from [`ThreadRegistry::suspend`]'s own
    /// waiting map (which is only populated while a thread is actually
    /// blocked). Kept here because a step command resolves and releases the
    /// thread in the same call.
    fn pending_steps_insert(&self, thread_id: i64, state: StepState) {
        self.pending_steps.lock().unwrap().insert(thread_id, state);
    }

    fn handle_threads(&self, seq: i64) {
        let threads = self
            .threads
            .list_threads()
            .into_iter()
            .map(|t| DapThread {
                id: t.id,
                name: if t.id == crate::debuggee::threads::MAIN_THREAD_ID {
                    "main".to_string()
                } else {
                    t.host
                },
            })
            .collect();
        self.respond_success(seq, ResponseBody::Threads(ThreadsResponse { threads }));
    }

    fn handle_stack_trace(&self, seq: i64, args: dap::requests::StackTraceArguments) {
        let frames = self.threads.stack_frames(args.thread_id);
        let stack_frames: Vec<StackFrame> = frames
            .iter()
            .map(|f| {
                if let (Some(path), Some(line)) = (&f.task_path, f.task_line) {
                    StackFrame {
                        id: f.id,
                        name: f.task_name.clone(),
                        source: Some(Source {
                            path: Some(self.local_path(path)),
                            ..Default::default()
                        }),
                        line,
                        column: 0,
                        ..Default::default()
                    }
                } else {
                    StackFrame {
                        id: f.id,
                        name: f.task_name.clone(),
                        presentation_hint: Some(StackFramePresentationhint::Subtle),
                        ..Default::default()
                    }
                }
            })
            .collect();

        self.respond_success(
            seq,
            ResponseBody::StackTrace(StackTraceResponse {
                total_frames: Some(stack_frames.len() as i64),
                stack_frames,
            }),
        );
    }

    fn handle_scopes(&self, seq: i64, args: dap::requests::ScopesArguments) {
        let Some(frame) = self.threads.frame(args.frame_id) else {
            self.respond_error(seq, "unknown stack frame");
            return;
        };

        let mut scopes = Vec::new();
        if frame.task_result.is_some() {
            scopes.push(self.build_scope(ScopeKind::ModuleResult, &frame));
        }
        scopes.push(self.build_scope(ScopeKind::ModuleOptions, &frame));
        scopes.push(self.build_scope(ScopeKind::TaskVariables, &frame));
        scopes.push(self.build_scope(ScopeKind::HostVariables, &frame));
        scopes.push(self.build_scope(ScopeKind::GlobalVariables, &frame));

        self.respond_success(seq, ResponseBody::Scopes(ScopesResponse { scopes }));
    }

    fn build_scope(&self, kind: ScopeKind, frame: &crate::debuggee::threads::StackFrame) -> Scope {
        let reference = self.register_scope_variable(kind, frame);
        Scope {
            name: kind.name().to_string(),
            presentation_hint: Some(match kind {
                ScopeKind::ModuleOptions => ScopePresentationhint::Arguments,
                ScopeKind::TaskVariables | ScopeKind::HostVariables | ScopeKind::GlobalVariables => {
                    ScopePresentationhint::Locals
                }
                ScopeKind::ModuleResult => ScopePresentationhint::Registers,
            }),
            variables_reference: reference,
            expensive: kind.expensive(),
            ..Default::default()
        }
    }

    fn register_scope_variable(
        &self,
        kind: ScopeKind,
        frame: &crate::debuggee::threads::StackFrame,
    ) -> i64 {
        let stackframe_id = frame.id;
        match kind {
            ScopeKind::ModuleResult => {
                let result = frame.task_result.clone().unwrap_or(Value::Null);
                self.variables
                    .register(stackframe_id, Box::new(move || children_of(&result)), None)
            }
            ScopeKind::ModuleOptions => {
                let get_threads = self.threads.clone();
                let set_threads = self.threads.clone();
                self.variables.register(
                    stackframe_id,
                    Box::new(move || {
                        let args = get_threads
                            .frame(stackframe_id)
                            .and_then(|f| f.task_vars.get("__task_args__").cloned())
                            .unwrap_or(Value::Null);
                        children_of(&args)
                    }),
                    Some(Box::new(move |name, value| {
                        if set_threads.set_task_arg(stackframe_id, name, value) {
                            Ok(())
                        } else {
                            Err(Error::StrategyError(format!(
                                "stack frame {stackframe_id} no longer exists"
                            )))
                        }
                    })),
                )
            }
            ScopeKind::TaskVariables => {
                let vars = frame.task_vars.clone();
                self.variables
                    .register(stackframe_id, Box::new(move || children_of(&vars)), None)
            }
            ScopeKind::HostVariables => {
                let get_threads = self.threads.clone();
                let set_threads = self.threads.clone();
                self.variables.register(
                    stackframe_id,
                    Box::new(move || {
                        let vars = get_threads
                            .frame(stackframe_id)
                            .map(|f| host_subset(&f.task_vars))
                            .unwrap_or(Value::Null);
                        children_of(&vars)
                    }),
                    Some(Box::new(move |name, value| {
                        if set_threads.set_host_var(stackframe_id, name, value) {
                            Ok(())
                        } else {
                            Err(Error::StrategyError(format!(
                                "stack frame {stackframe_id} no longer exists"
                            )))
                        }
                    })),
                )
            }
            ScopeKind::GlobalVariables => {
                let vars = global_subset(&frame.task_vars);
                self.variables
                    .register(stackframe_id, Box::new(move || children_of(&vars)), None)
            }
        }
    }

    fn handle_variables(&self, seq: i64, args: dap::requests::VariablesArguments) {
        let children = match self.variables.children(args.variables_reference) {
            Ok(c) => c,
            Err(e) => {
                self.respond_error(seq, e.to_string());
                return;
            }
        };

        let variables = children
            .into_iter()
            .map(|c| {
                let reference = if c.value.is_object() || (c.value.is_array() && !c.value.is_string()) {
                    let stackframe_id = args.variables_reference;
                    let value = c.value.clone();
                    self.variables
                        .register(stackframe_id, Box::new(move || children_of(&value)), None)
                } else {
                    0
                };
                DapVariable {
                    name: c.name,
                    value: display_value(&c.value),
                    type_field: Some(c.type_name),
                    variables_reference: reference,
                    ..Default::default()
                }
            })
            .collect();

        self.respond_success(seq, ResponseBody::Variables(VariablesResponse { variables }));
    }

    fn handle_set_variable(&self, seq: i64, args: dap::requests::SetVariableArguments) {
        let Some(engine) = self.template_engine() else {
            self.respond_error(seq, "no templating engine bound");
            return;
        };

        let templated = match engine.template(&args.value, &Value::Null, true, true) {
            Ok(v) => v,
            Err(e) => {
                self.respond_error(seq, e.to_string());
                return;
            }
        };

        if let Err(e) = self
            .variables
            .set(args.variables_reference, &args.name, templated.clone())
        {
            self.respond_error(seq, e.to_string());
            return;
        }

        let reference = if templated.is_object() || templated.is_array() {
            let value = templated.clone();
            self.variables
                .register(args.variables_reference, Box::new(move || children_of(&value)), None)
        } else {
            0
        };

        self.respond_success(
            seq,
            ResponseBody::SetVariable(SetVariableResponse {
                value: display_value(&templated),
                type_field: Some(type_name(&templated).to_string()),
                variables_reference: reference,
                named_variables: None,
                indexed_variables: None,
            }),
        );
    }

    fn handle_evaluate(&self, seq: i64, args: dap::requests::EvaluateArguments) {
        let context = args.context.as_deref().unwrap_or("repl");
        if context == "repl" {
            match parse_meta_command(&args.expression) {
                Ok(Some(cmd)) => {
                    self.handle_meta_command(seq, cmd);
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    self.respond_error(seq, e.to_string());
                    return;
                }
            }
        }

        let Some(engine) = self.template_engine() else {
            self.respond_error(seq, "no templating engine bound");
            return;
        };

        let frame_vars = args
            .frame_id
            .and_then(|id| self.threads.frame(id))
            .map(|f| f.task_vars)
            .unwrap_or(Value::Null);

        match engine.template(&args.expression, &frame_vars, false, true) {
            Ok(value) => {
                self.respond_success(
                    seq,
                    ResponseBody::Evaluate(EvaluateResponse {
                        result: display_value(&value),
                        type_field: Some(type_name(&value).to_string()),
                        variables_reference: 0,
                        ..Default::default()
                    }),
                );
            }
            Err(e) => {
                // §7: a template error in Evaluate is a successful response
                // whose result carries the message, not an ErrorResponse,
                // so the REPL can print it.
                self.respond_success(
                    seq,
                    ResponseBody::Evaluate(EvaluateResponse {
                        result: e.to_string(),
                        type_field: None,
                        variables_reference: 0,
                        ..Default::default()
                    }),
                );
            }
        }
    }

    fn handle_meta_command(&self, seq: i64, cmd: MetaCommand) {
        let Some(engine) = self.template_engine() else {
            self.respond_error(seq, "no templating engine bound");
            return;
        };

        let result = match cmd {
            MetaCommand::Template { expr } => engine
                .template(&expr, &Value::Null, false, true)
                .map(|v| display_value(&v)),
            MetaCommand::SetOption { name, expr } | MetaCommand::SetHostVar { name, expr } => {
                engine
                    .template(&expr, &Value::Null, true, true)
                    .map(|v| format!("{name} = {}", display_value(&v)))
            }
            MetaCommand::RemoveOption { name } => Ok(format!("removed {name}")),
        };

        match result {
            Ok(text) => self.respond_success(
                seq,
                ResponseBody::Evaluate(EvaluateResponse {
                    result: text,
                    type_field: None,
                    variables_reference: 0,
                    ..Default::default()
                }),
            ),
            Err(e) => self.respond_success(
                seq,
                ResponseBody::Evaluate(EvaluateResponse {
                    result: e.to_string(),
                    type_field: None,
                    variables_reference: 0,
                    ..Default::default()
                }),
            ),
        }
    }

    fn handle_disconnect(&self, seq: i64) {
        self.threads.end_all();
        self.respond_success(seq, ResponseBody::Disconnect);
        self.terminated.store(true, Ordering::SeqCst);
    }

    /// Tears down the controller (§4.5.4): drains/disables the outbound
    /// queue and wakes every suspended thread unconditionally so the
    /// strategy's `run()` can return through the normal path.
    pub fn shutdown(&self) {
        self.threads.end_all();
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Sets the path mappings delivered by the adapter via the
    /// `ansibug_debug_configuration` `OutputEvent` (§11).
    pub fn set_path_mappings(&self, mappings: Vec<crate::pathmap::PathMapping>) {
        *self.path_mapper.lock().unwrap() = PathMapper::new(mappings);
    }
}

impl AnsibleDebugger {
    fn take_pending_step(&self, thread_id: i64) -> Option<StepState> {
        self.pending_steps.lock().unwrap().remove(&thread_id)
    }
}

impl DebugState for AnsibleDebugger {
    fn register_play(&self, tasks: &[TaskInfo]) {
        let mut breakpoints = self.breakpoints.lock().unwrap();
        for task in tasks {
            if let (Some(path), Some(line)) = (&task.path, task.line) {
                for bp in breakpoints.register_path_entry(path, line as usize, true) {
                    self.send(DebugMessage::Event(Event::Breakpoint(BreakpointEventBody {
                        reason: BreakpointEventReason::Changed,
                        breakpoint: bp,
                    })));
                }
            }
        }
    }

    fn register_included(&self, tasks: &[TaskInfo]) {
        self.register_play(tasks);
    }

    fn process_task(&self, host: &str, task: &TaskInfo, task_vars: Value) -> Result<()> {
        let (thread_id, created) = self.threads.get_or_create_thread(host);
        if created {
            self.send(DebugMessage::Event(Event::Thread(ThreadEventBody {
                reason: ThreadEventReason::Started,
                thread_id,
            })));
        }

        let pending_step = self.take_pending_step(thread_id);

        let mut task_vars_with_args = task_vars.clone();
        if let Value::Object(map) = &mut task_vars_with_args {
            map.insert("__task_args__".to_string(), task.args.clone());
        }

        let frame_id = self.threads.push_frame(
            thread_id,
            crate::debuggee::threads::StackFrame {
                id: 0,
                thread_id,
                task_uuid: task.uuid,
                task_path: task.path.clone(),
                task_line: task.line,
                task_name: task.name.clone(),
                task_action: task.action.clone(),
                task_vars: task_vars_with_args,
                task_result: None,
                is_include: task.is_include(),
            },
        );

        let stop_reason = self.stop_reason_for(thread_id, task, &pending_step);

        if let Some((reason, hit_ids)) = stop_reason {
            let stopped_by_step = matches!(reason, StoppedEventReason::Step);
            self.send(DebugMessage::Event(Event::Stopped(StoppedEventBody {
                reason,
                description: None,
                thread_id: Some(thread_id),
                preserve_focus_hint: None,
                text: None,
                all_threads_stopped: Some(false),
                hit_breakpoint_ids: hit_ids,
            })));

            if stopped_by_step {
                if let Some(step) = &pending_step {
                    // step-in on a non-include task degrades to step-over (§4.5.2)
                    let degraded = if step.kind == StepKind::StepIn && !task.is_include() {
                        StepState {
                            kind: StepKind::StepOver,
                            anchor_task: task.parent_uuid.unwrap_or(task.uuid),
                        }
                    } else {
                        step.clone()
                    };
                    self.pending_steps_insert(thread_id, degraded);
                }
            }

            self.threads.suspend(thread_id, None);
        } else if let Some(step) = pending_step {
            // Not stopping this time, but keep the step state alive so a
            // later task at the right level still triggers it.
            self.pending_steps_insert(thread_id, step);
        }

        let _ = frame_id;
        Ok(())
    }

    fn process_task_result(
        &self,
        host: &str,
        task: &TaskInfo,
        outcome: TaskOutcome,
        result: Value,
    ) -> Result<()> {
        let (thread_id, _) = self.threads.get_or_create_thread(host);
        let frames = self.threads.stack_frames(thread_id);
        let Some(frame) = frames.iter().find(|f| f.task_uuid == task.uuid) else {
            return Ok(());
        };
        self.threads.set_frame_result(frame.id, result);

        if self.exception_filters.lock().unwrap().stops_for(outcome) {
            let reason = match outcome {
                TaskOutcome::Failed => StoppedEventReason::Exception,
                _ => StoppedEventReason::Exception,
            };
            self.send(DebugMessage::Event(Event::Stopped(StoppedEventBody {
                reason,
                description: None,
                thread_id: Some(thread_id),
                preserve_focus_hint: None,
                text: None,
                all_threads_stopped: Some(false),
                hit_breakpoint_ids: None,
            })));
            self.threads.suspend(thread_id, None);
        }

        self.variables.clear_frame(frame.id);
        self.threads.pop_frame_if_complete(thread_id, frame.id);

        if !task.is_include() && self.threads.stack_frames(thread_id).is_empty() {
            self.threads.remove_thread(thread_id);
            self.send(DebugMessage::Event(Event::Thread(ThreadEventBody {
                reason: ThreadEventReason::Exited,
                thread_id,
            })));
        }

        Ok(())
    }
}

impl AnsibleDebugger {
    /// Determines whether `task` should stop its thread, in priority order
    /// (§4.5.2): step-over, step-out, step-in, then line breakpoints.
    /// Exception filters are evaluated separately, in `process_task_result`.
    fn stop_reason_for(
        &self,
        thread_id: i64,
        task: &TaskInfo,
        pending_step: &Option<StepState>,
    ) -> Option<(StoppedEventReason, Option<Vec<i64>>)> {
        if let Some(step) = pending_step {
            let stop = match step.kind {
                StepKind::StepOver => task.parent_uuid == Some(step.anchor_task),
                StepKind::StepOut => !self.threads.is_ancestor(thread_id, step.anchor_task),
                StepKind::StepIn => true,
            };
            if stop {
                return Some((StoppedEventReason::Step, None));
            }
        }

        if let Some(path) = &task.path {
            if let Some(line) = task.line {
                let breakpoints = self.breakpoints.lock().unwrap();
                let hits: Vec<i64> = breakpoints
                    .matching(path, line)
                    .filter(|bp| self.condition_holds(bp))
                    .map(|bp| bp.id)
                    .collect();
                if !hits.is_empty() {
                    return Some((StoppedEventReason::Breakpoint, Some(hits)));
                }
            }
        }

        None
    }

    /// Evaluates a breakpoint's condition, if any, against no particular
    /// frame context (conditions are evaluated bare per §4.5.2); a broken
    /// template degrades to "false" silently (§7).
    fn condition_holds(&self, bp: &crate::debuggee::breakpoints::LineBreakpoint) -> bool {
        let Some(condition) = &bp.source_breakpoint.condition else {
            return true;
        };
        let Some(engine) = self.template_engine() else {
            return true;
        };
        engine
            .template(condition, &Value::Null, false, true)
            .map(|v| truthy(&v))
            .unwrap_or(false)
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn children_of(value: &Value) -> Vec<Child> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Child {
                name: k.clone(),
                value: v.clone(),
                type_name: type_name(v).to_string(),
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| Child {
                name: i.to_string(),
                value: v.clone(),
                type_name: type_name(v).to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn host_subset(task_vars: &Value) -> Value {
    filter_keys(task_vars, |k| k.starts_with("ansible_"))
}

fn global_subset(task_vars: &Value) -> Value {
    filter_keys(task_vars, |k| !k.starts_with("ansible_") && k != "__task_args__")
}

fn filter_keys(value: &Value, keep: impl Fn(&str) -> bool) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

// OutputEventBody/ExitedEventBody are constructed here for the events the
// controller itself ends the session with, kept as free functions so
// `Outbound` implementations can reuse them without depending on internal
// controller state.
pub fn exited_event(exit_code: i64) -> Event {
    Event::Exited(ExitedEventBody { exit_code })
}

pub fn output_event(text: impl Into<String>) -> Event {
    Event::Output(OutputEventBody {
        category: Some(types::OutputEventCategory::Console),
        output: text.into(),
        ..Default::default()
    })
}
