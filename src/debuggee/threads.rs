//! Thread/stackframe registries and the suspend/resume rendezvous (§4.5.2),
//! built around a `Condvar`-based wait-for-breakpoint handshake.
//!
//! Thread id `1` is reserved for the "main" thread created at session start;
//! every other id is allocated from a monotonically increasing counter that
//! is never reused within a session (§3's invariants).

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

pub const MAIN_THREAD_ID: i64 = 1;

/// What a suspended thread should do once released: decides whether the
/// *next* task to run on it should stop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    StepIn,
    StepOver,
    StepOut,
}

/// Per-thread stepping state persisted across a suspend/resume cycle: the
/// kind of step requested and the task UUID it is anchored to (the "anchor"
/// task for `StepOut`, the stepping-parent for `StepOver`).
#[derive(Debug, Clone)]
pub struct StepState {
    pub kind: StepKind,
    pub anchor_task: uuid::Uuid,
}

/// One stack frame: a suspended task execution on a host thread. Persists
/// past its task's completion only while the task is an include-style one
/// and its children haven't all finished yet (§3).
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub id: i64,
    pub thread_id: i64,
    pub task_uuid: uuid::Uuid,
    pub task_path: Option<String>,
    pub task_line: Option<i64>,
    pub task_name: String,
    pub task_action: String,
    pub task_vars: serde_json::Value,
    pub task_result: Option<serde_json::Value>,
    pub is_include: bool,
}

/// A debuggee-side thread: one per inventory host, plus the reserved main
/// thread. Stack frames are pushed on `queue_task` and popped on
/// `task_result`, stack semantics (§3).
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: i64,
    pub host: String,
    pub frames: Vec<i64>,
}

#[derive(Default)]
struct Registry {
    threads: HashMap<i64, Thread>,
    host_to_thread: HashMap<String, i64>,
    frames: HashMap<i64, StackFrame>,
    next_thread_id: i64,
    next_frame_id: i64,
    /// Presence means the thread is suspended; `None` means "no step kind
    /// pending release" (e.g. stopped by breakpoint rather than a step).
    waiting: HashMap<i64, Option<StepState>>,
    /// Set once the controller tears down; every waiting thread wakes
    /// unconditionally and every future suspend attempt returns immediately.
    ended: bool,
}

/// Thread/stackframe registries plus the waiting-threads monitor (§4.5.2,
/// §5): a single mutex guards the thread/frame tables (write-heavy only
/// during task dispatch; readers - variable/stacktrace requests - acquire
/// briefly), and one condition variable implements the suspend rendezvous.
pub struct ThreadRegistry {
    inner: Mutex<Registry>,
    cond: Condvar,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry {
    pub fn new() -> Self {
        let mut registry = Registry {
            next_thread_id: MAIN_THREAD_ID + 1,
            next_frame_id: 1,
            ..Default::default()
        };
        registry.threads.insert(
            MAIN_THREAD_ID,
            Thread {
                id: MAIN_THREAD_ID,
                host: "main".to_string(),
                frames: Vec::new(),
            },
        );
        ThreadRegistry {
            inner: Mutex::new(registry),
            cond: Condvar::new(),
        }
    }

    /// Gets the thread for `host`, creating it (with a fresh, never-reused
    /// id) if this is the first task seen for that host. Returns the id and
    /// whether it was newly created, so the caller can emit
    /// `ThreadEvent{reason:"started"}` exactly once.
    pub fn get_or_create_thread(&self, host: &str) -> (i64, bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner.host_to_thread.get(host).copied() {
            return (id, false);
        }
        let id = inner.next_thread_id;
        inner.next_thread_id += 1;
        inner.host_to_thread.insert(host.to_string(), id);
        inner.threads.insert(
            id,
            Thread {
                id,
                host: host.to_string(),
                frames: Vec::new(),
            },
        );
        (id, true)
    }

    pub fn remove_thread(&self, thread_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(thread) = inner.threads.remove(&thread_id) {
            inner.host_to_thread.retain(|_, id| *id != thread_id);
            for frame_id in thread.frames {
                inner.frames.remove(&frame_id);
            }
        }
    }

    pub fn list_threads(&self) -> Vec<Thread> {
        let inner = self.inner.lock().unwrap();
        let mut threads: Vec<_> = inner.threads.values().cloned().collect();
        threads.sort_by_key(|t| t.id);
        threads
    }

    /// Pushes a new stack frame for `thread_id`, returning its id.
    pub fn push_frame(&self, thread_id: i64, mut frame: StackFrame) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_frame_id;
        inner.next_frame_id += 1;
        frame.id = id;
        frame.thread_id = thread_id;
        inner.frames.insert(id, frame);
        if let Some(thread) = inner.threads.get_mut(&thread_id) {
            thread.frames.push(id);
        }
        id
    }

    /// Pops the top frame of `thread_id` unless it (or an ancestor still on
    /// the stack) is an include-style frame whose children haven't all
    /// finished, matching §3's "persists until its children finish" rule.
    pub fn pop_frame_if_complete(&self, thread_id: i64, frame_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(thread) = inner.threads.get_mut(&thread_id) {
            if thread.frames.last() == Some(&frame_id) {
                let is_include = inner
                    .frames
                    .get(&frame_id)
                    .map(|f| f.is_include)
                    .unwrap_or(false);
                if !is_include {
                    thread.frames.pop();
                    inner.frames.remove(&frame_id);
                }
            }
        }
    }

    pub fn set_frame_result(&self, frame_id: i64, result: serde_json::Value) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(frame) = inner.frames.get_mut(&frame_id) {
            frame.task_result = Some(result);
        }
    }

    /// Mutates `name` inside `frame_id`'s `__task_args__` object in place,
    /// backing a `SetVariable` on the "Module Options" scope (§4.5.3).
    /// Returns `false` if the frame is gone or its args aren't an object.
    pub fn set_task_arg(&self, frame_id: i64, name: &str, value: serde_json::Value) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(frame) = inner.frames.get_mut(&frame_id) else {
            return false;
        };
        let Some(serde_json::Value::Object(args)) = frame.task_vars.get_mut("__task_args__")
        else {
            return false;
        };
        args.insert(name.to_string(), value);
        true
    }

    /// Mutates a top-level `ansible_`-prefixed key in `frame_id`'s task vars
    /// in place, backing a `SetVariable` on the "Host Variables" scope
    /// (§4.5.3). Returns `false` if the frame is gone or its vars aren't an
    /// object.
    pub fn set_host_var(&self, frame_id: i64, name: &str, value: serde_json::Value) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(frame) = inner.frames.get_mut(&frame_id) else {
            return false;
        };
        let serde_json::Value::Object(vars) = &mut frame.task_vars else {
            return false;
        };
        vars.insert(name.to_string(), value);
        true
    }

    pub fn frame(&self, frame_id: i64) -> Option<StackFrame> {
        self.inner.lock().unwrap().frames.get(&frame_id).cloned()
    }

    pub fn stack_frames(&self, thread_id: i64) -> Vec<StackFrame> {
        let inner = self.inner.lock().unwrap();
        let Some(thread) = inner.threads.get(&thread_id) else {
            return Vec::new();
        };
        thread
            .frames
            .iter()
            .rev()
            .filter_map(|id| inner.frames.get(id).cloned())
            .collect()
    }

    /// Whether an ancestor frame on `thread_id` belongs to `task_uuid`,
    /// used by `StepOut` to decide whether the stepping anchor is still an
    /// ancestor of the current task (§4.5.2).
    pub fn is_ancestor(&self, thread_id: i64, task_uuid: uuid::Uuid) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(thread) = inner.threads.get(&thread_id) else {
            return false;
        };
        thread
            .frames
            .iter()
            .filter_map(|id| inner.frames.get(id))
            .any(|f| f.task_uuid == task_uuid)
    }

    pub fn step_state(&self, thread_id: i64) -> Option<StepState> {
        let inner = self.inner.lock().unwrap();
        inner.waiting.get(&thread_id).cloned().flatten()
    }

    /// Suspends the calling (strategy worker) thread until it is released
    /// by `release` or the controller tears down via `end_all`. Returns the
    /// step state stashed for the *next* task, if any.
    pub fn suspend(&self, thread_id: i64, pending_step: Option<StepState>) -> Option<StepState> {
        let mut inner = self.inner.lock().unwrap();
        if inner.ended {
            return pending_step;
        }
        inner.waiting.insert(thread_id, pending_step);
        while inner.waiting.contains_key(&thread_id) && !inner.ended {
            inner = self.cond.wait(inner).unwrap();
        }
        inner.waiting.remove(&thread_id).flatten()
    }

    pub fn is_waiting(&self, thread_id: i64) -> bool {
        self.inner.lock().unwrap().waiting.contains_key(&thread_id)
    }

    pub fn waiting_thread_ids(&self) -> Vec<i64> {
        self.inner.lock().unwrap().waiting.keys().copied().collect()
    }

    /// Releases exactly the named threads (a specific id, or every waiting
    /// thread for `None`/`all_threads`), matching §3's "wakes exactly the
    /// set of threads named by the request".
    pub fn release(&self, thread_id: Option<i64>) {
        let mut inner = self.inner.lock().unwrap();
        match thread_id {
            Some(id) => {
                inner.waiting.remove(&id);
            }
            None => {
                inner.waiting.clear();
            }
        }
        self.cond.notify_all();
    }

    /// Wakes every suspended thread unconditionally, for teardown (§4.5.4):
    /// `waiting_ended=true` so workers unwind without further action.
    pub fn end_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.ended = true;
        inner.waiting.clear();
        self.cond.notify_all();
    }
}
