//! Variable registry, scope enumeration, and the `Evaluate`/`SetVariable`
//! protocol (§4.5.3).
//!
//! A [`Variable`] exposes a lazily-computed sequence of `(name, value, type)`
//! child triples through a `getter` closure; container children are only
//! materialized into their own registry entry when the client actually asks
//! for them via `Variables(ref)`, matching §4.5.3's "created on demand, not
//! eagerly".

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::{Error, Result};

/// One child exposed by a variable's getter.
#[derive(Debug, Clone)]
pub struct Child {
    pub name: String,
    pub value: Value,
    pub type_name: String,
}

/// A lazily-expandable value in the variable tree. `getter` re-derives its
/// children from the live task/host/global state each time it is asked,
/// rather than caching a snapshot, so `Variables` always reflects the
/// current state of the frame it belongs to.
pub struct Variable {
    pub id: i64,
    pub stackframe_id: i64,
    pub getter: Box<dyn Fn() -> Vec<Child> + Send + Sync>,
    pub setter: Option<Box<dyn Fn(&str, Value) -> Result<()> + Send + Sync>>,
}

#[derive(Default)]
struct Registry {
    variables: HashMap<i64, VariableEntry>,
    next_id: i64,
}

struct VariableEntry {
    stackframe_id: i64,
    getter: Box<dyn Fn() -> Vec<Child> + Send + Sync>,
    setter: Option<Box<dyn Fn(&str, Value) -> Result<()> + Send + Sync>>,
}

/// Registry of lazily-expanded variables, keyed by the `variables_reference`
/// handed out to the client. IDs are flat integer handles rather than
/// pointers (§9's "reference cycles" note) so serialization is trivial and
/// the registry can be torn down per-frame without worrying about cycles.
#[derive(Default)]
pub struct VariableRegistry {
    inner: Mutex<Registry>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new variable and returns its id (never `0`, which DAP
    /// reserves to mean "this variable has no children").
    pub fn register(
        &self,
        stackframe_id: i64,
        getter: Box<dyn Fn() -> Vec<Child> + Send + Sync>,
        setter: Option<Box<dyn Fn(&str, Value) -> Result<()> + Send + Sync>>,
    ) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id + 1;
        inner.next_id = id;
        inner.variables.insert(
            id,
            VariableEntry {
                stackframe_id,
                getter,
                setter,
            },
        );
        id
    }

    /// Drops every variable registered against `stackframe_id`, called when
    /// a stack frame is popped so its variable handles don't outlive it.
    pub fn clear_frame(&self, stackframe_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.variables.retain(|_, v| v.stackframe_id != stackframe_id);
    }

    pub fn children(&self, reference: i64) -> Result<Vec<Child>> {
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .variables
            .get(&reference)
            .ok_or_else(|| Error::Internal(format!("unknown variables_reference {reference}")))?;
        Ok((entry.getter)())
    }

    pub fn set(&self, reference: i64, name: &str, value: Value) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .variables
            .get(&reference)
            .ok_or_else(|| Error::Internal(format!("unknown variables_reference {reference}")))?;
        match &entry.setter {
            Some(setter) => setter(name, value),
            None => Err(Error::StrategyError(format!(
                "variable '{name}' has no registered setter"
            ))),
        }
    }
}

/// The five scope kinds a stack frame may expose (§4.5.3). `ModuleResult`
/// is present only when the frame stopped on a failure/skip/unreachable
/// exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    ModuleResult,
    ModuleOptions,
    TaskVariables,
    HostVariables,
    GlobalVariables,
}

impl ScopeKind {
    pub fn name(self) -> &'static str {
        match self {
            ScopeKind::ModuleResult => "Module Result",
            ScopeKind::ModuleOptions => "Module Options",
            ScopeKind::TaskVariables => "Task Variables",
            ScopeKind::HostVariables => "Host Variables",
            ScopeKind::GlobalVariables => "Global Variables",
        }
    }

    pub fn expensive(self) -> bool {
        matches!(self, ScopeKind::HostVariables | ScopeKind::GlobalVariables)
    }
}

/// A parsed `!`-prefixed REPL meta command (§4.5.3, §11).
#[derive(Debug, Clone, PartialEq)]
pub enum MetaCommand {
    SetOption { name: String, expr: String },
    RemoveOption { name: String },
    SetHostVar { name: String, expr: String },
    Template { expr: String },
}

/// Parses a `repl`-context expression that starts with `!` into one of the
/// supported meta commands. Returns `None` for a bare (non-`!`) expression,
/// which the caller should instead template normally.
pub fn parse_meta_command(expr: &str) -> Result<Option<MetaCommand>> {
    let Some(rest) = expr.strip_prefix('!') else {
        return Ok(None);
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or("").trim();
    let args = parts.next().unwrap_or("").trim();

    match verb {
        "set_option" | "so" => {
            let (name, expr) = args.split_once(char::is_whitespace).ok_or_else(|| {
                Error::MalformedMessage(format!("!{verb} requires NAME EXPR"))
            })?;
            Ok(Some(MetaCommand::SetOption {
                name: name.to_string(),
                expr: expr.trim().to_string(),
            }))
        }
        "remove_option" | "ro" => {
            if args.is_empty() {
                return Err(Error::MalformedMessage(format!("!{verb} requires NAME")));
            }
            Ok(Some(MetaCommand::RemoveOption {
                name: args.to_string(),
            }))
        }
        "set_hostvar" | "sh" => {
            let (name, expr) = args.split_once(char::is_whitespace).ok_or_else(|| {
                Error::MalformedMessage(format!("!{verb} requires NAME EXPR"))
            })?;
            Ok(Some(MetaCommand::SetHostVar {
                name: name.to_string(),
                expr: expr.trim().to_string(),
            }))
        }
        "template" | "t" => {
            if args.is_empty() {
                return Err(Error::MalformedMessage(format!("!{verb} requires EXPR")));
            }
            Ok(Some(MetaCommand::Template {
                expr: args.to_string(),
            }))
        }
        other => Err(Error::MalformedMessage(format!(
            "unknown meta command '!{other}'"
        ))),
    }
}
