//! A synthetic "playbook" embedding [`ansibug`] directly, the way a real
//! playbook engine would drive the controller from its own execution loop
//! instead of spawning a separate process (§6.7's `StrategyHost`/`DebugState`
//! seam). Run it, then point a DAP client's `ansibug dap` at `attach
//! {"processId": <this pid>}` before it exits.
//!
//! Two hosts each run a two-task play; a breakpoint set on the second task's
//! line (once the IDE discovers it from the printed source map) suspends the
//! host thread until `Continue` is sent, exactly like §8 scenario 4.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ansibug::adapter::discovery::{self, PlaybookProcessInfo};
use ansibug::debuggee::bootstrap;
use ansibug::debuggee::controller::AnsibleDebugger;
use ansibug::debuggee::strategy::{DebugState, StrategyHost, TaskInfo, TaskOutcome, TemplateEngine};
use ansibug::error::Result;
use ansibug::socket::Addr;
use serde_json::{json, Value};

/// A templating stand-in that understands only bare `true`/`false` literals
/// and otherwise echoes the expression back as a string - enough to exercise
/// breakpoint conditions and `Evaluate` without an actual Jinja engine,
/// which is explicitly out of scope (§1's Non-goals).
struct ToyTemplateEngine;

impl TemplateEngine for ToyTemplateEngine {
    fn template(&self, expr: &str, _task_vars: &Value, native: bool, _fail_on_undefined: bool) -> Result<Value> {
        let trimmed = expr.trim();
        if native {
            match trimmed {
                "true" => return Ok(json!(true)),
                "false" => return Ok(json!(false)),
                _ => {}
            }
            if let Ok(n) = trimmed.parse::<i64>() {
                return Ok(json!(n));
            }
        }
        Ok(json!(trimmed))
    }
}

struct ToyStrategyHost(Arc<dyn TemplateEngine>);

impl StrategyHost for ToyStrategyHost {
    fn template_engine(&self) -> Arc<dyn TemplateEngine> {
        self.0.clone()
    }
}

fn task(path: &str, line: i64, name: &str, action: &str) -> TaskInfo {
    TaskInfo {
        uuid: uuid::Uuid::new_v4(),
        parent_uuid: None,
        path: Some(path.to_string()),
        line: Some(line),
        name: name.to_string(),
        action: action.to_string(),
        args: json!({}),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env().filter_level(log::LevelFilter::Info).init();

    let addr = Addr::parse("uds://")?;
    let (debugger, server, local_addr) = bootstrap::bootstrap_listen(&addr, None)?;

    let pid = std::process::id();
    discovery::write_pid_info(
        pid,
        &PlaybookProcessInfo {
            address: local_addr.to_string(),
            use_tls: false,
        },
    )?;
    log::info!("demo playbook pid {pid} listening on {local_addr}; attach with processId={pid}");

    debugger.bind_strategy(Arc::new(ToyStrategyHost(Arc::new(ToyTemplateEngine))));

    log::info!("waiting 2s for a debug adapter to attach");
    thread::sleep(Duration::from_secs(2));

    let play = vec![
        task("/demo/site.yml", 2, "say hello", "debug"),
        task("/demo/site.yml", 4, "say goodbye", "debug"),
    ];
    debugger.register_play(&play);

    let hosts = ["web1", "web2"];
    let workers: Vec<_> = hosts
        .iter()
        .map(|host| {
            let debugger = debugger.clone();
            let play = play.clone();
            let host = host.to_string();
            thread::spawn(move || run_host(&debugger, &host, &play))
        })
        .collect();

    for worker in workers {
        let _ = worker.join();
    }

    debugger.shutdown();
    server.stop();
    let _ = std::fs::remove_file(discovery::pid_info_path(pid));
    Ok(())
}

fn run_host(debugger: &Arc<AnsibleDebugger>, host: &str, play: &[TaskInfo]) {
    for task in play {
        if let Err(e) = debugger.process_task(host, task, json!({ "inventory_hostname": host })) {
            log::warn!("{host}: process_task failed: {e}");
            return;
        }
        let result = json!({ "changed": false, "msg": format!("{} ran on {host}", task.name) });
        if let Err(e) = debugger.process_task_result(host, task, TaskOutcome::Ok, result) {
            log::warn!("{host}: process_task_result failed: {e}");
            return;
        }
    }
}
