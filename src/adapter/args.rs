//! `attach`/`launch` request argument parsing (§4.4).

use std::path::PathBuf;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::pathmap::PathMapping;
use crate::socket::ClientVerify;

fn get_str(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn get_path_mappings(data: &Value) -> Vec<PathMapping> {
    data.get("pathMappings")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|m| {
                    Some(PathMapping {
                        local_root: get_str(m, "localRoot")?,
                        remote_root: get_str(m, "remoteRoot")?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Arguments for an `attach` request: connect to an already-running
/// debuggee, either by PID lookup (§6.4) or a direct socket address.
#[derive(Debug, Clone)]
pub struct AttachArguments {
    pub process_id: Option<u32>,
    pub address: String,
    pub use_tls: bool,
    pub connect_timeout: std::time::Duration,
    pub tls_verification: ClientVerify,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub path_mappings: Vec<PathMapping>,
}

impl AttachArguments {
    pub fn from_json(data: &Value) -> Result<Self> {
        let use_tls = data
            .get("useTls")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let tls_verification = match data.get("tlsVerification").and_then(Value::as_str) {
            Some("ignore") => ClientVerify::Ignore,
            Some(path) if path != "verify" => ClientVerify::Ca(PathBuf::from(path)),
            _ => ClientVerify::Verify,
        };

        let address = get_str(data, "address").unwrap_or_default();
        let process_id = data
            .get("processId")
            .and_then(Value::as_u64)
            .map(|v| v as u32);

        if process_id.is_none() && address.is_empty() {
            return Err(Error::MalformedMessage(
                "expected processId or address to be specified for attach".into(),
            ));
        }

        Ok(AttachArguments {
            process_id,
            address,
            use_tls,
            connect_timeout: std::time::Duration::from_secs_f64(
                data.get("connectTimeout")
                    .and_then(Value::as_f64)
                    .unwrap_or(5.0),
            ),
            tls_verification,
            tls_cert: get_str(data, "tlsCertificate").map(PathBuf::from),
            tls_key: get_str(data, "tlsKey").map(PathBuf::from),
            path_mappings: get_path_mappings(data),
        })
    }
}

/// The console kind a `launch` request wants its `RunInTerminalRequest`
/// opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Integrated,
    External,
}

/// Arguments for a `launch` request: spawn a fresh `ansible-playbook`
/// process via the sentinel launch script (§4.4, §11).
#[derive(Debug, Clone)]
pub struct LaunchArguments {
    pub playbook: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub env: std::collections::HashMap<String, Option<String>>,
    pub console: Console,
    pub connect_timeout: std::time::Duration,
    pub path_mappings: Vec<PathMapping>,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
}

impl LaunchArguments {
    pub fn from_json(data: &Value) -> Result<Self> {
        let playbook = get_str(data, "playbook").ok_or_else(|| {
            Error::MalformedMessage("expected playbook to be specified for launch".into())
        })?;

        let console = match data.get("console").and_then(Value::as_str) {
            Some("externalTerminal") => Console::External,
            Some("integratedTerminal") | None => Console::Integrated,
            Some(other) => {
                return Err(Error::MalformedMessage(format!(
                    "unknown console value '{other}' - expected integratedTerminal or externalTerminal"
                )))
            }
        };

        let args = data
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default();

        let env = data
            .get("env")
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| (k.clone(), v.as_str().map(str::to_owned)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(LaunchArguments {
            playbook,
            args,
            cwd: get_str(data, "cwd").unwrap_or_default(),
            env,
            console,
            connect_timeout: std::time::Duration::from_secs_f64(
                data.get("connectTimeout")
                    .and_then(Value::as_f64)
                    .unwrap_or(5.0),
            ),
            path_mappings: get_path_mappings(data),
            log_file: get_str(data, "logFile").map(PathBuf::from),
            log_level: get_str(data, "logLevel").unwrap_or_else(|| "info".to_string()),
        })
    }
}
