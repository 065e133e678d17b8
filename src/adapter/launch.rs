//! Launch sentinel script (§4.4).
//!
//! `launch` spawns `ansible-playbook` indirectly through a throw-away shell
//! script rather than directly, for two reasons: the user's terminal shows a
//! plain command instead of ansibug's internals, and a `trap ... EXIT` in the
//! script lets the adapter detect the process exiting before it ever
//! connected back (e.g. a typo'd playbook path) instead of just timing out.

use std::io::Write;
use std::path::PathBuf;

use base64::Engine;

use crate::error::Result;
use crate::socket::Addr;

/// Writes a self-deleting, self-monitoring launch script to a fresh temp
/// file and returns its path. `cancel_addr` is the UDS socket the script
/// connects to on exit (successful or not) so the adapter can tell the
/// process ended before it reached our real debuggee socket.
pub fn write_launch_script(cancel_addr: &Addr) -> Result<PathBuf> {
    let Addr::Uds(cancel_path) = cancel_addr else {
        panic!("launch cancel address must be a UDS path");
    };

    let sock_b64 = base64::engine::general_purpose::STANDARD
        .encode(cancel_path.to_string_lossy().as_bytes());
    let ansibug = current_exe_path();

    let script = format!(
        r#"#!/bin/sh
set -e

cleanup () {{
    SN="{sock_b64}"
    {ansibug} __launch-cancel-notify "$SN"
}}

trap cleanup EXIT INT ABRT KILL TERM

rm -f "$0"
exec "$@"
"#,
        sock_b64 = sock_b64,
        ansibug = ansibug,
    );

    let mut tmp = tempfile::Builder::new()
        .prefix("ansibug-launch-")
        .tempfile()?;
    tmp.write_all(script.as_bytes())?;
    let (_, path) = tmp.keep().map_err(|e| e.error)?;

    let mut perms = std::fs::metadata(&path)?.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o700);
    }
    std::fs::set_permissions(&path, perms)?;

    Ok(path)
}

/// Path to this same binary, re-invoked with a hidden subcommand to notify
/// the cancel socket on exit.
fn current_exe_path() -> String {
    std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "ansibug".to_string())
}
