//! Process discovery file (§6.4).
//!
//! A debuggee that listens for an adapter to attach writes a small JSON
//! file recording where it is listening, keyed by its own PID, so that an
//! `attach` request can find it with only a process ID.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::socket::addr::temp_dir;

/// Wire shape of the discovery file: `{"address": "<addr>", "use_tls": bool}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookProcessInfo {
    pub address: String,
    pub use_tls: bool,
}

/// `$TMPDIR/ANSIBUG-<pid>`, the file a listening debuggee writes and an
/// `attach --process-id` lookup reads.
pub fn pid_info_path(pid: u32) -> PathBuf {
    temp_dir().join(format!("ANSIBUG-{pid}"))
}

pub fn write_pid_info(pid: u32, info: &PlaybookProcessInfo) -> Result<()> {
    let path = pid_info_path(pid);
    let data = serde_json::to_vec(info)?;
    std::fs::write(path, data)?;
    Ok(())
}

pub fn read_pid_info(pid: u32) -> Result<PlaybookProcessInfo> {
    let path = pid_info_path(pid);
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}
