//! Local/remote path mapping (§4.6).
//!
//! A client debugging a playbook that runs on a different host (or inside a
//! container) configures one or more `local_root`/`remote_root` pairs so
//! that breakpoints set against the client's view of the filesystem can be
//! translated to the paths the debuggee actually sees, and vice versa for
//! stack frames reported back to the client.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One local/remote root pair, as sent in `DebugConfiguration`'s
/// `pathMappings` (and accepted on `AttachArguments`/`LaunchArguments`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    #[serde(rename = "localRoot")]
    pub local_root: String,
    #[serde(rename = "remoteRoot")]
    pub remote_root: String,
}

/// Translates paths between a client's and a debuggee's view of the
/// filesystem using longest-prefix-wins matching, in either direction.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    mappings: Vec<PathMapping>,
}

impl PathMapper {
    pub fn new(mappings: Vec<PathMapping>) -> Self {
        PathMapper { mappings }
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Maps a path known on the client side to its debuggee-side equivalent.
    pub fn to_remote(&self, local: &Path) -> PathBuf {
        self.translate(local, |m| &m.local_root, |m| &m.remote_root)
    }

    /// Maps a path known on the debuggee side to its client-side
    /// equivalent, for stack frames and breakpoint verification events.
    pub fn to_local(&self, remote: &Path) -> PathBuf {
        self.translate(remote, |m| &m.remote_root, |m| &m.local_root)
    }

    fn translate(
        &self,
        path: &Path,
        from: impl Fn(&PathMapping) -> &str,
        to: impl Fn(&PathMapping) -> &str,
    ) -> PathBuf {
        let path_str = path.to_string_lossy();

        let best = self
            .mappings
            .iter()
            .filter(|m| path_str.starts_with(from(m).as_ref() as &str))
            .max_by_key(|m| from(m).len());

        match best {
            Some(m) => {
                let suffix = &path_str[from(m).len()..];
                let mut mapped = PathBuf::from(to(m));
                if !suffix.is_empty() {
                    mapped.push(suffix.trim_start_matches(['/', '\\']));
                }
                mapped
            }
            None => path.to_path_buf(),
        }
    }
}
