//! Address parsing for the `tcp://` and `uds://` schemes used throughout the
//! adapter/debuggee wire-up (§4.2, §6.3).

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A parsed socket endpoint, independent of whether it is used to bind or to
/// connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    /// `tcp://host:port`. `host` is empty for a bind-all address
    /// (`tcp://:port`).
    Tcp { host: String, port: u16 },
    /// `uds:///abs/path`, `uds://relative/path`, or an auto-generated path
    /// under `TMPDIR` when no path was given (`uds://`).
    Uds(PathBuf),
}

impl Addr {
    /// Parses one of the two supported schemes.
    ///
    /// - `tcp://host:port` — `host` may be an IPv6 literal in brackets.
    /// - `tcp://:port` — binds all interfaces.
    /// - `uds://path` — absolute or relative to [`std::env::temp_dir`].
    /// - `uds://` — a fresh unique path is generated under the temp dir.
    pub fn parse(s: &str) -> Result<Addr> {
        if let Some(rest) = s.strip_prefix("tcp://") {
            return Self::parse_tcp(rest);
        }
        if let Some(rest) = s.strip_prefix("uds://") {
            return Ok(Self::parse_uds(rest));
        }
        Err(Error::ConfigError(
            s.to_string(),
            "expected tcp:// or uds:// address".into(),
        ))
    }

    fn parse_tcp(rest: &str) -> Result<Addr> {
        if let Some(bracket_end) = rest.strip_prefix('[') {
            let (host, port) = bracket_end.split_once("]:").ok_or_else(|| {
                Error::ConfigError(rest.to_string(), "malformed IPv6 tcp address".into())
            })?;
            let port = port
                .parse()
                .map_err(|_| Error::ConfigError(rest.to_string(), "invalid port".into()))?;
            return Ok(Addr::Tcp {
                host: host.to_string(),
                port,
            });
        }

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::ConfigError(rest.to_string(), "missing port".into()))?;
        let port = port
            .parse()
            .map_err(|_| Error::ConfigError(rest.to_string(), "invalid port".into()))?;
        Ok(Addr::Tcp {
            host: host.to_string(),
            port,
        })
    }

    fn parse_uds(rest: &str) -> Addr {
        if rest.is_empty() {
            let unique = format!("ansibug-{}.sock", uuid::Uuid::new_v4());
            return Addr::Uds(temp_dir().join(unique));
        }

        let path = Path::new(rest);
        if path.is_absolute() {
            Addr::Uds(path.to_path_buf())
        } else {
            Addr::Uds(temp_dir().join(path))
        }
    }

    /// True when this is a bind-all TCP address (`tcp://:port`).
    pub fn is_bind_all(&self) -> bool {
        matches!(self, Addr::Tcp { host, .. } if host.is_empty())
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Addr::Tcp { host, port } if host.contains(':') => write!(f, "tcp://[{host}]:{port}"),
            Addr::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Addr::Uds(path) => write!(f, "uds://{}", path.display()),
        }
    }
}

/// `TMPDIR` env var if set, else the platform default (§6.5).
pub fn temp_dir() -> PathBuf {
    std::env::var_os("TMPDIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}
