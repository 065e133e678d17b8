//! Command-line surface (§6.3, informative): `dap` runs the adapter over
//! stdio; `listen`/`connect` bootstrap the debuggee side of a session around
//! a user-supplied playbook command.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use base64::Engine;
use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::adapter::Broker;
use crate::debuggee::bootstrap::{self, ServerTlsConfig};
use crate::error::{Error, Result};
use crate::socket::Addr;

#[derive(Parser, Debug)]
#[command(name = "ansibug", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the debug adapter over stdio.
    Dap {
        #[arg(long)]
        log_file: Option<PathBuf>,
        #[arg(long, default_value = "info")]
        log_level: String,
    },

    /// Bind a socket for an adapter to attach to, then run a playbook
    /// command.
    Listen {
        #[arg(long)]
        addr: Option<String>,
        /// Exec the playbook command immediately instead of waiting for an
        /// adapter to attach first.
        #[arg(long)]
        no_wait: bool,
        #[arg(long)]
        wrap_tls: bool,
        #[arg(long)]
        tls_cert: Option<PathBuf>,
        #[arg(long)]
        tls_key: Option<PathBuf>,
        #[arg(long, env = "ANSIBUG_TLS_KEY_PASS")]
        tls_key_pass: Option<String>,
        #[arg(long)]
        tls_client_ca: Option<PathBuf>,
        #[arg(long)]
        log_file: Option<PathBuf>,
        #[arg(long, default_value = "info")]
        log_level: String,
        #[arg(last = true)]
        playbook_args: Vec<String>,
    },

    /// Dial an adapter-bound socket, then run a playbook command.
    Connect {
        #[arg(long)]
        addr: String,
        /// Exec the playbook command immediately instead of waiting for the
        /// connection to the adapter to complete.
        #[arg(long)]
        no_wait: bool,
        #[arg(long)]
        log_file: Option<PathBuf>,
        #[arg(long, default_value = "info")]
        log_level: String,
        #[arg(last = true)]
        playbook_args: Vec<String>,
    },

    /// Hidden: invoked by the launch-cancel shell wrapper (`adapter::launch`)
    /// on exit, so `ansibug launch` can tell a playbook process died before
    /// it ever connected back.
    #[command(name = "__launch-cancel-notify", hide = true)]
    LaunchCancelNotify { sock_b64: String },
}

fn parse_log_level(s: &str) -> LevelFilter {
    match s {
        "debug" => LevelFilter::Debug,
        "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// Installs the process-wide logger (§9's "no stdout chatter" constraint:
/// `dap` mode's stdout carries the DAP framing, so diagnostics only ever go
/// to a file or stderr, never mixed into the protocol stream).
fn init_logging(log_file: &Option<PathBuf>, level: LevelFilter) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    } else {
        builder.target(env_logger::Target::Stderr);
    }

    let logger = builder.build();
    let filter = logger.filter();
    crate::log::LOGGER_SWITCHER.switch(logger, filter);
    Ok(())
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli.command) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e}");
            eprintln!("ansibug: {e}");
            ExitCode::from(1)
        }
    }
}

fn dispatch(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Dap { log_file, log_level } => {
            init_logging(&log_file, parse_log_level(&log_level))?;
            run_dap()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Listen {
            addr,
            no_wait,
            wrap_tls,
            tls_cert,
            tls_key,
            tls_key_pass,
            tls_client_ca,
            log_file,
            log_level,
            playbook_args,
        } => {
            init_logging(&log_file, parse_log_level(&log_level))?;
            run_listen(
                addr,
                no_wait,
                wrap_tls,
                tls_cert,
                tls_key,
                tls_key_pass,
                tls_client_ca,
                playbook_args,
            )
        }
        Command::Connect {
            addr,
            no_wait,
            log_file,
            log_level,
            playbook_args,
        } => {
            init_logging(&log_file, parse_log_level(&log_level))?;
            run_connect(addr, no_wait, playbook_args)
        }
        Command::LaunchCancelNotify { sock_b64 } => {
            run_launch_cancel_notify(&sock_b64);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_dap() -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut broker = Broker::new(stdin.lock(), stdout.lock());
    broker.run()
}

#[allow(clippy::too_many_arguments)]
fn run_listen(
    addr: Option<String>,
    no_wait: bool,
    wrap_tls: bool,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
    tls_key_pass: Option<String>,
    tls_client_ca: Option<PathBuf>,
    playbook_args: Vec<String>,
) -> anyhow::Result<ExitCode> {
    if playbook_args.is_empty() {
        anyhow::bail!("listen requires a playbook command after `--`");
    }

    let addr = Addr::parse(addr.as_deref().unwrap_or("uds://"))?;

    let tls = if wrap_tls {
        let certfile = tls_cert
            .as_deref()
            .ok_or_else(|| Error::ConfigError("--tls-cert".into(), "required with --wrap-tls".into()))?;
        if tls_key_pass.is_some() {
            anyhow::bail!(
                "encrypted private keys are not supported; provide an unencrypted --tls-key"
            );
        }
        Some(ServerTlsConfig {
            certfile,
            keyfile: tls_key.as_deref(),
            client_ca: tls_client_ca.as_deref(),
        })
    } else {
        None
    };

    let (debugger, server, local_addr) = bootstrap::bootstrap_listen(&addr, tls)?;
    let pid = std::process::id();
    crate::adapter::discovery::write_pid_info(
        pid,
        &crate::adapter::discovery::PlaybookProcessInfo {
            address: local_addr.to_string(),
            use_tls: wrap_tls,
        },
    )?;
    log::info!("listening on {local_addr}, discovery file written for pid {pid}");

    if !no_wait {
        log::info!("waiting for an adapter to attach before running the playbook");
        while server_peer_count(&server) == 0 {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
    }

    let status = spawn_playbook(&playbook_args);

    debugger.shutdown();
    server.stop();
    let _ = std::fs::remove_file(crate::adapter::discovery::pid_info_path(pid));

    status
}

fn server_peer_count(server: &std::sync::Arc<crate::transport::ServerQueue<crate::adapter::DebugMessage>>) -> usize {
    server.peer_count()
}

/// `connect` has no `--tls-*` surface of its own (it is only ever invoked
/// by the broker's own `launch` race over a plain UDS socket, §4.4, or by a
/// user attaching to a `listen --wrap-tls` peer directly over TCP — in
/// which case plain is still correct since TLS there terminates on the
/// *adapter's* attach, not here), so it always connects plain.
fn run_connect(addr: String, no_wait: bool, playbook_args: Vec<String>) -> anyhow::Result<ExitCode> {
    if playbook_args.is_empty() {
        anyhow::bail!("connect requires a playbook command after `--`");
    }

    let addr = Addr::parse(&addr)?;

    let debugger = if no_wait {
        let addr_bg = addr.clone();
        std::thread::spawn(move || {
            let _ = bootstrap::bootstrap_connect(&addr_bg, None);
        });
        None
    } else {
        let (debugger, _queue) = bootstrap::bootstrap_connect(&addr, None)?;
        Some(debugger)
    };

    let status = spawn_playbook(&playbook_args);

    if let Some(debugger) = debugger {
        debugger.shutdown();
    }

    status
}

fn spawn_playbook(args: &[String]) -> anyhow::Result<ExitCode> {
    let (program, rest) = args.split_first().expect("checked non-empty by caller");
    let status = std::process::Command::new(program).args(rest).status()?;
    Ok(exit_code_from_status(status))
}

#[cfg(unix)]
fn exit_code_from_status(status: std::process::ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;
    let code = status.code().unwrap_or_else(|| 128 + status.signal().unwrap_or(0));
    ExitCode::from(code as u8)
}

#[cfg(not(unix))]
fn exit_code_from_status(status: std::process::ExitStatus) -> ExitCode {
    ExitCode::from(status.code().unwrap_or(1) as u8)
}

fn run_launch_cancel_notify(sock_b64: &str) {
    let Ok(path_bytes) = base64::engine::general_purpose::STANDARD.decode(sock_b64) else {
        return;
    };
    let Ok(path) = String::from_utf8(path_bytes) else {
        return;
    };
    let _ = bootstrap::notify_cancel_socket(std::path::Path::new(&path));
}
