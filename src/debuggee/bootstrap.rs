//! Wiring between the §4.3 transport and an [`AnsibleDebugger`] for §6.3's
//! `listen`/`connect` entry points.
//!
//! Building an `AnsibleDebugger` doesn't, on its own, answer any DAP
//! request: something has to bind or dial the socket, construct the
//! controller, and hook it up as both a [`TransportHandler`] (inbound
//! requests) and an [`Outbound`] (outbound responses/events). This module is
//! that glue, so `src/cli.rs`'s `listen`/`connect` subcommands and any
//! embedding strategy adapter share one bootstrap path instead of each
//! reimplementing it. Wiring the resulting controller into an actual running
//! playbook engine — the `StrategyHost`/`TemplateEngine` side of §6.7 — is
//! the embedding engine's job, not this crate's.

use std::sync::Arc;

use crate::adapter::DebugMessage;
use crate::debuggee::controller::{AnsibleDebugger, Outbound};
use crate::error::{Error, Result};
use crate::socket::{
    create_client_tls_context, create_server_tls_context, server_name, Addr, CancellableStream,
    CancellationToken, ClientVerify, RawStream,
};
use crate::transport::{ClientQueue, PeerId, ServerQueue, TransportHandler};

/// `ANSIBUG_TLS_KEY_PASS` (§6.5): password for an encrypted private key file.
/// Read but, since [`crate::socket::tls`] only loads unencrypted PKCS#8/RSA
/// keys via `rustls_pemfile`, only consulted to reject an encrypted key file
/// with a clear error rather than silently misloading it.
pub const TLS_KEY_PASS_VAR: &str = "ANSIBUG_TLS_KEY_PASS";

/// Bridges the §4.3 transport's request delivery into [`AnsibleDebugger::handle_request`].
struct ControllerHandler {
    debugger: Arc<AnsibleDebugger>,
}

impl TransportHandler<DebugMessage> for ControllerHandler {
    fn on_msg_received(&self, _peer: PeerId, msg: DebugMessage) {
        match msg {
            DebugMessage::Request(req) => self.debugger.handle_request(req),
            other => log::warn!("debuggee received unexpected non-request message: {other:?}"),
        }
    }

    fn connection_made(&self, _peer: PeerId) {
        log::debug!("adapter connected");
    }

    fn connection_closed(&self, _peer: PeerId, err: Option<Error>) {
        if let Some(e) = err {
            log::warn!("adapter connection closed: {e}");
        } else {
            log::debug!("adapter connection closed");
        }
        self.debugger.shutdown();
    }
}

struct ClientOutbound(Arc<ClientQueue<DebugMessage>>);

impl Outbound for ClientOutbound {
    fn send(&self, msg: DebugMessage) -> Result<()> {
        self.0.send(&msg)
    }
}

struct ServerOutbound {
    server: Arc<ServerQueue<DebugMessage>>,
    peer: PeerId,
}

impl Outbound for ServerOutbound {
    fn send(&self, msg: DebugMessage) -> Result<()> {
        self.server.send(self.peer, &msg)
    }
}

/// TLS material for the server (`listen`) side of the handshake.
pub struct ServerTlsConfig<'a> {
    pub certfile: &'a std::path::Path,
    pub keyfile: Option<&'a std::path::Path>,
    pub client_ca: Option<&'a std::path::Path>,
}

/// TLS material for the client (`connect`) side of the handshake.
pub struct ClientTlsConfig<'a> {
    pub verify: ClientVerify,
    pub client_cert: Option<(&'a std::path::Path, Option<&'a std::path::Path>)>,
}

/// `listen` mode (§6.3): binds a server for the adapter to attach to,
/// returning the controller and the bound queue alongside the address it
/// ended up on (useful when `--addr` asked for an auto-assigned port).
///
/// The caller is responsible for the discovery file (`discovery::write_pid_info`)
/// once the address is known, and for deleting it again on exit (§6.4).
pub fn bootstrap_listen(
    addr: &Addr,
    tls: Option<ServerTlsConfig>,
) -> Result<(Arc<AnsibleDebugger>, Arc<ServerQueue<DebugMessage>>, Addr)> {
    let debugger = Arc::new(AnsibleDebugger::new());
    let (server, local_addr) = ServerQueue::<DebugMessage>::bind(addr)?;

    let handler: Arc<dyn TransportHandler<DebugMessage>> =
        Arc::new(ControllerHandler { debugger: debugger.clone() });

    if let Some(tls) = tls {
        let config = Arc::new(create_server_tls_context(
            tls.certfile,
            tls.keyfile,
            tls.client_ca,
        )?);
        server.serve_tls(config, handler.clone());
    } else {
        server.serve(handler.clone());
    }

    debugger.bind_outbound(Box::new(ServerOutbound {
        server: server.clone(),
        peer: PeerId(0),
    }));

    Ok((debugger, server, local_addr))
}

/// `connect` mode (§6.3): dials an already-bound adapter socket (the one the
/// broker bound in `handle_launch`) and returns the controller wired up to
/// it.
pub fn bootstrap_connect(
    addr: &Addr,
    tls: Option<ClientTlsConfig>,
) -> Result<(Arc<AnsibleDebugger>, Arc<ClientQueue<DebugMessage>>)> {
    let debugger = Arc::new(AnsibleDebugger::new());
    let handler: Arc<dyn TransportHandler<DebugMessage>> =
        Arc::new(ControllerHandler { debugger: debugger.clone() });

    let queue = if let Some(tls) = tls {
        let config = create_client_tls_context(&tls.verify, tls.client_cert.map(|(c, k)| (c, k, None)))?;
        let host = match addr {
            Addr::Tcp { host, .. } => host.clone(),
            Addr::Uds(path) => path.to_string_lossy().into_owned(),
        };
        let token = CancellationToken::new();
        let raw = RawStream::connect(addr, &token)?;
        let stream =
            CancellableStream::wrap_tls_client(raw, Arc::new(config), server_name(&host)?, &token)?;
        ClientQueue::from_stream(stream, token, handler)?
    } else {
        ClientQueue::connect(addr, handler)?
    };

    let queue = Arc::new(queue);
    debugger.bind_outbound(Box::new(ClientOutbound(queue.clone())));
    Ok((debugger, queue))
}

/// Blocks the calling (sentinel) listener for the launch-cancel socket
/// wrapper's own reciprocal: `ansibug __launch-cancel-notify <path>` (the
/// hidden subcommand `launch.rs`'s generated script execs on exit) connects
/// to it once and disconnects. Used only by `src/cli.rs`.
pub fn notify_cancel_socket(path: &std::path::Path) -> Result<()> {
    use std::os::unix::net::UnixStream;
    UnixStream::connect(path)?;
    Ok(())
}
