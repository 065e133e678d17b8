//! Debug adapter broker (§4.4): the 3-endpoint router sitting between the
//! DAP client (over stdio) and a debuggee (over a TCP/UDS socket).

pub mod args;
pub mod discovery;
pub mod launch;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use dap::events::Event;
use dap::requests::{Command, Request};
use dap::responses::{Response, ResponseBody};
use dap::types::Capabilities;
use serde::{Deserialize, Serialize};

use crate::dap::DapCodec;
use crate::error::{Error, Result};
use crate::pathmap::PathMapping;
use crate::socket::{
    create_client_tls_context, server_name, Addr, CancellableStream, CancellationToken, Listener,
    RawStream,
};
use crate::transport::{ClientQueue, PeerId, ServerQueue, TransportHandler};
use args::{AttachArguments, Console, LaunchArguments};

/// Wire message relayed between the broker and a debuggee over the §4.3
/// message queue transport: the debuggee speaks the same DAP vocabulary as
/// the client, just over a different pipe.
#[derive(Debug, Serialize, Deserialize)]
pub enum DebugMessage {
    Request(Request),
    Response(Response),
    Event(Event),
}

/// Broker lifecycle, matching §4.4's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Init,
    Initialized,
    Attaching,
    Launching,
    Running,
    Disconnecting,
    Terminated,
}

/// The debuggee half of the session, once connected: either we dialed out to
/// it (`attach`) or it dialed back in to us (`launch`, over the §4.3 server
/// this broker bound for the spawned playbook to connect to).
enum DebuggeeConn {
    Client(Arc<ClientQueue<DebugMessage>>),
    Server(Arc<ServerQueue<DebugMessage>>, PeerId),
}

impl DebuggeeConn {
    fn send(&self, msg: &DebugMessage) -> Result<()> {
        match self {
            DebuggeeConn::Client(q) => q.send(msg),
            DebuggeeConn::Server(s, peer) => s.send(*peer, msg),
        }
    }
}

/// The broker itself. Generic over the client transport (stdio in normal
/// operation, a TCP/UDS stream when driven over a socket per §6.3).
pub struct Broker<R: Read, W: Write> {
    client: DapCodec<R, W>,
    state: BrokerState,
    debuggee: Option<DebuggeeConn>,
    debuggee_server: Option<Arc<ServerQueue<DebugMessage>>>,
    incoming_requests: Arc<Mutex<HashMap<i64, Request>>>,
    terminated_sent: bool,
}

/// Forwards messages received from the debuggee back to the client, and
/// (for requests we forwarded rather than answered ourselves) retires the
/// matching entry in `incoming_requests` once its response actually arrives,
/// so `stop()`'s "error every outstanding request" pass doesn't re-error a
/// request that already completed.
struct DebuggeeRelay<W: Write> {
    output: Arc<Mutex<dap::server::ServerOutput<W>>>,
    incoming_requests: Arc<Mutex<HashMap<i64, Request>>>,
    /// Set only while a `launch` is racing the debuggee's first connection
    /// against the launch-cancel sentinel (§4.4); consumed the first time the
    /// debuggee actually connects.
    launched: Mutex<Option<mpsc::Sender<LaunchSignal>>>,
}

/// What ended the `launch` race: either the debuggee connected for real, or
/// the launch-cancel sentinel fired first (the spawned process exited before
/// it ever reached our socket).
enum LaunchSignal {
    Connected,
    Cancelled,
}

impl<W: Write + Send> TransportHandler<DebugMessage> for DebuggeeRelay<W> {
    fn on_msg_received(&self, _peer: PeerId, msg: DebugMessage) {
        if let DebugMessage::Response(r) = &msg {
            self.incoming_requests.lock().unwrap().remove(&r.request_seq);
        }

        let mut output = self.output.lock().unwrap();
        let result = match msg {
            DebugMessage::Response(r) => output.respond(r),
            DebugMessage::Event(e) => output.send_event(e),
            DebugMessage::Request(_) => {
                log::warn!("debuggee sent a Request, which the broker never expects");
                Ok(())
            }
        };
        if let Err(e) = result {
            log::error!("failed relaying debuggee message to client: {e}");
        }
    }

    fn connection_made(&self, _peer: PeerId) {
        log::debug!("debuggee connected");
        if let Some(tx) = self.launched.lock().unwrap().take() {
            let _ = tx.send(LaunchSignal::Connected);
        }
    }

    fn connection_closed(&self, _peer: PeerId, err: Option<Error>) {
        if let Some(e) = err {
            log::warn!("debuggee connection closed: {e}");
        } else {
            log::debug!("debuggee connection closed");
        }
    }
}

impl<R: Read, W: Write + Send + 'static> Broker<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Broker {
            client: DapCodec::new(input, output),
            state: BrokerState::Init,
            debuggee: None,
            debuggee_server: None,
            incoming_requests: Arc::new(Mutex::new(HashMap::new())),
            terminated_sent: false,
        }
    }

    /// Runs the broker loop until the client disconnects or the debuggee
    /// connection is lost, mirroring `DAServer.start`.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let req = match self.client.poll_request() {
                Ok(Some(req)) => req,
                Ok(None) => {
                    log::warn!("unexpected end of client input stream");
                    break;
                }
                Err(e) => {
                    log::error!("{e}");
                    continue;
                }
            };

            self.incoming_requests.lock().unwrap().insert(req.seq, req.clone());

            if let Command::Disconnect(_) = &req.command {
                self.state = BrokerState::Disconnecting;
                if let Some(debuggee) = &self.debuggee {
                    let _ = debuggee.send(&DebugMessage::Request(req.clone()));
                    self.await_disconnect_response(req.seq);
                }
                break;
            }

            let result = if self.debuggee.is_some() {
                self.forward_to_debuggee(req)
            } else {
                self.handle_local(req)
            };

            if let Err(e) = result {
                log::error!("internal error handling request: {e}");
                return self.stop(Some(e));
            }
        }

        self.stop(None)
    }

    fn forward_to_debuggee(&mut self, req: Request) -> Result<()> {
        let debuggee = self.debuggee.as_ref().expect("checked by caller");
        debuggee.send(&DebugMessage::Request(req))
    }

    /// Waits briefly for the debuggee's forwarded `DisconnectResponse` to
    /// remove `seq` from `incoming_requests` (done by `DebuggeeRelay` as the
    /// response arrives). If the debuggee never answers in time, `seq` stays
    /// in the map and `stop()`'s Disconnect fallback synthesizes the
    /// response instead, so the client's request is never left unanswered.
    fn await_disconnect_response(&self, seq: i64) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if !self.incoming_requests.lock().unwrap().contains_key(&seq) {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    fn handle_local(&mut self, req: Request) -> Result<()> {
        match &req.command {
            Command::Initialize(_) => {
                self.client.respond_success(
                    req.seq,
                    ResponseBody::Initialize(Capabilities {
                        supports_clipboard_context: Some(true),
                        supports_conditional_breakpoints: Some(true),
                        supports_configuration_done_request: Some(true),
                        supports_set_variable: Some(true),
                        supports_terminate_debuggee: Some(true),
                        supports_terminate_request: Some(true),
                        ..Default::default()
                    }),
                )?;
                self.state = BrokerState::Initialized;
            }
            Command::Attach(args) => {
                self.handle_attach(req.seq, args_value(args))?;
            }
            Command::Launch(args) => {
                self.handle_launch(req.seq, args_value(args))?;
            }
            _ => {
                self.client
                    .respond_error(req.seq, "no debuggee connected")?;
            }
        }
        self.incoming_requests.lock().unwrap().remove(&req.seq);
        Ok(())
    }

    fn handle_attach(&mut self, seq: i64, raw_args: serde_json::Value) -> Result<()> {
        self.state = BrokerState::Attaching;
        let attach_args = AttachArguments::from_json(&raw_args)?;

        let (addr_str, use_tls) = if let Some(pid) = attach_args.process_id {
            let info = discovery::read_pid_info(pid)?;
            (info.address, info.use_tls)
        } else {
            (attach_args.address.clone(), attach_args.use_tls)
        };
        let addr = Addr::parse(&addr_str)?;

        let handler = Arc::new(DebuggeeRelay {
            output: self.client.output(),
            incoming_requests: self.incoming_requests.clone(),
            launched: Mutex::new(None),
        });

        let queue = if use_tls {
            self.connect_tls(&addr, &attach_args, handler)?
        } else {
            ClientQueue::connect(&addr, handler)?
        };
        let queue = Arc::new(queue);
        self.debuggee = Some(DebuggeeConn::Client(queue.clone()));
        self.state = BrokerState::Running;

        self.client.respond_success(seq, ResponseBody::Attach)?;
        self.client.send_event(Event::Initialized)?;
        queue.send(&DebugMessage::Event(path_mapping_event(&attach_args.path_mappings)))?;
        Ok(())
    }

    fn connect_tls(
        &self,
        addr: &Addr,
        attach_args: &AttachArguments,
        handler: Arc<dyn TransportHandler<DebugMessage>>,
    ) -> Result<ClientQueue<DebugMessage>> {
        let config = create_client_tls_context(
            &attach_args.tls_verification,
            attach_args
                .tls_cert
                .as_deref()
                .map(|c| (c, attach_args.tls_key.as_deref(), None)),
        )?;

        let host = match addr {
            Addr::Tcp { host, .. } => host.clone(),
            Addr::Uds(path) => path.to_string_lossy().into_owned(),
        };

        let token = CancellationToken::new();
        let raw = RawStream::connect(addr, &token)?;
        let stream =
            CancellableStream::wrap_tls_client(raw, Arc::new(config), server_name(&host)?, &token)?;
        ClientQueue::from_stream(stream, token, handler)
    }

    /// Spawns the playbook via `RunInTerminalRequest`, then races the
    /// debuggee's first real connection against the launch-cancel sentinel
    /// (§4.4, §9): whichever happens first decides whether `launch` succeeds,
    /// fails with the sentinel's "process exited early" diagnosis, or times
    /// out against `launch_args.connect_timeout`.
    fn handle_launch(&mut self, seq: i64, raw_args: serde_json::Value) -> Result<()> {
        self.state = BrokerState::Launching;
        let launch_args = LaunchArguments::from_json(&raw_args)?;

        let (tx, rx) = mpsc::channel();
        let (server, debuggee_addr) = ServerQueue::<DebugMessage>::bind(&Addr::parse("uds://")?)?;
        let handler = Arc::new(DebuggeeRelay {
            output: self.client.output(),
            incoming_requests: self.incoming_requests.clone(),
            launched: Mutex::new(Some(tx.clone())),
        });
        server.serve(handler);

        let cancel_addr = Addr::parse("uds://")?;
        let sentinel_listener = Listener::bind(&cancel_addr)?;
        let sentinel_token = Arc::new(CancellationToken::new());
        let sentinel_tx = tx.clone();
        let sentinel_wait_token = Arc::clone(&sentinel_token);
        let sentinel_thread = std::thread::spawn(move || {
            if sentinel_listener.accept(&sentinel_wait_token).is_ok() {
                let _ = sentinel_tx.send(LaunchSignal::Cancelled);
            }
        });

        let script_path = launch::write_launch_script(&cancel_addr)?;

        let ansibug_exe = std::env::current_exe()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "ansibug".to_string());

        let mut connect_args = vec![
            ansibug_exe,
            "connect".to_string(),
            "--addr".to_string(),
            debuggee_addr.to_string(),
        ];
        if let Some(log_file) = &launch_args.log_file {
            connect_args.push("--log-file".to_string());
            connect_args.push(log_file.to_string_lossy().into_owned());
            connect_args.push("--log-level".to_string());
            connect_args.push(launch_args.log_level.clone());
        }
        connect_args.push("--".to_string());
        connect_args.push("ansible-playbook".to_string());
        connect_args.push(launch_args.playbook.clone());
        connect_args.extend(launch_args.args.clone());

        let mut playbook_args = vec![script_path.to_string_lossy().into_owned()];
        playbook_args.extend(connect_args);

        let kind = match launch_args.console {
            Console::Integrated => "integrated",
            Console::External => "external",
        };

        self.client.send_run_in_terminal(
            &launch_args.cwd,
            kind,
            &playbook_args,
            "Ansible Debug Console",
            &launch_args.env,
        )?;
        self.debuggee_server = Some(server.clone());

        let outcome = rx.recv_timeout(launch_args.connect_timeout);
        sentinel_token.cancel();
        let _ = sentinel_thread.join();

        match outcome {
            Ok(LaunchSignal::Connected) => {
                self.state = BrokerState::Running;
                self.debuggee = Some(DebuggeeConn::Server(server.clone(), PeerId(0)));
                self.client.respond_success(seq, ResponseBody::Launch)?;
                self.client.send_event(Event::Initialized)?;
                server.send(
                    PeerId(0),
                    &DebugMessage::Event(path_mapping_event(&launch_args.path_mappings)),
                )?;
                Ok(())
            }
            Ok(LaunchSignal::Cancelled) => {
                self.client.respond_error(
                    seq,
                    "playbook process exited before connecting back to the adapter",
                )?;
                self.stop(None)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.client
                    .respond_error(seq, "timed out waiting for the playbook to connect")?;
                self.stop(None)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.client
                    .respond_error(seq, "launch sentinel channel closed unexpectedly")?;
                self.stop(None)
            }
        }
    }

    fn stop(&mut self, err: Option<Error>) -> Result<()> {
        let outstanding: Vec<(i64, Request)> =
            self.incoming_requests.lock().unwrap().drain().collect();
        for (seq, req) in outstanding {
            if let Command::Disconnect(_) = req.command {
                self.client.respond_success(seq, ResponseBody::Disconnect)?;
            } else if let Some(e) = &err {
                self.client.respond_error(seq, e.to_string())?;
            }
        }

        if let Some(DebuggeeConn::Client(queue)) = self.debuggee.take() {
            if let Ok(q) = Arc::try_unwrap(queue) {
                q.stop();
            }
        }
        if let Some(server) = self.debuggee_server.take() {
            server.stop();
        }

        if !self.terminated_sent {
            self.client.send_event(Event::Terminated(None))?;
            self.terminated_sent = true;
        }
        self.state = BrokerState::Terminated;
        Ok(())
    }
}

fn args_value(_args: &impl serde::Serialize) -> serde_json::Value {
    serde_json::to_value(_args).unwrap_or(serde_json::Value::Null)
}

fn path_mapping_event(mappings: &[PathMapping]) -> Event {
    Event::Output(dap::events::OutputEventBody {
        category: Some(dap::types::OutputEventCategory::Console),
        output: String::new(),
        data: serde_json::to_value(mappings).ok(),
        ..Default::default()
    })
}
