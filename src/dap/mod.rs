//! DAP wire codec (§4.1): framing, seq numbering, and polymorphic
//! request/response/event encode-decode, built on the `dap` crate's typed
//! message registry.
//!
//! The `dap` crate owns `Content-Length` framing and JSON (de)serialization
//! of the whole DAP message surface (`Request`/`Response`/`Event` and every
//! `Command`/`ResponseBody`/`EventBody` variant). `DapCodec` wraps its
//! `Server` to add the seq-monotonicity check from [`codec::SeqTracker`] and
//! generalizes it over any `Read + Write` transport so the same type serves
//! both the adapter's stdio-facing client connection and a socket-facing
//! one (§6.2's `listen`/`connect` modes reuse this over TCP/UDS).

pub mod codec;

use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::{Arc, Mutex};

use dap::events::Event;
use dap::requests::Request;
use dap::responses::{Response, ResponseBody, ResponseMessage};
use dap::server::{Server, ServerOutput};

use crate::error::{Error, Result};
use codec::SeqTracker;

/// One DAP connection's encode/decode boundary. Generic over the transport
/// so the same code drives the adapter's stdio link to its client and a
/// TCP/UDS link to a remote client.
pub struct DapCodec<R: Read, W: Write> {
    server: Server<R, W>,
    seq: SeqTracker,
    reverse_seq: std::sync::atomic::AtomicI64,
}

impl<R: Read, W: Write> DapCodec<R, W> {
    pub fn new(input: R, output: W) -> Self {
        DapCodec {
            server: Server::new(BufReader::new(input), BufWriter::new(output)),
            seq: SeqTracker::new(),
            reverse_seq: std::sync::atomic::AtomicI64::new(1),
        }
    }

    pub fn output(&self) -> Arc<Mutex<ServerOutput<W>>> {
        self.server.output.clone()
    }

    /// Polls for the next request, validating its `seq` continues the
    /// sequence already observed on this connection.
    pub fn poll_request(&mut self) -> Result<Option<Request>> {
        let Some(req) = self
            .server
            .poll_request()
            .map_err(|e| Error::MalformedMessage(e.to_string()))?
        else {
            return Ok(None);
        };

        self.seq.observe(req.seq)?;
        log::debug!("{}: {:?}", req.seq, req.command);
        Ok(Some(req))
    }

    pub fn respond_success(&mut self, request_seq: i64, body: ResponseBody) -> Result<()> {
        log::debug!("success {request_seq}: {body:?}");
        self.server
            .respond(Response {
                request_seq,
                success: true,
                message: None,
                body: Some(body),
                error: None,
            })
            .map_err(|e| Error::Internal(e.to_string()))
    }

    pub fn respond_error(&mut self, request_seq: i64, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        log::debug!("error {request_seq}: {error}");
        self.server
            .respond(Response {
                request_seq,
                success: false,
                message: Some(ResponseMessage::Error(error)),
                body: None,
                error: None,
            })
            .map_err(|e| Error::Internal(e.to_string()))
    }

    pub fn respond_cancel(&mut self, request_seq: i64) -> Result<()> {
        log::debug!("cancel {request_seq}");
        self.server
            .respond(Response {
                request_seq,
                success: false,
                message: Some(ResponseMessage::Cancelled),
                body: None,
                error: None,
            })
            .map_err(|e| Error::Internal(e.to_string()))
    }

    pub fn send_event(&mut self, event: Event) -> Result<()> {
        self.server
            .send_event(event)
            .map_err(|e| Error::Internal(e.to_string()))
    }

    /// Sends a `RunInTerminalRequest` (an adapter-initiated request used by
    /// `launch`, §4.4) and returns the seq it was assigned so the caller can
    /// match the eventual response.
    pub fn send_run_in_terminal(
        &mut self,
        cwd: &str,
        kind: &str,
        args: &[String],
        title: &str,
        env: &std::collections::HashMap<String, Option<String>>,
    ) -> Result<i64> {
        use dap::requests::{Command, Request, RunInTerminalRequestArguments};
        use dap::types::RunInTerminalRequestArgumentsKind;

        let kind = match kind {
            "external" => RunInTerminalRequestArgumentsKind::External,
            _ => RunInTerminalRequestArgumentsKind::Integrated,
        };

        let seq = self.reverse_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let req = Request {
            seq,
            command: Command::RunInTerminal(RunInTerminalRequestArguments {
                kind: Some(kind),
                title: Some(title.to_string()),
                cwd: cwd.to_string(),
                args: args.to_vec(),
                env: Some(env.clone()),
                args_can_be_interpreted_by_shell: None,
            }),
        };
        self.server
            .send_reverse_request(req)
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(seq)
    }
}
