//! Drives the compiled `ansibug dap` binary over its stdio, the way
//! `tests/dap_client.rs` drives `bs-dap` over TCP for the teacher's own DAP
//! integration tests. Standard `Content-Length`-framed DAP JSON (§4.1) is a
//! stable, documented wire format, so spawning the real binary and talking
//! to it over a pipe is more representative than reaching into internals.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use serde_json::{json, Value};

const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DapSession {
    process: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_seq: i64,
    pending_events: VecDeque<Value>,
}

impl DapSession {
    /// Spawns `ansibug dap` with piped stdio.
    pub fn start() -> anyhow::Result<Self> {
        let bin = std::env::var("CARGO_BIN_EXE_ansibug")
            .context("CARGO_BIN_EXE_ansibug not set; run via `cargo test`")?;
        let mut process = Command::new(bin)
            .arg("dap")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("spawn ansibug dap")?;

        let stdin = process.stdin.take().expect("piped stdin");
        let stdout = process.stdout.take().expect("piped stdout");

        Ok(DapSession {
            process,
            stdin,
            reader: BufReader::new(stdout),
            next_seq: 1,
            pending_events: VecDeque::new(),
        })
    }

    pub fn send_request(&mut self, command: &str, arguments: Value) -> anyhow::Result<i64> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let request = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.write_message(&request)?;
        Ok(seq)
    }

    pub fn read_response(&mut self, request_seq: i64) -> anyhow::Result<Value> {
        let deadline = Instant::now() + MESSAGE_TIMEOUT;
        loop {
            let msg = self.read_message(deadline)?;
            match msg.get("type").and_then(Value::as_str) {
                Some("event") => self.pending_events.push_back(msg),
                Some("response") => {
                    if msg.get("request_seq").and_then(Value::as_i64) == Some(request_seq) {
                        return Ok(msg);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn wait_for_event(&mut self, name: &str) -> anyhow::Result<Value> {
        let deadline = Instant::now() + MESSAGE_TIMEOUT;
        loop {
            if let Some(pos) = self
                .pending_events
                .iter()
                .position(|e| e.get("event").and_then(Value::as_str) == Some(name))
            {
                return Ok(self.pending_events.remove(pos).unwrap());
            }
            let msg = self.read_message(deadline)?;
            if msg.get("type").and_then(Value::as_str) == Some("event") {
                self.pending_events.push_back(msg);
            }
        }
    }

    fn read_message(&mut self, deadline: Instant) -> anyhow::Result<Value> {
        let mut content_length = None;
        loop {
            if Instant::now() > deadline {
                return Err(anyhow!("timed out waiting for a DAP message"));
            }
            let mut line = String::new();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                return Err(anyhow!("ansibug dap closed its stdout"));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = Some(value.trim().parse::<usize>()?);
            }
        }

        let len = content_length.ok_or_else(|| anyhow!("missing Content-Length header"))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(serde_json::from_slice(&buf)?)
    }

    fn write_message(&mut self, message: &Value) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(message)?;
        write!(self.stdin, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.stdin.write_all(&payload)?;
        self.stdin.flush()?;
        Ok(())
    }

    pub fn shutdown(mut self) {
        drop(self.stdin.write_all(b""));
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

impl Drop for DapSession {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}
