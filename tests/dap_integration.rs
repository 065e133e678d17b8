//! End-to-end DAP session tests against the compiled `ansibug dap` binary,
//! matching §8's concrete scenarios 1 and 2 (the parts reachable without an
//! actual running playbook/debuggee process).

mod support;

use serde_json::{json, Value};
use support::DapSession;

fn assert_success_response(response: &Value, command: &str, request_seq: i64) {
    assert_eq!(response.get("type").and_then(Value::as_str), Some("response"));
    assert_eq!(response.get("command").and_then(Value::as_str), Some(command));
    assert_eq!(
        response.get("request_seq").and_then(Value::as_i64),
        Some(request_seq)
    );
    assert_eq!(response.get("success").and_then(Value::as_bool), Some(true));
    assert!(response.get("seq").and_then(Value::as_i64).is_some());
}

/// §8 scenario 1: `Initialize` gets back `InitializeResponse` with the
/// capabilities the broker advertises, followed by `InitializedEvent`, and
/// nothing else fires until `Attach`/`Launch`.
#[test]
fn initialize_handshake() {
    let mut session = DapSession::start().expect("spawn ansibug dap");

    let seq = session
        .send_request("initialize", json!({ "adapterID": "ansibug" }))
        .unwrap();
    let response = session.read_response(seq).unwrap();
    assert_success_response(&response, "initialize", seq);

    let caps = response.get("body").expect("initialize response has a body");
    assert_eq!(
        caps.get("supportsConfigurationDoneRequest").and_then(Value::as_bool),
        Some(true)
    );
    assert_eq!(
        caps.get("supportsConditionalBreakpoints").and_then(Value::as_bool),
        Some(true)
    );
    assert_eq!(caps.get("supportsSetVariable").and_then(Value::as_bool), Some(true));
    assert_eq!(
        caps.get("supportsTerminateRequest").and_then(Value::as_bool),
        Some(true)
    );
    assert_eq!(
        caps.get("supportsTerminateDebuggee").and_then(Value::as_bool),
        Some(true)
    );

    let initialized = session.wait_for_event("initialized").unwrap();
    assert_eq!(initialized.get("event").and_then(Value::as_str), Some("initialized"));

    session.shutdown();
}

/// §7's error propagation policy: an `Attach` that can't resolve its target
/// (§6.4's discovery file doesn't exist for a PID nothing is listening on)
/// fails the request and ends the session with exactly one `TerminatedEvent`,
/// never leaving the client waiting forever for a response.
#[test]
fn attach_to_nonexistent_pid_fails_and_terminates() {
    let mut session = DapSession::start().expect("spawn ansibug dap");

    let seq = session
        .send_request("initialize", json!({ "adapterID": "ansibug" }))
        .unwrap();
    session.read_response(seq).unwrap();
    session.wait_for_event("initialized").unwrap();

    // PID 1 is guaranteed not to have written an ANSIBUG-<pid> discovery
    // file for this test process's $TMPDIR.
    let attach_seq = session
        .send_request("attach", json!({ "processId": 1 }))
        .unwrap();
    let response = session.read_response(attach_seq).unwrap();
    assert_eq!(response.get("type").and_then(Value::as_str), Some("response"));
    assert_eq!(response.get("success").and_then(Value::as_bool), Some(false));

    let terminated = session.wait_for_event("terminated").unwrap();
    assert_eq!(terminated.get("event").and_then(Value::as_str), Some("terminated"));

    session.shutdown();
}
