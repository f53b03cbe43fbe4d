#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output, Stdio};

use cgilink::frame::{FrameReader, FrameWriter};
use cgilink::message::{decode, Envelope, MessageKind};
use serde_json::json;

const BIN: &str = env!("CARGO_BIN_EXE_cgilink");

fn run_call(args: &[&str]) -> Output {
    Command::new(BIN)
        .args(["--log-level", "error", "--format", "raw", "call"])
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("call command should run")
}

fn read_envelope<R: std::io::Read>(reader: &mut FrameReader<R>) -> Envelope {
    let frame = reader.read_frame().expect("serve should reply");
    decode(frame.as_str()).expect("reply should decode")
}

#[test]
fn serve_answers_requests_and_exits_on_eof() {
    let mut child = Command::new(BIN)
        .args(["--log-level", "error", "serve"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    let mut writer = FrameWriter::new(child.stdin.take().expect("stdin is piped"));
    let mut reader = FrameReader::new(child.stdout.take().expect("stdout is piped"));

    writer
        .send("ping\t1\treq\t{\"a\":1}")
        .expect("request should send");
    let reply = read_envelope(&mut reader);
    assert_eq!(reply.msg_type, "ping");
    assert_eq!(reply.correlation_id.as_deref(), Some("1"));
    assert_eq!(reply.kind, MessageKind::Response);
    assert_eq!(reply.payload, json!({"a": 1}));

    writer.send("not a frame").expect("garbage should send");
    writer
        .send("openSolutionInIDE\t2\treq\tnull")
        .expect("request should send");
    let reply = read_envelope(&mut reader);
    assert_eq!(reply.correlation_id.as_deref(), Some("2"));
    assert_eq!(reply.kind, MessageKind::Error);
    assert_eq!(reply.payload["code"], "unknown_message_type");

    drop(writer);
    let status = child.wait().expect("serve should exit");
    assert!(status.success(), "serve exited with {status}");
}

#[test]
fn call_prints_reply_from_backend() {
    let output = run_call(&[
        "ping",
        "--json",
        "{\"x\":[1,2]}",
        "--",
        BIN,
        "--log-level",
        "error",
        "serve",
    ]);

    assert!(output.status.success(), "call failed: {output:?}");
    let printed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be json");
    assert_eq!(printed, json!({"x": [1, 2]}));
}

#[test]
fn call_unknown_type_exits_with_usage() {
    let output = run_call(&["nope", "--", BIN, "--log-level", "error", "serve"]);
    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope"));
}

#[test]
fn call_timeout_exits_with_timeout_code() {
    let output = run_call(&[
        "delay",
        "--json",
        "{\"ms\":5000}",
        "--timeout",
        "200ms",
        "--",
        BIN,
        "--log-level",
        "error",
        "serve",
        "--drain-timeout",
        "100ms",
    ]);
    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn call_missing_backend_is_usage_error() {
    let output = run_call(&["ping", "--", "/definitely/not/a/backend"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(BIN)
        .arg("version")
        .output()
        .expect("version command should run");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("cgilink {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn extended_version_lists_wire_tags() {
    let output = Command::new(BIN)
        .args(["version", "--extended"])
        .output()
        .expect("version command should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: cgilink"), "{stdout}");
    assert!(
        stdout.contains("kind_tags: Request=req, Response=res, Error=err, Notification=ntf"),
        "{stdout}"
    );
}
