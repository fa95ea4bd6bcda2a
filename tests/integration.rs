//! End-to-end tests against a scripted fake server speaking the same framed
//! JSON-RPC protocol a real `clangd` would, connected over a pair of
//! [`std::io::pipe`] channels.
//!
//! The test drives the "server" side directly: a background thread answers
//! the `initialize`/`shutdown`/`exit` handshake automatically and forwards
//! every other inbound message to the test thread over an `mpsc` channel, so
//! each scenario can script exactly the responses and notifications it needs.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clangd_lsp_client::{Client, ClientError};
use lsp_types::{HoverContents, MarkedString, Position, Uri};
use rstest::rstest;
use serde_json::{json, Value};

fn write_frame<W: Write>(writer: &mut W, value: &Value) {
    let bytes = serde_json::to_vec(value).expect("value serializes");
    write!(writer, "Content-Length: {}\r\n\r\n", bytes.len()).expect("header writes");
    writer.write_all(&bytes).expect("body writes");
    writer.flush().expect("flush succeeds");
}

fn read_frame<R: BufRead>(reader: &mut R) -> Option<Value> {
    let mut content_length = None;
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).ok()?;
        if read == 0 {
            return None;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse::<usize>().ok();
        }
    }
    let mut buf = vec![0_u8; content_length?];
    reader.read_exact(&mut buf).ok()?;
    serde_json::from_slice(&buf).ok()
}

/// A running client wired to a fake server the test drives by hand.
struct Harness {
    client: Client,
    server_write: Arc<Mutex<std::io::PipeWriter>>,
    inbound: Receiver<Value>,
}

impl Harness {
    fn respond(&self, value: &Value) {
        write_frame(
            &mut *self.server_write.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            value,
        );
    }

    fn notify(&self, method: &str, params: Value) {
        self.respond(&json!({"jsonrpc": "2.0", "method": method, "params": params}));
    }

    fn next_inbound(&self, timeout: Duration) -> Value {
        self.inbound.recv_timeout(timeout).expect("server should observe the expected request")
    }
}

fn start_harness(request_timeout: Duration) -> Harness {
    let (client_read, server_write) = std::io::pipe().expect("pipe creation succeeds");
    let (server_read, client_write) = std::io::pipe().expect("pipe creation succeeds");

    let server_write = Arc::new(Mutex::new(server_write));
    let (inbound_tx, inbound) = mpsc::channel();

    let handshake_write = Arc::clone(&server_write);
    thread::spawn(move || {
        let mut server_reader = BufReader::new(server_read);
        loop {
            let Some(value) = read_frame(&mut server_reader) else {
                return;
            };
            let method = value.get("method").and_then(Value::as_str);
            let id = value.get("id").cloned();
            match method {
                Some("initialize") => {
                    let response = json!({"jsonrpc": "2.0", "id": id, "result": {"capabilities": {}}});
                    write_frame(
                        &mut *handshake_write.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
                        &response,
                    );
                }
                Some("initialized") => {}
                Some("shutdown") => {
                    let response = json!({"jsonrpc": "2.0", "id": id, "result": Value::Null});
                    write_frame(
                        &mut *handshake_write.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
                        &response,
                    );
                }
                Some("exit") => return,
                _ => {
                    let _ignored = inbound_tx.send(value);
                }
            }
        }
    });

    let client = Client::start_with_transport(
        PathBuf::from("/tmp/clangd-lsp-client-tests"),
        request_timeout,
        Box::new(BufReader::new(client_read)),
        Box::new(client_write),
        None,
    )
    .expect("handshake over the fake transport should succeed");

    Harness { client, server_write, inbound }
}

fn uri(text: &str) -> Uri {
    text.parse().unwrap_or_else(|_| panic!("invalid test uri: {text}"))
}

fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + timeout;
    while !predicate() {
        assert!(std::time::Instant::now() < deadline, "condition did not become true in time");
        thread::sleep(Duration::from_millis(5));
    }
}

#[rstest]
fn handshake_completes_over_framed_pipes() {
    let harness = start_harness(Duration::from_secs(2));
    assert!(harness.client.is_ready());
}

#[rstest]
fn out_of_order_responses_route_to_the_caller_that_sent_them() {
    let harness = start_harness(Duration::from_secs(2));
    let target = uri("file:///project/a.cpp");
    harness.client.open(target.clone(), "int x;".to_string(), "cpp".to_string()).expect("open succeeds");

    let positions = [0_u32, 1, 2];
    thread::scope(|scope| {
        for &line in &positions {
            let client = &harness.client;
            let target = target.clone();
            scope.spawn(move || {
                let position = Position { line, character: 0 };
                let hover = client
                    .hover(&target, position)
                    .expect("hover should succeed")
                    .expect("server responds with a hover");
                let HoverContents::Scalar(MarkedString::String(text)) = hover.contents else {
                    panic!("unexpected hover contents shape");
                };
                assert_eq!(text, format!("line-{line}"));
            });
        }

        let mut requests = Vec::new();
        for _ in 0..positions.len() {
            requests.push(harness.next_inbound(Duration::from_secs(2)));
        }
        // Respond in the reverse of arrival order to exercise out-of-order dispatch.
        for request in requests.into_iter().rev() {
            let id = request.get("id").cloned().expect("request carries an id");
            let line = request["params"]["position"]["line"].as_u64().expect("line present");
            let response = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"contents": format!("line-{line}")},
            });
            harness.respond(&response);
        }
    });
}

#[rstest]
fn wait_for_file_unblocks_on_first_diagnostics_batch() {
    let harness = start_harness(Duration::from_secs(2));
    let target = uri("file:///project/b.cpp");
    harness.client.open(target.clone(), "int y;".to_string(), "cpp".to_string()).expect("open succeeds");
    assert!(!harness.client.is_file_ready(&target));

    thread::scope(|scope| {
        let waiter = scope.spawn(|| harness.client.wait_for_file(&target, Duration::from_secs(2)));

        thread::sleep(Duration::from_millis(20));
        harness.notify(
            "textDocument/publishDiagnostics",
            json!({"uri": target.as_str(), "diagnostics": []}),
        );

        assert!(waiter.join().expect("waiter thread should not panic").expect("wait_for_file should not error"));
    });
    assert!(harness.client.is_file_ready(&target));
}

#[rstest]
fn progress_notifications_drive_indexing_status() {
    let harness = start_harness(Duration::from_secs(2));
    assert_eq!(harness.client.indexing_status().as_status_string(), "idle");

    harness.notify(
        "$/progress",
        json!({"token": "bg-1", "value": {"kind": "begin", "title": "indexing", "percentage": 0}}),
    );
    wait_until(Duration::from_secs(1), || harness.client.indexing_status().in_progress);

    harness.notify(
        "$/progress",
        json!({"token": "bg-1", "value": {"kind": "report", "percentage": 42}}),
    );
    wait_until(Duration::from_secs(1), || harness.client.indexing_status().percentage == Some(42));
    assert_eq!(harness.client.indexing_status().as_status_string(), "indexing (42%)");

    harness.notify("$/progress", json!({"token": "bg-1", "value": {"kind": "end"}}));
    wait_until(Duration::from_secs(1), || !harness.client.indexing_status().in_progress);
    assert_eq!(harness.client.indexing_status().as_status_string(), "idle");
}

#[rstest]
fn empty_implementation_result_is_annotated_while_indexing() {
    let harness = start_harness(Duration::from_secs(2));
    let target = uri("file:///project/c.cpp");
    harness.client.open(target.clone(), "void f();".to_string(), "cpp".to_string()).expect("open succeeds");

    harness.notify(
        "$/progress",
        json!({"token": "bg-2", "value": {"kind": "begin", "title": "indexing"}}),
    );
    wait_until(Duration::from_secs(1), || harness.client.indexing_status().in_progress);

    thread::scope(|scope| {
        let caller = scope.spawn(|| {
            clangd_lsp_client::query::implementation(
                &harness.client,
                &target,
                Position { line: 0, character: 0 },
            )
        });

        let request = harness.next_inbound(Duration::from_secs(2));
        let id = request.get("id").cloned().expect("request carries an id");
        harness.respond(&json!({"jsonrpc": "2.0", "id": id, "result": []}));

        let hinted = caller.join().expect("caller thread should not panic").expect("query should not error");
        assert!(hinted.result.is_empty());
        assert!(hinted.hint.is_some_and(|hint| hint.contains("indexing")));
    });
}

#[rstest]
fn timeout_fails_the_caller_and_a_late_response_is_dropped_silently() {
    let harness = start_harness(Duration::from_millis(50));
    let target = uri("file:///project/d.cpp");
    harness.client.open(target.clone(), "int z;".to_string(), "cpp".to_string()).expect("open succeeds");

    let result = harness.client.hover(&target, Position { line: 0, character: 0 });
    assert!(matches!(result, Err(ClientError::Timeout { .. })));

    let request = harness.next_inbound(Duration::from_secs(1));
    let id = request.get("id").cloned().expect("request carries an id");
    // Arrives after the caller already timed out; must not panic or resurrect the call.
    harness.respond(&json!({"jsonrpc": "2.0", "id": id, "result": {"contents": "too-late"}}));
    thread::sleep(Duration::from_millis(20));
    assert!(harness.client.is_ready());
}
