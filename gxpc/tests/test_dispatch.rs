mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use common::{console, MockHandle, MockTransport};
use gxpc::agent::{AgentChannel, EnvelopeSink};
use gxpc::dispatch::{DispatchOutcome, DispatchWorker, Dispatcher, ToolRunner};
use gxpc::console::Console;
use gxpc::offsets::{self, OffsetRecord};
use gxpc::printer::{FilterPrinter, FilterRules};

struct Fixture {
    dispatcher: Dispatcher,
    printer: Arc<FilterPrinter>,
    transport: MockHandle,
    config: PathBuf,
    _dir: TempDir,
}

fn fixture_with(tool: &str, rules: FilterRules, temp_dir: Option<&Path>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("gxpc.conf");
    let (transport, handle) = MockTransport::new();
    let channel = Arc::new(AgentChannel::new(Box::new(transport)));
    let printer = Arc::new(FilterPrinter::new(rules, console()));
    let mut runner = ToolRunner::new(tool);
    if let Some(temp_dir) = temp_dir {
        runner = runner.with_temp_dir(temp_dir);
    }
    let dispatcher = Dispatcher::new(printer.clone(), runner, config.clone(), channel, console());
    Fixture { dispatcher, printer, transport: handle, config, _dir: dir }
}

fn fixture() -> Fixture {
    fixture_with("jlutil", FilterRules::default(), None)
}

fn send(inner: &Value) -> Value {
    json!({"type": "send", "payload": inner.to_string()})
}

fn print_payload(conn_name: &str) -> Value {
    json!({"type": "print", "payload": {"name": "handler", "connName": conn_name, "pid": 7, "dictionary": {"k": 1}}})
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[test]
fn test_print_is_routed_to_printer() {
    let f = fixture();
    assert_eq!(f.dispatcher.dispatch_raw(send(&print_payload("com.apple.a"))), DispatchOutcome::Printed(0));
    assert_eq!(f.dispatcher.dispatch_raw(send(&print_payload("com.apple.b"))), DispatchOutcome::Printed(1));
    assert_eq!(f.printer.printed(), 2);
}

#[test]
fn test_structured_payload_is_accepted() {
    let f = fixture();
    let raw = json!({"type": "send", "payload": print_payload("svc")});
    assert_eq!(f.dispatcher.dispatch_raw(raw), DispatchOutcome::Printed(0));
}

#[test]
fn test_filtered_print() {
    let rules = FilterRules::compile(&["keep"], &[], &[], &[]).unwrap();
    let f = fixture_with("jlutil", rules, None);
    assert_eq!(f.dispatcher.dispatch_raw(send(&print_payload("drop"))), DispatchOutcome::Filtered);
    assert_eq!(f.printer.printed(), 0);
}

#[test]
fn test_log_and_unknown_and_other() {
    let f = fixture();
    assert_eq!(
        f.dispatcher.dispatch_raw(json!({"type": "log", "level": "info", "payload": "hooked"})),
        DispatchOutcome::Logged
    );
    assert_eq!(
        f.dispatcher.dispatch_raw(send(&json!({"type": "mystery", "payload": 1}))),
        DispatchOutcome::UnknownSend
    );
    assert_eq!(
        f.dispatcher.dispatch_raw(json!({"type": "error", "description": "ReferenceError"})),
        DispatchOutcome::Unrecognized
    );
    assert!(f.transport.posts().is_empty());
}

#[test]
fn test_malformed_messages_do_not_stop_dispatch() {
    let f = fixture();
    let bad = [
        json!({"type": "send", "payload": "not json"}),
        json!({"type": "send", "payload": {"payload": {}}}),
        send(&json!({"type": "print", "payload": {"name": "missing connName"}})),
        send(&json!({"type": "jlutil", "payload": 5})),
    ];
    for raw in bad {
        assert_eq!(f.dispatcher.dispatch_raw(raw), DispatchOutcome::Malformed);
    }
    assert_eq!(f.dispatcher.dispatch_raw(send(&print_payload("after"))), DispatchOutcome::Printed(0));
}

#[test]
fn test_new_offset_is_appended_to_config() {
    let f = fixture();
    let inner = json!({
        "type": "newOffset",
        "machine": "iPhone15,2",
        "version": "21A329",
        "callEvent": "0x1234",
        "plistCreate": "0x5678",
    });
    assert_eq!(f.dispatcher.dispatch_raw(send(&inner)), DispatchOutcome::OffsetStored);
    assert_eq!(f.dispatcher.dispatch_raw(send(&inner)), DispatchOutcome::OffsetStored);

    let record = offsets::load(&f.config).unwrap();
    assert_eq!(record.offsets.len(), 2);
    let build = record.offsets[0].build("21A329").unwrap();
    assert_eq!(build.call_handler, "0x1234");
    assert_eq!(build.plist_create, "0x5678");
}

#[test]
fn test_new_offset_under_payload_key() {
    let f = fixture();
    let inner = json!({"type": "newOffset", "payload": {
        "machine": "iPad7,11", "version": "22B83", "callEvent": "0xf98c", "plistCreate": "0x7dbf4",
    }});
    assert_eq!(f.dispatcher.dispatch_raw(send(&inner)), DispatchOutcome::OffsetStored);
    assert_eq!(offsets::load(&f.config).unwrap().offsets[0].os, "iPad7,11");
}

#[test]
fn test_new_offset_write_failure_is_reported() {
    let f = fixture();
    std::fs::write(&f.config, "{ broken").unwrap();
    let inner = json!({"type": "newOffset", "machine": "m", "version": "v"});
    assert_eq!(f.dispatcher.dispatch_raw(send(&inner)), DispatchOutcome::OffsetFailed);
}

#[test]
fn test_tool_failure_posts_nothing_and_cleans_up() {
    let scratch = TempDir::new().unwrap();
    let f = fixture_with("gxpc-no-such-decoder", FilterRules::default(), Some(scratch.path()));
    let data = STANDARD.encode(b"bplist16...");

    let outcome = f.dispatcher.dispatch_raw(send(&json!({"type": "jlutil", "payload": data})));
    assert_eq!(outcome, DispatchOutcome::ToolFailed);
    assert!(f.transport.posts().is_empty());
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn test_invalid_base64_posts_nothing() {
    let scratch = TempDir::new().unwrap();
    let f = fixture_with("cat", FilterRules::default(), Some(scratch.path()));

    let outcome = f.dispatcher.dispatch_raw(send(&json!({"type": "jlutil", "payload": "%%%"})));
    assert_eq!(outcome, DispatchOutcome::ToolFailed);
    assert!(f.transport.posts().is_empty());
    assert!(is_empty_dir(scratch.path()));
}

#[cfg(unix)]
#[test]
fn test_tool_output_is_posted_back() {
    let scratch = TempDir::new().unwrap();
    let f = fixture_with("cat", FilterRules::default(), Some(scratch.path()));
    let text = "line \"one\"\n\ttwo\\";
    let data = STANDARD.encode(text);

    let outcome = f.dispatcher.dispatch_raw(send(&json!({"type": "jlutil", "payload": data})));
    assert_eq!(outcome, DispatchOutcome::ToolReplied);
    assert!(is_empty_dir(scratch.path()));

    let posts = f.transport.posts();
    assert_eq!(posts.len(), 1);
    let reply: Value = serde_json::from_str(&posts[0]).unwrap();
    assert_eq!(reply, json!({"type": "jlutil", "payload": text}));
}

#[test]
fn test_worker_dispatches_in_order() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("records.log");
    let console = Arc::new(Console::with_output(&out).unwrap());
    let (transport, _handle) = MockTransport::new();
    let channel = Arc::new(AgentChannel::new(Box::new(transport)));
    let printer = Arc::new(FilterPrinter::new(FilterRules::default(), console.clone()));
    let dispatcher = Dispatcher::new(
        printer.clone(),
        ToolRunner::new("jlutil"),
        dir.path().join("gxpc.conf"),
        channel,
        console,
    );

    let (sink, inbound) = EnvelopeSink::channel();
    for i in 0..10 {
        assert!(sink.deliver(send(&print_payload(&format!("svc.{i}")))));
    }
    drop(sink);

    let worker = DispatchWorker::spawn(dispatcher, inbound).unwrap();
    // the worker exits on its own once every sink is gone
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while printer.printed() < 10 && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    assert_eq!(worker.shutdown(), 10);

    let written = std::fs::read_to_string(&out).unwrap();
    let seen: Vec<(String, String)> = written
        .lines()
        .filter_map(|line| line.strip_prefix("SCRI: "))
        .zip(written.lines().filter_map(|line| line.strip_prefix("Connection Name: ")))
        .map(|(head, conn)| (head.split(')').next().unwrap().to_string(), conn.to_string()))
        .collect();
    let expected: Vec<(String, String)> = (0..10).map(|i| (i.to_string(), format!("svc.{i}"))).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_setup_passes_offsets() {
    let (transport, handle) = MockTransport::new();
    let channel = AgentChannel::new(Box::new(transport));
    let record = OffsetRecord::sample();

    assert!(channel.setup(Some(&record), &Console::new()));
    assert!(channel.setup(None, &Console::new()));

    let invocations = handle.invocations();
    assert_eq!(invocations[0].0, "setup");
    assert_eq!(invocations[0].1, serde_json::to_value(&record).unwrap());
    assert_eq!(invocations[1].1, Value::Null);
}

#[test]
fn test_setup_failure_is_reported_to_operator() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("run.log");
    let console = Console::with_output(&out).unwrap();
    let (transport, handle) = MockTransport::new();
    let channel = AgentChannel::new(Box::new(transport));
    channel.mark_detached();

    assert!(!channel.setup(None, &console));
    assert!(handle.invocations().is_empty());
    let written = std::fs::read_to_string(&out).unwrap();
    assert!(written.contains("WARN: setup call failed"), "{written}");
}

#[test]
fn test_worker_stops_on_request() {
    let f = fixture();
    let (_sink, inbound) = EnvelopeSink::channel();
    let worker = DispatchWorker::spawn(f.dispatcher, inbound).unwrap();
    assert_eq!(worker.shutdown(), 0);
}
