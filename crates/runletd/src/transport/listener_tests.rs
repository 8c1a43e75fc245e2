//! Tests for the socket listener and per-connection loops.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use runlet_config::{Concurrency, Framing, SocketEndpoint};

use super::{ConnectionHandler, ConnectionStream, ListenerError, LoopConnectionHandler, SocketListener};
use crate::request_loop::StopReason;
use crate::tests::support::{EngineFixture, Script, ScriptedSpawner};

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl ConnectionHandler for CountingHandler {
    fn handle(&self, _stream: ConnectionStream) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_for_count(count: &AtomicUsize, expected: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if count.load(Ordering::SeqCst) >= expected {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn exchange(stream: &mut TcpStream, reader: &mut BufReader<TcpStream>, request: &str) -> Value {
    stream.write_all(request.as_bytes()).expect("write request");
    stream.write_all(b"\n").expect("write newline");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response");
    serde_json::from_str(&line).expect("response is JSON")
}

#[test]
fn tcp_listener_accepts_connections() {
    let listener = SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind");
    let addr = listener.local_addr().expect("tcp address");
    let count = Arc::new(AtomicUsize::new(0));
    let handle = listener
        .start(Arc::new(CountingHandler {
            count: Arc::clone(&count),
        }))
        .expect("start listener");

    TcpStream::connect(addr).expect("connect first client");
    TcpStream::connect(addr).expect("connect second client");

    assert!(wait_for_count(&count, 2), "expected two connections");
    handle.shutdown();
    handle.join().expect("join listener");
}

#[test]
fn each_connection_runs_its_own_request_loop() {
    let fixture = EngineFixture::new(ScriptedSpawner::new(Script::Double), Concurrency::Sequential);
    let context = fixture.context(Concurrency::Sequential);
    let stop = context.stop().clone();
    let handler = LoopConnectionHandler::new(context, Framing::Lines, 1024);
    let listener = SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind");
    let addr = listener.local_addr().expect("tcp address");
    let handle = listener.start(Arc::new(handler)).expect("start listener");

    let mut first = TcpStream::connect(addr).expect("connect");
    let mut first_reader = BufReader::new(first.try_clone().expect("clone"));
    let mut second = TcpStream::connect(addr).expect("connect");
    let mut second_reader = BufReader::new(second.try_clone().expect("clone"));

    assert_eq!(
        exchange(&mut first, &mut first_reader, r#"{"id":"a","input":{"x":1}}"#),
        json!({"id": "a", "result": {"y": 2}})
    );
    assert_eq!(
        exchange(&mut second, &mut second_reader, r#"{"id":"b","input":{"x":4}}"#),
        json!({"id": "b", "result": {"y": 8}})
    );
    assert_eq!(
        exchange(&mut second, &mut second_reader, r#"{"control":"shutdown"}"#),
        json!({"id": null, "result": {"status": "stopping"}})
    );
    assert_eq!(stop.wait(), StopReason::ControlShutdown);

    handle.shutdown();
    handle.join().expect("join listener");
}

#[cfg(unix)]
#[test]
fn unix_listener_cleans_stale_socket_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("runlet.sock");
    {
        let _stale = UnixListener::bind(&path).expect("bind stale listener");
    }
    assert!(path.exists(), "stale socket should remain");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let listener = SocketListener::bind(&endpoint).expect("bind new listener");
    let count = Arc::new(AtomicUsize::new(0));
    let handle = listener
        .start(Arc::new(CountingHandler {
            count: Arc::clone(&count),
        }))
        .expect("start listener");

    UnixStream::connect(&path).expect("connect unix client");
    assert!(wait_for_count(&count, 1), "expected one connection");

    handle.shutdown();
    handle.join().expect("join listener");
    assert!(!path.exists(), "listener should remove its socket on shutdown");
}

#[cfg(unix)]
#[test]
fn unix_listener_rejects_in_use_socket() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("runlet.sock");
    let _existing = UnixListener::bind(&path).expect("bind existing listener");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("bind should fail");
    assert!(matches!(error, ListenerError::UnixInUse { .. }));
}

#[cfg(unix)]
#[test]
fn unix_listener_refuses_regular_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("not-a-socket");
    std::fs::write(&path, b"").expect("write file");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("bind should fail");
    assert!(matches!(error, ListenerError::UnixNotSocket { .. }));
}
