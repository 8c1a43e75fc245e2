//! End-to-end tests for the `runletd` binary over standard streams.
//!
//! Handler units are POSIX `sh` scripts that speak the worker protocol.
#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use predicates::str::contains;
use serde_json::{Value, json};
use tempfile::TempDir;

const DOUBLER: &str = r#"printf '%s\n' '{"status":"ready"}'
while IFS= read -r line; do
  x=$(printf '%s' "$line" | sed -n 's/.*"x":\([0-9-]*\).*/\1/p')
  printf '{"outcome":"success","value":{"y":%s}}\n' "$((x * 2))"
done
"#;

const RAISER: &str = r#"printf '%s\n' '{"status":"ready"}'
while IFS= read -r line; do
  printf '%s\n' '{"outcome":"failure","kind":"handler_error","message":"boom","traceback":"at line 3"}'
done
"#;

fn unit(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("handler.sh");
    fs::write(&path, body).expect("write unit");
    path
}

fn daemon(handler: &Path) -> assert_cmd::Command {
    let mut command = cargo_bin_cmd!("runletd");
    command
        .env("RUNLET_LOG_FILTER", "runletd=debug")
        .args(["--handler-runtime", "executable", "--interpreter", "sh"])
        .arg("--handler-path")
        .arg(handler);
    command
}

fn envelopes(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("envelope is JSON"))
        .collect()
}

#[test]
fn answers_each_request_then_exits_at_end_of_input() {
    let dir = TempDir::new().expect("temp dir");
    let handler = unit(&dir, DOUBLER);

    let output = daemon(&handler)
        .write_stdin("{\"id\":\"1\",\"input\":{\"x\":2}}\n{\"id\":\"2\",\"input\":{\"x\":5}}\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(
        envelopes(&output),
        vec![
            json!({"id": "1", "result": {"y": 4}}),
            json!({"id": "2", "result": {"y": 10}}),
        ]
    );
}

#[test]
fn handler_failures_and_bad_frames_keep_the_daemon_running() {
    let dir = TempDir::new().expect("temp dir");
    let handler = unit(&dir, RAISER);

    let output = daemon(&handler)
        .write_stdin("not json\n{\"id\":\"a\",\"input\":null}\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let responses = envelopes(&output);
    assert_eq!(responses.len(), 2);
    let rejected = responses.first().expect("decode error response");
    assert_eq!(rejected.get("id"), Some(&Value::Null));
    assert_eq!(rejected.get("kind"), Some(&json!("decode_error")));
    assert_eq!(
        responses.get(1),
        Some(&json!({"id": "a", "error": "boom", "kind": "handler_error", "traceback": "at line 3"}))
    );
}

#[test]
fn shutdown_control_answers_before_exiting() {
    let dir = TempDir::new().expect("temp dir");
    let handler = unit(&dir, DOUBLER);

    daemon(&handler)
        .write_stdin("{\"control\":\"shutdown\",\"id\":\"s\"}\n{\"id\":\"late\",\"input\":{\"x\":1}}\n")
        .assert()
        .success()
        .stdout(contains(r#"{"id":"s","result":{"status":"stopping"}}"#))
        .stdout(contains("late").not());
}

#[test]
fn invalid_pool_size_exits_with_failure() {
    let dir = TempDir::new().expect("temp dir");
    let handler = unit(&dir, DOUBLER);

    daemon(&handler)
        .args(["--concurrency", "pool:0"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(contains("runletd: daemon bootstrap failed"));
}

#[test]
fn missing_unit_is_fatal_when_loaded_eagerly() {
    let dir = TempDir::new().expect("temp dir");
    let missing = dir.path().join("absent.sh");

    daemon(&missing)
        .env("RUNLET_EAGER_LOAD", "true")
        .write_stdin("")
        .assert()
        .failure()
        .stderr(contains("handler unit failed to load"));
}
