//! Unit tests for deadline resolution and outcome mapping.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::error::LoadError;
use crate::loader::{Loader, LoaderSettings};
use crate::tests::{MockHandle, MockLauncher, Script, ScriptedSpawner};
use crate::worker::Worker;

struct Fixture {
    _dir: TempDir,
    path: PathBuf,
}

#[fixture]
fn unit() -> Fixture {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("function.py");
    fs::write(&path, "def handler(event):\n    return event\n").expect("write unit");
    Fixture { _dir: dir, path }
}

fn load(spawner: ScriptedSpawner, path: &std::path::Path) -> Arc<HandlerUnit> {
    Loader::new(Arc::new(spawner), LoaderSettings::default())
        .load(path)
        .expect("load unit")
}

#[rstest]
#[case::default_applies(None, 30_000)]
#[case::request_wins(Some(500), 500)]
#[case::capped_at_max(Some(900_000), 300_000)]
fn resolves_deadlines(#[case] requested_ms: Option<u64>, #[case] expected_ms: u64) {
    let policy = DeadlinePolicy::default();
    assert_eq!(
        policy.resolve(requested_ms.map(Duration::from_millis)),
        Duration::from_millis(expected_ms)
    );
}

#[test]
fn max_never_undercuts_default() {
    let policy = DeadlinePolicy::new(Duration::from_secs(10), Duration::from_secs(1));
    assert_eq!(policy.resolve(None), Duration::from_secs(10));
}

#[rstest]
fn success_returns_value_and_keeps_worker(unit: Fixture) {
    let loaded = load(ScriptedSpawner::new(Script::Double), &unit.path);
    let invoker = Invoker::default();

    let result = invoker.invoke(&loaded, json!({"x": 2}), None);

    assert_eq!(result, InvocationResult::success(json!({"y": 4})));
    assert_eq!(loaded.idle_count(), 1);
}

#[rstest]
fn handler_error_carries_traceback(unit: Fixture) {
    let loaded = load(ScriptedSpawner::new(Script::Raise), &unit.path);

    match Invoker::default().invoke(&loaded, json!(null), None) {
        InvocationResult::Failure { kind, message, trace } => {
            assert_eq!(kind, FailureKind::HandlerError);
            assert_eq!(message, "boom");
            assert!(trace.is_some_and(|text| text.contains("Traceback")));
        }
        other @ InvocationResult::Success { .. } => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(loaded.idle_count(), 1, "a raising handler keeps its worker");
}

#[rstest]
fn timeout_discards_worker_and_respawns(unit: Fixture) {
    let spawner = ScriptedSpawner::new(Script::Hang);
    let loaded = load(spawner.clone(), &unit.path);
    let invoker = Invoker::default();

    let started = Instant::now();
    let result = invoker.invoke(&loaded, json!(1), Some(Duration::from_millis(20)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
    assert_eq!(spawner.terminated_count(), 1);
    assert_eq!(loaded.idle_count(), 0);

    let again = invoker.invoke(&loaded, json!(1), Some(Duration::from_millis(20)));
    assert_eq!(again.failure_kind(), Some(FailureKind::Timeout));
    assert_eq!(spawner.spawn_count(), 2);
}

#[rstest]
#[case::crash(Script::Crash, FailureKind::HandlerError)]
#[case::memory(Script::ExhaustMemory, FailureKind::ResourceExceeded)]
fn maps_worker_outcomes(unit: Fixture, #[case] script: Script, #[case] expected: FailureKind) {
    let loaded = load(ScriptedSpawner::new(script), &unit.path);
    let result = Invoker::default().invoke(&loaded, json!({}), None);
    assert_eq!(result.failure_kind(), Some(expected));
}

#[rstest]
fn resource_fault_is_reported_as_resource_exceeded(unit: Fixture) {
    let mut launcher = MockLauncher::new();
    launcher.expect_spawn().times(1).returning(|_| {
        let mut handle = MockHandle::new();
        handle.expect_call().times(1).returning(|_, _| {
            Err(WorkerFault::ResourceExceeded {
                message: String::from("CPU time limit exceeded (SIGXCPU)"),
            })
        });
        handle.expect_terminate().times(1).return_const(());
        Ok(Box::new(handle) as Box<dyn Worker>)
    });
    let loaded = Loader::new(Arc::new(launcher), LoaderSettings::default())
        .load(&unit.path)
        .expect("load");

    match Invoker::default().invoke(&loaded, json!(null), None) {
        InvocationResult::Failure { kind, message, .. } => {
            assert_eq!(kind, FailureKind::ResourceExceeded);
            assert!(message.contains("SIGXCPU"), "{message}");
        }
        other @ InvocationResult::Success { .. } => panic!("expected failure, got {other:?}"),
    }
}

#[rstest]
fn respawn_failure_surfaces_load_kind(unit: Fixture) {
    let mut launcher = MockLauncher::new();
    let mut spawned = 0;
    launcher.expect_spawn().times(2).returning(move |_| {
        spawned += 1;
        if spawned == 1 {
            let mut handle = MockHandle::new();
            handle
                .expect_call()
                .returning(|_, timeout| Err(WorkerFault::DeadlineExceeded { timeout }));
            handle.expect_terminate().return_const(());
            Ok(Box::new(handle) as Box<dyn Worker>)
        } else {
            Err(LoadError::syntax_or_import("SyntaxError: invalid syntax", None))
        }
    });
    let loaded = Loader::new(Arc::new(launcher), LoaderSettings::default())
        .load(&unit.path)
        .expect("load");
    let invoker = Invoker::default();

    let first = invoker.invoke(&loaded, json!(null), Some(Duration::from_millis(5)));
    assert_eq!(first.failure_kind(), Some(FailureKind::Timeout));
    let second = invoker.invoke(&loaded, json!(null), None);
    assert_eq!(second.failure_kind(), Some(FailureKind::SyntaxOrImportError));
}
