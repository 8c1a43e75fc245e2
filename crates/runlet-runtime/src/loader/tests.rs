//! Unit tests for the handler unit cache.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::error::LoadErrorKind;
use crate::tests::{MockHandle, MockLauncher, Script, ScriptedSpawner};
use crate::worker::Worker;

struct UnitFile {
    _dir: TempDir,
    path: PathBuf,
}

#[fixture]
fn unit_file() -> UnitFile {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("function.py");
    fs::write(&path, "def handler(event):\n    return event\n").expect("write unit");
    UnitFile { _dir: dir, path }
}

fn idle_handle() -> Box<dyn Worker> {
    let mut handle = MockHandle::new();
    handle.expect_terminate().return_const(());
    Box::new(handle)
}

#[rstest]
fn second_load_is_a_cache_hit(unit_file: UnitFile) {
    let mut launcher = MockLauncher::new();
    launcher
        .expect_spawn()
        .times(1)
        .returning(|_| Ok(idle_handle()));
    let loader = Loader::new(Arc::new(launcher), LoaderSettings::default());

    let first = loader.load(&unit_file.path).expect("first load");
    let second = loader.load(&unit_file.path).expect("second load");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.idle_count(), 1);
}

#[rstest]
fn load_passes_detected_runtime_and_entry_symbol(unit_file: UnitFile) {
    let mut launcher = MockLauncher::new();
    launcher
        .expect_spawn()
        .withf(|source| {
            source.runtime() == HandlerRuntime::Python && source.entry_symbol() == "main"
        })
        .times(1)
        .returning(|_| Ok(idle_handle()));
    let settings = LoaderSettings {
        entry_symbol: String::from("main"),
        ..LoaderSettings::default()
    };
    let loader = Loader::new(Arc::new(launcher), settings);
    loader.load(&unit_file.path).expect("load");
}

#[rstest]
fn failed_load_is_cached_and_repeated(unit_file: UnitFile) {
    let mut launcher = MockLauncher::new();
    launcher
        .expect_spawn()
        .times(1)
        .returning(|_| Err(LoadError::missing_entry_point("handler")));
    let loader = Loader::new(Arc::new(launcher), LoaderSettings::default());

    for _ in 0..3 {
        let error = loader.load(&unit_file.path).expect_err("load must fail");
        assert_eq!(error.kind(), LoadErrorKind::MissingEntryPoint);
        assert_eq!(error.message(), "Function must define a 'handler' function");
    }
    let cached = loader.cached(&unit_file.path).expect("failed unit is cached");
    assert!(!cached.is_loaded());
}

#[test]
fn missing_file_fails_without_spawning() {
    let mut launcher = MockLauncher::new();
    launcher.expect_spawn().never();
    let loader = Loader::new(Arc::new(launcher), LoaderSettings::default());

    let error = loader
        .load(Path::new("/nonexistent/runlet/function.py"))
        .expect_err("missing unit");
    assert_eq!(error.kind(), LoadErrorKind::SyntaxOrImportError);
    assert!(error.message().contains("not found"));
}

#[rstest]
fn invalidate_retires_workers_and_forces_reload(unit_file: UnitFile) {
    let spawner = ScriptedSpawner::new(Script::Double);
    let loader = Loader::new(Arc::new(spawner.clone()), LoaderSettings::default());

    loader.load(&unit_file.path).expect("load");
    assert!(loader.invalidate(&unit_file.path));
    assert_eq!(spawner.terminated_count(), 1);
    assert!(!loader.invalidate(&unit_file.path));

    loader.load(&unit_file.path).expect("reload");
    assert_eq!(spawner.spawn_count(), 2);
}

#[rstest]
#[case::reload_enabled(true, 2)]
#[case::reload_disabled(false, 1)]
fn changed_file_reloads_only_when_enabled(
    unit_file: UnitFile,
    #[case] reload_on_change: bool,
    #[case] expected_spawns: usize,
) {
    let spawner = ScriptedSpawner::new(Script::Double);
    let settings = LoaderSettings {
        reload_on_change,
        ..LoaderSettings::default()
    };
    let loader = Loader::new(Arc::new(spawner.clone()), settings);

    loader.load(&unit_file.path).expect("load");
    fs::write(
        &unit_file.path,
        "def handler(event):\n    return {'changed': event}\n",
    )
    .expect("rewrite unit");
    loader.load(&unit_file.path).expect("load again");

    assert_eq!(spawner.spawn_count(), expected_spawns);
}

#[rstest]
fn concurrent_loads_share_one_load(unit_file: UnitFile) {
    let spawner = ScriptedSpawner::new(Script::Double).with_load_delay(Duration::from_millis(50));
    let loader = Arc::new(Loader::new(
        Arc::new(spawner.clone()),
        LoaderSettings::default(),
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let loader = Arc::clone(&loader);
            let path = unit_file.path.clone();
            thread::spawn(move || loader.load(&path).map(|unit| unit.path().to_path_buf()))
        })
        .collect();
    for handle in handles {
        handle.join().expect("join loader thread").expect("load");
    }

    assert_eq!(spawner.spawn_count(), 1);
}

#[rstest]
fn shutdown_retires_every_unit(unit_file: UnitFile) {
    let spawner = ScriptedSpawner::new(Script::Double);
    let loader = Loader::new(Arc::new(spawner.clone()), LoaderSettings::default());
    loader.load(&unit_file.path).expect("load");

    loader.shutdown();

    assert_eq!(spawner.terminated_count(), 1);
    assert!(loader.cached(&unit_file.path).is_none());
}
