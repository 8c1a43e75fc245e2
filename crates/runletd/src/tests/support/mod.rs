//! Test doubles shared by the daemon's unit and behaviour tests.

mod config_loader;
mod reporter;
mod spawner;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tempfile::TempDir;

use runlet_config::{Concurrency, Framing};

use crate::engine::{Engine, EngineSettings};
use crate::request_loop::{DispatchPool, InFlight, LoopContext, StopFlag};

pub(crate) use self::config_loader::{FailingConfigLoader, TestConfigLoader};
pub(crate) use self::reporter::{HealthEvent, RecordingHealthReporter};
pub(crate) use self::spawner::{MockLauncher, Script, ScriptedSpawner};

/// Writer whose bytes stay readable after it has been boxed away.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub(crate) fn contents(&self) -> Vec<u8> {
        self.bytes.lock().expect("buffer mutex").clone()
    }

    /// Parses newline-framed envelopes.
    pub(crate) fn envelopes(&self) -> Vec<Value> {
        String::from_utf8(self.contents())
            .expect("utf-8 output")
            .lines()
            .map(|line| serde_json::from_str(line).expect("envelope is JSON"))
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().expect("buffer mutex").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer that always fails.
#[derive(Debug, Default)]
pub(crate) struct BrokenPipe;

impl Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

/// An engine over a scripted spawner, with a handler file on disk.
pub(crate) struct EngineFixture {
    _dir: TempDir,
    pub(crate) path: PathBuf,
    pub(crate) spawner: ScriptedSpawner,
    pub(crate) reporter: Arc<RecordingHealthReporter>,
    pub(crate) engine: Arc<Engine>,
}

impl EngineFixture {
    pub(crate) fn new(spawner: ScriptedSpawner, concurrency: Concurrency) -> Self {
        Self::with_settings(spawner, |settings| settings.concurrency = concurrency)
    }

    pub(crate) fn with_settings(
        spawner: ScriptedSpawner,
        adjust: impl FnOnce(&mut EngineSettings),
    ) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("function.py");
        std::fs::write(&path, "def handler(event):\n    return event\n").expect("write unit");
        let mut settings = EngineSettings {
            handler_path: path.clone(),
            ..EngineSettings::default()
        };
        adjust(&mut settings);
        let reporter = Arc::new(RecordingHealthReporter::default());
        let engine = Arc::new(Engine::new(
            Arc::new(spawner.clone()),
            settings,
            reporter.clone(),
        ));
        Self {
            _dir: dir,
            path,
            spawner,
            reporter,
            engine,
        }
    }

    /// Loop context with a fresh stop flag, plus a pool when `concurrency`
    /// asks for one.
    pub(crate) fn context(&self, concurrency: Concurrency) -> LoopContext {
        let pool = match concurrency {
            Concurrency::Sequential => None,
            Concurrency::BoundedPool(size) => Some(Arc::new(
                DispatchPool::start(size, &self.engine).expect("start pool"),
            )),
        };
        LoopContext::new(
            Arc::clone(&self.engine),
            pool,
            StopFlag::new(),
            InFlight::new(),
        )
    }
}

/// Encodes `frames` with `framing`.
pub(crate) fn framed(frames: &[&str], framing: Framing) -> Vec<u8> {
    let mut writer = crate::transport::FrameWriter::new(Vec::new(), framing);
    for frame in frames {
        writer.write_frame(frame.as_bytes()).expect("frame");
    }
    writer.into_inner()
}
