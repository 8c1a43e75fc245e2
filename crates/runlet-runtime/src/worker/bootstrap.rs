//! In-process bootstraps that turn a language runtime into a worker.
//!
//! Each bootstrap imports the unit named by `RUNLET_HANDLER_PATH`, resolves
//! `RUNLET_ENTRY_SYMBOL`, writes the handshake and then serves calls. The
//! handler's own stdout writes are moved onto stderr so only protocol lines
//! reach the host.

use std::process::Command;

use super::isolation::EnvironmentPolicy;
use crate::unit::{HandlerRuntime, UnitSource};

pub(crate) const HANDLER_PATH_VAR: &str = "RUNLET_HANDLER_PATH";
pub(crate) const ENTRY_SYMBOL_VAR: &str = "RUNLET_ENTRY_SYMBOL";

const PYTHON_BOOTSTRAP: &str = r#"
import importlib.machinery
import importlib.util
import json
import os
import sys
import traceback

_protocol = os.fdopen(os.dup(1), "w", encoding="utf-8")
os.dup2(2, 1)
sys.stdout = sys.stderr


def _emit(message):
    _protocol.write(json.dumps(message) + "\n")
    _protocol.flush()


def _failure(kind, exc):
    return {
        "outcome": "failure",
        "kind": kind,
        "message": str(exc) or type(exc).__name__,
        "traceback": traceback.format_exc(),
    }


_path = os.environ["RUNLET_HANDLER_PATH"]
_entry = os.environ.get("RUNLET_ENTRY_SYMBOL", "handler")

try:
    _loader = importlib.machinery.SourceFileLoader("function", _path)
    _spec = importlib.util.spec_from_loader("function", _loader)
    _module = importlib.util.module_from_spec(_spec)
    sys.modules["function"] = _module
    _loader.exec_module(_module)
except BaseException as exc:
    _emit({
        "status": "load_error",
        "kind": "syntax_or_import_error",
        "message": f"{type(exc).__name__}: {exc}",
        "traceback": traceback.format_exc(),
    })
    sys.exit(0)

_handler = getattr(_module, _entry, None)
if not callable(_handler):
    _emit({
        "status": "load_error",
        "kind": "missing_entry_point",
        "message": f"Function must define a '{_entry}' function",
        "traceback": None,
    })
    sys.exit(0)

_emit({"status": "ready"})

for _line in sys.stdin:
    if not _line.strip():
        continue
    _call = json.loads(_line)
    try:
        _value = _handler(_call.get("input"))
        try:
            _reply = json.dumps({"outcome": "success", "value": _value}, allow_nan=False)
        except (TypeError, ValueError) as exc:
            _reply = json.dumps(_failure("handler_error", exc))
    except MemoryError as exc:
        _reply = json.dumps(_failure("resource_exceeded", exc))
    except BaseException as exc:
        _reply = json.dumps(_failure("handler_error", exc))
    _protocol.write(_reply + "\n")
    _protocol.flush()
"#;

const NODE_BOOTSTRAP: &str = r#"
const fs = require('fs');
const path = require('path');
const readline = require('readline');
const { pathToFileURL } = require('url');

const emit = (message) => fs.writeSync(1, JSON.stringify(message) + '\n');
const toStderr = (...args) => console.error(...args);
console.log = toStderr;
console.info = toStderr;
console.debug = toStderr;
process.stdout.write = (chunk, encoding, callback) =>
  process.stderr.write(chunk, encoding, callback);

const isMemoryError = (err) =>
  err instanceof RangeError && /memory|heap|allocation/i.test(String(err.message));

const describe = (err) =>
  err && err.message !== undefined ? String(err.message) : String(err);

async function main() {
  const unitPath = path.resolve(process.env.RUNLET_HANDLER_PATH);
  const entry = process.env.RUNLET_ENTRY_SYMBOL || 'handler';
  let handler;
  try {
    const mod = await import(pathToFileURL(unitPath).href);
    handler = mod[entry] || (mod.default && mod.default[entry]);
  } catch (err) {
    emit({
      status: 'load_error',
      kind: 'syntax_or_import_error',
      message: describe(err),
      traceback: (err && err.stack) || null,
    });
    process.exit(0);
  }
  if (typeof handler !== 'function') {
    emit({
      status: 'load_error',
      kind: 'missing_entry_point',
      message: `Function must define a '${entry}' function`,
      traceback: null,
    });
    process.exit(0);
  }
  emit({ status: 'ready' });

  const serve = async (line) => {
    const call = JSON.parse(line);
    try {
      const value = await handler(call.input === undefined ? null : call.input);
      emit({ outcome: 'success', value: value === undefined ? null : value });
    } catch (err) {
      emit({
        outcome: 'failure',
        kind: isMemoryError(err) ? 'resource_exceeded' : 'handler_error',
        message: describe(err),
        traceback: (err && err.stack) || null,
      });
    }
  };

  let queue = Promise.resolve();
  const input = readline.createInterface({ input: process.stdin, terminal: false });
  input.on('line', (line) => {
    if (line.trim()) {
      queue = queue.then(() => serve(line));
    }
  });
  input.on('close', () => queue.then(() => process.exit(0)));
}

main();
"#;

/// Builds the command that starts a worker for `source`.
///
/// `interpreter` replaces the default `python3`/`node` program, or launches
/// an executable unit (for example `sh unit`). The
/// environment policy is applied before the unit variables are set.
pub(crate) fn command_for(
    source: &UnitSource,
    interpreter: Option<&str>,
    environment: &EnvironmentPolicy,
) -> Command {
    let mut command = match source.runtime() {
        HandlerRuntime::Python => {
            let mut command = Command::new(interpreter.unwrap_or("python3"));
            command.args(["-u", "-c", PYTHON_BOOTSTRAP]);
            command
        }
        HandlerRuntime::Node => {
            let mut command = Command::new(interpreter.unwrap_or("node"));
            command.args(["-e", NODE_BOOTSTRAP]);
            command
        }
        HandlerRuntime::Executable => match interpreter {
            Some(launcher) => {
                let mut command = Command::new(launcher);
                command.arg(source.path());
                command
            }
            None => Command::new(source.path()),
        },
    };
    environment.apply(&mut command);
    command.env(HANDLER_PATH_VAR, source.path());
    command.env(ENTRY_SYMBOL_VAR, source.entry_symbol());
    if let Some(dir) = source.path().parent().filter(|dir| !dir.as_os_str().is_empty()) {
        command.current_dir(dir);
    }
    command
}
