//! Built-in runtime templates: `node20`, `python311` and `go121`.
//!
//! Each runtime ships a small bootstrap that reads the payload from
//! `FNBOX_PAYLOAD_PATH`, calls the user's handler and writes a JSON envelope
//! to `FNBOX_RESULT_PATH`:
//!
//! ```json
//! {"ok": true, "output": 42}
//! {"ok": false, "error": "boom", "stack": "...", "kind": "Error"}
//! ```

use super::template::{
    CommandTemplate, MemoryEnforcement, RuntimeKind, RuntimeLimits, RuntimeTemplate,
};
use crate::types::RuntimeId;

const NODE_BOOTSTRAP: &str = r#"'use strict';
const fs = require('fs');
const path = require('path');

const resultPath = process.env.FNBOX_RESULT_PATH;
const handlerName = process.env.FNBOX_HANDLER || 'handler';
let finished = false;

function finish(envelope, code) {
  if (finished) {
    return;
  }
  finished = true;
  try {
    fs.writeFileSync(resultPath, envelope);
  } catch (err) {
    process.stderr.write(`fnbox: cannot write result: ${err}\n`);
    code = 70;
  }
  process.exit(code);
}

function fail(err, fallbackKind) {
  const error = err instanceof Error ? err : new Error(String(err));
  finish(JSON.stringify({
    ok: false,
    error: error.message || String(err),
    stack: error.stack || '',
    kind: error.name || fallbackKind,
  }), 1);
}

process.on('uncaughtException', (err) => fail(err, 'UncaughtException'));
process.on('unhandledRejection', (err) => fail(err, 'UnhandledRejection'));

(async () => {
  const payload = JSON.parse(fs.readFileSync(process.env.FNBOX_PAYLOAD_PATH, 'utf8'));
  const mod = require(path.join(process.env.FNBOX_ARTIFACT_DIR, '{source_file}'));
  const handler = mod[handlerName];
  if (typeof handler !== 'function') {
    throw new TypeError(`handler '${handlerName}' is not an exported function of {source_file}`);
  }
  const output = await handler(payload);
  finish(JSON.stringify({ ok: true, output: output === undefined ? null : output }), 0);
})().catch((err) => fail(err, 'Error'));
"#;

const PYTHON_BOOTSTRAP: &str = r#"import json
import os
import sys
import traceback


def _finish(envelope, code):
    try:
        with open(os.environ["FNBOX_RESULT_PATH"], "w", encoding="utf-8") as out:
            out.write(envelope)
    except OSError as exc:
        sys.stderr.write("fnbox: cannot write result: %s\n" % exc)
        code = 70
    sys.stdout.flush()
    sys.stderr.flush()
    os._exit(code)


def _main():
    sys.path.insert(0, os.environ["FNBOX_ARTIFACT_DIR"])
    name = os.environ.get("FNBOX_HANDLER", "handler")
    try:
        with open(os.environ["FNBOX_PAYLOAD_PATH"], encoding="utf-8") as f:
            event = json.load(f)
        module = __import__("{module}")
        fn = getattr(module, name, None)
        if not callable(fn):
            raise TypeError("handler '%s' is not a function in {source_file}" % name)
        envelope = json.dumps({"ok": True, "output": fn(event)})
    except SystemExit:
        raise
    except BaseException as exc:
        envelope = json.dumps({
            "ok": False,
            "error": str(exc) or type(exc).__name__,
            "stack": traceback.format_exc(),
            "kind": type(exc).__name__,
        })
        _finish(envelope, 1)
    _finish(envelope, 0)


_main()
"#;

const GO_MOD: &str = "module fnbox/function\n\ngo 1.21\n";

const GO_MAIN: &str = r#"package main

import (
	"encoding/json"
	"fmt"
	"os"
	"runtime/debug"
)

type fnboxEnvelope struct {
	Ok     bool   `json:"ok"`
	Output any    `json:"output"`
	Error  string `json:"error,omitempty"`
	Stack  string `json:"stack,omitempty"`
	Kind   string `json:"kind,omitempty"`
}

func fnboxFinish(envelope fnboxEnvelope, code int) {
	data, err := json.Marshal(envelope)
	if err != nil {
		data, _ = json.Marshal(fnboxEnvelope{Error: "cannot encode handler output: " + err.Error(), Kind: "EncodeError"})
		code = 1
	}
	if err := os.WriteFile(os.Getenv("FNBOX_RESULT_PATH"), data, 0o600); err != nil {
		fmt.Fprintln(os.Stderr, "fnbox: cannot write result:", err)
		code = 70
	}
	os.Exit(code)
}

func main() {
	defer func() {
		if r := recover(); r != nil {
			fnboxFinish(fnboxEnvelope{Error: fmt.Sprint(r), Stack: string(debug.Stack()), Kind: "panic"}, 1)
		}
	}()

	payload, err := os.ReadFile(os.Getenv("FNBOX_PAYLOAD_PATH"))
	if err != nil {
		fnboxFinish(fnboxEnvelope{Error: err.Error(), Kind: "PayloadError"}, 1)
	}
	output, err := {handler}(json.RawMessage(payload))
	if err != nil {
		fnboxFinish(fnboxEnvelope{Error: err.Error(), Kind: "error"}, 1)
	}
	fnboxFinish(fnboxEnvelope{Ok: true, Output: output}, 0)
}
"#;

fn id(name: &str) -> RuntimeId {
    match RuntimeId::parse(name) {
        Ok(id) => id,
        Err(e) => unreachable!("built-in runtime id '{name}' is invalid: {e}"),
    }
}

/// Node.js 20. Handlers are CommonJS exports of `index.js` and may be async.
#[must_use]
pub fn node20() -> RuntimeTemplate {
    RuntimeTemplate::new(
        id("node20"),
        "JavaScript (Node.js 20)",
        RuntimeKind::Interpreted,
        "node",
        "index.js",
        CommandTemplate::toolchain([
            "--max-old-space-size={memory_mb}",
            "{artifact_dir}/fnbox_bootstrap.js",
        ]),
    )
    .with_scaffold("fnbox_bootstrap.js", NODE_BOOTSTRAP)
    .with_build(CommandTemplate::toolchain(["--check", "{source_file}"]))
    .with_launch_env("NODE_ENV", "production")
    .with_memory_enforcement(MemoryEnforcement::Watchdog)
    .with_oom_marker("JavaScript heap out of memory")
    .with_oom_marker("Allocation failed - process out of memory")
    .with_default_limits(RuntimeLimits {
        memory_mb: 128,
        timeout_ms: 3_000,
    })
}

/// CPython 3.11. Handlers are functions in `handler.py` taking the event.
///
/// `-I` makes the interpreter ignore `PYTHON*` variables, so stdio is
/// unbuffered with `-u`; prints survive a timeout kill.
#[must_use]
pub fn python311() -> RuntimeTemplate {
    let bootstrap = PYTHON_BOOTSTRAP.replace("{module}", "handler");
    RuntimeTemplate::new(
        id("python311"),
        "Python 3.11",
        RuntimeKind::Interpreted,
        "python3",
        "handler.py",
        CommandTemplate::toolchain(["-I", "-B", "-u", "{artifact_dir}/fnbox_bootstrap.py"]),
    )
    .with_scaffold("fnbox_bootstrap.py", bootstrap)
    .with_build(CommandTemplate::toolchain([
        "-I",
        "-c",
        "import ast,sys;ast.parse(open(sys.argv[1],encoding='utf-8').read(),sys.argv[1])",
        "{source_file}",
    ]))
    .with_memory_enforcement(MemoryEnforcement::AddressSpace)
    .with_oom_marker(r"\bMemoryError\b")
    .with_default_limits(RuntimeLimits {
        memory_mb: 128,
        timeout_ms: 3_000,
    })
}

/// Go 1.21. Handlers are `func(json.RawMessage) (any, error)` in package main.
#[must_use]
pub fn go121() -> RuntimeTemplate {
    RuntimeTemplate::new(
        id("go121"),
        "Go 1.21",
        RuntimeKind::Compiled,
        "go",
        "handler.go",
        CommandTemplate::artifact("fnbox-handler", Vec::<String>::new()),
    )
    .with_probe_args(["version"])
    .with_scaffold("go.mod", GO_MOD)
    .with_scaffold("fnbox_main.go", GO_MAIN)
    .with_build(CommandTemplate::toolchain([
        "build",
        "-trimpath",
        "-o",
        "fnbox-handler",
        ".",
    ]))
    .with_build_env("CGO_ENABLED", "0")
    .with_build_env("GOTOOLCHAIN", "local")
    .with_build_env("GOFLAGS", "-mod=mod")
    .with_build_env("GOCACHE", "{cache_dir}/go/build")
    .with_build_env("GOPATH", "{cache_dir}/go/path")
    .with_build_env("HOME", "{cache_dir}")
    .with_launch_env("GOMEMLIMIT", "{memory_mb}MiB")
    .with_memory_enforcement(MemoryEnforcement::Watchdog)
    .with_oom_marker("runtime: out of memory")
    .with_oom_marker("fatal error: out of memory")
    .with_default_limits(RuntimeLimits {
        memory_mb: 128,
        timeout_ms: 3_000,
    })
}

/// Returns every built-in template.
#[must_use]
pub fn all() -> Vec<RuntimeTemplate> {
    vec![node20(), python311(), go121()]
}
