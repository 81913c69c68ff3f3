//! Driver program and its JSON-line protocol.
//!
//! The driver runs inside the interpreter and keeps one global namespace
//! for the life of the process. Each request line gets exactly one reply
//! line on the real stdout; user output is captured per request. When the
//! code ends in an expression its value is reported as the result.

use classroom_ide_core::Evaluation;
use serde::{Deserialize, Serialize};

/// Python source passed with `-c`.
pub const DRIVER: &str = r##"
import ast, builtins, io, json, platform, sys, traceback

_reply_out = sys.__stdout__
_requests = sys.stdin
sys.stdin = io.StringIO()


def _no_input(prompt=""):
    raise EOFError("input() is not supported in browser mode")


builtins.input = _no_input


def _fresh():
    return {"__name__": "__main__", "__builtins__": builtins}


_ns = _fresh()


def _format_error():
    etype, value, tb = sys.exc_info()
    if isinstance(value, SyntaxError):
        return "".join(traceback.format_exception_only(etype, value))
    if tb is not None:
        tb = tb.tb_next
    return "".join(traceback.format_exception(etype, value, tb))


def _run(code):
    out, err = io.StringIO(), io.StringIO()
    result = None
    error = None
    sys.stdout, sys.stderr = out, err
    try:
        tree = ast.parse(code, "<stdin>", "exec")
        last = None
        if tree.body and isinstance(tree.body[-1], ast.Expr):
            last = ast.Expression(tree.body.pop().value)
        exec(compile(tree, "<stdin>", "exec"), _ns)
        if last is not None:
            value = eval(compile(last, "<stdin>", "eval"), _ns)
            if value is not None:
                _ns["_"] = value
                try:
                    result = repr(value)
                except Exception:
                    result = str(value)
    except BaseException:
        error = _format_error()
    finally:
        sys.stdout, sys.stderr = sys.__stdout__, sys.__stderr__
    return {"stdout": out.getvalue(), "stderr": err.getvalue(), "result": result, "error": error}


def _reply(obj):
    _reply_out.write(json.dumps(obj) + "\n")
    _reply_out.flush()


_reply({"ready": True, "version": platform.python_version()})

for _line in _requests:
    _line = _line.strip()
    if not _line:
        continue
    try:
        _req = json.loads(_line)
    except ValueError as e:
        _reply({"error": "bad request: %s" % e})
        continue
    _op = _req.get("op")
    if _op == "run":
        _reply(_run(_req.get("code", "")))
    elif _op == "reset":
        _ns.clear()
        _ns.update(_fresh())
        _reply({})
    else:
        _reply({"error": "unknown op: %r" % (_op,)})
"##;

/// Flags placed before the driver source.
pub const DRIVER_FLAGS: [&str; 2] = ["-u", "-c"];

/// Request sent to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request<'a> {
    Run { code: &'a str },
    Reset,
}

/// First line written by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Ready {
    pub ready: bool,
    #[serde(default)]
    pub version: Option<String>,
}

/// Reply to one request; same shape as [`Evaluation`].
pub type Reply = Evaluation;
