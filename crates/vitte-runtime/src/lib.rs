//! Host-service layer for Vitte: the bits a native function needs that
//! aren't bytecode at all — a capturable stdout, a small env-var surface,
//! and a process clock. `vitte-vm` never touches this crate directly;
//! `vitte-stdlib`'s natives are built on top of it.
//!
//! - [`Value`]: a small dynamic type for the native-function boundary
//!   (distinct from `vitte_vm::Value` — this one is the FFI-facing shape).
//! - [`Runtime`] / [`RuntimeCtx`]: a registry of `module.name` natives plus
//!   the shared context (stdout, env KV) they run against.
//! - [`Captured`]: a `Write` sink that buffers into a `String`, for tests
//!   and REPLs that want to inspect what a program printed.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg_attr(feature = "errors", derive(thiserror::Error))]
#[derive(Debug)]
/// Runtime-level failures (native not found, bad arity, bad type, I/O).
pub enum Error {
    /// No native registered under this fully-qualified name.
    #[cfg_attr(feature = "errors", error("native not found: {0}"))]
    NotFound(String),
    /// Caller supplied the wrong number of arguments for a fixed-arity native.
    #[cfg_attr(feature = "errors", error("bad arity: expected {expected}, got {got}"))]
    Arity {
        /// Declared arity.
        expected: usize,
        /// Arguments actually supplied.
        got: usize,
    },
    /// A `TryFrom<Value>` conversion failed.
    #[cfg_attr(feature = "errors", error("invalid type: expected {0}"))]
    Type(String),
    /// Underlying host I/O failure.
    #[cfg_attr(feature = "errors", error("io: {0}"))]
    Io(#[cfg_attr(feature = "errors", from)] io::Error),
    /// Catch-all message.
    #[cfg_attr(feature = "errors", error("{0}"))]
    Msg(String),
}

#[cfg(not(feature = "errors"))]
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(n) => write!(f, "native not found: {n}"),
            Error::Arity { expected, got } => write!(f, "bad arity: expected {expected}, got {got}"),
            Error::Type(t) => write!(f, "invalid type: {t}"),
            Error::Io(e) => write!(f, "io: {e}"),
            Error::Msg(m) => write!(f, "{m}"),
        }
    }
}

#[cfg(not(feature = "errors"))]
impl std::error::Error for Error {}

#[cfg(not(feature = "errors"))]
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self { Error::Io(e) }
}

/// Result alias used throughout this crate.
pub type RResult<T> = std::result::Result<T, Error>;

/// The small dynamic value exchanged across the native-function boundary.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// No value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// Owned UTF-8 string.
    Str(String),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::I64(i) => write!(f, "I64({i})"),
            Value::F64(x) => write!(f, "F64({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
        }
    }
}

impl From<()> for Value { fn from(_: ()) -> Self { Value::Null } }
impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::I64(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::F64(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::Str(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::Str(v.to_owned()) } }

impl TryFrom<Value> for i64 {
    type Error = Error;
    fn try_from(v: Value) -> RResult<Self> {
        match v {
            Value::I64(i) => Ok(i),
            Value::F64(x) => Ok(x as i64),
            _ => Err(Error::Type("i64".into())),
        }
    }
}
impl TryFrom<Value> for String {
    type Error = Error;
    fn try_from(v: Value) -> RResult<Self> {
        match v { Value::Str(s) => Ok(s), _ => Err(Error::Type("string".into())) }
    }
}

/// Signature of a registered native: arguments plus a mutable context.
pub type NativeFn = fn(&[Value], &mut RuntimeCtx) -> RResult<Value>;

/// A registered native's bookkeeping.
#[derive(Clone)]
pub struct NativeEntry {
    /// `module.name`.
    pub fqname: String,
    /// Declared arity, if fixed.
    pub arity: Option<usize>,
    /// The function pointer itself.
    pub func: NativeFn,
}

/// Context shared by every native call: where output goes, and the
/// process-wide key/value env store natives can read and write.
pub struct RuntimeCtx {
    /// Sink for `io.print`/`io.println` (swappable, so tests can capture it).
    pub stdout: Box<dyn Write + Send>,
    /// A small key/value store, separate from `std::env`, that natives can
    /// share state through.
    pub env: HashMap<String, Value>,
}

impl RuntimeCtx {
    /// Writes raw bytes to `stdout`.
    pub fn write_str(&mut self, s: &str) -> io::Result<()> { self.stdout.write_all(s.as_bytes()) }
    /// Writes `s` followed by a newline.
    pub fn writeln_str(&mut self, s: &str) -> io::Result<()> {
        self.stdout.write_all(s.as_bytes())?;
        self.stdout.write_all(b"\n")
    }
}

/// A registry of `module.name` natives plus the context they run against.
pub struct Runtime {
    registry: HashMap<String, NativeEntry>,
    ctx: RuntimeCtx,
}

impl Default for Runtime {
    fn default() -> Self { Self::new() }
}

impl Runtime {
    /// A runtime with real `stdout` and an empty env store.
    pub fn new() -> Self {
        Self {
            registry: HashMap::new(),
            ctx: RuntimeCtx { stdout: Box::new(io::stdout()), env: HashMap::new() },
        }
    }

    /// A runtime whose `stdout` is captured into a `String`, for tests.
    pub fn with_captured_stdout() -> (Self, Captured) {
        let cap = Captured::default();
        let rt = Self {
            registry: HashMap::new(),
            ctx: RuntimeCtx { stdout: Box::new(cap.clone()), env: HashMap::new() },
        };
        (rt, cap)
    }

    /// Swaps in a custom `stdout` sink.
    pub fn with_stdout<W: Write + Send + 'static>(mut self, w: W) -> Self {
        self.ctx.stdout = Box::new(w);
        self
    }

    /// Registers one native under `module.name`.
    pub fn register_fn(&mut self, module: &str, name: &str, arity: Option<usize>, func: NativeFn) {
        let fq = format!("{module}.{name}");
        self.registry.insert(fq.clone(), NativeEntry { fqname: fq, arity, func });
    }

    /// Registers a whole module's worth of natives at once.
    pub fn register_all(&mut self, module: &str, entries: &[(&str, Option<usize>, NativeFn)]) {
        for (name, arity, func) in entries {
            self.register_fn(module, name, *arity, *func);
        }
    }

    /// Invokes a registered native by `module.name`.
    pub fn call<S: AsRef<str>>(&mut self, fqname: S, args: &[Value]) -> RResult<Value> {
        let key = fqname.as_ref();
        let entry = self.registry.get(key).ok_or_else(|| Error::NotFound(key.to_string()))?;
        if let Some(exp) = entry.arity {
            if args.len() != exp {
                return Err(Error::Arity { expected: exp, got: args.len() });
            }
        }
        (entry.func)(args, &mut self.ctx)
    }

    /// Preloads `io` (print/println), `time` (now_ms), and `os`
    /// (getenv/setenv) — the three host-service concerns this crate covers.
    pub fn with_defaults() -> Self {
        let mut rt = Self::new();
        rt.register_all("io", &[
            ("print", Some(1), native_io_print as NativeFn),
            ("println", Some(1), native_io_println as NativeFn),
        ]);
        rt.register_all("time", &[("now_ms", Some(0), native_time_now_ms as NativeFn)]);
        rt.register_all("os", &[
            ("getenv", Some(1), native_os_getenv as NativeFn),
            ("setenv", Some(2), native_os_setenv as NativeFn),
        ]);
        rt
    }
}

fn native_io_print(args: &[Value], ctx: &mut RuntimeCtx) -> RResult<Value> {
    let s: String = args[0].clone().try_into().unwrap_or_else(|_| format!("{:?}", args[0]));
    ctx.write_str(&s)?;
    Ok(Value::Null)
}

fn native_io_println(args: &[Value], ctx: &mut RuntimeCtx) -> RResult<Value> {
    let s: String = args[0].clone().try_into().unwrap_or_else(|_| format!("{:?}", args[0]));
    ctx.writeln_str(&s)?;
    Ok(Value::Null)
}

fn native_time_now_ms(_args: &[Value], _ctx: &mut RuntimeCtx) -> RResult<Value> {
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Msg(format!("clock error: {e}")))?;
    Ok(Value::I64(t.as_millis() as i64))
}

fn native_os_getenv(args: &[Value], _ctx: &mut RuntimeCtx) -> RResult<Value> {
    let key: String = args[0].clone().try_into()?;
    match std::env::var(&key) {
        Ok(v) => Ok(Value::Str(v)),
        Err(_) => Ok(Value::Null),
    }
}

fn native_os_setenv(args: &[Value], _ctx: &mut RuntimeCtx) -> RResult<Value> {
    let key: String = args[0].clone().try_into()?;
    let val: String = args[1].clone().try_into()?;
    std::env::set_var(key, val);
    Ok(Value::Bool(true))
}

/// Declares a native in two lines instead of the full function signature.
#[macro_export]
macro_rules! vitte_native {
    ($name:ident |$args:ident, $ctx:ident| $body:block) => {
        pub fn $name($args: &[$crate::Value], $ctx: &mut $crate::RuntimeCtx) -> $crate::RResult<$crate::Value> {
            $body
        }
    };
}

/// A `Write` sink that buffers into a shared `String`, for capturing what a
/// program printed during a test.
#[derive(Default, Clone)]
pub struct Captured(std::sync::Arc<std::sync::Mutex<String>>);

impl Captured {
    /// Snapshot of everything written so far.
    pub fn get(&self) -> String { self.0.lock().unwrap().clone() }
    /// Clears the buffer.
    pub fn clear(&self) { self.0.lock().unwrap().clear(); }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().push_str(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

/// Convenience re-export bundle.
pub mod prelude {
    pub use crate::{vitte_native, Captured, Error, NativeEntry, NativeFn, RResult, Runtime, RuntimeCtx, Value};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_natives_cover_io_time_os() {
        let (mut rt, cap) = Runtime::with_captured_stdout();
        rt = Runtime::with_defaults().with_stdout(cap.clone());

        rt.call("io.println", &[Value::from("yo")]).unwrap();
        assert!(cap.get().contains("yo"));

        let v = rt.call("time.now_ms", &[]).unwrap();
        assert!(matches!(v, Value::I64(i) if i > 0));
    }

    #[test]
    fn getenv_returns_null_for_unset_key() {
        let mut rt = Runtime::with_defaults();
        let v = rt.call("os.getenv", &[Value::from("VITTE_RUNTIME_TEST_UNSET_KEY")]).unwrap();
        assert!(matches!(v, Value::Null));
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let mut rt = Runtime::with_defaults();
        let err = rt.call("io.print", &[]).unwrap_err();
        assert!(matches!(err, Error::Arity { expected: 1, got: 0 }));
    }

    #[test]
    fn register_and_call_custom() {
        vitte_native!(plus_one |args, _ctx| {
            let x: i64 = args.first().cloned().ok_or(Error::Arity { expected: 1, got: 0 })?.try_into()?;
            Ok((x + 1).into())
        });
        let mut rt = Runtime::new();
        rt.register_fn("demo", "plus_one", Some(1), plus_one);
        let out = rt.call("demo.plus_one", &[Value::from(9i64)]).unwrap();
        assert!(matches!(out, Value::I64(10)));
    }
}
