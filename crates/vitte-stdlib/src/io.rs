//! `print`, `input`, file handles (`fopen`/`fread`/`fwrite`), and the host
//! services (`getenv`/`setenv`/`clock`) — the natives bound directly as
//! globals rather than tucked inside a per-type bag, matching the reference
//! implementation's `## io` group.
//!
//! `print`, `getenv`, `setenv`, and `clock` are routed through a shared
//! [`vitte_runtime::Runtime`] rather than touching `std::io`/`std::env`
//! directly, so a host embedding this VM can swap in a captured stdout or a
//! sandboxed env store. `input` and the file natives stay on `std::io`
//! directly: stdin reading and file handles are outside that runtime's
//! scope (stdout capture, env vars, clock).

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::cell::RefCell;
use std::rc::Rc;

use vitte_runtime::Runtime;
use vitte_vm::error::VmError;
use vitte_vm::native::{as_str, take_args};
use vitte_vm::{Interpreter, NativeObj, Value};

use crate::display;

fn runtime_error(_e: vitte_runtime::Error) -> VmError {
    VmError::BadIndex { reason: "runtime call failed" }
}

fn io_error(_e: std::io::Error) -> VmError {
    VmError::BadIndex { reason: "io operation failed" }
}

fn to_host(v: &Value) -> vitte_runtime::Value {
    match v {
        Value::Int(i) => vitte_runtime::Value::I64(*i),
        Value::Float(f) => vitte_runtime::Value::F64(*f),
        Value::Str(s) => vitte_runtime::Value::Str(s.as_str().to_string()),
        other => vitte_runtime::Value::Str(display(other)),
    }
}

fn from_host(v: vitte_runtime::Value) -> Value {
    match v {
        vitte_runtime::Value::Null => Value::Nil,
        vitte_runtime::Value::Bool(b) => Value::Int(i64::from(b)),
        vitte_runtime::Value::I64(i) => Value::Int(i),
        vitte_runtime::Value::F64(f) => Value::Float(f),
        vitte_runtime::Value::Str(s) => Value::str(s),
    }
}

/// Registers `print`, `input`, `fopen`, `fread`, `fwrite`, `getenv`,
/// `setenv`, and `clock`, backing the first and the last three by a fresh
/// [`vitte_runtime::Runtime`].
pub fn install(vm: &mut Interpreter) {
    let runtime = Rc::new(RefCell::new(Runtime::with_defaults()));

    let rt = runtime.clone();
    vm.register_native("print", move |vm, nargs| {
        let args = take_args(vm, nargs)?;
        let mut out = String::new();
        for a in &args {
            out.push_str(&display(a));
        }
        rt.borrow_mut()
            .call("io.println", &[vitte_runtime::Value::Str(out)])
            .map_err(runtime_error)?;
        vm.push(Value::Nil);
        Ok(())
    });

    vm.register_native("input", |vm, nargs| {
        let _ = take_args(vm, nargs)?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map_err(io_error)?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        vm.push(Value::str(line));
        Ok(())
    });

    let rt = runtime.clone();
    vm.register_native("getenv", move |vm, nargs| {
        let args = take_args(vm, nargs)?;
        let name = as_str(&args[0])?;
        let v = rt
            .borrow_mut()
            .call("os.getenv", &[vitte_runtime::Value::Str(name)])
            .map_err(runtime_error)?;
        vm.push(from_host(v));
        Ok(())
    });

    let rt = runtime.clone();
    vm.register_native("setenv", move |vm, nargs| {
        let args = take_args(vm, nargs)?;
        let name = as_str(&args[0])?;
        let value = to_host(&args[1]);
        rt.borrow_mut()
            .call("os.setenv", &[vitte_runtime::Value::Str(name), value])
            .map_err(runtime_error)?;
        vm.push(Value::Nil);
        Ok(())
    });

    let rt = runtime;
    vm.register_native("clock", move |vm, nargs| {
        let _ = take_args(vm, nargs)?;
        let v = rt.borrow_mut().call("time.now_ms", &[]).map_err(runtime_error)?;
        vm.push(from_host(v));
        Ok(())
    });

    vm.register_native("fopen", |vm, nargs| {
        let args = take_args(vm, nargs)?;
        let path = as_str(&args[0])?;
        let mode = as_str(&args[1])?;
        let mut opts = OpenOptions::new();
        match mode.as_str() {
            "r" => { opts.read(true); }
            "w" => { opts.write(true).create(true).truncate(true); }
            "a" => { opts.append(true).create(true); }
            _ => return Err(VmError::BadIndex { reason: "unknown fopen mode (expected r/w/a)" }),
        }
        let file = opts.open(path).map_err(io_error)?;
        let obj = NativeObj::new("file", Box::new(file), None);
        vm.push(Value::NativeObj(std::rc::Rc::new(std::cell::RefCell::new(obj))));
        Ok(())
    });

    vm.register_native("fread", |vm, nargs| {
        let args = take_args(vm, nargs)?;
        let Value::NativeObj(handle) = &args[0] else {
            return Err(VmError::TypeMismatch { op: "fread", lhs: "native object", rhs: args[0].type_name() });
        };
        let mut contents = String::new();
        handle
            .borrow_mut()
            .downcast_mut::<File>()
            .ok_or(VmError::BadIndex { reason: "not a file handle" })?
            .read_to_string(&mut contents)
            .map_err(io_error)?;
        vm.push(Value::str(contents));
        Ok(())
    });

    vm.register_native("fwrite", |vm, nargs| {
        let args = take_args(vm, nargs)?;
        let Value::NativeObj(handle) = &args[0] else {
            return Err(VmError::TypeMismatch { op: "fwrite", lhs: "native object", rhs: args[0].type_name() });
        };
        let text = as_str(&args[1])?;
        let n = handle
            .borrow_mut()
            .downcast_mut::<File>()
            .ok_or(VmError::BadIndex { reason: "not a file handle" })?
            .write(text.as_bytes())
            .map_err(io_error)?;
        vm.push(Value::Int(n as i64));
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_vm::Interpreter;

    #[test]
    fn clock_returns_a_positive_int() {
        let mut vm = Interpreter::new(Vec::new());
        install(&mut vm);
        let f = match vm.globals().get("clock") {
            Some(Value::NativeFn(f)) => f.clone(),
            _ => panic!("expected native"),
        };
        (f.0)(&mut vm, 0).unwrap();
        assert!(matches!(vm.pop().unwrap(), Value::Int(n) if n > 0));
    }

    #[test]
    fn getenv_is_nil_for_unset_key() {
        let mut vm = Interpreter::new(Vec::new());
        install(&mut vm);
        let f = match vm.globals().get("getenv") {
            Some(Value::NativeFn(f)) => f.clone(),
            _ => panic!("expected native"),
        };
        vm.push(Value::str("VITTE_STDLIB_TEST_UNSET_KEY"));
        (f.0)(&mut vm, 1).unwrap();
        assert!(matches!(vm.pop().unwrap(), Value::Nil));
    }
}
