//! Helpers for writing host (native) functions against the §6.3 ABI: a
//! native receives `(vm, nargs)`, must pop exactly `nargs` values off the
//! operand stack and push exactly one result.

use crate::error::{VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::value::Value;

/// Pops `nargs` arguments in their original left-to-right order. Natives
/// should call this once, at the top of their body, rather than popping
/// piecemeal — it's easy to get the reversed-stack order wrong by hand.
pub fn take_args(vm: &mut Interpreter, nargs: u16) -> VmResult<Vec<Value>> {
    let mut args = Vec::with_capacity(nargs as usize);
    for _ in 0..nargs {
        args.push(vm.pop()?);
    }
    args.reverse();
    Ok(args)
}

/// Asserts the caller passed exactly `expected` arguments.
pub fn expect_arity(nargs: u16, expected: u16) -> VmResult<()> {
    if nargs != expected {
        return Err(VmError::ArityMismatch { expected, got: nargs });
    }
    Ok(())
}

/// Extracts an `Int` argument, erroring with [`VmError::BadIndex`] style
/// diagnostics on type mismatch (natives report bad argument types via the
/// same taxonomy the interpreter itself uses).
pub fn as_int(v: &Value) -> VmResult<i64> {
    match v {
        Value::Int(i) => Ok(*i),
        other => Err(VmError::TypeMismatch { op: "native argument", lhs: "int", rhs: other.type_name() }),
    }
}

/// Extracts a `Float` argument, promoting `Int` (natives are more lenient
/// about numeric promotion than the bytecode-level `Div`/`Mod` rules).
pub fn as_float(v: &Value) -> VmResult<f64> {
    match v {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        other => Err(VmError::TypeMismatch { op: "native argument", lhs: "float", rhs: other.type_name() }),
    }
}

/// Extracts a `Str` argument's contents as an owned `String`.
pub fn as_str(v: &Value) -> VmResult<String> {
    match v {
        Value::Str(s) => Ok(s.as_str().to_string()),
        other => Err(VmError::TypeMismatch { op: "native argument", lhs: "string", rhs: other.type_name() }),
    }
}
