//! The `array` method bag. `map`/`filter`/`reduce` call back into script
//! closures through [`vitte_vm::Interpreter::call_value`]; everything else
//! is plain Rust `Vec` manipulation grounded in the reference
//! implementation's `hanayo::array::*` natives.

use vitte_vm::error::VmError;
use vitte_vm::native::{as_int, take_args};
use vitte_vm::{value, NativeFn, Record, Value};

use crate::display;

fn as_array(v: &Value) -> Result<std::rc::Rc<std::cell::RefCell<Vec<Value>>>, VmError> {
    match v {
        Value::Array(a) => Ok(a.clone()),
        other => Err(VmError::TypeMismatch { op: "native argument", lhs: "array", rhs: other.type_name() }),
    }
}

/// Registers every `array.*` native into `bag`.
pub fn install(bag: &mut Record) {
    bag.set("constructor", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let out = match args.first() {
            Some(Value::Int(n)) => vec![Value::Nil; (*n).max(0) as usize],
            Some(Value::Array(a)) => a.borrow().clone(),
            _ => Vec::new(),
        };
        vm.push(Value::array(out));
        Ok(())
    })));

    bag.set("length", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        vm.push(Value::Int(a.borrow().len() as i64));
        Ok(())
    })));

    bag.set("at", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let idx = as_int(&args[1])?;
        let a = a.borrow();
        let v = usize::try_from(idx)
            .ok()
            .and_then(|i| a.get(i))
            .cloned()
            .ok_or(VmError::OutOfRange { index: idx, len: a.len() })?;
        vm.push(v);
        Ok(())
    })));

    bag.set("index", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let needle = &args[1];
        let pos = a.borrow().iter().position(|v| v.value_eq(needle)).map_or(-1, |i| i as i64);
        vm.push(Value::Int(pos));
        Ok(())
    })));

    bag.set("copy", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let start = as_int(&args[1])? as usize;
        let len = as_int(&args[2])? as usize;
        let out: Vec<Value> = a.borrow().iter().skip(start).take(len).cloned().collect();
        vm.push(Value::array(out));
        Ok(())
    })));

    bag.set("delete", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let start = as_int(&args[1])? as usize;
        let len = as_int(&args[2])? as usize;
        let out: Vec<Value> = a
            .borrow()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i < start || *i >= start + len)
            .map(|(_, v)| v.clone())
            .collect();
        vm.push(Value::array(out));
        Ok(())
    })));

    bag.set("insert", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let idx = as_int(&args[1])? as usize;
        let item = args[2].clone();
        let mut out = a.borrow().clone();
        let idx = idx.min(out.len());
        out.insert(idx, item);
        vm.push(Value::array(out));
        Ok(())
    })));

    bag.set("push", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        a.borrow_mut().push(args[1].clone());
        vm.push(Value::Nil);
        Ok(())
    })));

    bag.set("pop", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let v = a.borrow_mut().pop().unwrap_or(Value::Nil);
        vm.push(v);
        Ok(())
    })));

    bag.set("sort", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let mut out = a.borrow().clone();
        sort_values(&mut out)?;
        vm.push(Value::array(out));
        Ok(())
    })));

    bag.set("sort!", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let mut guard = a.borrow_mut();
        sort_values(&mut guard)?;
        drop(guard);
        vm.push(args[0].clone());
        Ok(())
    })));

    bag.set("join", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let sep = match args.get(1) {
            Some(Value::Str(s)) => s.as_str().to_string(),
            _ => String::new(),
        };
        let joined = a.borrow().iter().map(display).collect::<Vec<_>>().join(&sep);
        vm.push(Value::str(joined));
        Ok(())
    })));

    bag.set("map", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let callee = args[1].clone();
        let items = a.borrow().clone();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(vm.call_value(callee.clone(), vec![item])?);
        }
        vm.push(Value::array(out));
        Ok(())
    })));

    bag.set("filter", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let callee = args[1].clone();
        let items = a.borrow().clone();
        let mut out = Vec::new();
        for item in items {
            if vm.call_value(callee.clone(), vec![item.clone()])?.is_true() {
                out.push(item);
            }
        }
        vm.push(Value::array(out));
        Ok(())
    })));

    bag.set("reduce", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let a = as_array(&args[0])?;
        let callee = args[1].clone();
        let items = a.borrow().clone();
        let mut iter = items.into_iter();
        let mut acc = match args.get(2) {
            Some(init) => init.clone(),
            None => iter.next().unwrap_or(Value::Nil),
        };
        for item in iter {
            acc = vm.call_value(callee.clone(), vec![acc, item])?;
        }
        vm.push(acc);
        Ok(())
    })));
}

fn sort_values(values: &mut [Value]) -> Result<(), VmError> {
    let mut err = None;
    values.sort_by(|a, b| match value::compare(a, b) {
        Ok(o) => o,
        Err(e) => {
            err = Some(e);
            std::cmp::Ordering::Equal
        }
    });
    err.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_vm::Interpreter;

    fn call(bag: &Record, name: &str, args: Vec<Value>) -> Value {
        let mut vm = Interpreter::new(Vec::new());
        let f = match bag.get(name) {
            Value::NativeFn(f) => f,
            other => panic!("{name} is not native: {other:?}"),
        };
        let n = args.len() as u16;
        for a in args {
            vm.push(a);
        }
        (f.0)(&mut vm, n).unwrap();
        vm.pop().unwrap()
    }

    #[test]
    fn push_then_pop_round_trips() {
        let mut bag = Record::new();
        install(&mut bag);
        let arr = Value::array(vec![Value::Int(1)]);
        call(&bag, "push", vec![arr.clone(), Value::Int(2)]);
        let popped = call(&bag, "pop", vec![arr.clone()]);
        assert!(matches!(popped, Value::Int(2)));
    }

    #[test]
    fn sort_orders_ascending_without_mutating_source() {
        let mut bag = Record::new();
        install(&mut bag);
        let arr = Value::array(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        let sorted = call(&bag, "sort", vec![arr.clone()]);
        match sorted {
            Value::Array(a) => {
                let a = a.borrow();
                assert!(matches!(a[0], Value::Int(1)));
                assert!(matches!(a[2], Value::Int(3)));
            }
            _ => panic!("expected array"),
        }
        if let Value::Array(a) = &arr {
            assert!(matches!(a.borrow()[0], Value::Int(3)));
        }
    }

    #[test]
    fn join_uses_display_formatting() {
        let mut bag = Record::new();
        install(&mut bag);
        let arr = Value::array(vec![Value::Int(1), Value::Int(2)]);
        let joined = call(&bag, "join", vec![arr, Value::str(",")]);
        assert!(matches!(joined, Value::Str(s) if s.as_str() == "1,2"));
    }

    #[test]
    fn index_returns_negative_one_when_absent() {
        let mut bag = Record::new();
        install(&mut bag);
        let arr = Value::array(vec![Value::Int(1), Value::Int(2)]);
        let v = call(&bag, "index", vec![arr, Value::Int(9)]);
        assert!(matches!(v, Value::Int(-1)));
    }
}
