//! The `string` method bag. Mirrors the reference implementation's
//! `hanayo::string::*` natives: the receiver is always argument 0.

use vitte_vm::error::VmError;
use vitte_vm::native::{as_int, as_str, take_args};
use vitte_vm::{NativeFn, Record, Value};

use crate::display;

/// Registers every `string.*` native into `bag`.
pub fn install(bag: &mut Record) {
    bag.set("constructor", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let out = args.first().map_or_else(String::new, display);
        vm.push(Value::str(out));
        Ok(())
    })));

    bag.set("bytesize", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let s = as_str(&args[0])?;
        vm.push(Value::Int(s.len() as i64));
        Ok(())
    })));

    bag.set("length", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let s = as_str(&args[0])?;
        vm.push(Value::Int(s.chars().count() as i64));
        Ok(())
    })));

    bag.set("copy", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let s = as_str(&args[0])?;
        let start = as_int(&args[1])? as usize;
        let len = as_int(&args[2])? as usize;
        let out: String = s.chars().skip(start).take(len).collect();
        vm.push(Value::str(out));
        Ok(())
    })));

    bag.set("delete", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let s = as_str(&args[0])?;
        let start = as_int(&args[1])? as usize;
        let len = as_int(&args[2])? as usize;
        let out: String = s
            .chars()
            .enumerate()
            .filter(|(i, _)| *i < start || *i >= start + len)
            .map(|(_, c)| c)
            .collect();
        vm.push(Value::str(out));
        Ok(())
    })));

    bag.set("at", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let s = as_str(&args[0])?;
        let idx = as_int(&args[1])?;
        let len = s.chars().count();
        let idx = usize::try_from(idx).map_err(|_| VmError::OutOfRange { index: idx, len })?;
        let c = s.chars().nth(idx).ok_or(VmError::OutOfRange { index: idx as i64, len })?;
        vm.push(Value::str(c.to_string()));
        Ok(())
    })));

    bag.set("index", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let s = as_str(&args[0])?;
        let needle = as_str(&args[1])?;
        let pos = match s.find(&needle) {
            Some(byte_idx) => s[..byte_idx].chars().count() as i64,
            None => -1,
        };
        vm.push(Value::Int(pos));
        Ok(())
    })));

    bag.set("insert", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let s = as_str(&args[0])?;
        let idx = as_int(&args[1])? as usize;
        let insertion = as_str(&args[2])?;
        let mut out = String::new();
        for (i, c) in s.chars().enumerate() {
            if i == idx {
                out.push_str(&insertion);
            }
            out.push(c);
        }
        if idx >= s.chars().count() {
            out.push_str(&insertion);
        }
        vm.push(Value::str(out));
        Ok(())
    })));

    bag.set("split", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let s = as_str(&args[0])?;
        let sep = as_str(&args[1])?;
        let parts: Vec<Value> = if sep.is_empty() {
            s.chars().map(|c| Value::str(c.to_string())).collect()
        } else {
            s.split(sep.as_str()).map(Value::str).collect()
        };
        vm.push(Value::array(parts));
        Ok(())
    })));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(bag: &Record, name: &str, args: Vec<Value>) -> Value {
        let mut vm = vitte_vm::Interpreter::new(Vec::new());
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
    fn bytesize_counts_utf8_bytes_not_chars() {
        let mut bag = Record::new();
        install(&mut bag);
        let v = call(&bag, "bytesize", vec![Value::str("héllo")]);
        assert!(matches!(v, Value::Int(6)));
    }

    #[test]
    fn length_counts_chars() {
        let mut bag = Record::new();
        install(&mut bag);
        let v = call(&bag, "length", vec![Value::str("héllo")]);
        assert!(matches!(v, Value::Int(5)));
    }

    #[test]
    fn index_returns_negative_one_when_absent() {
        let mut bag = Record::new();
        install(&mut bag);
        let v = call(&bag, "index", vec![Value::str("hello"), Value::str("z")]);
        assert!(matches!(v, Value::Int(-1)));
    }

    #[test]
    fn split_on_separator() {
        let mut bag = Record::new();
        install(&mut bag);
        let v = call(&bag, "split", vec![Value::str("a,b,c"), Value::str(",")]);
        match v {
            Value::Array(a) => assert_eq!(a.borrow().len(), 3),
            _ => panic!("expected array"),
        }
    }
}
