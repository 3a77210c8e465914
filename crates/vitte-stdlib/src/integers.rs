//! The `integer` method bag. The reference implementation gives integers a
//! single native: a coercing constructor.

use vitte_vm::native::take_args;
use vitte_vm::{NativeFn, Record, Value};

/// Registers `integer.constructor` into `bag`.
pub fn install(bag: &mut Record) {
    bag.set("constructor", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let v = match args.first() {
            Some(Value::Int(i)) => *i,
            Some(Value::Float(f)) => *f as i64,
            Some(Value::Str(s)) => s.as_str().trim().parse().unwrap_or(0),
            _ => 0,
        };
        vm.push(Value::Int(v));
        Ok(())
    })));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_parses_strings() {
        let mut bag = Record::new();
        install(&mut bag);
        let mut vm = vitte_vm::Interpreter::new(Vec::new());
        let f = match bag.get("constructor") {
            Value::NativeFn(f) => f,
            _ => panic!("expected native"),
        };
        vm.push(Value::str("42"));
        (f.0)(&mut vm, 1).unwrap();
        assert!(matches!(vm.pop().unwrap(), Value::Int(42)));
    }

    #[test]
    fn constructor_truncates_floats() {
        let mut bag = Record::new();
        install(&mut bag);
        let mut vm = vitte_vm::Interpreter::new(Vec::new());
        let f = match bag.get("constructor") {
            Value::NativeFn(f) => f,
            _ => panic!("expected native"),
        };
        vm.push(Value::Float(3.9));
        (f.0)(&mut vm, 1).unwrap();
        assert!(matches!(vm.pop().unwrap(), Value::Int(3)));
    }
}
