//! The `float` method bag: a coercing constructor plus `round`.

use vitte_vm::native::{as_float, take_args};
use vitte_vm::{NativeFn, Record, Value};

/// Registers `float.constructor` and `float.round` into `bag`.
pub fn install(bag: &mut Record) {
    bag.set("constructor", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let v = match args.first() {
            Some(Value::Float(f)) => *f,
            Some(Value::Int(i)) => *i as f64,
            Some(Value::Str(s)) => s.as_str().trim().parse().unwrap_or(0.0),
            _ => 0.0,
        };
        vm.push(Value::Float(v));
        Ok(())
    })));

    bag.set("round", Value::NativeFn(NativeFn::new(|vm, nargs| {
        let args = take_args(vm, nargs)?;
        let f = as_float(&args[0])?;
        vm.push(Value::Int(f.round() as i64));
        Ok(())
    })));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_rounds_half_away_from_zero() {
        let mut bag = Record::new();
        install(&mut bag);
        let mut vm = vitte_vm::Interpreter::new(Vec::new());
        let f = match bag.get("round") {
            Value::NativeFn(f) => f,
            _ => panic!("expected native"),
        };
        vm.push(Value::Float(2.5));
        (f.0)(&mut vm, 1).unwrap();
        assert!(matches!(vm.pop().unwrap(), Value::Int(3)));
    }

    #[test]
    fn constructor_promotes_ints() {
        let mut bag = Record::new();
        install(&mut bag);
        let mut vm = vitte_vm::Interpreter::new(Vec::new());
        let f = match bag.get("constructor") {
            Value::NativeFn(f) => f,
            _ => panic!("expected native"),
        };
        vm.push(Value::Int(7));
        (f.0)(&mut vm, 1).unwrap();
        assert!(matches!(vm.pop().unwrap(), Value::Float(x) if (x - 7.0).abs() < 1e-9));
    }
}
