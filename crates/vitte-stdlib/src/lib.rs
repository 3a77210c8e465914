//! The globals bootstrap (§6.4): the native functions and per-type method
//! bags every program gets for free, before a single line of user bytecode
//! runs.
//!
//! [`install`] populates an [`Interpreter`]'s global table and its
//! `dstr`/`dint`/`dfloat`/`darray` prototype bags. Each bag is also bound
//! as a global under its bootstrap name (`"String"`, `"Int"`, `"Float"`,
//! `"Array"`) with a `"constructor"` entry, so record-call syntax
//! (`String(42)`) and method-call syntax (`"hi".length()`) both resolve to
//! the same native.
//!
//! Grounded in the reference implementation's native module layout: one
//! native per line, grouped by receiver type, registered with
//! `hmap_set`/`native_obj_function`-style calls.

mod arrays;
mod floats;
mod integers;
mod io;
mod strings;

use vitte_vm::{Interpreter, Record, Value};

/// Renders any value the way `print`/`join`/error messages do: not
/// `Debug`, a deliberately simpler user-facing form.
pub fn display(v: &Value) -> String {
    match v {
        Value::Nil => "(nil)".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => s.as_str().to_string(),
        Value::Fn(_) | Value::NativeFn(_) => "(function)".to_string(),
        Value::Record(_) => "(record)".to_string(),
        Value::NativeObj(_) => "(native object)".to_string(),
        Value::Array(a) => {
            let a = a.borrow();
            let mut s = String::from("[");
            for (i, item) in a.iter().enumerate() {
                if i > 0 {
                    s.push_str(", ");
                }
                s.push_str(&display(item));
            }
            s.push(']');
            s
        }
    }
}

fn bag(install: impl FnOnce(&mut Record)) -> Record {
    let mut r = Record::new();
    install(&mut r);
    r
}

/// Wires every native function, per-type bag, and bootstrap constant into
/// `vm` (§6.4): `nil`/`true`/`false`/`nan`/`inf`, the `String`/`Int`/
/// `Float`/`Array`/`Record` method bags, and the `print`/`input`/`fopen`/
/// `fread`/`fwrite` globals.
pub fn install(vm: &mut Interpreter) {
    vm.globals_mut().insert("nil", Value::Nil);
    vm.globals_mut().insert("true", Value::Int(1));
    vm.globals_mut().insert("false", Value::Int(0));
    vm.globals_mut().insert("nan", Value::Float(f64::NAN));
    vm.globals_mut().insert("inf", Value::Float(f64::INFINITY));
    io::install(vm);

    let str_bag = bag(strings::install);
    let int_bag = bag(integers::install);
    let float_bag = bag(floats::install);
    let array_bag = bag(arrays::install);

    *vm.dstr.borrow_mut() = str_bag;
    *vm.dint.borrow_mut() = int_bag;
    *vm.dfloat.borrow_mut() = float_bag;
    *vm.darray.borrow_mut() = array_bag;

    vm.globals_mut().insert("String", Value::Record(vm.dstr.clone()));
    vm.globals_mut().insert("Int", Value::Record(vm.dint.clone()));
    vm.globals_mut().insert("Float", Value::Record(vm.dfloat.clone()));
    vm.globals_mut().insert("Array", Value::Record(vm.darray.clone()));
    let record_bag = bag(|b| {
        b.set("constructor", Value::NativeFn(vitte_vm::NativeFn::new(|vm, nargs| {
            let _ = vitte_vm::native::take_args(vm, nargs)?;
            vm.push(Value::record(Record::new()));
            Ok(())
        })));
    });
    vm.globals_mut().insert("Record", Value::record(record_bag));
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_vm::native;

    #[test]
    fn installs_every_bag_and_global() {
        let mut vm = Interpreter::new(Vec::new());
        install(&mut vm);
        assert!(vm.globals().contains_key("print"));
        assert!(vm.globals().contains_key("String"));
        assert!(vm.globals().contains_key("Record"));
        assert!(matches!(vm.globals().get("true"), Some(Value::Int(1))));
        assert!(matches!(vm.dstr.borrow().get("length"), Value::NativeFn(_)));
        assert!(matches!(vm.darray.borrow().get("map"), Value::NativeFn(_)));
    }

    #[test]
    fn display_matches_reference_formatting() {
        assert_eq!(display(&Value::Nil), "(nil)");
        assert_eq!(display(&Value::array(vec![Value::Int(1), Value::Int(2)])), "[1, 2]");
    }

    #[test]
    fn string_length_native_returns_char_count() {
        let mut vm = Interpreter::new(Vec::new());
        install(&mut vm);
        let f = match vm.dstr.borrow().get("length") {
            Value::NativeFn(f) => f,
            _ => panic!("expected native"),
        };
        vm.push(Value::str("hello"));
        (f.0)(&mut vm, 1).unwrap();
        assert!(matches!(vm.pop().unwrap(), Value::Int(5)));
        let _ = native::expect_arity(1, 1);
    }
}
