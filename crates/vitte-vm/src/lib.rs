//! The pure interpreter: stack-based bytecode execution, no lexer, no
//! parser, no compiler. Feed it a big-endian opcode stream (see
//! [`vitte_core::bytecode`]) and it runs it.
//!
//! # Layout
//!
//! - [`value`] — the tagged `Value` model, records, closures, native
//!   objects, and the arithmetic/comparison table.
//! - [`env`] — slot-indexed lexical environments and the `up`-chain walk
//!   used by closures.
//! - [`exception`] — exception frames (`Try`/`Raise`/`ExframeRet` state).
//! - [`hashmap`] — the open-hashing `StrMap` backing records and globals.
//! - [`interpreter`] — the dispatch loop itself.
//! - [`native`] — helpers for writing host functions against the ABI.
//! - [`disasm`] — a text disassembler, useful for tests and tooling.
//! - [`error`] — the runtime error taxonomy.
//!
//! The VM is intentionally single-threaded (no `Send`/`Sync` anywhere —
//! `Value` is `Rc`-based) and holds no global mutable state beyond what a
//! single [`Interpreter`] instance owns.

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod disasm;
pub mod env;
pub mod error;
pub mod exception;
pub mod hashmap;
pub mod interpreter;
pub mod native;
pub mod value;

pub use env::{Env, Environment};
pub use error::{VmError, VmResult};
pub use exception::{ExceptionFrame, Handler};
pub use hashmap::StrMap;
pub use interpreter::Interpreter;
pub use value::{Closure, NativeFn, NativeObj, Record, VStr, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_core::bytecode::opcode::{encode, OpCode};

    #[test]
    fn record_bootstrap_and_prototype_dispatch() {
        let mut vm = Interpreter::new(Vec::new());
        vm.register_native("print_len", |vm, nargs| {
            let args = native::take_args(vm, nargs)?;
            let s = native::as_str(&args[0])?;
            vm.push(Value::Int(s.len() as i64));
            Ok(())
        });
        assert!(vm.globals().contains_key("print_len"));
    }

    #[test]
    fn end_to_end_halt() {
        let mut code = Vec::new();
        encode(&mut code, &OpCode::PushNil);
        encode(&mut code, &OpCode::Pop);
        encode(&mut code, &OpCode::Halt);
        let mut vm = Interpreter::new(code);
        vm.run().unwrap();
        assert!(vm.is_halted());
    }
}
