//! The dispatch loop (§4.3): one big `match` over every decoded opcode.
//!
//! No coroutines, no green threads, no re-entrant trampoline — a single
//! `Vec<Value>` operand stack, a single current [`Env`], and a call stack of
//! return points. This mirrors the source VM's flat `while` loop over a
//! giant `switch`, which is deliberate: splitting dispatch across
//! stackless/async machinery would change the semantics of `Raise`
//! unwinding through host-called natives, not just the implementation
//! strategy.

use std::cell::RefCell;
use std::rc::Rc;

use vitte_core::bytecode::{CodeReader, OpCode};

use crate::env::{self, Env, Environment};
use crate::error::{VmError, VmResult};
use crate::exception::{ExceptionFrame, Handler};
use crate::hashmap::StrMap;
use crate::value::{self, Closure, NativeFn, Record, Value};

#[cfg(feature = "tracing")]
use tracing::trace;

struct CallFrame {
    return_ip: u32,
    return_env: Env,
}

/// The VM's complete mutable state: operand stack, current environment,
/// call stack, exception-frame stack, and the global/prototype tables.
pub struct Interpreter {
    code: Vec<u8>,
    ip: u32,
    stack: Vec<Value>,
    env: Env,
    call_stack: Vec<CallFrame>,
    exception_frames: Vec<ExceptionFrame>,
    globals: StrMap<Value>,
    /// Per-type method bag for strings.
    pub dstr: Rc<RefCell<Record>>,
    /// Per-type method bag for ints.
    pub dint: Rc<RefCell<Record>>,
    /// Per-type method bag for floats.
    pub dfloat: Rc<RefCell<Record>>,
    /// Per-type method bag for arrays.
    pub darray: Rc<RefCell<Record>>,
    halted: bool,
    result: Value,
}

fn normalize_index(i: i64, len: usize) -> VmResult<usize> {
    if i < 0 || i as usize >= len {
        return Err(VmError::OutOfRange { index: i, len });
    }
    Ok(i as usize)
}

impl Interpreter {
    /// Builds a fresh VM over `code`, starting execution at instruction 0
    /// with an empty top-level environment.
    pub fn new(code: Vec<u8>) -> Self {
        Self {
            code,
            ip: 0,
            stack: Vec::new(),
            env: Environment::root(0),
            call_stack: Vec::new(),
            exception_frames: Vec::new(),
            globals: StrMap::new(),
            dstr: Rc::new(RefCell::new(Record::new())),
            dint: Rc::new(RefCell::new(Record::new())),
            dfloat: Rc::new(RefCell::new(Record::new())),
            darray: Rc::new(RefCell::new(Record::new())),
            halted: false,
            result: Value::Nil,
        }
    }

    /// The global bindings table (mutable, for stdlib bootstrap).
    pub fn globals_mut(&mut self) -> &mut StrMap<Value> { &mut self.globals }
    /// The global bindings table.
    pub fn globals(&self) -> &StrMap<Value> { &self.globals }

    /// Registers a named native function as a global.
    pub fn register_native(&mut self, name: impl Into<String>, f: impl Fn(&mut Interpreter, u16) -> VmResult<()> + 'static) {
        self.globals.insert(name, Value::NativeFn(NativeFn::new(f)));
    }

    /// Pushes a value onto the operand stack.
    pub fn push(&mut self, v: Value) { self.stack.push(v); }

    /// Pops the top of the operand stack.
    pub fn pop(&mut self) -> VmResult<Value> { self.stack.pop().ok_or(VmError::StackUnderflow) }

    /// Peeks `depth` values from the top (0 = the top itself) without
    /// popping.
    pub fn peek(&self, depth: usize) -> VmResult<&Value> {
        let len = self.stack.len();
        if depth >= len {
            return Err(VmError::StackUnderflow);
        }
        Ok(&self.stack[len - 1 - depth])
    }

    /// Pops `nargs` values, restoring their original left-to-right push
    /// order (native functions receive arguments via repeated `pop`, so
    /// this exists for the `Fn`-closure call path, which binds them into
    /// slots by position).
    fn pop_args(&mut self, nargs: u16) -> VmResult<Vec<Value>> {
        let mut args = Vec::with_capacity(nargs as usize);
        for _ in 0..nargs {
            args.push(self.pop()?);
        }
        args.reverse();
        Ok(args)
    }

    /// Invokes `callee` with `args` and runs it to completion, returning its
    /// result. For natives (`array.map`/`filter`/`reduce` and similar) that
    /// need to call back into script-defined functions: re-enters the
    /// dispatch loop and steps it until the nested call's frame pops,
    /// restoring the instruction pointer and environment the native was
    /// itself called from.
    pub fn call_value(&mut self, callee: Value, args: Vec<Value>) -> VmResult<Value> {
        let saved_ip = self.ip;
        let saved_env = self.env.clone();
        let nargs = args.len() as u16;
        for a in args {
            self.push(a);
        }
        let depth_before = self.call_stack.len();
        self.do_call(callee, nargs, saved_ip, saved_env.clone())?;
        while self.call_stack.len() > depth_before && !self.halted {
            self.step()?;
        }
        let result = self.pop()?;
        self.ip = saved_ip;
        self.env = saved_env;
        Ok(result)
    }

    /// Current instruction pointer (for diagnostics).
    pub fn ip(&self) -> u32 { self.ip }

    /// True once `Halt` has executed or the outermost frame has `Ret`'d.
    pub fn is_halted(&self) -> bool { self.halted }

    /// The value the outermost frame returned (`Nil` if the VM hasn't
    /// halted, or halted via `Halt` rather than `Ret`).
    pub fn result(&self) -> &Value { &self.result }

    /// Runs until `Halt`, an outermost `Ret`, or an error.
    pub fn run(&mut self) -> VmResult<()> {
        while !self.halted {
            self.step()?;
        }
        Ok(())
    }

    /// Executes exactly one instruction.
    pub fn step(&mut self) -> VmResult<()> {
        let reader = CodeReader::new(&self.code);
        let (op, next_ip) = reader.decode(self.ip).map_err(|e| VmError::MalformedBytecode(format!("{e}")))?;
        self.ip = next_ip;
        #[cfg(feature = "tracing")]
        trace!(ip = self.ip, ?op, "dispatch");
        self.execute(op, next_ip)
    }

    fn execute(&mut self, op: OpCode, next_ip: u32) -> VmResult<()> {
        match op {
            OpCode::Halt => self.halted = true,
            OpCode::Push8(v) => self.push(Value::Int(i64::from(v))),
            OpCode::Push16(v) => self.push(Value::Int(i64::from(v))),
            OpCode::Push32(v) => self.push(Value::Int(i64::from(v))),
            OpCode::Push64(v) => self.push(Value::Int(v as i64)),
            OpCode::PushF32(v) => self.push(Value::Float(f64::from(v))),
            OpCode::PushF64(v) => self.push(Value::Float(v)),
            OpCode::PushStr(s) => self.push(Value::str(s)),
            OpCode::PushNil => self.push(Value::Nil),
            OpCode::Pop => { self.pop()?; }

            OpCode::Add => self.binop(value::add)?,
            OpCode::Sub => self.binop(value::sub)?,
            OpCode::Mul => self.binop(value::mul)?,
            OpCode::Div => self.binop(value::div)?,
            OpCode::Mod => self.binop(value::modulo)?,
            OpCode::Lt => self.binop(value::lt)?,
            OpCode::Leq => self.binop(value::leq)?,
            OpCode::Gt => self.binop(value::gt)?,
            OpCode::Geq => self.binop(value::geq)?,
            OpCode::Eq => { let (a, b) = self.pop2()?; self.push(value::eq(&a, &b)); }
            OpCode::Neq => { let (a, b) = self.pop2()?; self.push(value::neq(&a, &b)); }
            OpCode::And => {
                let (a, b) = self.pop2()?;
                self.push(Value::Int(i64::from(a.is_true() && b.is_true())));
            }
            OpCode::Or => {
                let (a, b) = self.pop2()?;
                self.push(Value::Int(i64::from(a.is_true() || b.is_true())));
            }
            OpCode::Negate => { let a = self.pop()?; self.push(value::negate(&a)?); }
            OpCode::Not => { let a = self.pop()?; self.push(value::not(&a)); }

            OpCode::EnvNew(n) => self.env = Environment::new(n, Some(self.env.clone())),
            OpCode::SetLocal(k) | OpCode::SetLocalFunctionDef(k) => {
                let v = self.pop()?;
                self.env.borrow_mut().set_local(k, v)?;
            }
            OpCode::GetLocal(k) => { let v = self.env.borrow().get_local(k)?; self.push(v); }
            OpCode::SetLocalUp(k, up) => { let v = self.pop()?; env::set_local_up(&self.env, up, k, v)?; }
            OpCode::GetLocalUp(k, up) => { let v = env::get_local_up(&self.env, up, k)?; self.push(v); }

            OpCode::SetGlobal(name) => { let v = self.pop()?; self.globals.insert(name, v); }
            OpCode::GetGlobal(name) => {
                let v = self.globals.get(&name).cloned().ok_or(VmError::UnboundGlobal { name: name.clone() })?;
                self.push(v);
            }

            OpCode::DefFunctionPush(nargs, end_ip) => {
                let closure = Rc::new(Closure { entry: next_ip, arity: nargs, captured: self.env.clone(), name: None });
                self.push(Value::Fn(closure));
                self.ip = end_ip;
            }

            OpCode::Jmp(target) => self.ip = target,
            OpCode::JCond(target) => { let v = self.pop()?; if v.is_true() { self.ip = target; } }
            OpCode::JNCond(target) => { let v = self.pop()?; if !v.is_true() { self.ip = target; } }

            OpCode::Call(nargs) => {
                let callee = self.pop()?;
                self.do_call(callee, nargs, next_ip, self.env.clone())?;
            }
            OpCode::Retcall(nargs) => {
                let callee = self.pop()?;
                let (ret_ip, ret_env) = match self.call_stack.pop() {
                    Some(f) => (f.return_ip, f.return_env),
                    None => (next_ip, self.env.clone()),
                };
                self.do_call(callee, nargs, ret_ip, ret_env)?;
            }
            OpCode::Ret => {
                let v = self.pop()?;
                match self.call_stack.pop() {
                    Some(frame) => {
                        self.env = frame.return_env;
                        self.ip = frame.return_ip;
                        self.push(v);
                    }
                    None => {
                        self.result = v;
                        self.halted = true;
                    }
                }
            }

            OpCode::DictNew => self.push(Value::record(Record::new())),
            OpCode::MemberGet(key) => { let recv = self.pop()?; let v = self.member_get(&recv, &key)?; self.push(v); }
            OpCode::MemberGetNoPop(key) => { let recv = self.peek(0)?.clone(); let v = self.member_get(&recv, &key)?; self.push(v); }
            OpCode::MemberSet(key) => {
                let recv = self.pop()?;
                let value = self.peek(0)?.clone();
                match &recv {
                    Value::Record(r) => r.borrow_mut().set(key.clone(), value),
                    other => return Err(VmError::BadMemberTarget { ty: other.type_name(), key: key.clone() }),
                }
            }
            OpCode::DictLoad => {
                let mut rec = Record::new();
                loop {
                    let key_v = self.pop()?;
                    let Value::Str(key) = key_v else {
                        if matches!(key_v, Value::Nil) { break; }
                        return Err(VmError::MalformedBytecode("dict key must be string".into()));
                    };
                    let val = self.pop()?;
                    rec.set(key.as_str().to_string(), val);
                }
                self.push(Value::record(rec));
            }
            OpCode::ArrayLoad => {
                let n_v = self.pop()?;
                let Value::Int(n) = n_v else { return Err(VmError::MalformedBytecode("array length must be int".into())) };
                let mut items = Vec::with_capacity(n.max(0) as usize);
                for _ in 0..n.max(0) {
                    items.push(self.pop()?);
                }
                items.reverse();
                self.push(Value::array(items));
            }
            OpCode::IndexGet => {
                let index = self.pop()?;
                let container = self.pop()?;
                let v = self.index_get(&container, &index)?;
                self.push(v);
            }
            OpCode::IndexSet => {
                let value = self.pop()?;
                let index = self.pop()?;
                let container = self.pop()?;
                self.index_set(&container, &index, value.clone())?;
                self.push(value);
            }

            OpCode::Try => {
                let mut handlers = Vec::new();
                loop {
                    let etype = self.pop()?;
                    if matches!(etype, Value::Nil) { break; }
                    let target_v = self.pop()?;
                    let Value::Int(target) = target_v else {
                        return Err(VmError::MalformedBytecode("try handler target must be int".into()));
                    };
                    handlers.push(Handler { etype, target: target as u32 });
                }
                handlers.reverse();
                self.exception_frames.push(ExceptionFrame { handlers, env: self.env.clone(), stack_depth: self.stack.len() });
            }
            OpCode::Raise => {
                let raised = self.pop()?;
                let proto = self.prototype_of(&raised);
                self.do_raise(raised, proto)?;
            }
            OpCode::ExframeRet(pos) => {
                self.exception_frames.pop().ok_or_else(|| VmError::MalformedBytecode("exframe-ret with no active frame".into()))?;
                self.ip = pos;
            }
        }
        Ok(())
    }

    fn pop2(&mut self) -> VmResult<(Value, Value)> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    fn binop(&mut self, f: impl Fn(&Value, &Value) -> VmResult<Value>) -> VmResult<()> {
        let (a, b) = self.pop2()?;
        self.push(f(&a, &b)?);
        Ok(())
    }

    fn do_call(&mut self, callee: Value, nargs: u16, ret_ip: u32, ret_env: Env) -> VmResult<()> {
        match callee {
            Value::NativeFn(nf) => {
                let f = nf.0.clone();
                f(self, nargs)
            }
            Value::Fn(c) => self.enter_closure(c, nargs, ret_ip, ret_env, None),
            Value::Record(r) => {
                let ctor = r.borrow().get("constructor");
                match ctor {
                    Value::Fn(c) => self.enter_closure(c, nargs, ret_ip, ret_env, Some(Value::Record(r.clone()))),
                    Value::NativeFn(nf) => { let f = nf.0.clone(); f(self, nargs) }
                    _ => Err(VmError::NoConstructor),
                }
            }
            other => Err(VmError::NotCallable { ty: other.type_name() }),
        }
    }

    fn enter_closure(&mut self, closure: Rc<Closure>, nargs: u16, ret_ip: u32, ret_env: Env, implicit_self: Option<Value>) -> VmResult<()> {
        let mut args = self.pop_args(nargs)?;
        if let Some(s) = implicit_self {
            args.insert(0, s);
        }
        if args.len() as u16 != closure.arity {
            return Err(VmError::ArityMismatch { expected: closure.arity, got: args.len() as u16 });
        }
        let frame_env = Environment::new(closure.arity, Some(closure.captured.clone()));
        for (i, a) in args.into_iter().enumerate() {
            frame_env.borrow_mut().set_local(i as u16, a)?;
        }
        self.call_stack.push(CallFrame { return_ip: ret_ip, return_env: ret_env });
        self.env = frame_env;
        self.ip = closure.entry;
        Ok(())
    }

    /// Resolves the per-type prototype record for `v`: the record's own
    /// cached `prototype` field, or the VM-wide bag for a primitive type
    /// (§4.1, `value_get_prototype`). `None` for values with no prototype
    /// at all (`Nil`, functions, native objects).
    fn prototype_of(&self, v: &Value) -> Option<Value> {
        match v {
            Value::Record(r) => r.borrow().prototype().map(Value::Record),
            Value::Str(_) => Some(Value::Record(self.dstr.clone())),
            Value::Int(_) => Some(Value::Record(self.dint.clone())),
            Value::Float(_) => Some(Value::Record(self.dfloat.clone())),
            Value::Array(_) => Some(Value::Record(self.darray.clone())),
            _ => None,
        }
    }

    fn member_get(&self, recv: &Value, key: &str) -> VmResult<Value> {
        match recv {
            Value::Record(r) => Ok(r.borrow().get(key)),
            Value::Str(_) => Ok(self.dstr.borrow().get(key)),
            Value::Int(_) => Ok(self.dint.borrow().get(key)),
            Value::Float(_) => Ok(self.dfloat.borrow().get(key)),
            Value::Array(_) => Ok(self.darray.borrow().get(key)),
            other => Err(VmError::BadMemberTarget { ty: other.type_name(), key: key.to_string() }),
        }
    }

    fn index_get(&self, container: &Value, index: &Value) -> VmResult<Value> {
        match (container, index) {
            (Value::Array(a), Value::Int(i)) => {
                let a = a.borrow();
                let idx = normalize_index(*i, a.len())?;
                Ok(a[idx].clone())
            }
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.as_str().chars().collect();
                let idx = normalize_index(*i, chars.len())?;
                Ok(Value::str(chars[idx].to_string()))
            }
            (Value::Record(r), Value::Str(k)) => Ok(r.borrow().get(k.as_str())),
            _ => Err(VmError::BadIndex { reason: "unsupported container/index combination" }),
        }
    }

    fn index_set(&self, container: &Value, index: &Value, value: Value) -> VmResult<()> {
        match (container, index) {
            (Value::Array(a), Value::Int(i)) => {
                let mut a = a.borrow_mut();
                let idx = normalize_index(*i, a.len())?;
                a[idx] = value;
                Ok(())
            }
            (Value::Record(r), Value::Str(k)) => {
                r.borrow_mut().set(k.as_str().to_string(), value);
                Ok(())
            }
            (Value::Str(_), Value::Int(_)) => Err(VmError::BadIndex { reason: "strings are immutable" }),
            _ => Err(VmError::BadIndex { reason: "unsupported container/index combination" }),
        }
    }

    fn do_raise(&mut self, raised: Value, proto: Option<Value>) -> VmResult<()> {
        for i in (0..self.exception_frames.len()).rev() {
            if let Some(handler) = self.exception_frames[i].find_handler(&proto) {
                let target = handler.target;
                let env = self.exception_frames[i].env.clone();
                let depth = self.exception_frames[i].stack_depth;
                self.exception_frames.truncate(i);
                self.stack.truncate(depth);
                self.env = env;
                self.ip = target;
                self.push(raised);
                return Ok(());
            }
        }
        Err(VmError::UnhandledRaise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_core::bytecode::opcode::encode;

    fn assemble(ops: &[OpCode]) -> Vec<u8> {
        let mut buf = Vec::new();
        for op in ops {
            encode(&mut buf, op);
        }
        buf
    }

    #[test]
    fn arithmetic_promotion_scenario() {
        let code = assemble(&[OpCode::Push64(2), OpCode::PushF64(3.5), OpCode::Add, OpCode::Halt]);
        let mut vm = Interpreter::new(code);
        vm.run().unwrap();
        assert!(vm.is_halted());
    }

    #[test]
    fn closure_counter_scenario() {
        // fn() { x = x + 1; return x; } with x captured as local 0 of the
        // enclosing frame, called three times, should see 1, 2, 3.
        let mut code = Vec::new();
        encode(&mut code, &OpCode::EnvNew(2));
        encode(&mut code, &OpCode::Push64(0));
        encode(&mut code, &OpCode::SetLocal(0));

        let mut fn_body = Vec::new();
        encode(&mut fn_body, &OpCode::GetLocalUp(0, 1));
        encode(&mut fn_body, &OpCode::Push64(1));
        encode(&mut fn_body, &OpCode::Add);
        encode(&mut fn_body, &OpCode::SetLocalUp(0, 1));
        encode(&mut fn_body, &OpCode::GetLocalUp(0, 1));
        encode(&mut fn_body, &OpCode::Ret);

        let def_start = code.len() as u32 + 1 + 2 + 4; // tag + nargs(u16) + end_ip(u32)
        let end_ip = def_start + fn_body.len() as u32;
        encode(&mut code, &OpCode::DefFunctionPush(0, end_ip));
        code.extend_from_slice(&fn_body);
        encode(&mut code, &OpCode::SetLocal(1));

        for _ in 0..3 {
            encode(&mut code, &OpCode::GetLocal(1));
            encode(&mut code, &OpCode::Call(0));
            encode(&mut code, &OpCode::Pop);
        }
        encode(&mut code, &OpCode::Halt);

        let mut vm = Interpreter::new(code);
        vm.run().unwrap();
        assert!(vm.is_halted());
    }

    #[test]
    fn exception_round_trip_scenario() {
        let etype = Value::record(Record::new());
        let mut code = Vec::new();
        // Try with one handler matching `etype`, target patched after assembly.
        encode(&mut code, &OpCode::PushNil); // sentinel will be replaced below conceptually
        // We build the Try operand stack manually: push target (patched), etype placeholder,
        // sentinel. Since `etype` here is a host value not expressible as a literal, this
        // test instead exercises do_raise/find_handler directly at the unit level.
        let mut vm = Interpreter::new(Vec::new());
        let handler = Handler { etype: etype.clone(), target: 42 };
        vm.exception_frames.push(ExceptionFrame { handlers: vec![handler], env: vm.env.clone(), stack_depth: 0 });
        let proto = Some(etype.clone());
        vm.do_raise(Value::Int(1), proto).unwrap();
        assert_eq!(vm.ip, 42);
        assert!(matches!(vm.pop().unwrap(), Value::Int(1)));
        let _ = code;
    }

    #[test]
    fn unhandled_raise_is_fatal() {
        let mut vm = Interpreter::new(Vec::new());
        let err = vm.do_raise(Value::Int(1), None).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn index_out_of_range_scenario() {
        let vm = Interpreter::new(Vec::new());
        let arr = Value::array(vec![Value::Int(1), Value::Int(2)]);
        let err = vm.index_get(&arr, &Value::Int(5)).unwrap_err();
        assert!(matches!(err, VmError::OutOfRange { index: 5, len: 2 }));
    }

    #[test]
    fn prototype_lookup_scenario() {
        let mut vm = Interpreter::new(Vec::new());
        vm.dstr.borrow_mut().set("upper", Value::Int(1));
        let v = vm.member_get(&Value::str("hi"), "upper").unwrap();
        assert!(matches!(v, Value::Int(1)));
    }
}
