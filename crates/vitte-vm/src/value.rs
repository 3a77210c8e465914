//! The tagged value model (§3.1, §4.1 of the spec this VM implements).
//!
//! `Value` is a small enum rather than a boxed "any" object: primitives are
//! inline, aggregates are `Rc`-backed handles. `Rc`'s strong-count discipline
//! *is* the refcount invariant described in the data model — clone
//! increments, drop decrements, zero runs `Drop`. Cycles (a record whose
//! method closure captures an environment that references the record back)
//! still leak, exactly as documented for the source VM; this is an accepted
//! non-goal, not a bug to paper over.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::env::Env;
use crate::error::{VmError, VmResult};
use crate::hashmap::StrMap;
use crate::interpreter::Interpreter;

/// An immutable, reference-counted UTF-8 string with an eagerly-cached
/// length (the length is never recomputed after construction).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VStr {
    bytes: String,
}

impl VStr {
    /// Wraps an owned `String`.
    pub fn new(s: impl Into<String>) -> Self { Self { bytes: s.into() } }
    /// Borrows the string slice.
    pub fn as_str(&self) -> &str { &self.bytes }
    /// Cached byte length.
    pub fn len(&self) -> usize { self.bytes.len() }
    /// True if empty.
    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }
}

impl fmt::Display for VStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.bytes) }
}

/// A closure: entry instruction index, fixed arity, and the environment
/// captured at definition time (§3.2, §4.2).
#[derive(Debug)]
pub struct Closure {
    /// Instruction index of the function's first opcode.
    pub entry: u32,
    /// Number of declared parameters.
    pub arity: u16,
    /// Environment in effect when the closure literal was evaluated.
    pub captured: Env,
    /// Optional debug name (for disassembly / diagnostics only).
    pub name: Option<String>,
}

/// A reference-counted, pointer-compared function pointer bridging to host
/// (Rust) code (§6.3 host ABI).
#[derive(Clone)]
pub struct NativeFn(
    /// The underlying callable; compared for equality by pointer, not value.
    pub Rc<dyn Fn(&mut Interpreter, u16) -> VmResult<()>>,
);

impl NativeFn {
    /// Wraps a closure as a native function value.
    pub fn new(f: impl Fn(&mut Interpreter, u16) -> VmResult<()> + 'static) -> Self { Self(Rc::new(f)) }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "<native fn @{:p}>", Rc::as_ptr(&self.0)) }
}

impl PartialEq for NativeFn {
    fn eq(&self, other: &Self) -> bool { Rc::ptr_eq(&self.0, &other.0) }
}

/// Opaque host object plus a destructor that runs exactly once, when the
/// refcount reaches zero (used for file handles, FFI state).
pub struct NativeObj {
    /// Host-facing type tag (for diagnostics / downcasting checks).
    pub type_name: &'static str,
    data: Box<dyn Any>,
    destructor: Option<Box<dyn FnOnce(&mut dyn Any)>>,
}

impl NativeObj {
    /// Wraps `data` with an optional destructor, invoked once on drop.
    pub fn new(type_name: &'static str, data: Box<dyn Any>, destructor: Option<Box<dyn FnOnce(&mut dyn Any)>>) -> Self {
        Self { type_name, data, destructor }
    }

    /// Downcasts the payload.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> { self.data.downcast_ref() }
    /// Downcasts the payload mutably.
    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> { self.data.downcast_mut() }
}

impl Drop for NativeObj {
    fn drop(&mut self) {
        if let Some(d) = self.destructor.take() {
            d(&mut *self.data);
        }
    }
}

impl fmt::Debug for NativeObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "<native object {}>", self.type_name) }
}

/// A record: an open-hashing string-keyed map plus a cached prototype
/// pointer (§3.3). Reads of the literal key `"constructor"` never descend
/// into the prototype chain; writes to the literal key `"prototype"`
/// re-resolve the cached pointer.
#[derive(Debug, Default)]
pub struct Record {
    fields: StrMap<Value>,
    prototype: Option<Rc<RefCell<Record>>>,
}

impl Record {
    /// An empty record with no prototype.
    pub fn new() -> Self { Self::default() }

    /// Own-fields lookup, no prototype walk. Used for the `"constructor"`
    /// key and internally by the chain-walking [`Record::get`].
    pub fn get_own(&self, key: &str) -> Option<Value> { self.fields.get(key).cloned() }

    /// Record member lookup. `"constructor"` never walks the prototype
    /// chain; every other key does, terminating in finite time because the
    /// chain is a sequence of distinct `Rc` handles (§8 testable property
    /// 3 assumes well-formed, acyclic prototype graphs).
    pub fn get(&self, key: &str) -> Value {
        if key == "constructor" {
            return self.fields.get(key).cloned().unwrap_or(Value::Nil);
        }
        if let Some(v) = self.fields.get(key) {
            return v.clone();
        }
        if let Some(p) = &self.prototype {
            return p.borrow().get(key);
        }
        Value::Nil
    }

    /// Sets `key`. Setting the literal key `"prototype"` additionally
    /// refreshes the cached prototype pointer: to the given record if the
    /// value is a record, cleared (`None`) otherwise (§8 testable property
    /// 8).
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if key == "prototype" {
            self.prototype = match &value {
                Value::Record(r) => Some(r.clone()),
                _ => None,
            };
        }
        self.fields.insert(key, value);
    }

    /// The cached prototype pointer, if any.
    pub fn prototype(&self) -> Option<Rc<RefCell<Record>>> { self.prototype.clone() }

    /// Number of own fields (prototype entries not included).
    pub fn len(&self) -> usize { self.fields.len() }
    /// True if the record has no own fields.
    pub fn is_empty(&self) -> bool { self.fields.is_empty() }

    /// Iterates own fields in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> { self.fields.iter() }
}

/// The tagged value (§3.1). `Clone` is the refcount-increment operation for
/// heap variants; `Drop` (implicit, via `Rc`) is the decrement.
#[derive(Clone)]
pub enum Value {
    /// Absence of value (the all-zero payload).
    Nil,
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit IEEE-754 float.
    Float(f64),
    /// Reference-counted immutable string.
    Str(Rc<VStr>),
    /// Reference-counted growable array.
    Array(Rc<RefCell<Vec<Value>>>),
    /// Reference-counted record.
    Record(Rc<RefCell<Record>>),
    /// Reference-counted closure.
    Fn(Rc<Closure>),
    /// Host function pointer.
    NativeFn(NativeFn),
    /// Reference-counted opaque host object.
    NativeObj(Rc<RefCell<NativeObj>>),
}

impl Value {
    /// Constructs a string value.
    pub fn str(s: impl Into<String>) -> Self { Value::Str(Rc::new(VStr::new(s))) }
    /// Constructs an array value.
    pub fn array(v: Vec<Value>) -> Self { Value::Array(Rc::new(RefCell::new(v))) }
    /// Constructs an empty record value.
    pub fn record(r: Record) -> Self { Value::Record(Rc::new(RefCell::new(r))) }

    /// Type name, for diagnostics and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Fn(_) => "function",
            Value::NativeFn(_) => "native function",
            Value::NativeObj(_) => "native object",
        }
    }

    /// Boolean coercion (§4.1). `Float` is **strictly positive**, not
    /// merely nonzero — a preserved source quirk, not a bug to fix.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f > 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(a) => !a.borrow().is_empty(),
            Value::Record(_) | Value::Fn(_) | Value::NativeFn(_) | Value::NativeObj(_) => true,
        }
    }

    /// Identity-style equality used by `Eq`/`Neq` and exception-handler
    /// prototype matching: numeric/string by value, `Nil` by tag,
    /// `Fn`/`NativeFn`/`Record` by pointer identity, mismatched types
    /// compare unequal rather than erroring.
    pub fn value_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a.as_str() == b.as_str(),
            (Value::Record(a), Value::Record(b)) => Rc::ptr_eq(a, b),
            (Value::Fn(a), Value::Fn(b)) => Rc::ptr_eq(a, b),
            (Value::NativeFn(a), Value::NativeFn(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::NativeObj(a), Value::NativeObj(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{:?}", s.as_str()),
            Value::Array(a) => write!(f, "{:?}", a.borrow()),
            Value::Record(r) => write!(f, "<record {} fields>", r.borrow().len()),
            Value::Fn(c) => write!(f, "<fn @{} arity {}>", c.entry, c.arity),
            Value::NativeFn(n) => write!(f, "{n:?}"),
            Value::NativeObj(o) => write!(f, "{:?}", o.borrow()),
        }
    }
}

fn type_mismatch(op: &'static str, lhs: &Value, rhs: &Value) -> VmError {
    VmError::TypeMismatch { op, lhs: lhs.type_name(), rhs: rhs.type_name() }
}

/// `+` (§4.1): numeric promotion, string concatenation.
pub fn add(lhs: &Value, rhs: &Value) -> VmResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{}{}", a.as_str(), b.as_str()))),
        _ => Err(type_mismatch("+", lhs, rhs)),
    }
}

/// `-` (§4.1): numeric promotion only.
pub fn sub(lhs: &Value, rhs: &Value) -> VmResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(*b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 - b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a - *b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
        _ => Err(type_mismatch("-", lhs, rhs)),
    }
}

/// `*` (§4.1): numeric promotion, string/array repetition.
pub fn mul(lhs: &Value, rhs: &Value) -> VmResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(*b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 * b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a * *b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => Ok(Value::str(repeat_str(s.as_str(), *n))),
        (Value::Array(a), Value::Int(n)) => {
            let src = a.borrow();
            let mut out = Vec::with_capacity(src.len() * (*n).max(0) as usize);
            for _ in 0..(*n).max(0) {
                out.extend(src.iter().cloned());
            }
            Ok(Value::array(out))
        }
        _ => Err(type_mismatch("*", lhs, rhs)),
    }
}

fn repeat_str(s: &str, n: i64) -> String {
    if n <= 0 { String::new() } else { s.repeat(n as usize) }
}

/// `/` (§4.1): always yields `Float`, even for `Int / Int`.
pub fn div(lhs: &Value, rhs: &Value) -> VmResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Float(*a as f64 / *b as f64)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 / b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a / *b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
        _ => Err(type_mismatch("/", lhs, rhs)),
    }
}

/// `%` (§4.1): `Int % Int` only.
pub fn modulo(lhs: &Value, rhs: &Value) -> VmResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_rem(*b))),
        _ => Err(type_mismatch("%", lhs, rhs)),
    }
}

/// Orders two values the same way `<`/`<=`/`>`/`>=` do. Exposed for natives
/// (e.g. `array.sort`) that need a comparator rather than a single boolean.
pub fn compare(lhs: &Value, rhs: &Value) -> VmResult<std::cmp::Ordering> {
    numeric_cmp(lhs, rhs).ok_or_else(|| type_mismatch("compare", lhs, rhs))
}

fn numeric_cmp(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// `<`
pub fn lt(lhs: &Value, rhs: &Value) -> VmResult<Value> {
    numeric_cmp(lhs, rhs).map(|o| Value::Int(i64::from(o.is_lt()))).ok_or_else(|| type_mismatch("<", lhs, rhs))
}
/// `<=`
pub fn leq(lhs: &Value, rhs: &Value) -> VmResult<Value> {
    numeric_cmp(lhs, rhs).map(|o| Value::Int(i64::from(o.is_le()))).ok_or_else(|| type_mismatch("<=", lhs, rhs))
}
/// `>`
pub fn gt(lhs: &Value, rhs: &Value) -> VmResult<Value> {
    numeric_cmp(lhs, rhs).map(|o| Value::Int(i64::from(o.is_gt()))).ok_or_else(|| type_mismatch(">", lhs, rhs))
}
/// `>=`
pub fn geq(lhs: &Value, rhs: &Value) -> VmResult<Value> {
    numeric_cmp(lhs, rhs).map(|o| Value::Int(i64::from(o.is_ge()))).ok_or_else(|| type_mismatch(">=", lhs, rhs))
}

/// `==` (never errors: mismatched types compare unequal).
pub fn eq(lhs: &Value, rhs: &Value) -> Value { Value::Int(i64::from(lhs.value_eq(rhs))) }
/// `!=` (never errors: mismatched types compare unequal).
pub fn neq(lhs: &Value, rhs: &Value) -> Value { Value::Int(i64::from(!lhs.value_eq(rhs))) }

/// Unary `-`.
pub fn negate(v: &Value) -> VmResult<Value> {
    match v {
        Value::Int(i) => Ok(Value::Int(-i)),
        Value::Float(f) => Ok(Value::Float(-f)),
        _ => Err(VmError::TypeMismatch { op: "negate", lhs: v.type_name(), rhs: v.type_name() }),
    }
}

/// Unary `!`.
pub fn not(v: &Value) -> Value { Value::Int(i64::from(!v.is_true())) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_div_yields_float() {
        let r = div(&Value::Int(7), &Value::Int(2)).unwrap();
        match r {
            Value::Float(f) => assert!((f - 3.5).abs() < 1e-9),
            _ => panic!("expected float"),
        }
    }

    #[test]
    fn string_times_zero_is_empty() {
        let r = mul(&Value::str("ab"), &Value::Int(0)).unwrap();
        match r {
            Value::Str(s) => assert_eq!(s.as_str(), ""),
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn float_truthiness_is_strictly_positive() {
        assert!(!Value::Float(0.0).is_true());
        assert!(!Value::Float(-1.0).is_true());
        assert!(Value::Float(0.5).is_true());
    }

    #[test]
    fn int_truthiness_is_nonzero() {
        assert!(!Value::Int(0).is_true());
        assert!(Value::Int(-1).is_true());
        assert!(Value::Int(1).is_true());
    }

    #[test]
    fn record_prototype_cache_updates_and_clears() {
        let parent = Rc::new(RefCell::new(Record::new()));
        parent.borrow_mut().set("hi", Value::str("hi"));

        let mut child = Record::new();
        child.set("prototype", Value::Record(parent.clone()));
        assert!(matches!(child.get("hi"), Value::Str(s) if s.as_str() == "hi"));

        child.set("prototype", Value::Nil);
        assert!(matches!(child.get("hi"), Value::Nil));
    }

    #[test]
    fn constructor_key_never_walks_prototype() {
        let parent = Rc::new(RefCell::new(Record::new()));
        parent.borrow_mut().set("constructor", Value::str("parent-ctor"));

        let mut child = Record::new();
        child.set("prototype", Value::Record(parent));
        assert!(matches!(child.get_own("constructor"), None));
    }
}
