//! Lexically-scoped environments (§3.2, §4.2).
//!
//! Each call frame and each block that introduces locals gets an
//! `Environment`: a flat vector of slots plus a pointer to the lexically
//! enclosing environment. The `up` chain is *not* the call stack — it is
//! the closure chain, walked by `GetLocalUp`/`SetLocalUp` to reach a
//! variable captured from an outer function.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::value::Value;

/// Shared handle to an [`Environment`]. Cloning is a refcount bump, not a
/// deep copy — this is precisely how closures share mutable captured state.
pub type Env = Rc<RefCell<Environment>>;

/// A single lexical frame: `nslots` local variable cells plus the lexical
/// parent, if any.
#[derive(Debug)]
pub struct Environment {
    slots: Vec<Value>,
    /// The lexically enclosing environment (not the caller).
    pub up: Option<Env>,
}

impl Environment {
    /// Allocates a frame with `nslots` slots, all initialized to `Nil`,
    /// lexically nested inside `up`.
    pub fn new(nslots: u16, up: Option<Env>) -> Env {
        Rc::new(RefCell::new(Environment { slots: vec![Value::Nil; nslots as usize], up }))
    }

    /// Root frame with no lexical parent (top-level script scope).
    pub fn root(nslots: u16) -> Env { Self::new(nslots, None) }

    fn slot_mut(&mut self, slot: u16) -> VmResult<&mut Value> {
        self.slots.get_mut(slot as usize).ok_or(VmError::MalformedBytecode(format!("local slot {slot} out of range")))
    }

    fn slot_ref(&self, slot: u16) -> VmResult<&Value> {
        self.slots.get(slot as usize).ok_or(VmError::MalformedBytecode(format!("local slot {slot} out of range")))
    }

    /// Reads local slot `slot` in this frame.
    pub fn get_local(&self, slot: u16) -> VmResult<Value> { self.slot_ref(slot).cloned() }

    /// Writes local slot `slot` in this frame.
    pub fn set_local(&mut self, slot: u16, value: Value) -> VmResult<()> {
        *self.slot_mut(slot)? = value;
        Ok(())
    }
}

fn walk_up(env: &Env, ups: u16) -> VmResult<Env> {
    let mut cur = env.clone();
    for _ in 0..ups {
        let next = cur
            .borrow()
            .up
            .clone()
            .ok_or_else(|| VmError::MalformedBytecode("up-chain shorter than requested depth".into()))?;
        cur = next;
    }
    Ok(cur)
}

/// Reads slot `slot` of the frame `ups` lexical-parent links above `env`
/// (`ups == 0` means `env` itself).
pub fn get_local_up(env: &Env, ups: u16, slot: u16) -> VmResult<Value> {
    let target = walk_up(env, ups)?;
    let v = target.borrow().get_local(slot)?;
    Ok(v)
}

/// Writes slot `slot` of the frame `ups` lexical-parent links above `env`.
pub fn set_local_up(env: &Env, ups: u16, slot: u16, value: Value) -> VmResult<()> {
    let target = walk_up(env, ups)?;
    target.borrow_mut().set_local(slot, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_frames_see_enclosing_slots() {
        let outer = Environment::root(1);
        outer.borrow_mut().set_local(0, Value::Int(7)).unwrap();
        let inner = Environment::new(1, Some(outer.clone()));
        inner.borrow_mut().set_local(0, Value::Int(3)).unwrap();

        assert!(matches!(get_local_up(&inner, 0, 0).unwrap(), Value::Int(3)));
        assert!(matches!(get_local_up(&inner, 1, 0).unwrap(), Value::Int(7)));

        set_local_up(&inner, 1, 0, Value::Int(99)).unwrap();
        assert!(matches!(outer.borrow().get_local(0).unwrap(), Value::Int(99)));
    }
}
