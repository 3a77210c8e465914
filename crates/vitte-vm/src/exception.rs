//! Exception frames (§3.4): the data `Try`/`Raise`/`ExframeRet` manipulate.
//!
//! A frame is pushed by `Try` with the handler list already built, and
//! records an unwind snapshot (the environment and operand-stack depth in
//! effect at the `Try` site) so a successful `Raise` match can restore
//! exactly that context before jumping into the handler body.

use crate::env::Env;
use crate::value::Value;

/// One `catch`-like clause: the type tag to match against and the
/// instruction to jump to when it does.
#[derive(Debug, Clone)]
pub struct Handler {
    /// The value whose *pointer identity* is compared against the raised
    /// value's prototype (§9: type matching is prototype-pointer equality,
    /// not structural).
    pub etype: Value,
    /// Instruction index of the handler body.
    pub target: u32,
}

/// A single protected region, as pushed by `Try`.
#[derive(Debug, Clone)]
pub struct ExceptionFrame {
    /// Candidate handlers, tried in the order they were declared.
    pub handlers: Vec<Handler>,
    /// Environment to restore on a match.
    pub env: Env,
    /// Operand-stack depth to truncate to on a match.
    pub stack_depth: usize,
}

impl ExceptionFrame {
    /// Finds the first handler whose `etype` is prototype-pointer-equal to
    /// `raised`'s prototype record.
    pub fn find_handler(&self, raised_prototype: &Option<Value>) -> Option<&Handler> {
        let raised_prototype = raised_prototype.as_ref()?;
        self.handlers.iter().find(|h| h.etype.value_eq(raised_prototype))
    }
}
