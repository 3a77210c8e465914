//! The core instruction set: one byte per opcode, big-endian inline operands.
//!
//! This is the complete, closed catalog — nothing outside this list is part
//! of the instruction set. Shared between `vitte-compiler` (which emits it)
//! and `vitte-vm` (which decodes and dispatches it) so the two never drift.

#[cfg(feature = "std")]
use std::{string::String, vec::Vec};

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::{CoreError, CoreResult};

/// One instruction. Variants carry their decoded operands; the numeric
/// discriminant (see [`OpCode::tag`]) is what's actually stored in the code
/// buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum OpCode {
    /// Stop the dispatch loop.
    Halt,
    /// Push an `Int` built from an unsigned 8-bit literal.
    Push8(u8),
    /// Push an `Int` built from an unsigned 16-bit literal.
    Push16(u16),
    /// Push an `Int` built from an unsigned 32-bit literal.
    Push32(u32),
    /// Push an `Int` built from an unsigned 64-bit literal.
    Push64(u64),
    /// Push a `Float` built from an IEEE-754 32-bit literal.
    PushF32(f32),
    /// Push a `Float` built from an IEEE-754 64-bit literal.
    PushF64(f64),
    /// Push a `Str` built from a null-terminated UTF-8 literal.
    PushStr(String),
    /// Push `Nil`.
    PushNil,
    /// Drop the top of the stack.
    Pop,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `&&`
    And,
    /// `||`
    Or,
    /// Unary `-`
    Negate,
    /// Unary `!`
    Not,
    /// `<`
    Lt,
    /// `<=`
    Leq,
    /// `>`
    Gt,
    /// `>=`
    Geq,
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// Reserve `n` zero-initialized local slots in the current frame.
    EnvNew(u16),
    /// Write the top of stack into local slot `k` (popping it).
    SetLocal(u16),
    /// Push a copy of local slot `k`.
    GetLocal(u16),
    /// Write into slot `k` of the frame `up` lexical-parent links away.
    SetLocalUp(u16, u16),
    /// Push a copy of slot `k` of the frame `up` lexical-parent links away.
    GetLocalUp(u16, u16),
    /// Write the top of stack into a named global.
    SetGlobal(String),
    /// Push a copy of a named global, or raise `UnboundGlobal`.
    GetGlobal(String),
    /// Write a closure into slot `k`, patching its own captured slot `k` too
    /// (recursive self-reference).
    SetLocalFunctionDef(u16),
    /// Push a closure whose entry point is just after this instruction and
    /// whose capture is the current frame, then jump to `end_ip`.
    DefFunctionPush(u16, u32),
    /// Unconditional absolute jump.
    Jmp(u32),
    /// Pop; jump if is-true.
    JCond(u32),
    /// Pop; jump if is-false.
    JNCond(u32),
    /// Pop the callee and invoke it with `nargs` arguments already pushed.
    Call(u16),
    /// Return to the caller.
    Ret,
    /// Tail-position call: `Call` immediately followed by `Ret`.
    Retcall(u16),
    /// Push a new empty record.
    DictNew,
    /// Pop a record (or prototype-bearing value); push `value[k]` or `Nil`.
    MemberGet(String),
    /// Like `MemberGet` but leaves the receiver on the stack.
    MemberGetNoPop(String),
    /// Pop a record; set `record[k]` to the value below it, leaving the
    /// value on the stack.
    MemberSet(String),
    /// Build a record from a sentinel-terminated run of key/value pairs.
    DictLoad,
    /// Build an array from the top `n` stack values.
    ArrayLoad,
    /// Pop an index and a container; push the element.
    IndexGet,
    /// Pop a value, an index and a container; store the element.
    IndexSet,
    /// Push a new exception frame built from a sentinel-terminated run of
    /// `(handler_fn, etype)` pairs.
    Try,
    /// Pop the raised value and unwind to a matching handler, or halt
    /// fatally if none matches.
    Raise,
    /// Pop the innermost exception frame and jump to `pos`.
    ExframeRet(u32),
}

macro_rules! tags {
    ($($name:ident = $val:expr),* $(,)?) => {
        $(
            #[doc = concat!("Numeric tag for `OpCode::", stringify!($name), "`.")]
            pub const $name: u8 = $val;
        )*
    };
}

#[allow(missing_docs)]
pub mod tag {
    //! Raw byte tags stored in the code buffer, one per [`super::OpCode`] variant.
    tags! {
        HALT = 0,
        PUSH8 = 1,
        PUSH16 = 2,
        PUSH32 = 3,
        PUSH64 = 4,
        PUSHF32 = 5,
        PUSHF64 = 6,
        PUSHSTR = 7,
        PUSHNIL = 8,
        POP = 9,
        ADD = 10,
        SUB = 11,
        MUL = 12,
        DIV = 13,
        MOD = 14,
        AND = 15,
        OR = 16,
        NEGATE = 17,
        NOT = 18,
        LT = 19,
        LEQ = 20,
        GT = 21,
        GEQ = 22,
        EQ = 23,
        NEQ = 24,
        ENV_NEW = 25,
        SET_LOCAL = 26,
        GET_LOCAL = 27,
        SET_LOCAL_UP = 28,
        GET_LOCAL_UP = 29,
        SET_GLOBAL = 30,
        GET_GLOBAL = 31,
        SET_LOCAL_FUNCTION_DEF = 32,
        DEF_FUNCTION_PUSH = 33,
        JMP = 34,
        JCOND = 35,
        JNCOND = 36,
        CALL = 37,
        RET = 38,
        RETCALL = 39,
        DICT_NEW = 40,
        MEMBER_GET = 41,
        MEMBER_GET_NO_POP = 42,
        MEMBER_SET = 43,
        DICT_LOAD = 44,
        ARRAY_LOAD = 45,
        INDEX_GET = 46,
        INDEX_SET = 47,
        TRY = 48,
        RAISE = 49,
        EXFRAME_RET = 50,
    }
}

/// Appends `x` as four big-endian bytes.
pub fn write_u32_be(buf: &mut Vec<u8>, x: u32) { buf.extend_from_slice(&x.to_be_bytes()); }
/// Appends `x` as two big-endian bytes.
pub fn write_u16_be(buf: &mut Vec<u8>, x: u16) { buf.extend_from_slice(&x.to_be_bytes()); }
/// Appends `x` as eight big-endian bytes.
pub fn write_u64_be(buf: &mut Vec<u8>, x: u64) { buf.extend_from_slice(&x.to_be_bytes()); }
/// Appends a null-terminated UTF-8 string.
pub fn write_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Sequential big-endian reader over a code buffer, tracking the instruction
/// pointer the way the VM does.
#[derive(Debug, Clone)]
pub struct CodeReader<'a> {
    code: &'a [u8],
}

impl<'a> CodeReader<'a> {
    /// Wraps a code buffer for decoding.
    pub fn new(code: &'a [u8]) -> Self { Self { code } }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize { self.code.len() }
    /// True if the buffer is empty.
    pub fn is_empty(&self) -> bool { self.code.is_empty() }

    fn need(&self, at: u32, n: usize) -> CoreResult<()> {
        if (at as usize) + n > self.code.len() {
            return Err(CoreError::UnexpectedEof { needed: n as u64, at: at as u64 });
        }
        Ok(())
    }

    /// Reads one byte at `at`.
    pub fn read_u8(&self, at: u32) -> CoreResult<u8> {
        self.need(at, 1)?;
        Ok(self.code[at as usize])
    }

    /// Reads a big-endian `u16` at `at`.
    pub fn read_u16(&self, at: u32) -> CoreResult<u16> {
        self.need(at, 2)?;
        let b = &self.code[at as usize..at as usize + 2];
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a big-endian `u32` at `at`.
    pub fn read_u32(&self, at: u32) -> CoreResult<u32> {
        self.need(at, 4)?;
        let b = &self.code[at as usize..at as usize + 4];
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a big-endian `u64` at `at`.
    pub fn read_u64(&self, at: u32) -> CoreResult<u64> {
        self.need(at, 8)?;
        let b = &self.code[at as usize..at as usize + 8];
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Reads a big-endian `f32` at `at`.
    pub fn read_f32(&self, at: u32) -> CoreResult<f32> { Ok(f32::from_bits(self.read_u32(at)?)) }
    /// Reads a big-endian `f64` at `at`.
    pub fn read_f64(&self, at: u32) -> CoreResult<f64> { Ok(f64::from_bits(self.read_u64(at)?)) }

    /// Reads a null-terminated UTF-8 string starting at `at`, returning the
    /// string and the offset just past the terminator.
    pub fn read_cstr(&self, at: u32) -> CoreResult<(String, u32)> {
        let start = at as usize;
        let mut end = start;
        while end < self.code.len() && self.code[end] != 0 {
            end += 1;
        }
        if end >= self.code.len() {
            return Err(CoreError::UnexpectedEof { needed: 1, at: end as u64 });
        }
        let s = core::str::from_utf8(&self.code[start..end]).map_err(|_| CoreError::InvalidUtf8)?;
        Ok((s.into(), (end + 1) as u32))
    }

    /// Decodes the instruction at `ip`, returning it along with the ip of
    /// the next instruction.
    pub fn decode(&self, ip: u32) -> CoreResult<(OpCode, u32)> {
        let op = self.read_u8(ip)?;
        let mut p = ip + 1;
        let inst = match op {
            tag::HALT => OpCode::Halt,
            tag::PUSH8 => { let v = self.read_u8(p)?; p += 1; OpCode::Push8(v) }
            tag::PUSH16 => { let v = self.read_u16(p)?; p += 2; OpCode::Push16(v) }
            tag::PUSH32 => { let v = self.read_u32(p)?; p += 4; OpCode::Push32(v) }
            tag::PUSH64 => { let v = self.read_u64(p)?; p += 8; OpCode::Push64(v) }
            tag::PUSHF32 => { let v = self.read_f32(p)?; p += 4; OpCode::PushF32(v) }
            tag::PUSHF64 => { let v = self.read_f64(p)?; p += 8; OpCode::PushF64(v) }
            tag::PUSHSTR => { let (s, np) = self.read_cstr(p)?; p = np; OpCode::PushStr(s) }
            tag::PUSHNIL => OpCode::PushNil,
            tag::POP => OpCode::Pop,
            tag::ADD => OpCode::Add,
            tag::SUB => OpCode::Sub,
            tag::MUL => OpCode::Mul,
            tag::DIV => OpCode::Div,
            tag::MOD => OpCode::Mod,
            tag::AND => OpCode::And,
            tag::OR => OpCode::Or,
            tag::NEGATE => OpCode::Negate,
            tag::NOT => OpCode::Not,
            tag::LT => OpCode::Lt,
            tag::LEQ => OpCode::Leq,
            tag::GT => OpCode::Gt,
            tag::GEQ => OpCode::Geq,
            tag::EQ => OpCode::Eq,
            tag::NEQ => OpCode::Neq,
            tag::ENV_NEW => { let v = self.read_u16(p)?; p += 2; OpCode::EnvNew(v) }
            tag::SET_LOCAL => { let v = self.read_u16(p)?; p += 2; OpCode::SetLocal(v) }
            tag::GET_LOCAL => { let v = self.read_u16(p)?; p += 2; OpCode::GetLocal(v) }
            tag::SET_LOCAL_UP => {
                let k = self.read_u16(p)?; p += 2;
                let up = self.read_u16(p)?; p += 2;
                OpCode::SetLocalUp(k, up)
            }
            tag::GET_LOCAL_UP => {
                let k = self.read_u16(p)?; p += 2;
                let up = self.read_u16(p)?; p += 2;
                OpCode::GetLocalUp(k, up)
            }
            tag::SET_GLOBAL => { let (s, np) = self.read_cstr(p)?; p = np; OpCode::SetGlobal(s) }
            tag::GET_GLOBAL => { let (s, np) = self.read_cstr(p)?; p = np; OpCode::GetGlobal(s) }
            tag::SET_LOCAL_FUNCTION_DEF => { let v = self.read_u16(p)?; p += 2; OpCode::SetLocalFunctionDef(v) }
            tag::DEF_FUNCTION_PUSH => {
                let nargs = self.read_u16(p)?; p += 2;
                let end_ip = self.read_u32(p)?; p += 4;
                OpCode::DefFunctionPush(nargs, end_ip)
            }
            tag::JMP => { let v = self.read_u32(p)?; p += 4; OpCode::Jmp(v) }
            tag::JCOND => { let v = self.read_u32(p)?; p += 4; OpCode::JCond(v) }
            tag::JNCOND => { let v = self.read_u32(p)?; p += 4; OpCode::JNCond(v) }
            tag::CALL => { let v = self.read_u16(p)?; p += 2; OpCode::Call(v) }
            tag::RET => OpCode::Ret,
            tag::RETCALL => { let v = self.read_u16(p)?; p += 2; OpCode::Retcall(v) }
            tag::DICT_NEW => OpCode::DictNew,
            tag::MEMBER_GET => { let (s, np) = self.read_cstr(p)?; p = np; OpCode::MemberGet(s) }
            tag::MEMBER_GET_NO_POP => { let (s, np) = self.read_cstr(p)?; p = np; OpCode::MemberGetNoPop(s) }
            tag::MEMBER_SET => { let (s, np) = self.read_cstr(p)?; p = np; OpCode::MemberSet(s) }
            tag::DICT_LOAD => OpCode::DictLoad,
            tag::ARRAY_LOAD => OpCode::ArrayLoad,
            tag::INDEX_GET => OpCode::IndexGet,
            tag::INDEX_SET => OpCode::IndexSet,
            tag::TRY => OpCode::Try,
            tag::RAISE => OpCode::Raise,
            tag::EXFRAME_RET => { let v = self.read_u32(p)?; p += 4; OpCode::ExframeRet(v) }
            other => return Err(CoreError::corrupted(alloc_string(format_args!("unknown opcode byte {other}")))),
        };
        Ok((inst, p))
    }
}

#[cfg(feature = "std")]
fn alloc_string(args: core::fmt::Arguments<'_>) -> String { std::fmt::format(args) }
#[cfg(not(feature = "std"))]
fn alloc_string(args: core::fmt::Arguments<'_>) -> String { alloc::fmt::format(args) }

/// Encodes a single instruction onto `buf`, returning the byte offset of its
/// first operand byte (or of the next instruction, for operand-less ops) —
/// useful for callers that must back-patch a jump target later.
pub fn encode(buf: &mut Vec<u8>, op: &OpCode) -> usize {
    match op {
        OpCode::Halt => buf.push(tag::HALT),
        OpCode::Push8(v) => { buf.push(tag::PUSH8); buf.push(*v); }
        OpCode::Push16(v) => { buf.push(tag::PUSH16); write_u16_be(buf, *v); }
        OpCode::Push32(v) => { buf.push(tag::PUSH32); write_u32_be(buf, *v); }
        OpCode::Push64(v) => { buf.push(tag::PUSH64); write_u64_be(buf, *v); }
        OpCode::PushF32(v) => { buf.push(tag::PUSHF32); write_u32_be(buf, v.to_bits()); }
        OpCode::PushF64(v) => { buf.push(tag::PUSHF64); write_u64_be(buf, v.to_bits()); }
        OpCode::PushStr(s) => { buf.push(tag::PUSHSTR); write_cstr(buf, s); }
        OpCode::PushNil => buf.push(tag::PUSHNIL),
        OpCode::Pop => buf.push(tag::POP),
        OpCode::Add => buf.push(tag::ADD),
        OpCode::Sub => buf.push(tag::SUB),
        OpCode::Mul => buf.push(tag::MUL),
        OpCode::Div => buf.push(tag::DIV),
        OpCode::Mod => buf.push(tag::MOD),
        OpCode::And => buf.push(tag::AND),
        OpCode::Or => buf.push(tag::OR),
        OpCode::Negate => buf.push(tag::NEGATE),
        OpCode::Not => buf.push(tag::NOT),
        OpCode::Lt => buf.push(tag::LT),
        OpCode::Leq => buf.push(tag::LEQ),
        OpCode::Gt => buf.push(tag::GT),
        OpCode::Geq => buf.push(tag::GEQ),
        OpCode::Eq => buf.push(tag::EQ),
        OpCode::Neq => buf.push(tag::NEQ),
        OpCode::EnvNew(v) => { buf.push(tag::ENV_NEW); write_u16_be(buf, *v); }
        OpCode::SetLocal(v) => { buf.push(tag::SET_LOCAL); write_u16_be(buf, *v); }
        OpCode::GetLocal(v) => { buf.push(tag::GET_LOCAL); write_u16_be(buf, *v); }
        OpCode::SetLocalUp(k, up) => { buf.push(tag::SET_LOCAL_UP); write_u16_be(buf, *k); write_u16_be(buf, *up); }
        OpCode::GetLocalUp(k, up) => { buf.push(tag::GET_LOCAL_UP); write_u16_be(buf, *k); write_u16_be(buf, *up); }
        OpCode::SetGlobal(s) => { buf.push(tag::SET_GLOBAL); write_cstr(buf, s); }
        OpCode::GetGlobal(s) => { buf.push(tag::GET_GLOBAL); write_cstr(buf, s); }
        OpCode::SetLocalFunctionDef(v) => { buf.push(tag::SET_LOCAL_FUNCTION_DEF); write_u16_be(buf, *v); }
        OpCode::DefFunctionPush(n, end_ip) => {
            buf.push(tag::DEF_FUNCTION_PUSH);
            write_u16_be(buf, *n);
            write_u32_be(buf, *end_ip);
        }
        OpCode::Jmp(v) => { buf.push(tag::JMP); write_u32_be(buf, *v); }
        OpCode::JCond(v) => { buf.push(tag::JCOND); write_u32_be(buf, *v); }
        OpCode::JNCond(v) => { buf.push(tag::JNCOND); write_u32_be(buf, *v); }
        OpCode::Call(v) => { buf.push(tag::CALL); write_u16_be(buf, *v); }
        OpCode::Ret => buf.push(tag::RET),
        OpCode::Retcall(v) => { buf.push(tag::RETCALL); write_u16_be(buf, *v); }
        OpCode::DictNew => buf.push(tag::DICT_NEW),
        OpCode::MemberGet(s) => { buf.push(tag::MEMBER_GET); write_cstr(buf, s); }
        OpCode::MemberGetNoPop(s) => { buf.push(tag::MEMBER_GET_NO_POP); write_cstr(buf, s); }
        OpCode::MemberSet(s) => { buf.push(tag::MEMBER_SET); write_cstr(buf, s); }
        OpCode::DictLoad => buf.push(tag::DICT_LOAD),
        OpCode::ArrayLoad => buf.push(tag::ARRAY_LOAD),
        OpCode::IndexGet => buf.push(tag::INDEX_GET),
        OpCode::IndexSet => buf.push(tag::INDEX_SET),
        OpCode::Try => buf.push(tag::TRY),
        OpCode::Raise => buf.push(tag::RAISE),
        OpCode::ExframeRet(v) => { buf.push(tag::EXFRAME_RET); write_u32_be(buf, *v); }
    }
    buf.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_each_family() {
        let ops = [
            OpCode::Halt,
            OpCode::Push64(42),
            OpCode::PushF64(3.5),
            OpCode::PushStr("hi".into()),
            OpCode::EnvNew(3),
            OpCode::GetLocalUp(1, 2),
            OpCode::GetGlobal("x".into()),
            OpCode::DefFunctionPush(2, 99),
            OpCode::JCond(123),
            OpCode::Call(1),
            OpCode::MemberSet("k".into()),
            OpCode::ExframeRet(7),
        ];
        let mut buf = Vec::new();
        let mut ips = Vec::new();
        for op in &ops {
            ips.push(buf.len() as u32);
            encode(&mut buf, op);
        }
        let reader = CodeReader::new(&buf);
        for (op, ip) in ops.iter().zip(ips) {
            let (decoded, _) = reader.decode(ip).unwrap();
            assert_eq!(&decoded, op);
        }
    }

    #[test]
    fn big_endian_not_nibble_shifted() {
        let mut buf = Vec::new();
        encode(&mut buf, &OpCode::Jmp(0x0102_0304));
        assert_eq!(&buf[1..5], &[0x01, 0x02, 0x03, 0x04]);
    }
}
