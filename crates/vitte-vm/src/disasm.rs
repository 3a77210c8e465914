//! Text disassembler: one line per instruction, `ip: MNEMONIC operands`.
//! Used by `vitte-cli` and by tests that want a human-readable trace
//! instead of stepping the interpreter directly.

use std::fmt::Write as _;

use vitte_core::bytecode::{CodeReader, OpCode, SourceMap};

/// Disassembles `code` in its entirety into one line per instruction.
pub fn disassemble(code: &[u8], source_map: Option<&SourceMap>) -> String {
    let reader = CodeReader::new(code);
    let mut out = String::new();
    let mut ip = 0u32;
    while (ip as usize) < reader.len() {
        let (op, next_ip) = match reader.decode(ip) {
            Ok(v) => v,
            Err(e) => {
                let _ = writeln!(out, "{ip:6}: <error: {e}>");
                break;
            }
        };
        let line = source_map
            .and_then(|m| m.line_for_ip(ip))
            .map(|(start, _end)| format!(" ; line {start}"))
            .unwrap_or_default();
        let _ = writeln!(out, "{ip:6}: {}{line}", mnemonic(&op));
        ip = next_ip;
    }
    out
}

fn mnemonic(op: &OpCode) -> String {
    match op {
        OpCode::Halt => "HALT".into(),
        OpCode::Push8(v) => format!("PUSH8 {v}"),
        OpCode::Push16(v) => format!("PUSH16 {v}"),
        OpCode::Push32(v) => format!("PUSH32 {v}"),
        OpCode::Push64(v) => format!("PUSH64 {v}"),
        OpCode::PushF32(v) => format!("PUSHF32 {v}"),
        OpCode::PushF64(v) => format!("PUSHF64 {v}"),
        OpCode::PushStr(s) => format!("PUSHSTR {s:?}"),
        OpCode::PushNil => "PUSHNIL".into(),
        OpCode::Pop => "POP".into(),
        OpCode::Add => "ADD".into(),
        OpCode::Sub => "SUB".into(),
        OpCode::Mul => "MUL".into(),
        OpCode::Div => "DIV".into(),
        OpCode::Mod => "MOD".into(),
        OpCode::And => "AND".into(),
        OpCode::Or => "OR".into(),
        OpCode::Negate => "NEGATE".into(),
        OpCode::Not => "NOT".into(),
        OpCode::Lt => "LT".into(),
        OpCode::Leq => "LEQ".into(),
        OpCode::Gt => "GT".into(),
        OpCode::Geq => "GEQ".into(),
        OpCode::Eq => "EQ".into(),
        OpCode::Neq => "NEQ".into(),
        OpCode::EnvNew(n) => format!("ENV_NEW {n}"),
        OpCode::SetLocal(k) => format!("SET_LOCAL {k}"),
        OpCode::GetLocal(k) => format!("GET_LOCAL {k}"),
        OpCode::SetLocalUp(k, up) => format!("SET_LOCAL_UP {k} {up}"),
        OpCode::GetLocalUp(k, up) => format!("GET_LOCAL_UP {k} {up}"),
        OpCode::SetGlobal(s) => format!("SET_GLOBAL {s:?}"),
        OpCode::GetGlobal(s) => format!("GET_GLOBAL {s:?}"),
        OpCode::SetLocalFunctionDef(k) => format!("SET_LOCAL_FUNCTION_DEF {k}"),
        OpCode::DefFunctionPush(n, end_ip) => format!("DEF_FUNCTION_PUSH {n} -> {end_ip}"),
        OpCode::Jmp(t) => format!("JMP {t}"),
        OpCode::JCond(t) => format!("JCOND {t}"),
        OpCode::JNCond(t) => format!("JNCOND {t}"),
        OpCode::Call(n) => format!("CALL {n}"),
        OpCode::Ret => "RET".into(),
        OpCode::Retcall(n) => format!("RETCALL {n}"),
        OpCode::DictNew => "DICT_NEW".into(),
        OpCode::MemberGet(k) => format!("MEMBER_GET {k:?}"),
        OpCode::MemberGetNoPop(k) => format!("MEMBER_GET_NO_POP {k:?}"),
        OpCode::MemberSet(k) => format!("MEMBER_SET {k:?}"),
        OpCode::DictLoad => "DICT_LOAD".into(),
        OpCode::ArrayLoad => "ARRAY_LOAD".into(),
        OpCode::IndexGet => "INDEX_GET".into(),
        OpCode::IndexSet => "INDEX_SET".into(),
        OpCode::Try => "TRY".into(),
        OpCode::Raise => "RAISE".into(),
        OpCode::ExframeRet(t) => format!("EXFRAME_RET {t}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_core::bytecode::opcode::encode;

    #[test]
    fn disassembles_a_simple_program() {
        let mut code = Vec::new();
        encode(&mut code, &OpCode::Push64(1));
        encode(&mut code, &OpCode::Push64(2));
        encode(&mut code, &OpCode::Add);
        encode(&mut code, &OpCode::Halt);
        let text = disassemble(&code, None);
        assert!(text.contains("PUSH64 1"));
        assert!(text.contains("ADD"));
        assert!(text.contains("HALT"));
    }
}
