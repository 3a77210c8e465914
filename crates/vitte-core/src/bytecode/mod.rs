//! Bytecode helpers (chunk structure, validation, asm/disasm stubs).
//!
//! The original tooling expected a fairly rich API. To keep the workspace
//! compiling while the new core is rolled out, we provide a lightweight
//! implementation that covers the pieces currently used by the CLI crates.
 
/// Chunk representation plus binary roundtrip helpers.
pub mod chunk;
pub mod helpers;
pub mod disasm;
pub mod asm;
pub mod runtime;

/// The core instruction set (shared by the compiler and the VM).
pub mod opcode;
/// Bytecode-index → source-line-range table.
pub mod source_map;

pub use chunk::{Chunk, ChunkError, ChunkFlags, ConstPool, ConstValue, DebugInfo, LineTable, Op};
pub use opcode::{CodeReader, OpCode};
pub use source_map::{SourceMap, SourceMapEntry};
