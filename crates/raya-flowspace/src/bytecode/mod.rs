//! Stack bytecode consumed by the flow space
//!
//! - `opcode`: the instruction set
//! - `decoder`: the `Code` interface and its byte-encoded implementation
//! - `builder`: an assembler for writing procedures by hand

pub mod builder;
pub mod decoder;
pub mod opcode;

pub use builder::{CodeBuilder, Label};
pub use decoder::{disassemble, Bytecode, Code, CodeFlags, DecodeError, Instruction};
pub use opcode::{CompareKind, Opcode};
