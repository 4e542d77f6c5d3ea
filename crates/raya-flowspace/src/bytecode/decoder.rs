//! Code objects and the instruction decoder
//!
//! `Code` is what the flow space consumes: a decode step plus static
//! metadata. `Bytecode` is the byte-encoded implementation.

use super::opcode::Opcode;
use crate::model::HostObject;

/// Error during bytecode decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid opcode byte {byte:#x} at offset {offset}")]
    InvalidOpcode { byte: u8, offset: usize },
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),
}

/// Code object flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CodeFlags(pub u32);

impl CodeFlags {
    /// Locals live in a fresh scope per call
    pub const NEWLOCALS: CodeFlags = CodeFlags(0x2);
    /// The code is a generator body
    pub const GENERATOR: CodeFlags = CodeFlags(0x20);

    pub fn contains(self, other: CodeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CodeFlags {
    type Output = CodeFlags;

    fn bitor(self, rhs: CodeFlags) -> CodeFlags {
        CodeFlags(self.0 | rhs.0)
    }
}

/// One decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the opcode byte
    pub offset: usize,
    /// Offset of the following instruction
    pub next: usize,
    pub opcode: Opcode,
    /// Argument (0 for opcodes without one)
    pub arg: u32,
}

/// A procedure's instruction stream and static metadata
pub trait Code {
    /// Decode the instruction at `pos`
    fn read(&self, pos: usize) -> Result<Instruction, DecodeError>;

    /// Number of positional arguments (the first locals)
    fn arg_count(&self) -> usize;

    /// Names of all local slots, arguments first
    fn varnames(&self) -> &[String];

    /// Global, attribute and module names referenced by the code
    fn names(&self) -> &[String];

    /// Constant pool
    fn consts(&self) -> &[HostObject];

    /// Names of cells created by this code
    fn cellvars(&self) -> &[String];

    /// Names of cells received through the closure
    fn freevars(&self) -> &[String];

    fn flags(&self) -> CodeFlags;

    fn is_generator(&self) -> bool {
        self.flags().contains(CodeFlags::GENERATOR)
    }

    fn nlocals(&self) -> usize {
        self.varnames().len()
    }
}

/// Byte-encoded code object
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub code: Vec<u8>,
    pub arg_count: usize,
    pub varnames: Vec<String>,
    pub names: Vec<String>,
    pub consts: Vec<HostObject>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub flags: CodeFlags,
}

impl Code for Bytecode {
    fn read(&self, pos: usize) -> Result<Instruction, DecodeError> {
        let byte = *self.code.get(pos).ok_or(DecodeError::UnexpectedEnd(pos))?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode { byte, offset: pos })?;
        if !opcode.has_arg() {
            return Ok(Instruction { offset: pos, next: pos + 1, opcode, arg: 0 });
        }
        let bytes = self.code.get(pos + 1..pos + 3).ok_or(DecodeError::UnexpectedEnd(pos + 1))?;
        let arg = u16::from_le_bytes([bytes[0], bytes[1]]) as u32;
        Ok(Instruction { offset: pos, next: pos + 3, opcode, arg })
    }

    fn arg_count(&self) -> usize {
        self.arg_count
    }

    fn varnames(&self) -> &[String] {
        &self.varnames
    }

    fn names(&self) -> &[String] {
        &self.names
    }

    fn consts(&self) -> &[HostObject] {
        &self.consts
    }

    fn cellvars(&self) -> &[String] {
        &self.cellvars
    }

    fn freevars(&self) -> &[String] {
        &self.freevars
    }

    fn flags(&self) -> CodeFlags {
        self.flags
    }
}

/// Decode every instruction of a code object, in order
pub fn disassemble(code: &dyn Code, len: usize) -> Result<Vec<Instruction>, DecodeError> {
    let mut instrs = Vec::new();
    let mut pos = 0;
    while pos < len {
        let instr = code.read(pos)?;
        pos = instr.next;
        instrs.push(instr);
    }
    Ok(instrs)
}
