//! Bytecode assembler
//!
//! Utilities for constructing `Bytecode` by hand: named locals, interned
//! names and constants, and forward labels patched when the code is
//! finished.

use super::decoder::{Bytecode, CodeFlags};
use super::opcode::{CompareKind, Opcode};
use crate::model::HostObject;

/// A jump target, bound to an offset with `CodeBuilder::bind`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Builder that simplifies `Bytecode` construction
pub struct CodeBuilder {
    code: Vec<u8>,
    arg_count: usize,
    varnames: Vec<String>,
    names: Vec<String>,
    consts: Vec<HostObject>,
    freevars: Vec<String>,
    flags: CodeFlags,
    labels: Vec<Option<usize>>,
    /// (offset of the argument, label, offset the jump is relative to)
    fixups: Vec<(usize, Label, Option<usize>)>,
}

impl CodeBuilder {
    /// Create a builder for a procedure taking `args` positional arguments
    pub fn new(args: &[&str]) -> Self {
        CodeBuilder {
            code: Vec::new(),
            arg_count: args.len(),
            varnames: args.iter().map(|s| s.to_string()).collect(),
            names: Vec::new(),
            consts: Vec::new(),
            freevars: Vec::new(),
            flags: CodeFlags::NEWLOCALS,
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Override the code flags
    pub fn flags(&mut self, flags: CodeFlags) -> &mut Self {
        self.flags = flags;
        self
    }

    /// Declare a free variable received through the closure
    pub fn freevar(&mut self, name: &str) -> u32 {
        self.freevars.push(name.to_string());
        (self.freevars.len() - 1) as u32
    }

    /// Current offset
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Emit an opcode without argument
    pub fn emit(&mut self, opcode: Opcode) -> &mut Self {
        assert!(!opcode.has_arg(), "{} takes an argument", opcode.name());
        self.code.push(opcode.to_u8());
        self
    }

    /// Emit an opcode with its argument
    pub fn emit_arg(&mut self, opcode: Opcode, arg: u16) -> &mut Self {
        assert!(opcode.has_arg(), "{} takes no argument", opcode.name());
        self.code.push(opcode.to_u8());
        self.code.extend_from_slice(&arg.to_le_bytes());
        self
    }

    fn local(&mut self, name: &str) -> u16 {
        let index = match self.varnames.iter().position(|n| n == name) {
            Some(i) => i,
            None => {
                self.varnames.push(name.to_string());
                self.varnames.len() - 1
            }
        };
        index as u16
    }

    fn name(&mut self, name: &str) -> u16 {
        let index = match self.names.iter().position(|n| n == name) {
            Some(i) => i,
            None => {
                self.names.push(name.to_string());
                self.names.len() - 1
            }
        };
        index as u16
    }

    fn constant(&mut self, value: HostObject) -> u16 {
        let index = match self.consts.iter().position(|c| *c == value) {
            Some(i) => i,
            None => {
                self.consts.push(value);
                self.consts.len() - 1
            }
        };
        index as u16
    }

    pub fn load_const(&mut self, value: HostObject) -> &mut Self {
        let index = self.constant(value);
        self.emit_arg(Opcode::LoadConst, index)
    }

    pub fn load_int(&mut self, value: i64) -> &mut Self {
        self.load_const(HostObject::Int(value))
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.emit_arg(Opcode::LoadFast, index)
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.emit_arg(Opcode::StoreFast, index)
    }

    pub fn delete_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.emit_arg(Opcode::DeleteFast, index)
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit_arg(Opcode::LoadGlobal, index)
    }

    pub fn store_global(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit_arg(Opcode::StoreGlobal, index)
    }

    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit_arg(Opcode::LoadAttr, index)
    }

    pub fn store_attr(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit_arg(Opcode::StoreAttr, index)
    }

    pub fn import_name(&mut self, module: &str) -> &mut Self {
        let index = self.name(module);
        self.emit_arg(Opcode::ImportName, index)
    }

    pub fn import_from(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit_arg(Opcode::ImportFrom, index)
    }

    pub fn compare(&mut self, kind: CompareKind) -> &mut Self {
        self.emit_arg(Opcode::CompareOp, kind as u16)
    }

    pub fn call(&mut self, nargs: u16) -> &mut Self {
        self.emit_arg(Opcode::CallFunction, nargs)
    }

    /// Create an unbound label
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset
    pub fn bind(&mut self, label: Label) -> &mut Self {
        assert!(self.labels[label.0].is_none(), "label bound twice");
        self.labels[label.0] = Some(self.code.len());
        self
    }

    /// Emit a jump-like instruction targeting `label`
    pub fn jump(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        let relative = if opcode.has_relative_jump() {
            Some(self.code.len() + 3)
        } else {
            assert!(opcode.has_absolute_jump(), "{} does not jump", opcode.name());
            None
        };
        self.code.push(opcode.to_u8());
        self.fixups.push((self.code.len(), label, relative));
        self.code.extend_from_slice(&[0, 0]);
        self
    }

    /// Patch every jump and produce the code object
    pub fn finish(mut self) -> Bytecode {
        for (at, label, relative) in std::mem::take(&mut self.fixups) {
            let target = match self.labels[label.0] {
                Some(target) => target,
                None => panic!("unbound label {:?}", label),
            };
            let arg = match relative {
                Some(base) => target - base,
                None => target,
            };
            let bytes = (arg as u16).to_le_bytes();
            self.code[at] = bytes[0];
            self.code[at + 1] = bytes[1];
        }
        Bytecode {
            code: self.code,
            arg_count: self.arg_count,
            varnames: self.varnames,
            names: self.names,
            consts: self.consts,
            cellvars: Vec::new(),
            freevars: self.freevars,
            flags: self.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Code;

    #[test]
    fn test_locals_and_constants_are_interned() {
        let mut b = CodeBuilder::new(&["a"]);
        b.load_fast("a").store_fast("x").load_fast("x").load_int(1).load_int(1);
        let code = b.finish();
        assert_eq!(code.varnames, vec!["a".to_string(), "x".to_string()]);
        assert_eq!(code.consts, vec![HostObject::Int(1)]);
        assert_eq!(code.arg_count(), 1);
    }

    #[test]
    fn test_labels_patch_relative_and_absolute() {
        let mut b = CodeBuilder::new(&[]);
        let top = b.new_label();
        let end = b.new_label();
        b.bind(top);
        b.load_int(0);
        b.jump(Opcode::PopJumpIfFalse, end);
        b.jump(Opcode::JumpForward, end);
        b.bind(end);
        b.jump(Opcode::JumpAbsolute, top);
        let code = b.finish();
        let cond = code.read(3).unwrap();
        assert_eq!(cond.opcode, Opcode::PopJumpIfFalse);
        assert_eq!(cond.arg, 9);
        let fwd = code.read(6).unwrap();
        assert_eq!(fwd.arg, 0);
        let back = code.read(9).unwrap();
        assert_eq!(back.arg, 0);
    }
}
