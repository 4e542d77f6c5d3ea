//! The abstract frame and the instruction driver

use tracing::trace;

use super::context::FlowContext;
use super::framestate::{FrameBlock, FrameBlockKind, FrameState};
use super::{Flow, FlowException, Signal};
use crate::bytecode::{CompareKind, Instruction, Opcode};
use crate::error::{FlowError, FlowResult};
use crate::model::{ExcClass, HostObject, Value};

/// Machine state of the procedure being flowed
#[derive(Debug, Clone)]
pub struct Frame {
    /// Local slots, `None` when unbound
    pub locals: Vec<Option<Value>>,
    pub stack: Vec<Value>,
    /// Exception being handled, if any
    pub last_exception: Option<FlowException>,
    pub blocks: Vec<FrameBlock>,
    /// Offset of the instruction being executed
    pub last_instr: usize,
    /// Contents of the free variables
    pub cells: Vec<HostObject>,
}

impl Frame {
    pub fn new(locals: Vec<Option<Value>>, cells: Vec<HostObject>) -> Self {
        Frame {
            locals,
            stack: Vec::new(),
            last_exception: None,
            blocks: Vec::new(),
            last_instr: 0,
            cells,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> FlowResult<Value> {
        self.stack.pop().ok_or(FlowError::StackUnderflow(self.last_instr))
    }

    /// Value `depth` entries below the top
    pub fn peek(&self, depth: usize) -> FlowResult<Value> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .map(|i| self.stack[i].clone())
            .ok_or(FlowError::StackUnderflow(self.last_instr))
    }

    /// Pop `n` values, returned bottom-first
    pub fn popn(&mut self, n: usize) -> FlowResult<Vec<Value>> {
        let at = self.stack.len().checked_sub(n).ok_or(FlowError::StackUnderflow(self.last_instr))?;
        Ok(self.stack.split_off(at))
    }

    /// Snapshot of the frame at the current instruction boundary
    pub fn getstate(&self) -> FrameState {
        let mut mergeable = self.locals.clone();
        mergeable.extend(self.stack.iter().cloned().map(Some));
        match &self.last_exception {
            Some(exc) => {
                mergeable.push(Some(exc.w_type.clone()));
                mergeable.push(Some(exc.w_value.clone()));
            }
            None => {
                mergeable.push(Some(Value::none()));
                mergeable.push(Some(Value::none()));
            }
        }
        FrameState::new(mergeable, self.blocks.clone(), self.last_instr)
    }

    /// Restore a snapshot taken with `getstate`
    pub fn setstate(&mut self, state: &FrameState) {
        let nlocals = self.locals.len();
        let n = state.mergeable.len();
        assert!(n >= nlocals + 2, "frame state too short for {} locals", nlocals);
        self.locals = state.mergeable[..nlocals].to_vec();
        self.stack = state.mergeable[nlocals..n - 2]
            .iter()
            .map(|slot| match slot {
                Some(value) => value.clone(),
                None => panic!("unbound value on the stack at offset {}", state.next_instr),
            })
            .collect();
        self.last_exception = match (&state.mergeable[n - 2], &state.mergeable[n - 1]) {
            (Some(w_type), _) if w_type.is_none_const() => None,
            (Some(w_type), Some(w_value)) => {
                Some(FlowException {
                    w_type: w_type.clone(),
                    w_value: w_value.clone(),
                    implicit: false,
                })
            }
            _ => panic!("unbound exception slot at offset {}", state.next_instr),
        };
        self.blocks = state.blocks.clone();
        self.last_instr = state.next_instr;
    }
}

impl FlowContext<'_> {
    /// Step through instructions from `next` until a signal stops the walk
    pub(crate) fn run(&mut self, mut next: usize) -> Signal {
        loop {
            match self.handle_bytecode(next) {
                Ok(n) => next = n,
                Err(signal) => return signal,
            }
        }
    }

    fn handle_bytecode(&mut self, next: usize) -> Flow<usize> {
        match self.dispatch_bytecode(next) {
            Err(Signal::Raise(exc)) => self.handle_operation_error(exc),
            other => other,
        }
    }

    /// Execute instructions until one jumps, raises or stops the walk.
    /// Only jumps return `Ok`, with the target offset.
    fn dispatch_bytecode(&mut self, mut next: usize) -> Flow<usize> {
        loop {
            self.frame.last_instr = next;
            self.bytecode_trace()?;
            let instr = self.code.read(next)?;
            trace!(offset = instr.offset, opcode = instr.opcode.name(), arg = instr.arg, "step");
            match self.execute(instr)? {
                Some(target) => return Ok(target),
                None => next = instr.next,
            }
        }
    }

    /// Unwind the block stack to the innermost exception handler
    fn handle_operation_error(&mut self, exc: FlowException) -> Flow<usize> {
        while let Some(block) = self.frame.blocks.pop() {
            self.frame.stack.truncate(block.level);
            if block.kind == FrameBlockKind::Except {
                let w_type = exc.w_type.clone();
                self.frame.push(exc.w_value.clone());
                self.frame.push(w_type);
                self.frame.last_exception = Some(exc);
                return Ok(block.handler);
            }
        }
        Err(Signal::Raise(exc))
    }

    fn name_at(&self, table: &'static str, names: &[String], index: u32) -> FlowResult<String> {
        names
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                FlowError::Unsupported(format!("{} index {} out of range", table, index))
            })
    }

    fn binary(&mut self, name: &'static str) -> Flow<()> {
        let w = self.frame.pop()?;
        let v = self.frame.pop()?;
        let result = self.perform(name, vec![v, w])?;
        self.frame.push(result);
        Ok(())
    }

    fn unary(&mut self, name: &'static str) -> Flow<()> {
        let v = self.frame.pop()?;
        let result = self.perform(name, vec![v])?;
        self.frame.push(result);
        Ok(())
    }

    /// Execute one instruction. Returns the jump target, if it jumps.
    fn execute(&mut self, instr: Instruction) -> Flow<Option<usize>> {
        let arg = instr.arg;
        let relative = instr.next + arg as usize;
        match instr.opcode {
            Opcode::Nop => {}
            Opcode::PopTop => {
                self.frame.pop()?;
            }
            Opcode::RotTwo => {
                let a = self.frame.pop()?;
                let b = self.frame.pop()?;
                self.frame.push(a);
                self.frame.push(b);
            }
            Opcode::RotThree => {
                let a = self.frame.pop()?;
                let b = self.frame.pop()?;
                let c = self.frame.pop()?;
                self.frame.push(a);
                self.frame.push(c);
                self.frame.push(b);
            }
            Opcode::DupTop => {
                let top = self.frame.peek(0)?;
                self.frame.push(top);
            }

            Opcode::UnaryPositive => self.unary("pos")?,
            Opcode::UnaryNegative => self.unary("neg")?,
            Opcode::UnaryInvert => self.unary("invert")?,
            Opcode::UnaryNot => {
                let v = self.frame.pop()?;
                let truth = self.is_true(v)?;
                self.frame.push(Value::Const(HostObject::Bool(!truth)));
            }

            Opcode::BinaryAdd => self.binary("add")?,
            Opcode::BinarySubtract => self.binary("sub")?,
            Opcode::BinaryMultiply => self.binary("mul")?,
            Opcode::BinaryFloorDivide => self.binary("floordiv")?,
            Opcode::BinaryModulo => self.binary("mod")?,
            Opcode::BinaryPower => self.binary("pow")?,
            Opcode::BinaryLshift => self.binary("lshift")?,
            Opcode::BinaryRshift => self.binary("rshift")?,
            Opcode::BinaryAnd => self.binary("and_")?,
            Opcode::BinaryOr => self.binary("or_")?,
            Opcode::BinaryXor => self.binary("xor")?,
            Opcode::BinarySubscr => self.binary("getitem")?,
            Opcode::StoreSubscr => {
                let key = self.frame.pop()?;
                let obj = self.frame.pop()?;
                let value = self.frame.pop()?;
                self.setitem(obj, key, value)?;
            }

            Opcode::GetIter => {
                let v = self.frame.pop()?;
                let it = self.iter(v)?;
                self.frame.push(it);
            }
            Opcode::ForIter => {
                let it = self.frame.peek(0)?;
                match self.next(it) {
                    Ok(item) => self.frame.push(item),
                    Err(Signal::Raise(exc))
                        if !exc.implicit && exc.matches(ExcClass::StopIteration) =>
                    {
                        self.frame.pop()?;
                        return Ok(Some(relative));
                    }
                    Err(signal) => return Err(signal),
                }
            }

            Opcode::ReturnValue => {
                let v = self.frame.pop()?;
                return Err(Signal::Return(v));
            }
            Opcode::YieldValue => {
                if !self.graph.is_generator {
                    let message = "yield outside of a generator".to_string();
                    return Err(FlowError::Unsupported(message).into());
                }
                let v = self.frame.pop()?;
                self.do_operation("yield", vec![v])?;
                self.frame.push(Value::none());
            }
            Opcode::PopBlock => {
                let block = self
                    .frame
                    .blocks
                    .pop()
                    .ok_or(FlowError::NoEnclosingBlock { name: "POP_BLOCK", expected: "setup" })?;
                self.frame.stack.truncate(block.level);
            }
            Opcode::EndFinally => {
                let w_type = self.frame.pop()?;
                if !w_type.is_none_const() {
                    let w_value = self.frame.pop()?;
                    return Err(Signal::Raise(FlowException { w_type, w_value, implicit: false }));
                }
            }
            Opcode::BreakLoop => {
                while let Some(block) = self.frame.blocks.pop() {
                    self.frame.stack.truncate(block.level);
                    if block.kind == FrameBlockKind::Loop {
                        return Ok(Some(block.handler));
                    }
                }
                return Err(FlowError::NoEnclosingBlock { name: "break", expected: "loop" }.into());
            }
            Opcode::ContinueLoop => {
                while let Some(block) = self.frame.blocks.last().copied() {
                    if block.kind == FrameBlockKind::Loop {
                        return Ok(Some(arg as usize));
                    }
                    self.frame.blocks.pop();
                    self.frame.stack.truncate(block.level);
                }
                return Err(
                    FlowError::NoEnclosingBlock { name: "continue", expected: "loop" }.into()
                );
            }
            Opcode::SetupLoop | Opcode::SetupExcept => {
                let kind = match instr.opcode {
                    Opcode::SetupLoop => FrameBlockKind::Loop,
                    _ => FrameBlockKind::Except,
                };
                let level = self.frame.stack.len();
                self.frame.blocks.push(FrameBlock { kind, handler: relative, level });
            }

            Opcode::LoadConst => {
                let value = self
                    .code
                    .consts()
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| {
                        FlowError::Unsupported(format!("constant index {} out of range", arg))
                    })?;
                self.frame.push(Value::Const(value));
            }
            Opcode::LoadFast => {
                let value = match self.frame.locals.get(arg as usize) {
                    Some(Some(value)) => value.clone(),
                    _ => {
                        let name = self.name_at("local", self.code.varnames(), arg)?;
                        return Err(FlowError::UnboundLocal(name).into());
                    }
                };
                self.frame.push(value);
            }
            Opcode::StoreFast => {
                let value = self.frame.pop()?;
                match self.frame.locals.get_mut(arg as usize) {
                    Some(slot) => *slot = Some(value),
                    None => {
                        let message = format!("local index {} out of range", arg);
                        return Err(FlowError::Unsupported(message).into());
                    }
                }
            }
            Opcode::DeleteFast => match self.frame.locals.get_mut(arg as usize) {
                Some(slot @ Some(_)) => *slot = None,
                _ => {
                    let name = self.name_at("local", self.code.varnames(), arg)?;
                    return Err(FlowError::UnboundLocal(name).into());
                }
            },
            Opcode::LoadGlobal => {
                let name = self.name_at("name", self.code.names(), arg)?;
                let value = self.find_global(&name)?;
                self.frame.push(value);
            }
            Opcode::StoreGlobal => {
                let name = self.name_at("name", self.code.names(), arg)?;
                return Err(FlowError::GlobalWrite(name).into());
            }
            Opcode::LoadAttr => {
                let name = self.name_at("name", self.code.names(), arg)?;
                let obj = self.frame.pop()?;
                let value = self.getattr(obj, &name)?;
                self.frame.push(value);
            }
            Opcode::StoreAttr => {
                let name = self.name_at("name", self.code.names(), arg)?;
                let obj = self.frame.pop()?;
                let value = self.frame.pop()?;
                self.setattr(obj, &name, value)?;
            }
            Opcode::LoadDeref => {
                let value = match self.frame.cells.get(arg as usize) {
                    Some(value) => value.clone(),
                    None => {
                        let message = format!("cell index {} out of range", arg);
                        return Err(FlowError::Unsupported(message).into());
                    }
                };
                self.frame.push(Value::Const(value));
            }
            Opcode::StoreDeref => {
                let name = self.cell_name(arg as usize);
                let message = format!("assignment to closure variable '{}'", name);
                return Err(FlowError::Unsupported(message).into());
            }

            Opcode::BuildTuple => {
                let items = self.frame.popn(arg as usize)?;
                let tuple = self.newtuple(items)?;
                self.frame.push(tuple);
            }
            Opcode::BuildList => {
                let items = self.frame.popn(arg as usize)?;
                let list = self.newlist(items)?;
                self.frame.push(list);
            }
            Opcode::UnpackSequence => {
                let v = self.frame.pop()?;
                let items = self.unpack_sequence(v, arg as usize)?;
                for item in items.into_iter().rev() {
                    self.frame.push(item);
                }
            }
            Opcode::CompareOp => {
                let kind = CompareKind::from_u8(arg as u8)
                    .ok_or_else(|| FlowError::Unsupported(format!("comparison {}", arg)))?;
                let w = self.frame.pop()?;
                let v = self.frame.pop()?;
                let result = self.compare(kind, v, w)?;
                self.frame.push(result);
            }
            Opcode::CallFunction => {
                let args = self.frame.popn(arg as usize)?;
                let callee = self.frame.pop()?;
                let result = self.call_function(callee, args)?;
                self.frame.push(result);
            }
            Opcode::RaiseVarargs => match arg {
                0 => {
                    return match self.frame.last_exception.clone() {
                        Some(exc) => Err(Signal::Raise(FlowException { implicit: false, ..exc })),
                        None => {
                            let message = "re-raise outside of an exception handler".to_string();
                            Err(FlowError::Unsupported(message).into())
                        }
                    };
                }
                1 => {
                    let w = self.frame.pop()?;
                    let exc = self.exception_from(w)?;
                    return Err(Signal::Raise(exc));
                }
                _ => {
                    let message = format!("raise with {} operands", arg);
                    return Err(FlowError::Unsupported(message).into());
                }
            },
            Opcode::ImportName => {
                let name = self.name_at("name", self.code.names(), arg)?;
                let module = self.import_name(&name)?;
                self.frame.push(module);
            }
            Opcode::ImportFrom => {
                let name = self.name_at("name", self.code.names(), arg)?;
                let module = self.frame.peek(0)?;
                let value = self.import_from(module, &name)?;
                self.frame.push(value);
            }

            Opcode::JumpForward => return Ok(Some(relative)),
            Opcode::JumpAbsolute => return Ok(Some(arg as usize)),
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let v = self.frame.pop()?;
                let truth = self.is_true(v)?;
                if truth == (instr.opcode == Opcode::PopJumpIfTrue) {
                    return Ok(Some(arg as usize));
                }
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                let v = self.frame.peek(0)?;
                let truth = self.is_true(v)?;
                if truth == (instr.opcode == Opcode::JumpIfTrueOrPop) {
                    return Ok(Some(arg as usize));
                }
                self.frame.pop()?;
            }
        }
        Ok(None)
    }

    fn compare(&mut self, kind: CompareKind, v: Value, w: Value) -> Flow<Value> {
        let op = match kind {
            CompareKind::Lt => "lt",
            CompareKind::Le => "le",
            CompareKind::Eq => "eq",
            CompareKind::Ne => "ne",
            CompareKind::Gt => "gt",
            CompareKind::Ge => "ge",
            CompareKind::Is => "is_",
            CompareKind::In => return self.perform("contains", vec![w, v]),
            CompareKind::NotIn => {
                let contained = self.perform("contains", vec![w, v])?;
                let truth = self.is_true(contained)?;
                return Ok(Value::Const(HostObject::Bool(!truth)));
            }
            CompareKind::IsNot => {
                let same = self.perform("is_", vec![v, w])?;
                let truth = self.is_true(same)?;
                return Ok(Value::Const(HostObject::Bool(!truth)));
            }
            CompareKind::ExcMatch => {
                let matched = self.exception_match(v, w)?;
                return Ok(Value::Const(HostObject::Bool(matched)));
            }
        };
        self.perform(op, vec![v, w])
    }

    fn cell_name(&self, index: usize) -> String {
        match self.code.freevars().get(index) {
            Some(name) => name.clone(),
            None => format!("<cell {}>", index),
        }
    }
}
