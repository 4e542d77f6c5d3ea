//! Frame state snapshots
//!
//! A `FrameState` flattens the abstract machine into a list of mergeable
//! slots (locals, operand stack, exception type and value) plus a
//! non-mergeable part (block stack and instruction position) that must match
//! exactly for two states to share a block.

use crate::model::{Value, VarGen, Variable};

/// Kind of an entry on the frame's block stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameBlockKind {
    Loop,
    Except,
}

/// Block-stack entry pushed by `SETUP_LOOP` / `SETUP_EXCEPT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameBlock {
    pub kind: FrameBlockKind,
    /// Jump target when the block is unwound
    pub handler: usize,
    /// Operand stack depth at setup
    pub level: usize,
}

/// Snapshot of the abstract frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    /// Locals, then the operand stack, then exception type and value.
    /// `None` marks an unbound local.
    pub mergeable: Vec<Option<Value>>,
    pub blocks: Vec<FrameBlock>,
    pub next_instr: usize,
}

impl FrameState {
    pub fn new(mergeable: Vec<Option<Value>>, blocks: Vec<FrameBlock>, next_instr: usize) -> Self {
        FrameState { mergeable, blocks, next_instr }
    }

    /// Variables in slot order; these become a primary block's inputs
    pub fn variables(&self) -> Vec<Variable> {
        self.mergeable.iter().flatten().filter_map(Value::as_var).collect()
    }

    /// Copy in which every variable is replaced by a fresh one
    pub fn copy_fresh(&self, vars: &mut VarGen) -> FrameState {
        let mergeable = self
            .mergeable
            .iter()
            .map(|slot| match slot {
                Some(Value::Var(_)) => Some(Value::Var(vars.fresh())),
                other => other.clone(),
            })
            .collect();
        FrameState::new(mergeable, self.blocks.clone(), self.next_instr)
    }

    /// Equality where any two variables are interchangeable
    pub fn matches(&self, other: &FrameState) -> bool {
        self.blocks == other.blocks
            && self.next_instr == other.next_instr
            && self.mergeable.len() == other.mergeable.len()
            && self.mergeable.iter().zip(&other.mergeable).all(|(a, b)| match (a, b) {
                (Some(Value::Var(_)), Some(Value::Var(_))) => true,
                _ => a == b,
            })
    }

    /// Most specific state both `self` and `other` are instances of.
    ///
    /// Returns `None` when the non-mergeable parts differ. Slots holding the
    /// same constant keep it, unbound locals stay unbound, everything else
    /// is widened to a fresh variable.
    pub fn union(&self, other: &FrameState, vars: &mut VarGen) -> Option<FrameState> {
        if self.blocks != other.blocks || self.next_instr != other.next_instr {
            return None;
        }
        assert_eq!(
            self.mergeable.len(),
            other.mergeable.len(),
            "states at offset {} disagree on stack depth",
            self.next_instr
        );
        let mergeable = self
            .mergeable
            .iter()
            .zip(&other.mergeable)
            .map(|(a, b)| match (a, b) {
                (None, _) | (_, None) => None,
                (Some(Value::Const(x)), Some(Value::Const(y))) if x == y => {
                    Some(Value::Const(x.clone()))
                }
                _ => Some(Value::Var(vars.fresh())),
            })
            .collect();
        Some(FrameState::new(mergeable, self.blocks.clone(), self.next_instr))
    }

    /// Link arguments carrying `self` into a block whose state is `target`:
    /// our value for every slot that is a variable in `target`.
    pub fn output_args(&self, target: &FrameState) -> Vec<Value> {
        assert_eq!(self.mergeable.len(), target.mergeable.len(), "state shape mismatch");
        self.mergeable
            .iter()
            .zip(&target.mergeable)
            .filter(|(_, t)| matches!(t, Some(Value::Var(_))))
            .map(|(s, _)| match s {
                Some(value) => value.clone(),
                None => {
                    panic!("unbound slot flows into a variable at offset {}", target.next_instr)
                }
            })
            .collect()
    }
}
