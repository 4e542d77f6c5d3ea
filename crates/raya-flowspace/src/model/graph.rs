//! Flow graph data model
//!
//! Variables, constants, operations, blocks and links. Blocks live in an
//! arena owned by the `Graph` and are addressed by `BlockId`.

use rustc_hash::FxHashMap;

use super::value::{ExcClass, HostObject};
use crate::flow::framestate::FrameState;

/// A name for a value only known at run time. Compared by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(pub u32);

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Block identifier (index into the graph's block arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// An operand: either a run-time variable or a known constant
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Var(Variable),
    Const(HostObject),
}

impl Value {
    pub fn none() -> Self {
        Value::Const(HostObject::None)
    }

    pub fn as_var(&self) -> Option<Variable> {
        match self {
            Value::Var(v) => Some(*v),
            Value::Const(_) => None,
        }
    }

    pub fn as_const(&self) -> Option<&HostObject> {
        match self {
            Value::Const(c) => Some(c),
            Value::Var(_) => None,
        }
    }

    /// The constant payload, if this is a constant that may be folded
    pub fn foldable(&self) -> Option<&HostObject> {
        self.as_const().filter(|c| c.is_foldable())
    }

    pub fn is_none_const(&self) -> bool {
        matches!(self, Value::Const(HostObject::None))
    }
}

impl From<Variable> for Value {
    fn from(v: Variable) -> Self {
        Value::Var(v)
    }
}

impl From<HostObject> for Value {
    fn from(c: HostObject) -> Self {
        Value::Const(c)
    }
}

/// A primitive operation `result = name(args...)`
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: &'static str,
    pub args: Vec<Value>,
    pub result: Variable,
    /// Bytecode offset of the instruction that produced it
    pub offset: usize,
}

/// Discriminant of a link leaving a forking block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCase {
    Bool(bool),
    Exception(ExcClass),
}

/// What a forking block switches on
#[derive(Debug, Clone, PartialEq)]
pub enum ExitSwitch {
    /// Truth value of a variable
    Value(Value),
    /// Whether (and what) the last operation raised
    LastException,
}

/// Edge between blocks
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub args: Vec<Value>,
    pub target: BlockId,
    pub exitcase: Option<ExitCase>,
    /// Exception type made available by an exception edge
    pub last_exception: Option<Value>,
    /// Exception value made available by an exception edge
    pub last_exc_value: Option<Variable>,
}

impl Link {
    pub fn new(args: Vec<Value>, target: BlockId) -> Self {
        Link { args, target, exitcase: None, last_exception: None, last_exc_value: None }
    }

    pub fn with_exitcase(mut self, case: ExitCase) -> Self {
        self.exitcase = Some(case);
        self
    }

    /// Variables this link defines itself rather than reading from its source
    pub fn extravars(&self) -> impl Iterator<Item = Variable> + '_ {
        self.last_exception
            .as_ref()
            .and_then(Value::as_var)
            .into_iter()
            .chain(self.last_exc_value)
    }
}

/// Outcome of a fork, as committed for one secondary block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Bool(bool),
    NoException,
    Exception(ExcClass),
}

impl Outcome {
    pub fn exitcase(self) -> Option<ExitCase> {
        match self {
            Outcome::Bool(b) => Some(ExitCase::Bool(b)),
            Outcome::NoException => None,
            Outcome::Exception(c) => Some(ExitCase::Exception(c)),
        }
    }
}

/// Block kinds
#[derive(Debug, Clone)]
pub enum BlockKind {
    /// Start block or merge point. Owns a state snapshot until finalization.
    Primary { state: Option<FrameState>, dead: bool },
    /// Produced by a fork of `parent`
    Secondary {
        parent: BlockId,
        outcome: Outcome,
        last_exception: Option<Value>,
    },
    /// The graph's return or exception block
    Final,
}

/// A basic block
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub inputs: Vec<Variable>,
    pub operations: Vec<Operation>,
    pub exitswitch: Option<ExitSwitch>,
    pub exits: Vec<Link>,
    pub kind: BlockKind,
}

impl Block {
    pub fn is_primary(&self) -> bool {
        matches!(self.kind, BlockKind::Primary { .. })
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.kind, BlockKind::Primary { dead: true, .. })
    }

    pub fn is_closed(&self) -> bool {
        !self.exits.is_empty()
    }

    pub fn state(&self) -> Option<&FrameState> {
        match &self.kind {
            BlockKind::Primary { state, .. } => state.as_ref(),
            _ => None,
        }
    }

    /// Inputs followed by every operation result, in definition order
    pub fn variables(&self) -> Vec<Variable> {
        let mut vars = self.inputs.clone();
        vars.extend(self.operations.iter().map(|op| op.result));
        vars
    }

    pub(crate) fn close(&mut self, exits: Vec<Link>) {
        assert!(!self.is_closed(), "{} is already closed", self.id);
        self.exits = exits;
    }

    /// Substitute variables everywhere in the block
    pub(crate) fn rename(&mut self, mapping: &FxHashMap<Variable, Variable>) {
        let rename_var = |v: &mut Variable| {
            if let Some(n) = mapping.get(v) {
                *v = *n;
            }
        };
        let rename_value = |value: &mut Value| {
            if let Value::Var(v) = value {
                if let Some(n) = mapping.get(v) {
                    *v = *n;
                }
            }
        };
        self.inputs.iter_mut().for_each(rename_var);
        for op in &mut self.operations {
            op.args.iter_mut().for_each(rename_value);
            rename_var(&mut op.result);
        }
        if let Some(ExitSwitch::Value(value)) = &mut self.exitswitch {
            rename_value(value);
        }
        for link in &mut self.exits {
            link.args.iter_mut().for_each(rename_value);
        }
    }

    /// Replace variables by values in operands, the exit switch and link
    /// arguments. Inputs are left alone.
    pub(crate) fn substitute(&mut self, mapping: &FxHashMap<Variable, Value>) {
        let substitute_value = |value: &mut Value| {
            if let Some(new) = value.as_var().and_then(|v| mapping.get(&v)) {
                *value = new.clone();
            }
        };
        for op in &mut self.operations {
            op.args.iter_mut().for_each(substitute_value);
        }
        if let Some(ExitSwitch::Value(value)) = &mut self.exitswitch {
            substitute_value(value);
        }
        for link in &mut self.exits {
            link.args.iter_mut().for_each(substitute_value);
        }
    }
}

/// Allocator for fresh variables
#[derive(Debug, Default, Clone)]
pub struct VarGen {
    next: u32,
}

impl VarGen {
    pub fn fresh(&mut self) -> Variable {
        let v = Variable(self.next);
        self.next += 1;
        v
    }

    pub fn count(&self) -> u32 {
        self.next
    }
}

/// Signature of the procedure a graph was built from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    pub argnames: Vec<String>,
    pub defaults: Vec<HostObject>,
}

/// A finished (or under construction) control-flow graph
#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    pub signature: Signature,
    pub is_generator: bool,
    pub blocks: Vec<Block>,
    pub start: BlockId,
    pub return_block: BlockId,
    pub except_block: BlockId,
    pub vars: VarGen,
    var_names: FxHashMap<Variable, String>,
}

impl Graph {
    /// Create a graph whose start block has the given inputs
    pub fn new(name: String, signature: Signature) -> Self {
        let mut graph = Graph {
            name,
            signature,
            is_generator: false,
            blocks: Vec::new(),
            start: BlockId(0),
            return_block: BlockId(0),
            except_block: BlockId(0),
            vars: VarGen::default(),
            var_names: FxHashMap::default(),
        };
        let result = graph.vars.fresh();
        graph.return_block = graph.add_block(vec![result], BlockKind::Final);
        let etype = graph.vars.fresh();
        let evalue = graph.vars.fresh();
        graph.except_block = graph.add_block(vec![etype, evalue], BlockKind::Final);
        graph
    }

    pub fn add_block(&mut self, inputs: Vec<Variable>, kind: BlockKind) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            inputs,
            operations: Vec::new(),
            exitswitch: None,
            exits: Vec::new(),
            kind,
        });
        id
    }

    /// Add a primary block owning `state`; its inputs are the state's variables
    pub fn add_primary(&mut self, state: FrameState) -> BlockId {
        let inputs = state.variables();
        self.add_block(inputs, BlockKind::Primary { state: Some(state), dead: false })
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn fresh_var(&mut self) -> Variable {
        self.vars.fresh()
    }

    /// Attach a display name to a variable
    pub fn name_variable(&mut self, var: Variable, name: &str) {
        self.var_names.insert(var, name.to_string());
    }

    pub fn variable_name(&self, var: Variable) -> Option<&str> {
        self.var_names.get(&var).map(String::as_str)
    }

    /// Blocks reachable from the start block, in depth-first discovery order
    pub fn iter_blocks(&self) -> Vec<BlockId> {
        let mut seen = vec![false; self.blocks.len()];
        let mut order = Vec::new();
        let mut stack = vec![self.start];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.0 as usize], true) {
                continue;
            }
            order.push(id);
            for link in self.block(id).exits.iter().rev() {
                if !seen[link.target.0 as usize] {
                    stack.push(link.target);
                }
            }
        }
        order
    }

    /// Every link leaving a reachable block, as (source, exit index)
    pub fn iter_links(&self) -> Vec<(BlockId, usize)> {
        self.iter_blocks()
            .into_iter()
            .flat_map(|id| (0..self.block(id).exits.len()).map(move |i| (id, i)))
            .collect()
    }

    /// Reachable blocks other than the return and exception blocks
    pub fn interior_blocks(&self) -> Vec<BlockId> {
        self.iter_blocks()
            .into_iter()
            .filter(|&id| id != self.return_block && id != self.except_block)
            .collect()
    }

    /// Total number of operations in reachable blocks
    pub fn operation_count(&self) -> usize {
        self.iter_blocks().iter().map(|&id| self.block(id).operations.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_graph_layout() {
        let graph = Graph::new("f".to_string(), Signature::default());
        assert_eq!(graph.block(graph.return_block).inputs.len(), 1);
        assert_eq!(graph.block(graph.except_block).inputs.len(), 2);
        assert_eq!(graph.vars.count(), 3);
    }

    #[test]
    fn test_iter_blocks_follows_links() {
        let mut graph = Graph::new("f".to_string(), Signature::default());
        let a = graph.add_block(vec![], BlockKind::Primary { state: None, dead: false });
        let orphan = graph.add_block(vec![], BlockKind::Primary { state: None, dead: false });
        graph.start = a;
        let ret = graph.return_block;
        graph.block_mut(a).close(vec![Link::new(vec![Value::Const(HostObject::Int(1))], ret)]);
        let blocks = graph.iter_blocks();
        assert_eq!(blocks, vec![a, ret]);
        assert!(!blocks.contains(&orphan));
        assert_eq!(graph.iter_links(), vec![(a, 0)]);
        assert_eq!(graph.interior_blocks(), vec![a]);
    }

    #[test]
    fn test_rename_block() {
        let mut graph = Graph::new("f".to_string(), Signature::default());
        let x = graph.fresh_var();
        let y = graph.fresh_var();
        let b = graph.add_block(vec![x], BlockKind::Primary { state: None, dead: false });
        graph.block_mut(b).operations.push(Operation {
            name: "neg",
            args: vec![Value::Var(x)],
            result: y,
            offset: 0,
        });
        let ret = graph.return_block;
        graph.block_mut(b).close(vec![Link::new(vec![Value::Var(y)], ret)]);
        let fresh = graph.fresh_var();
        let mut mapping = FxHashMap::default();
        mapping.insert(x, fresh);
        graph.block_mut(b).rename(&mapping);
        let block = graph.block(b);
        assert_eq!(block.inputs, vec![fresh]);
        assert_eq!(block.operations[0].args, vec![Value::Var(fresh)]);
        assert_eq!(block.exits[0].args, vec![Value::Var(y)]);
    }
}
