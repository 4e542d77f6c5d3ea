//! Flow graph construction
//!
//! `FlowSpace` is the entry point. It creates a `FlowContext` per
//! procedure, which flows pending blocks until none are left, merging
//! frame states that reach the same instruction, and finally tidies the
//! graph.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::{debug, info, trace};

use super::frame::Frame;
use super::framestate::FrameState;
use super::recorder::Recorder;
use super::specialcase::SpecialCases;
use super::Signal;
use crate::bytecode::{Code, CodeFlags};
use crate::config::FlowConfig;
use crate::error::{BuildError, FlowError};
use crate::host::HostFunction;
use crate::model::{
    check_graph, Block, BlockId, BlockKind, ExcClass, Graph, HostObject, Link, Signature, Value,
    Variable,
};

/// Builds flow graphs
#[derive(Debug, Clone, Default)]
pub struct FlowSpace {
    config: FlowConfig,
    special_cases: SpecialCases,
}

impl FlowSpace {
    pub fn new(config: FlowConfig) -> Self {
        FlowSpace { config, special_cases: SpecialCases::default() }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn special_cases(&self) -> &SpecialCases {
        &self.special_cases
    }

    /// Special-case registry, for adding handlers
    pub fn special_cases_mut(&mut self) -> &mut SpecialCases {
        &mut self.special_cases
    }

    /// Build the flow graph of `func`
    pub fn build_flow(&self, func: &HostFunction) -> Result<Graph, BuildError> {
        self.build_flow_with_constargs(func, &[])
    }

    /// Build the flow graph of `func` with some positional arguments fixed
    /// to constants
    pub fn build_flow_with_constargs(
        &self,
        func: &HostFunction,
        constargs: &[(usize, HostObject)],
    ) -> Result<Graph, BuildError> {
        let mut ctx = FlowContext::new(self, func, constargs)?;
        ctx.build_flow()?;
        ctx.fix_secondary_blocks();
        let graph = ctx.graph;
        if self.config.check_graph {
            if let Err(e) = check_graph(&graph) {
                panic!("malformed flow graph {}: {}", graph.name, e);
            }
        }
        info!(
            graph = %graph.name,
            blocks = graph.iter_blocks().len(),
            operations = graph.operation_count(),
            "flow graph built"
        );
        Ok(graph)
    }
}

/// State of one graph construction
pub struct FlowContext<'a> {
    pub(crate) config: &'a FlowConfig,
    pub(crate) special_cases: &'a SpecialCases,
    pub(crate) func: &'a HostFunction,
    pub(crate) code: &'a dyn Code,
    pub(crate) graph: Graph,
    pub(crate) frame: Frame,
    pub(crate) recorder: Recorder,
    /// Blocks waiting to be flowed, oldest first
    pub(crate) pending: VecDeque<BlockId>,
    /// Primary blocks by the offset they start at, newest first
    joinpoints: FxHashMap<usize, Vec<BlockId>>,
}

impl<'a> FlowContext<'a> {
    fn new(
        space: &'a FlowSpace,
        func: &'a HostFunction,
        constargs: &[(usize, HostObject)],
    ) -> Result<Self, BuildError> {
        let code: &'a dyn Code = &*func.code;
        let name = func.graph_name();
        let setup_error = |error| BuildError::new(&name, None, 0, error);

        if !code.flags().contains(CodeFlags::NEWLOCALS) {
            return Err(setup_error(FlowError::MissingNewLocals));
        }
        if !code.cellvars().is_empty() {
            return Err(setup_error(FlowError::CreatesClosure(code.cellvars().join(", "))));
        }
        if func.closure.len() != code.freevars().len() {
            return Err(setup_error(FlowError::ClosureMismatch {
                expected: code.freevars().len(),
                got: func.closure.len(),
            }));
        }

        let argcount = code.arg_count();
        let signature = Signature {
            argnames: code.varnames().iter().take(argcount).cloned().collect(),
            defaults: func.defaults.clone(),
        };
        let mut graph = Graph::new(name.clone(), signature);
        graph.is_generator = code.is_generator();

        let mut locals: Vec<Option<Value>> = (0..code.nlocals())
            .map(|i| if i < argcount { Some(Value::Var(graph.fresh_var())) } else { None })
            .collect();
        for (position, value) in constargs {
            if *position >= argcount {
                return Err(setup_error(FlowError::BadConstArg { position: *position, argcount }));
            }
            locals[*position] = Some(Value::Const(value.clone()));
        }

        let frame = Frame::new(locals, func.closure.clone());
        graph.start = graph.add_primary(frame.getstate());
        let mut pending = VecDeque::new();
        pending.push_back(graph.start);

        Ok(FlowContext {
            config: &space.config,
            special_cases: &space.special_cases,
            func,
            code,
            graph,
            frame,
            recorder: Recorder::Idle,
            pending,
            joinpoints: FxHashMap::default(),
        })
    }

    /// The graph under construction
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The abstract frame
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    fn build_flow(&mut self) -> Result<(), BuildError> {
        while let Some(block) = self.pending.pop_front() {
            let (recorder, root) = match self.recording(block) {
                Some(found) => found,
                None => {
                    trace!(%block, "skipping block of a merged-away parent");
                    continue;
                }
            };
            self.recorder = recorder;
            let offset = self.frame.last_instr;
            debug!(graph = %self.graph.name, %block, offset, "flowing block");
            let signal = self.flow_block(root);
            self.handle_signal(signal)?;
        }
        self.recorder = Recorder::Idle;
        Ok(())
    }

    fn flow_block(&mut self, root: BlockId) -> Signal {
        if root == self.graph.start && self.graph.is_generator {
            if let Err(signal) = self.do_operation("generator_mark", Vec::new()) {
                return signal;
            }
        }
        self.run(self.frame.last_instr)
    }

    fn handle_signal(&mut self, signal: Signal) -> Result<(), BuildError> {
        let current = self.recorder.current_block();
        let block = match signal {
            Signal::Fork(_) => return Ok(()),
            Signal::Fatal(error) => {
                let offset = self.frame.last_instr;
                return Err(BuildError::new(&self.graph.name, current, offset, error));
            }
            _ => match &self.recorder {
                Recorder::Block(r) => r.block,
                _ => panic!("walk ended while replaying {:?}", current),
            },
        };
        match signal {
            Signal::Merge(state) => self.merge_block(block, state),
            Signal::Return(value) => {
                let target = self.graph.return_block;
                self.graph.block_mut(block).close(vec![Link::new(vec![value], target)]);
            }
            Signal::Raise(exc) => {
                let (w_type, w_value) = if exc.implicit {
                    let name = exc.class().map_or("Exception", ExcClass::name);
                    let message = format!("implicit {} shouldn't occur", name);
                    let w_value = HostObject::ExcValue(ExcClass::AssertionError, message.into());
                    let w_type = HostObject::ExcClass(ExcClass::AssertionError);
                    (Value::Const(w_type), Value::Const(w_value))
                } else if exc.class() == Some(ExcClass::ImportError) {
                    let message = match &exc.w_value {
                        Value::Const(HostObject::ExcValue(_, message)) => message.to_string(),
                        _ => ExcClass::ImportError.name().to_string(),
                    };
                    return Err(BuildError::new(
                        &self.graph.name,
                        Some(block),
                        self.frame.last_instr,
                        FlowError::ImportAlwaysRaises(message),
                    ));
                } else {
                    (exc.w_type, exc.w_value)
                };
                let target = self.graph.except_block;
                self.graph.block_mut(block).close(vec![Link::new(vec![w_type, w_value], target)]);
            }
            Signal::Fork(_) | Signal::Fatal(_) => unreachable!(),
        }
        Ok(())
    }

    /// Close `current` with a link into a primary block for `state`, reusing
    /// or generalizing an existing block at the same offset
    fn merge_block(&mut self, current: BlockId, state: FrameState) {
        let pos = state.next_instr;
        let candidates = self.joinpoints.entry(pos).or_default().clone();
        let mut target = None;
        for (i, &candidate) in candidates.iter().enumerate() {
            let old_state = match self.graph.block(candidate).state() {
                Some(s) => s.clone(),
                None => continue,
            };
            let Some(union) = old_state.union(&state, &mut self.graph.vars) else {
                continue;
            };
            if union.matches(&old_state) {
                debug!(%current, %candidate, offset = pos, "merged into existing block");
                target = Some((candidate, old_state));
                break;
            }
            let new_block = self.graph.add_primary(union.clone());
            debug!(%current, old = %candidate, new = %new_block, offset = pos, "generalized block");
            // A block looping back to itself is still being flowed: it
            // simply links to the generalized block
            if candidate != current {
                self.retire(candidate, &old_state, new_block, &union);
            }
            let list = self.joinpoints.entry(pos).or_default();
            list.remove(i);
            list.insert(0, new_block);
            self.pending.push_back(new_block);
            target = Some((new_block, union));
            break;
        }

        let (target, target_state) = match target {
            Some(found) => found,
            None => {
                let fresh = state.copy_fresh(&mut self.graph.vars);
                let new_block = self.graph.add_primary(fresh.clone());
                debug!(%current, new = %new_block, offset = pos, "new join point");
                self.joinpoints.entry(pos).or_default().insert(0, new_block);
                self.pending.push_back(new_block);
                (new_block, fresh)
            }
        };
        let args = state.output_args(&target_state);
        self.graph.block_mut(current).close(vec![Link::new(args, target)]);
    }

    /// Turn a superseded primary block into a forwarder to its replacement
    fn retire(
        &mut self,
        old: BlockId,
        old_state: &FrameState,
        new: BlockId,
        new_state: &FrameState,
    ) {
        let args = old_state.output_args(new_state);
        let block = self.graph.block_mut(old);
        if let BlockKind::Primary { dead, .. } = &mut block.kind {
            *dead = true;
        }
        block.operations.clear();
        block.exitswitch = None;
        block.exits.clear();
        block.close(vec![Link::new(args, new)]);
    }

    /// Simplify the graph once it is complete.
    ///
    /// A secondary block that does nothing but pass its inputs on is
    /// bypassed, and straight-line chains are joined when configured. The
    /// remaining secondary blocks share their inputs with their parent; they
    /// get fresh variables so that every variable is defined in one block.
    /// Frame states are no longer needed afterwards.
    fn fix_secondary_blocks(&mut self) {
        for (src, i) in self.graph.iter_links() {
            let link = &self.graph.block(src).exits[i];
            let target = self.graph.block(link.target);
            if !matches!(target.kind, BlockKind::Secondary { .. }) {
                continue;
            }
            let passes_through = target.operations.is_empty()
                && target.exits.len() == 1
                && target.exitswitch.is_none()
                && link.args.len() == target.inputs.len()
                && link.args.iter().zip(&target.inputs).all(|(a, &v)| *a == Value::Var(v));
            if passes_through {
                let exit = target.exits[0].clone();
                let link = &mut self.graph.block_mut(src).exits[i];
                link.args = exit.args;
                link.target = exit.target;
            }
        }

        if self.config.join_blocks {
            self.join_blocks();
        }

        for id in self.graph.iter_blocks() {
            if !matches!(self.graph.block(id).kind, BlockKind::Secondary { .. }) {
                continue;
            }
            let inputs = self.graph.block(id).inputs.clone();
            let mapping: FxHashMap<Variable, Variable> =
                inputs.into_iter().map(|v| (v, self.graph.vars.fresh())).collect();
            self.graph.block_mut(id).rename(&mapping);
        }

        for block in &mut self.graph.blocks {
            if let BlockKind::Primary { state, .. } = &mut block.kind {
                *state = None;
            }
        }
    }

    /// Append every block entered from a single unconditional link to its
    /// predecessor, substituting the link arguments for its inputs.
    fn join_blocks(&mut self) {
        let mut entries: FxHashMap<BlockId, usize> = FxHashMap::default();
        for (src, i) in self.graph.iter_links() {
            *entries.entry(self.graph.block(src).exits[i].target).or_insert(0) += 1;
        }

        let mut absorbed: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        for id in self.graph.iter_blocks() {
            if absorbed.contains_key(&id) {
                continue;
            }
            loop {
                let block = self.graph.block(id);
                if block.exitswitch.is_some() || block.exits.len() != 1 {
                    break;
                }
                let link = block.exits[0].clone();
                let target = self.graph.block(link.target);
                if link.target == id
                    || link.target == self.graph.start
                    || matches!(target.kind, BlockKind::Final)
                    || entries.get(&link.target) != Some(&1)
                {
                    break;
                }
                let mapping: FxHashMap<Variable, Value> =
                    target.inputs.iter().copied().zip(link.args.iter().cloned()).collect();

                let target = self.graph.block_mut(link.target);
                let mut tail = Block {
                    operations: std::mem::take(&mut target.operations),
                    exitswitch: target.exitswitch.take(),
                    exits: std::mem::take(&mut target.exits),
                    ..target.clone()
                };
                tail.substitute(&mapping);

                let block = self.graph.block_mut(id);
                block.operations.append(&mut tail.operations);
                block.exitswitch = tail.exitswitch;
                block.exits = tail.exits;
                if let BlockKind::Primary { dead, .. } = &mut block.kind {
                    *dead = false;
                }
                trace!(block = %id, joined = %link.target, "joined straight-line block");
                absorbed.insert(link.target, id);
            }
        }

        let resolve = |mut id: BlockId| {
            while let Some(&into) = absorbed.get(&id) {
                id = into;
            }
            id
        };
        for block in &mut self.graph.blocks {
            if let BlockKind::Secondary { parent, .. } = &mut block.kind {
                *parent = resolve(*parent);
            }
        }
    }
}

impl std::fmt::Debug for FlowContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext")
            .field("graph", &self.graph.name)
            .field("pending", &self.pending)
            .field("current", &self.recorder.current_block())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    use crate::bytecode::{CodeBuilder, Opcode};
    use crate::flow::recorder::{BlockRecorder, Replayer};
    use crate::host::Globals;
    use crate::model::{ExitSwitch, Outcome};

    fn negate() -> HostFunction {
        let mut b = CodeBuilder::new(&["x"]);
        b.load_fast("x").emit(Opcode::UnaryNegative).emit(Opcode::ReturnValue);
        HostFunction::new("neg", b.finish(), Globals::new())
    }

    fn recording(ctx: &mut FlowContext<'_>, block: BlockId) {
        ctx.recorder = Recorder::Block(BlockRecorder {
            block,
            last_join_point: None,
            enter_primary: false,
            visited: FxHashSet::default(),
        });
    }

    fn replaying(ctx: &mut FlowContext<'_>, block: BlockId, outcome: Outcome) {
        let next = Box::new(Recorder::Idle);
        ctx.recorder = Recorder::Replay(Replayer { block, outcome, index: 0, next });
    }

    #[test]
    fn test_replay_returns_recorded_results() {
        let space = FlowSpace::default();
        let f = negate();
        let mut ctx = FlowContext::new(&space, &f, &[]).unwrap();
        let start = ctx.graph.start;
        let x = Value::Var(ctx.graph.block(start).inputs[0]);

        recording(&mut ctx, start);
        let first = ctx.append("neg", vec![x.clone()]).unwrap();
        let second = ctx.append("pos", vec![Value::Var(first)]).unwrap();

        replaying(&mut ctx, start, Outcome::NoException);
        assert_eq!(ctx.append("neg", vec![x]).unwrap(), first);
        assert_eq!(ctx.append("pos", vec![Value::Var(first)]).unwrap(), second);
        assert_eq!(ctx.graph.block(start).operations.len(), 2);
    }

    #[test]
    #[should_panic(expected = "diverged")]
    fn test_replay_divergence_is_fatal() {
        let space = FlowSpace::default();
        let f = negate();
        let mut ctx = FlowContext::new(&space, &f, &[]).unwrap();
        let start = ctx.graph.start;
        let x = Value::Var(ctx.graph.block(start).inputs[0]);

        recording(&mut ctx, start);
        ctx.append("neg", vec![x.clone()]).unwrap();
        replaying(&mut ctx, start, Outcome::NoException);
        let _ = ctx.append("invert", vec![x]);
    }

    #[test]
    fn test_fork_records_then_replays_outcome() {
        let space = FlowSpace::default();
        let f = negate();
        let mut ctx = FlowContext::new(&space, &f, &[]).unwrap();
        let start = ctx.graph.start;
        let x = Value::Var(ctx.graph.block(start).inputs[0]);

        recording(&mut ctx, start);
        let cond = ctx.append("is_true", vec![x.clone()]).unwrap();
        let cases = [Outcome::Bool(false), Outcome::Bool(true)];
        let eggs = match ctx.fork(ExitSwitch::Value(Value::Var(cond)), &cases) {
            Err(Signal::Fork(eggs)) => eggs,
            other => panic!("expected a fork, got {:?}", other),
        };
        assert_eq!(eggs.len(), 2);
        assert_eq!(ctx.pending.iter().filter(|b| eggs.contains(b)).count(), 2);
        let block = ctx.graph.block(start);
        assert_eq!(block.exits.len(), 2);
        assert_eq!(ctx.graph.block(eggs[1]).inputs, block.variables());

        replaying(&mut ctx, start, Outcome::Bool(true));
        ctx.append("is_true", vec![x]).unwrap();
        let switch = ExitSwitch::Value(Value::Var(cond));
        assert_eq!(ctx.fork(switch, &cases).unwrap(), Outcome::Bool(true));
        assert!(matches!(ctx.recorder, Recorder::Idle));
    }

    #[test]
    fn test_replay_from_a_generalized_entry_state() {
        let space = FlowSpace::default();
        let f = negate();
        let mut ctx = FlowContext::new(&space, &f, &[]).unwrap();
        let start = ctx.graph.start;
        let x = Value::Var(ctx.graph.block(start).inputs[0]);

        recording(&mut ctx, start);
        let negated = ctx.append("neg", vec![x.clone()]).unwrap();
        let cond = ctx.append("is_true", vec![Value::Var(negated)]).unwrap();
        let cases = [Outcome::Bool(false), Outcome::Bool(true)];
        let switch = ExitSwitch::Value(Value::Var(cond));
        assert!(matches!(ctx.fork(switch.clone(), &cases), Err(Signal::Fork(_))));

        // The walk restarts from fresh variables, the way it does after a
        // merge generalized the entry state
        let generalized = ctx.frame.getstate().copy_fresh(&mut ctx.graph.vars);
        ctx.frame.setstate(&generalized);
        let y = match &ctx.frame.locals[0] {
            Some(v) => v.clone(),
            None => panic!("x should be bound"),
        };
        assert_ne!(y, x);

        replaying(&mut ctx, start, Outcome::Bool(false));
        assert_eq!(ctx.append("neg", vec![y]).unwrap(), negated);
        assert_eq!(ctx.append("is_true", vec![Value::Var(negated)]).unwrap(), cond);
        assert_eq!(ctx.fork(switch, &cases).unwrap(), Outcome::Bool(false));

        // A constant where a variable was recorded replays the same way
        let mut constant = generalized;
        constant.mergeable[0] = Some(Value::Const(HostObject::Int(4)));
        ctx.frame.setstate(&constant);
        replaying(&mut ctx, start, Outcome::Bool(true));
        let four = ctx.frame.locals[0].clone().unwrap_or_else(Value::none);
        assert_eq!(ctx.append("neg", vec![four]).unwrap(), negated);

        let names: Vec<&str> = ctx.graph.block(start).operations.iter().map(|op| op.name).collect();
        assert_eq!(names, vec!["neg", "is_true"]);
    }

    #[test]
    #[should_panic(expected = "recorded neg/1, got neg/2")]
    fn test_replay_arity_divergence_is_fatal() {
        let space = FlowSpace::default();
        let f = negate();
        let mut ctx = FlowContext::new(&space, &f, &[]).unwrap();
        let start = ctx.graph.start;
        let x = Value::Var(ctx.graph.block(start).inputs[0]);

        recording(&mut ctx, start);
        ctx.append("neg", vec![x.clone()]).unwrap();
        replaying(&mut ctx, start, Outcome::NoException);
        let _ = ctx.append("neg", vec![x.clone(), x]);
    }

    #[test]
    fn test_dead_parent_is_skipped() {
        let space = FlowSpace::default();
        let f = negate();
        let mut ctx = FlowContext::new(&space, &f, &[]).unwrap();
        let start = ctx.graph.start;
        if let BlockKind::Primary { dead, .. } = &mut ctx.graph.block_mut(start).kind {
            *dead = true;
        }
        assert!(ctx.recording(start).is_none());
    }
}
