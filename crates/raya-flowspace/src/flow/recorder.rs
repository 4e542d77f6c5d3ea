//! Operation recording and replay
//!
//! A block is flowed by re-executing the frame from its primary ancestor.
//! Ancestors were already recorded, so their operations are replayed and
//! their forks resolved to the outcome that leads to the block; only the
//! block itself records new operations.

use rustc_hash::FxHashSet;
use tracing::trace;

use super::context::FlowContext;
use super::{Flow, Signal};
use crate::flow::framestate::FrameState;
use crate::model::{
    BlockId, BlockKind, ExcClass, ExitSwitch, HostObject, Link, Operation, Outcome, Value, Variable,
};

/// Where operations produced by the evaluator go
#[derive(Debug)]
pub(crate) enum Recorder {
    /// No block is being flowed
    Idle,
    Block(BlockRecorder),
    Replay(Replayer),
}

/// Records the operations of the block under construction
#[derive(Debug)]
pub(crate) struct BlockRecorder {
    pub block: BlockId,
    /// State at the most recent instruction boundary
    pub last_join_point: Option<FrameState>,
    /// The next boundary is the block's own entry point
    pub enter_primary: bool,
    /// Offsets of the boundaries crossed so far
    pub visited: FxHashSet<usize>,
}

/// Replays the operations of an already-recorded ancestor
#[derive(Debug)]
pub(crate) struct Replayer {
    pub block: BlockId,
    /// Outcome of the ancestor's fork on the path to the block being built
    pub outcome: Outcome,
    pub index: usize,
    pub next: Box<Recorder>,
}

impl Recorder {
    pub fn current_block(&self) -> Option<BlockId> {
        match self {
            Recorder::Idle => None,
            Recorder::Block(r) => Some(r.block),
            Recorder::Replay(r) => Some(r.block),
        }
    }
}

impl FlowContext<'_> {
    /// Prepare the frame and recorder chain for flowing `block`.
    ///
    /// Returns `None` when the block descends from a primary block that was
    /// since merged away. Otherwise returns the recorder and the primary
    /// ancestor the frame was restored from.
    pub(crate) fn recording(&mut self, block: BlockId) -> Option<(Recorder, BlockId)> {
        let mut chain = Vec::new();
        let mut cur = block;
        while let BlockKind::Secondary { parent, outcome, .. } = self.graph.block(cur).kind {
            chain.push((parent, outcome));
            cur = parent;
        }
        let state = match &self.graph.block(cur).kind {
            BlockKind::Primary { dead: true, .. } => return None,
            BlockKind::Primary { state: Some(state), .. } => state.clone(),
            _ => panic!("{} has no frame state to resume from", cur),
        };
        self.frame.setstate(&state);

        let mut recorder = Recorder::Block(BlockRecorder {
            block,
            last_join_point: None,
            enter_primary: self.graph.block(block).is_primary(),
            visited: FxHashSet::default(),
        });
        for (parent, outcome) in chain {
            let next = Box::new(recorder);
            recorder = Recorder::Replay(Replayer { block: parent, outcome, index: 0, next });
        }
        Some((recorder, cur))
    }

    /// Called at every instruction boundary.
    ///
    /// Past the block's first instruction the state is kept as the join
    /// point for the next recorded operation. Coming back to an offset
    /// already crossed without recording anything ends the block there.
    pub(crate) fn bytecode_trace(&mut self) -> Flow<()> {
        let Recorder::Block(r) = &mut self.recorder else {
            return Ok(());
        };
        let first_visit = r.visited.insert(self.frame.last_instr);
        if r.enter_primary {
            r.enter_primary = false;
            if self.config.name_variables {
                let names = self.code.varnames();
                for (slot, name) in self.frame.locals.iter().zip(names) {
                    if let Some(Value::Var(v)) = slot {
                        self.graph.name_variable(*v, name);
                    }
                }
            }
        } else {
            let state = self.frame.getstate();
            if !first_visit {
                return Err(Signal::Merge(state));
            }
            r.last_join_point = Some(state);
        }
        Ok(())
    }

    /// Record (or replay) one operation and return its result variable
    pub(crate) fn append(&mut self, name: &'static str, args: Vec<Value>) -> Flow<Variable> {
        match &mut self.recorder {
            Recorder::Idle => panic!("operation {} outside of any block", name),
            Recorder::Block(r) => {
                if let Some(state) = r.last_join_point.take() {
                    return Err(Signal::Merge(state));
                }
                let result = self.graph.vars.fresh();
                trace!(block = %r.block, op = name, result = %result, "record");
                self.graph.block_mut(r.block).operations.push(Operation {
                    name,
                    args,
                    result,
                    offset: self.frame.last_instr,
                });
                Ok(result)
            }
            Recorder::Replay(r) => {
                let recorded = match self.graph.block(r.block).operations.get(r.index) {
                    Some(op) => op,
                    None => panic!("replay of {} diverged: unexpected operation {}", r.block, name),
                };
                if recorded.name != name || recorded.args.len() != args.len() {
                    panic!(
                        "replay of {} diverged at operation {}: recorded {}/{}, got {}/{}",
                        r.block,
                        r.index,
                        recorded.name,
                        recorded.args.len(),
                        name,
                        args.len()
                    );
                }
                r.index += 1;
                Ok(recorded.result)
            }
        }
    }

    /// Split the current block on an unknown outcome.
    ///
    /// When recording, the block is closed with one link per case and the
    /// successor blocks are scheduled; the walk stops with `Signal::Fork`.
    /// When replaying, the outcome that was taken on the way to the block
    /// being built is returned.
    pub(crate) fn fork(&mut self, switch: ExitSwitch, cases: &[Outcome]) -> Flow<Outcome> {
        match std::mem::replace(&mut self.recorder, Recorder::Idle) {
            Recorder::Idle => panic!("fork outside of any block"),
            Recorder::Replay(r) => {
                let recorded = self.graph.block(r.block).operations.len();
                assert_eq!(
                    r.index, recorded,
                    "replay of {} forked before its last operation",
                    r.block
                );
                assert!(
                    cases.contains(&r.outcome),
                    "replay of {} took an unknown outcome",
                    r.block
                );
                self.recorder = *r.next;
                Ok(r.outcome)
            }
            Recorder::Block(r) => {
                let eggs = self.close_with_fork(r.block, switch, cases);
                self.recorder = Recorder::Block(r);
                Err(Signal::Fork(eggs))
            }
        }
    }

    fn close_with_fork(
        &mut self,
        block: BlockId,
        switch: ExitSwitch,
        cases: &[Outcome],
    ) -> Vec<BlockId> {
        let vars = self.graph.block(block).variables();
        let on_exception = matches!(switch, ExitSwitch::LastException);
        if on_exception {
            let last_result = self.graph.block(block).operations.last().map(|op| op.result);
            assert_eq!(
                last_result,
                vars.last().copied(),
                "{} forks on an exception without a preceding operation",
                block
            );
        }

        let mut links = Vec::with_capacity(cases.len());
        let mut eggs = Vec::with_capacity(cases.len());
        for &outcome in cases {
            let egg;
            let mut link;
            match outcome {
                Outcome::Exception(cls) => {
                    // The failing operation produced no result: its variable
                    // is replaced by the exception pair
                    let kept = &vars[..vars.len() - 1];
                    let w_type = match cls {
                        ExcClass::Exception => Value::Var(self.graph.vars.fresh()),
                        _ => Value::Const(HostObject::ExcClass(cls)),
                    };
                    let w_value = self.graph.vars.fresh();
                    let mut args: Vec<Value> = kept.iter().copied().map(Value::Var).collect();
                    args.push(w_type.clone());
                    args.push(Value::Var(w_value));
                    let mut inputs = kept.to_vec();
                    inputs.push(self.graph.vars.fresh());
                    inputs.push(self.graph.vars.fresh());
                    egg = self.graph.add_block(
                        inputs,
                        BlockKind::Secondary {
                            parent: block,
                            outcome,
                            last_exception: Some(w_type.clone()),
                        },
                    );
                    link = Link::new(args, egg);
                    link.last_exception = Some(w_type);
                    link.last_exc_value = Some(w_value);
                }
                _ => {
                    egg = self.graph.add_block(
                        vars.clone(),
                        BlockKind::Secondary { parent: block, outcome, last_exception: None },
                    );
                    link = Link::new(vars.iter().copied().map(Value::Var).collect(), egg);
                }
            }
            link.exitcase = outcome.exitcase();
            links.push(link);
            eggs.push(egg);
        }
        debug_assert!(!on_exception || links[0].exitcase.is_none());

        let b = self.graph.block_mut(block);
        b.exitswitch = Some(switch);
        b.close(links);
        self.pending.extend(eggs.iter().copied());
        trace!(%block, successors = eggs.len(), "fork");
        eggs
    }
}
