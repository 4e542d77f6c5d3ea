//! Structural validation of finished graphs

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::graph::{BlockId, ExitCase, ExitSwitch, Graph, Value, Variable};

/// A violated graph invariant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("{block} is not closed")]
    Unclosed { block: BlockId },

    #[error("{block} is a final block but has exits")]
    FinalWithExits { block: BlockId },

    #[error("{var} is defined twice in {block}")]
    Redefined { block: BlockId, var: Variable },

    #[error("{var} is defined in both {first} and {second}")]
    SharedVariable { var: Variable, first: BlockId, second: BlockId },

    #[error("{var} is used in {block} but not defined there")]
    Undefined { block: BlockId, var: Variable },

    #[error("link {from} -> {to} carries {args} values for {inputs} inputs")]
    ArityMismatch { from: BlockId, to: BlockId, args: usize, inputs: usize },

    #[error("{block} has malformed exits: {reason}")]
    BadExits { block: BlockId, reason: &'static str },
}

/// Check the invariants of a finished graph:
///
/// - every reachable block except the return and except blocks is closed
/// - each variable is defined once (as an input or an operation result)
///   and only used in its defining block
/// - link arities match their targets
/// - exits agree with the exit switch
pub fn check_graph(graph: &Graph) -> Result<(), GraphError> {
    let finals = [graph.return_block, graph.except_block];
    let mut owner: FxHashMap<Variable, BlockId> = FxHashMap::default();

    for id in graph.iter_blocks() {
        let block = graph.block(id);
        let mut defined = FxHashSet::default();
        let mut define = |var: Variable| -> Result<(), GraphError> {
            if !defined.insert(var) {
                return Err(GraphError::Redefined { block: id, var });
            }
            if let Some(&first) = owner.get(&var) {
                return Err(GraphError::SharedVariable { var, first, second: id });
            }
            owner.insert(var, id);
            Ok(())
        };

        for &input in &block.inputs {
            define(input)?;
        }
        let mut ops_defined: Vec<Variable> = Vec::new();
        for op in &block.operations {
            for arg in &op.args {
                if let Value::Var(v) = arg {
                    if !block.inputs.contains(v) && !ops_defined.contains(v) {
                        return Err(GraphError::Undefined { block: id, var: *v });
                    }
                }
            }
            define(op.result)?;
            ops_defined.push(op.result);
        }
        let visible = |v: &Variable| block.inputs.contains(v) || ops_defined.contains(v);

        if finals.contains(&id) {
            if !block.exits.is_empty() {
                return Err(GraphError::FinalWithExits { block: id });
            }
            continue;
        }
        if block.exits.is_empty() {
            return Err(GraphError::Unclosed { block: id });
        }

        let bad = |reason| GraphError::BadExits { block: id, reason };
        match &block.exitswitch {
            None => {
                if block.exits.len() != 1 || block.exits[0].exitcase.is_some() {
                    return Err(bad("an unconditional block needs exactly one plain exit"));
                }
            }
            Some(ExitSwitch::Value(cond)) => {
                if let Value::Var(v) = cond {
                    if !visible(v) {
                        return Err(GraphError::Undefined { block: id, var: *v });
                    }
                }
                let cases: Vec<_> = block.exits.iter().map(|l| l.exitcase).collect();
                if cases != [Some(ExitCase::Bool(false)), Some(ExitCase::Bool(true))] {
                    return Err(bad("a boolean switch needs a false and a true exit"));
                }
            }
            Some(ExitSwitch::LastException) => {
                if block.operations.is_empty() {
                    return Err(bad("an exception switch needs a raising operation"));
                }
                if block.exits.len() < 2 || block.exits[0].exitcase.is_some() {
                    return Err(bad("an exception switch starts with the normal exit"));
                }
                let all_exceptional = block.exits[1..]
                    .iter()
                    .all(|l| matches!(l.exitcase, Some(ExitCase::Exception(_))));
                if !all_exceptional {
                    return Err(bad("exception exits need an exception case"));
                }
            }
        }

        for link in &block.exits {
            let target = graph.block(link.target);
            if link.args.len() != target.inputs.len() {
                return Err(GraphError::ArityMismatch {
                    from: id,
                    to: link.target,
                    args: link.args.len(),
                    inputs: target.inputs.len(),
                });
            }
            let extras: Vec<Variable> = link.extravars().collect();
            for arg in &link.args {
                if let Value::Var(v) = arg {
                    if !visible(v) && !extras.contains(v) {
                        return Err(GraphError::Undefined { block: id, var: *v });
                    }
                }
            }
        }
    }
    Ok(())
}
