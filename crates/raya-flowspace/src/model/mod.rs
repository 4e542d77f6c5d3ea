//! Flow graph model
//!
//! Host objects, the graph structure and its invariants.

pub mod check;
pub mod display;
pub mod graph;
pub mod value;

pub use check::{check_graph, GraphError};
pub use graph::{
    Block, BlockId, BlockKind, ExitCase, ExitSwitch, Graph, Link, Operation, Outcome, Signature,
    Value, VarGen, Variable,
};
pub use value::{Builtin, ExcClass, FuncRef, HostObject, Module};
