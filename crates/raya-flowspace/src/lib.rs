//! Raya Flow Space
//!
//! Builds control-flow graphs from stack bytecode by abstract
//! interpretation. Constants are folded as long as they stay constant,
//! everything else becomes an operation on a variable, and unknown
//! branches and exceptions split the graph into blocks.
//!
//! ```ignore
//! use raya_flowspace::{build_flow, CodeBuilder, Globals, HostFunction};
//!
//! let mut code = CodeBuilder::new(&["x"]);
//! code.load_fast("x").load_int(1).emit(Opcode::BinaryAdd).emit(Opcode::ReturnValue);
//! let func = HostFunction::new("inc", code.finish(), Globals::new());
//! let graph = build_flow(&func)?;
//! println!("{}", graph);
//! ```

#![warn(rust_2018_idioms)]

pub mod bytecode;
pub mod config;
pub mod error;
pub mod flow;
pub mod host;
pub mod model;

pub use bytecode::{Bytecode, Code, CodeBuilder, CodeFlags, CompareKind, Opcode};
pub use config::FlowConfig;
pub use error::{BuildError, FlowError};
pub use flow::{FlowContext, FlowException, FlowSpace, SpecialCases, SpecialKey};
pub use host::{Globals, HostFunction};
pub use model::{check_graph, ExcClass, Graph, GraphError, HostObject, Module, Value};

/// Build the flow graph of `func` with the default configuration
pub fn build_flow(func: &HostFunction) -> Result<Graph, BuildError> {
    FlowSpace::default().build_flow(func)
}
