//! The flow space
//!
//! Builds a flow graph by abstractly executing a procedure's bytecode:
//!
//! 1. `context`: the orchestrator. Owns the graph, the pending-block worklist
//!    and the merge-point index.
//! 2. `frame`: the driver. Steps through instructions and turns jumps,
//!    returns and exception dispatch into signals.
//! 3. `space`: the evaluator. Folds or records each primitive operation and
//!    asks the recorder to fork on unknown outcomes.
//! 4. `recorder`: appends operations to the block under construction, or
//!    replays the operations of already-recorded parents.
//! 5. `framestate`: snapshots of the abstract machine and their union.

pub mod context;
pub mod frame;
pub mod framestate;
pub mod operation;
pub mod recorder;
pub mod space;
pub mod specialcase;

pub use context::{FlowContext, FlowSpace};
pub use framestate::{FrameBlock, FrameBlockKind, FrameState};
pub use specialcase::{SpecialCaseFn, SpecialCases, SpecialKey};

use crate::error::FlowError;
use crate::model::{BlockId, ExcClass, HostObject, Value};

/// An application-level exception travelling through the frame
#[derive(Debug, Clone, PartialEq)]
pub struct FlowException {
    pub w_type: Value,
    pub w_value: Value,
    /// Raised by an operation rather than by a `raise` instruction
    pub implicit: bool,
}

impl FlowException {
    /// An explicit exception of a known class
    pub fn constant(cls: ExcClass, message: &str) -> Self {
        FlowException {
            w_type: Value::Const(HostObject::ExcClass(cls)),
            w_value: Value::Const(HostObject::ExcValue(cls, message.into())),
            implicit: false,
        }
    }

    /// Class of the exception, when statically known
    pub fn class(&self) -> Option<ExcClass> {
        self.w_type.as_const().and_then(HostObject::as_exc_class)
    }

    pub fn matches(&self, cls: ExcClass) -> bool {
        self.class().map_or(false, |c| c.is_subclass(cls))
    }
}

/// Why the driver stopped stepping through the current block.
///
/// Together with `Ok` (continue with the next instruction) this is the
/// complete set of outcomes of executing an instruction.
#[derive(Debug)]
pub enum Signal {
    /// The block forked; its successors are already scheduled
    Fork(Vec<BlockId>),
    /// An operation was about to be recorded past an instruction boundary;
    /// the block ends with the state captured at that boundary
    Merge(FrameState),
    Return(Value),
    Raise(FlowException),
    Fatal(FlowError),
}

impl From<FlowError> for Signal {
    fn from(e: FlowError) -> Self {
        Signal::Fatal(e)
    }
}

/// Result of an abstract evaluation step
pub type Flow<T> = Result<T, Signal>;

impl From<crate::bytecode::DecodeError> for Signal {
    fn from(e: crate::bytecode::DecodeError) -> Self {
        Signal::Fatal(FlowError::Decode(e))
    }
}
