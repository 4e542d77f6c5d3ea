//! Error types for flow graph construction

use thiserror::Error;

use crate::bytecode::DecodeError;
use crate::model::{BlockId, ExcClass};

/// A reason flow graph construction cannot proceed
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("global name '{0}' is not defined")]
    UndefinedGlobal(String),

    #[error("local variable '{0}' referenced before assignment")]
    UnboundLocal(String),


    #[error("attempt to modify global attribute '{0}'")]
    GlobalWrite(String),

    #[error("import statement always raises {0}")]
    ImportAlwaysRaises(String),

    #[error("found an operation that always raises {exc}: {message}")]
    AlwaysRaises { exc: ExcClass, message: String },

    #[error("non-constant except guard")]
    NonConstantGuard,

    #[error("catching {0} is not valid")]
    InvalidCatch(ExcClass),

    #[error("the code object for a function must use a fresh local scope")]
    MissingNewLocals,

    #[error("functions cannot create closures (cell variables: {0})")]
    CreatesClosure(String),

    #[error("closure has {got} cells but the code expects {expected} free variables")]
    ClosureMismatch { expected: usize, got: usize },

    #[error("stack underflow at offset {0}")]
    StackUnderflow(usize),

    #[error("{name} used outside of a {expected} block")]
    NoEnclosingBlock { name: &'static str, expected: &'static str },

    #[error("cannot unpack a non-sequence constant {0}")]
    NotUnpackable(String),

    #[error("constant argument position {position} out of range for {argcount} arguments")]
    BadConstArg { position: usize, argcount: usize },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result type for operations that can fail with a `FlowError`
pub type FlowResult<T> = Result<T, FlowError>;

/// A `FlowError` located in the graph being built
#[derive(Debug, Clone, Error)]
#[error("{graph}: {error} (at {location}, offset {offset})")]
pub struct BuildError {
    /// Name of the graph under construction
    pub graph: String,
    /// Block being recorded when the error was detected
    pub block: Option<BlockId>,
    /// Offset of the instruction being executed
    pub offset: usize,
    /// Rendered `block` for the message
    location: String,
    #[source]
    pub error: FlowError,
}

impl BuildError {
    pub fn new(graph: &str, block: Option<BlockId>, offset: usize, error: FlowError) -> Self {
        let location = match block {
            Some(id) => id.to_string(),
            None => "frame setup".to_string(),
        };
        BuildError { graph: graph.to_string(), block, offset, location, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = FlowError::UndefinedGlobal("foo".to_string());
        assert_eq!(err.to_string(), "global name 'foo' is not defined");

        let err = FlowError::AlwaysRaises {
            exc: ExcClass::AttributeError,
            message: "no attribute 'x'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "found an operation that always raises AttributeError: no attribute 'x'"
        );
    }

    #[test]
    fn test_build_error_position() {
        let err = BuildError::new("f", Some(BlockId(3)), 12, FlowError::NonConstantGuard);
        assert_eq!(err.to_string(), "f: non-constant except guard (at block3, offset 12)");
        let err = BuildError::new("g", None, 0, FlowError::MissingNewLocals);
        assert!(err.to_string().contains("frame setup"));
    }
}
