//! Flow space configuration

use serde::{Deserialize, Serialize};

/// Configuration for flow graph construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Evaluate primitive operations whose operands are all constants
    pub constant_folding: bool,
    /// Treat every constant fold that raises as a construction error
    /// instead of recording the operation
    pub strict_folding: bool,
    /// Give variables holding locals the local's name (display only)
    pub name_variables: bool,
    /// Fold straight-line chains of blocks into one block when finishing
    pub join_blocks: bool,
    /// Validate the finished graph
    pub check_graph: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            constant_folding: true,
            strict_folding: false,
            name_variables: true,
            join_blocks: true,
            check_graph: true,
        }
    }
}
