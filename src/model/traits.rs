use std::fmt;

use arrayvec::ArrayVec;

use super::types::{PortType, MAX_NODE_PORTS};
use crate::compiler::NodeCompiler;
use crate::error::CompileError;

pub type PortTypes = ArrayVec<PortType, MAX_NODE_PORTS>;

/// Marks a node that exchanges data with host callbacks while a compiled map steps.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamEndpoint {
    Source(PortType),
    Sink(PortType),
}

/// A node that knows how to emit its own code.
///
/// The model compiler only talks to nodes through this trait. It places the node in a
/// code region, then calls `compile` with a [`NodeCompiler`] giving access to port
/// variables, region management and code emission.
pub trait CompilableNode: fmt::Debug {
    fn type_name(&self) -> &'static str;

    fn input_types(&self) -> PortTypes;

    fn output_types(&self) -> PortTypes;

    /// Emits code for this node. Outputs must be bound to variables before returning.
    fn compile(&self, compiler: &mut NodeCompiler<'_, '_>) -> Result<(), CompileError>;

    /// Nodes with side effects are compiled even when nothing reads their outputs.
    fn is_side_effecting(&self) -> bool {
        false
    }

    /// Inline nodes are always emitted into the map function, even when node
    /// inlining is disabled.
    fn should_compile_inline(&self) -> bool {
        false
    }

    fn allows_region_merge(&self) -> bool {
        true
    }

    /// Type of the map argument this node stands for, if it is an input node.
    fn as_map_input(&self) -> Option<PortType> {
        None
    }

    fn stream_endpoint(&self) -> Option<StreamEndpoint> {
        None
    }
}
