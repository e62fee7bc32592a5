//! Nodes shipped with the compiler.
//!
//! Each node implements [`CompilableNode`](crate::model::CompilableNode) and emits its
//! own code through the [`NodeCompiler`](crate::compiler::NodeCompiler) it is handed.

mod accumulator;
mod binary;
mod clock;
mod constant;
mod identity;
mod input;
mod sink;
mod source;

pub use accumulator::AccumulatorNode;
pub use binary::{BinaryOp, BinaryOperationNode};
pub use clock::ClockNode;
pub use constant::ConstantNode;
pub use identity::IdentityNode;
pub use input::InputNode;
pub use sink::SinkNode;
pub use source::SourceNode;

use crate::model::{PortType, PortTypes};

fn port_types(types: &[PortType]) -> PortTypes {
    types.iter().copied().collect()
}
