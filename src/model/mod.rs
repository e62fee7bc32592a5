mod map;
mod model_impl;
mod topology;
mod traits;
pub mod types;


pub use map::{Map, MapInput, MapOutput};
pub use model_impl::{Model, NodeData, OutputPortData};
pub use topology::{topological_sort, TopologyError};
pub use traits::{CompilableNode, PortTypes, StreamEndpoint};
pub use types::{
    ElementType, NodeKey, PortElements, PortId, PortKey, PortRange, PortType, MAX_NODE_PORTS,
};
