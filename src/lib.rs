pub mod compiler;
pub mod error;
pub mod model;
pub mod nodes;
pub mod runtime;

pub use compiler::{
    BackendSettings, CompileStats, ElementIndex, MapCompiler, MapCompilerOptions, NodeCompiler,
    OptLevel, VariableId, VariableKind, VariableRegistry, VariableScope, VariableView,
};
pub use error::{BackendError, CallbackError, CompileError, ExecutionError, GraphError};
pub use model::{
    CompilableNode, ElementType, Map, Model, NodeKey, PortElements, PortId, PortKey, PortRange,
    PortType, StreamEndpoint,
};
pub use runtime::{CallbackForwarder, CallbackRegistry, CompiledMap, Element, PortBuffer};
