//! Translation of a [`Map`](crate::model::Map) into a Cranelift function.

mod backend;
mod emitter;
mod map_compiler;
mod node_compiler;
mod regions;
mod variables;

pub use backend::{BackendSettings, OptLevel};
pub use emitter::{ElementIndex, VariableView};
pub use map_compiler::{CompileStats, MapCompiler, MapCompilerOptions};
pub use node_compiler::NodeCompiler;
pub use regions::{RegionId, RegionManager};
pub use variables::{
    ElementRun, ScopeGuard, VariableId, VariableInfo, VariableKind, VariableRegistry,
    VariableScope,
};
