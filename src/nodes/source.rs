use super::port_types;
use crate::compiler::NodeCompiler;
use crate::error::CompileError;
use crate::model::{CompilableNode, PortType, PortTypes, StreamEndpoint};

/// Pulls data from the source callback of its element type once per step.
///
/// The data lives in persistent state, so a step where the callback reports no new
/// data outputs what the previous step received.
#[derive(Clone, Debug)]
pub struct SourceNode {
    port_type: PortType,
}

impl SourceNode {
    pub fn new(port_type: PortType) -> Self {
        Self { port_type }
    }
}

impl CompilableNode for SourceNode {
    fn type_name(&self) -> &'static str {
        "Source"
    }

    fn input_types(&self) -> PortTypes {
        PortTypes::new()
    }

    fn output_types(&self) -> PortTypes {
        port_types(&[self.port_type])
    }

    fn is_side_effecting(&self) -> bool {
        true
    }

    // The output must stay bound to the persistent buffer, not a node function argument.
    fn should_compile_inline(&self) -> bool {
        true
    }

    fn stream_endpoint(&self) -> Option<StreamEndpoint> {
        Some(StreamEndpoint::Source(self.port_type))
    }

    fn compile(&self, compiler: &mut NodeCompiler<'_, '_>) -> Result<(), CompileError> {
        let buffer = compiler.allocate_global(self.port_type);
        let port = compiler.output_port(0)?;
        compiler.set_variable_for_port(port, buffer.variable)?;
        compiler.invoke_input(buffer)?;
        Ok(())
    }
}
