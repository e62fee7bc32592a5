use super::port_types;
use crate::compiler::NodeCompiler;
use crate::error::CompileError;
use crate::model::{CompilableNode, PortType, PortTypes};

/// Passes its input through unchanged.
#[derive(Clone, Debug)]
pub struct IdentityNode {
    port_type: PortType,
}

impl IdentityNode {
    pub fn new(port_type: PortType) -> Self {
        Self { port_type }
    }
}

impl CompilableNode for IdentityNode {
    fn type_name(&self) -> &'static str {
        "Identity"
    }

    fn input_types(&self) -> PortTypes {
        port_types(&[self.port_type])
    }

    fn output_types(&self) -> PortTypes {
        port_types(&[self.port_type])
    }

    fn compile(&self, compiler: &mut NodeCompiler<'_, '_>) -> Result<(), CompileError> {
        let input = compiler.input_view(0)?;
        let port = compiler.output_port(0)?;

        // Inline, an input starting at element 0 can simply be shared.
        if !compiler.is_out_of_line()
            && input.offset == 0
            && compiler.variable_for_port(port).is_none()
        {
            return compiler.set_variable_for_port(port, input.variable);
        }

        let output = compiler.output_variable(0)?;
        compiler.copy(output, input)
    }
}
