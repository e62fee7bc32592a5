use super::port_types;
use crate::compiler::NodeCompiler;
use crate::error::CompileError;
use crate::model::{CompilableNode, PortType, PortTypes};

/// Stands for one declared input of a map.
///
/// Emits no code: its output port is bound to the map argument before traversal.
#[derive(Clone, Debug)]
pub struct InputNode {
    port_type: PortType,
}

impl InputNode {
    pub fn new(port_type: PortType) -> Self {
        Self { port_type }
    }
}

impl CompilableNode for InputNode {
    fn type_name(&self) -> &'static str {
        "Input"
    }

    fn input_types(&self) -> PortTypes {
        PortTypes::new()
    }

    fn output_types(&self) -> PortTypes {
        port_types(&[self.port_type])
    }

    fn should_compile_inline(&self) -> bool {
        true
    }

    fn as_map_input(&self) -> Option<PortType> {
        Some(self.port_type)
    }

    fn compile(&self, compiler: &mut NodeCompiler<'_, '_>) -> Result<(), CompileError> {
        let port = compiler.output_port(0)?;
        if compiler.variable_for_port(port).is_none() {
            return Err(CompileError::UnboundMapInput {
                node: compiler.node(),
            });
        }
        Ok(())
    }
}
