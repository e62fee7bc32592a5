use super::port_types;
use crate::compiler::{ElementIndex, NodeCompiler};
use crate::error::CompileError;
use crate::model::{CompilableNode, PortTypes};
use crate::runtime::PortBuffer;

#[derive(Clone, Debug)]
pub struct ConstantNode {
    values: PortBuffer,
}

impl ConstantNode {
    pub fn new(values: impl Into<PortBuffer>) -> Self {
        Self {
            values: values.into(),
        }
    }

    pub fn values(&self) -> &PortBuffer {
        &self.values
    }
}

impl CompilableNode for ConstantNode {
    fn type_name(&self) -> &'static str {
        "Constant"
    }

    fn input_types(&self) -> PortTypes {
        PortTypes::new()
    }

    fn output_types(&self) -> PortTypes {
        port_types(&[self.values.port_type()])
    }

    fn should_compile_inline(&self) -> bool {
        true
    }

    fn compile(&self, compiler: &mut NodeCompiler<'_, '_>) -> Result<(), CompileError> {
        let output = compiler.output_variable(0)?;
        // Immediates differ per element, so this is always unrolled.
        for index in 0..self.values.len() {
            let value = compiler.constant(&self.values, index)?;
            compiler.store(output, ElementIndex::Constant(index), value)?;
        }
        Ok(())
    }
}
