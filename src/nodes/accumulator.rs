use cranelift::prelude::InstBuilder;

use super::port_types;
use crate::compiler::NodeCompiler;
use crate::error::CompileError;
use crate::model::{CompilableNode, ElementType, PortType, PortTypes};

/// Running element-wise sum of its input over all steps since creation or reset.
#[derive(Clone, Debug)]
pub struct AccumulatorNode {
    port_type: PortType,
}

impl AccumulatorNode {
    pub fn new(port_type: PortType) -> Self {
        Self { port_type }
    }
}

impl CompilableNode for AccumulatorNode {
    fn type_name(&self) -> &'static str {
        "Accumulator"
    }

    fn input_types(&self) -> PortTypes {
        port_types(&[self.port_type])
    }

    fn output_types(&self) -> PortTypes {
        port_types(&[self.port_type])
    }

    fn compile(&self, compiler: &mut NodeCompiler<'_, '_>) -> Result<(), CompileError> {
        let element = self.port_type.element;
        if element == ElementType::Boolean {
            return Err(CompileError::unsupported(
                Some(compiler.node()),
                "cannot accumulate booleans",
            ));
        }

        let input = compiler.input_view(0)?;
        let output = compiler.output_variable(0)?;
        let total = compiler.allocate_global(self.port_type);
        compiler.for_each_element(self.port_type.size, |c, index| {
            let sum = c.load(total, index)?;
            let value = c.load(input, index)?;
            let sum = if element.is_float() {
                c.builder().ins().fadd(sum, value)
            } else {
                c.builder().ins().iadd(sum, value)
            };
            c.store(total, index, sum)?;
            c.store(output, index, sum)
        })
    }
}
