use super::port_types;
use crate::compiler::{ElementIndex, NodeCompiler};
use crate::error::CompileError;
use crate::model::{CompilableNode, ElementType, PortType, PortTypes, StreamEndpoint};

const TRIGGER: PortType = PortType::scalar(ElementType::Boolean);

/// Pushes its input to the sink callback of its element type and passes it through.
///
/// A triggered sink takes a second boolean input and only pushes on steps where it
/// is set.
#[derive(Clone, Debug)]
pub struct SinkNode {
    port_type: PortType,
    triggered: bool,
}

impl SinkNode {
    pub fn new(port_type: PortType) -> Self {
        Self {
            port_type,
            triggered: false,
        }
    }

    pub fn with_trigger(port_type: PortType) -> Self {
        Self {
            port_type,
            triggered: true,
        }
    }
}

impl CompilableNode for SinkNode {
    fn type_name(&self) -> &'static str {
        "Sink"
    }

    fn input_types(&self) -> PortTypes {
        if self.triggered {
            port_types(&[self.port_type, TRIGGER])
        } else {
            port_types(&[self.port_type])
        }
    }

    fn output_types(&self) -> PortTypes {
        port_types(&[self.port_type])
    }

    fn is_side_effecting(&self) -> bool {
        true
    }

    fn stream_endpoint(&self) -> Option<StreamEndpoint> {
        Some(StreamEndpoint::Sink(self.port_type))
    }

    fn compile(&self, compiler: &mut NodeCompiler<'_, '_>) -> Result<(), CompileError> {
        let input = compiler.input_view(0)?;
        let output = compiler.output_variable(0)?;
        compiler.copy(output, input)?;

        if self.triggered {
            let trigger = compiler.input_view(1)?;
            let fire = compiler.load(trigger, ElementIndex::Constant(0))?;
            compiler.if_then(fire, |c| c.invoke_output(input))
        } else {
            compiler.invoke_output(input)
        }
    }
}
