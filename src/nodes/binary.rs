use cranelift::prelude::{FunctionBuilder, InstBuilder, Value};

use super::port_types;
use crate::compiler::NodeCompiler;
use crate::error::CompileError;
use crate::model::{CompilableNode, ElementType, PortType, PortTypes};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Min,
    Max,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "multiply",
            BinaryOp::Divide => "divide",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
        }
    }

    /// Whether the operation can be emitted for `element`.
    ///
    /// Integer division traps on zero divisors and is not offered. Booleans only
    /// support `Min` (and) and `Max` (or).
    pub fn supports(self, element: ElementType) -> bool {
        match element {
            ElementType::Float | ElementType::Double => true,
            ElementType::Int32 | ElementType::Int64 => self != BinaryOp::Divide,
            ElementType::Boolean => matches!(self, BinaryOp::Min | BinaryOp::Max),
        }
    }

    fn emit(
        self,
        builder: &mut FunctionBuilder,
        element: ElementType,
        a: Value,
        b: Value,
    ) -> Value {
        let ins = builder.ins();
        if element.is_float() {
            match self {
                BinaryOp::Add => ins.fadd(a, b),
                BinaryOp::Subtract => ins.fsub(a, b),
                BinaryOp::Multiply => ins.fmul(a, b),
                BinaryOp::Divide => ins.fdiv(a, b),
                BinaryOp::Min => ins.fmin(a, b),
                BinaryOp::Max => ins.fmax(a, b),
            }
        } else if element == ElementType::Boolean {
            match self {
                BinaryOp::Max => ins.bor(a, b),
                _ => ins.band(a, b),
            }
        } else {
            match self {
                BinaryOp::Add => ins.iadd(a, b),
                BinaryOp::Subtract => ins.isub(a, b),
                BinaryOp::Multiply => ins.imul(a, b),
                BinaryOp::Divide => ins.sdiv(a, b),
                BinaryOp::Min => ins.smin(a, b),
                BinaryOp::Max => ins.smax(a, b),
            }
        }
    }
}

/// Element-wise arithmetic on two ports of the same type.
#[derive(Clone, Debug)]
pub struct BinaryOperationNode {
    op: BinaryOp,
    port_type: PortType,
}

impl BinaryOperationNode {
    pub fn new(op: BinaryOp, port_type: PortType) -> Self {
        Self { op, port_type }
    }

    pub fn op(&self) -> BinaryOp {
        self.op
    }
}

impl CompilableNode for BinaryOperationNode {
    fn type_name(&self) -> &'static str {
        "BinaryOperation"
    }

    fn input_types(&self) -> PortTypes {
        port_types(&[self.port_type, self.port_type])
    }

    fn output_types(&self) -> PortTypes {
        port_types(&[self.port_type])
    }

    fn compile(&self, compiler: &mut NodeCompiler<'_, '_>) -> Result<(), CompileError> {
        let element = self.port_type.element;
        if !self.op.supports(element) {
            return Err(CompileError::unsupported(
                Some(compiler.node()),
                format!("{} is not defined for {element}", self.op.name()),
            ));
        }

        let lhs = compiler.input_view(0)?;
        let rhs = compiler.input_view(1)?;
        let output = compiler.output_variable(0)?;
        let op = self.op;
        compiler.for_each_element(self.port_type.size, |c, index| {
            let a = c.load(lhs, index)?;
            let b = c.load(rhs, index)?;
            let result = op.emit(c.builder(), element, a, b);
            c.store(output, index, result)
        })
    }
}
