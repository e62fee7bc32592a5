use cranelift::prelude::{FloatCC, InstBuilder};

use super::port_types;
use crate::compiler::{ElementIndex, NodeCompiler};
use crate::error::CompileError;
use crate::model::{CompilableNode, ElementType, PortType, PortTypes};

const OUTPUT: PortType = PortType::new(ElementType::Double, 2);
const LAST_TICK: PortType = PortType::scalar(ElementType::Double);

/// Time-aware node ticking every `interval` time units.
///
/// Each step outputs `[last_tick, now]`. When `now` reaches `last_tick + interval`
/// the tick advances to `now`. A step arriving `lag_threshold` or more after the tick
/// was due triggers a lag notification carrying how late it is.
#[derive(Clone, Debug)]
pub struct ClockNode {
    interval: f64,
    lag_threshold: f64,
}

impl ClockNode {
    pub fn new(interval: f64, lag_threshold: f64) -> Self {
        Self {
            interval,
            lag_threshold,
        }
    }
}

impl CompilableNode for ClockNode {
    fn type_name(&self) -> &'static str {
        "Clock"
    }

    fn input_types(&self) -> PortTypes {
        PortTypes::new()
    }

    fn output_types(&self) -> PortTypes {
        port_types(&[OUTPUT])
    }

    fn is_side_effecting(&self) -> bool {
        true
    }

    fn compile(&self, compiler: &mut NodeCompiler<'_, '_>) -> Result<(), CompileError> {
        let output = compiler.output_variable(0)?;
        let last_tick = compiler.allocate_global(LAST_TICK);
        let now = compiler.timestamp();

        let last = compiler.load(last_tick, ElementIndex::Constant(0))?;
        compiler.store(output, ElementIndex::Constant(0), last)?;
        compiler.store(output, ElementIndex::Constant(1), now)?;

        let interval = compiler.builder().ins().f64const(self.interval);
        let due_at = compiler.builder().ins().fadd(last, interval);
        let lag = compiler.builder().ins().fsub(now, due_at);
        let threshold = compiler.builder().ins().f64const(self.lag_threshold);
        let lagging = compiler
            .builder()
            .ins()
            .fcmp(FloatCC::GreaterThanOrEqual, lag, threshold);
        compiler.if_then(lagging, |c| {
            c.notify_lag(lag);
            Ok(())
        })?;

        let due = compiler
            .builder()
            .ins()
            .fcmp(FloatCC::GreaterThanOrEqual, now, due_at);
        let next = compiler.builder().ins().select(due, now, last);
        compiler.store(last_tick, ElementIndex::Constant(0), next)
    }
}
