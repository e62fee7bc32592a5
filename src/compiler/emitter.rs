use std::collections::HashMap;

use cranelift::codegen::ir::{FuncRef, Function, Inst, StackSlot};
use cranelift::prelude::*;
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Module};

use super::variables::{VariableId, VariableRegistry, VariableScope};
use crate::error::CompileError;
use crate::model::{ElementType, PortType};
use crate::runtime::PortBuffer;

fn ir_type(element: ElementType) -> Type {
    match element {
        ElementType::Boolean => types::I8,
        ElementType::Int32 => types::I32,
        ElementType::Int64 => types::I64,
        ElementType::Float => types::F32,
        ElementType::Double => types::F64,
    }
}

/// True when the builder has no open block, or its current block ends in a terminator.
pub(crate) fn is_filled(builder: &FunctionBuilder) -> bool {
    let Some(block) = builder.current_block() else {
        return true;
    };
    builder
        .func
        .layout
        .last_inst(block)
        .is_some_and(|inst| builder.func.dfg.insts[inst].opcode().is_terminator())
}

/// Position of an element inside a [`VariableView`].
#[derive(Copy, Clone, Debug)]
pub enum ElementIndex {
    Constant(usize),
    /// Pointer-sized index computed at run time, e.g. a loop counter.
    Dynamic(Value),
}

/// A run of `port_type.size` elements of a variable, starting at element `offset`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VariableView {
    pub variable: VariableId,
    pub offset: usize,
    pub port_type: PortType,
}

impl VariableView {
    pub fn new(variable: VariableId, offset: usize, port_type: PortType) -> Self {
        Self {
            variable,
            offset,
            port_type,
        }
    }

    pub fn len(&self) -> usize {
        self.port_type.size
    }

    pub fn is_empty(&self) -> bool {
        self.port_type.size == 0
    }

    pub fn element(&self) -> ElementType {
        self.port_type.element
    }

    /// `len` elements of this view starting at element `start`.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        Self::new(
            self.variable,
            self.offset + start,
            PortType::new(self.port_type.element, len),
        )
    }
}

pub struct LoopFrame {
    header: Block,
    exit: Block,
    pub index: Value,
}

/// Emits the body of one Cranelift function: the map entry point or a node function.
///
/// Map functions take `(callbacks, state, inputs, outputs, timestamp)`; node functions
/// take `(callbacks, state, timestamp, args...)` where every arg points at one port.
pub struct FunctionEmitter<'f> {
    builder: FunctionBuilder<'f>,
    /// Owner tag of the locals this function may address.
    function: usize,
    pointer_type: Type,
    callbacks: Value,
    state: Value,
    timestamp: Value,
    map_inputs: Vec<Value>,
    map_outputs: Vec<Value>,
    arguments: HashMap<VariableId, Value>,
    locals: HashMap<VariableId, StackSlot>,
    imports: HashMap<FuncId, FuncRef>,
}

impl<'f> FunctionEmitter<'f> {
    pub fn map_signature(module: &JITModule, pointer_type: Type) -> Signature {
        let mut sig = module.make_signature();
        sig.params.push(AbiParam::new(pointer_type)); // callbacks
        sig.params.push(AbiParam::new(pointer_type)); // state
        sig.params.push(AbiParam::new(pointer_type)); // inputs
        sig.params.push(AbiParam::new(pointer_type)); // outputs
        sig.params.push(AbiParam::new(types::F64)); // timestamp
        sig
    }

    pub fn node_signature(module: &JITModule, pointer_type: Type, args: usize) -> Signature {
        let mut sig = module.make_signature();
        sig.params.push(AbiParam::new(pointer_type));
        sig.params.push(AbiParam::new(pointer_type));
        sig.params.push(AbiParam::new(types::F64));
        for _ in 0..args {
            sig.params.push(AbiParam::new(pointer_type));
        }
        sig
    }

    pub fn for_map(
        func: &'f mut Function,
        context: &'f mut FunctionBuilderContext,
        pointer_type: Type,
        inputs: usize,
        outputs: usize,
    ) -> Self {
        let mut builder = FunctionBuilder::new(func, context);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);

        let params = builder.block_params(entry).to_vec();
        let (inputs_ptr, outputs_ptr) = (params[2], params[3]);
        let slot = pointer_type.bytes() as i32;

        let map_inputs = (0..inputs)
            .map(|i| {
                builder
                    .ins()
                    .load(pointer_type, MemFlags::trusted(), inputs_ptr, i as i32 * slot)
            })
            .collect();
        let map_outputs = (0..outputs)
            .map(|i| {
                builder
                    .ins()
                    .load(pointer_type, MemFlags::trusted(), outputs_ptr, i as i32 * slot)
            })
            .collect();

        Self {
            builder,
            function: 0,
            pointer_type,
            callbacks: params[0],
            state: params[1],
            timestamp: params[4],
            map_inputs,
            map_outputs,
            arguments: HashMap::new(),
            locals: HashMap::new(),
            imports: HashMap::new(),
        }
    }

    /// Starts node function number `function`, returning it along with its port
    /// arguments.
    pub fn for_node(
        func: &'f mut Function,
        context: &'f mut FunctionBuilderContext,
        pointer_type: Type,
        function: usize,
    ) -> (Self, Vec<Value>) {
        let mut builder = FunctionBuilder::new(func, context);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);

        let params = builder.block_params(entry).to_vec();
        let emitter = Self {
            builder,
            function,
            pointer_type,
            callbacks: params[0],
            state: params[1],
            timestamp: params[2],
            map_inputs: Vec::new(),
            map_outputs: Vec::new(),
            arguments: HashMap::new(),
            locals: HashMap::new(),
            imports: HashMap::new(),
        };
        (emitter, params[3..].to_vec())
    }

    pub fn builder(&mut self) -> &mut FunctionBuilder<'f> {
        &mut self.builder
    }

    pub fn pointer_type(&self) -> Type {
        self.pointer_type
    }

    pub fn callbacks(&self) -> Value {
        self.callbacks
    }

    pub fn state(&self) -> Value {
        self.state
    }

    pub fn timestamp(&self) -> Value {
        self.timestamp
    }

    pub fn bind_argument(&mut self, variable: VariableId, value: Value) {
        self.arguments.insert(variable, value);
    }

    /// Address of element 0 of `variable`.
    pub fn base_address(
        &mut self,
        registry: &VariableRegistry,
        variable: VariableId,
    ) -> Result<Value, CompileError> {
        let info = registry.info(variable);
        let address = match info.scope {
            VariableScope::Local { function } if function != self.function => {
                return Err(CompileError::unsupported(
                    None,
                    format!("local {variable:?} belongs to another generated function"),
                ));
            }
            VariableScope::Local { .. } => {
                let builder = &mut self.builder;
                let slot = *self.locals.entry(variable).or_insert_with(|| {
                    builder.create_sized_stack_slot(StackSlotData::new(
                        StackSlotKind::ExplicitSlot,
                        info.port_type.byte_size().max(1) as u32,
                        3,
                    ))
                });
                self.builder.ins().stack_addr(self.pointer_type, slot, 0)
            }
            VariableScope::Global { offset } => {
                self.builder.ins().iadd_imm(self.state, offset as i64)
            }
            VariableScope::MapInput(index) => {
                self.map_inputs.get(index).copied().ok_or_else(|| {
                    CompileError::unsupported(None, format!("map input {index} is not in scope"))
                })?
            }
            VariableScope::MapOutput(index) => {
                self.map_outputs.get(index).copied().ok_or_else(|| {
                    CompileError::unsupported(None, format!("map output {index} is not in scope"))
                })?
            }
            VariableScope::Argument => self.arguments.get(&variable).copied().ok_or_else(|| {
                CompileError::unsupported(
                    None,
                    format!("argument {variable:?} belongs to another function"),
                )
            })?,
        };
        Ok(address)
    }

    /// Address of the first element of `view`.
    pub fn view_address(
        &mut self,
        registry: &VariableRegistry,
        view: VariableView,
    ) -> Result<Value, CompileError> {
        let base = self.base_address(registry, view.variable)?;
        let offset = view.offset * view.element().size();
        Ok(if offset == 0 {
            base
        } else {
            self.builder.ins().iadd_imm(base, offset as i64)
        })
    }

    fn element_address(
        &mut self,
        registry: &VariableRegistry,
        view: VariableView,
        index: ElementIndex,
    ) -> Result<(Value, i32), CompileError> {
        let base = self.base_address(registry, view.variable)?;
        let size = view.element().size();
        Ok(match index {
            ElementIndex::Constant(i) => (base, ((view.offset + i) * size) as i32),
            ElementIndex::Dynamic(i) => {
                let scaled = self.builder.ins().imul_imm(i, size as i64);
                let address = self.builder.ins().iadd(base, scaled);
                (address, (view.offset * size) as i32)
            }
        })
    }

    pub fn load(
        &mut self,
        registry: &VariableRegistry,
        view: VariableView,
        index: ElementIndex,
    ) -> Result<Value, CompileError> {
        let (address, offset) = self.element_address(registry, view, index)?;
        Ok(self.builder.ins().load(
            ir_type(view.element()),
            MemFlags::trusted(),
            address,
            offset,
        ))
    }

    pub fn store(
        &mut self,
        registry: &VariableRegistry,
        view: VariableView,
        index: ElementIndex,
        value: Value,
    ) -> Result<(), CompileError> {
        let (address, offset) = self.element_address(registry, view, index)?;
        self.builder
            .ins()
            .store(MemFlags::trusted(), value, address, offset);
        Ok(())
    }

    pub fn constant(&mut self, buffer: &PortBuffer, index: usize) -> Option<Value> {
        let ins = self.builder.ins();
        Some(match buffer {
            PortBuffer::Boolean(v) => ins.iconst(types::I8, i64::from(*v.get(index)?)),
            PortBuffer::Int32(v) => ins.iconst(types::I32, i64::from(*v.get(index)?)),
            PortBuffer::Int64(v) => ins.iconst(types::I64, *v.get(index)?),
            PortBuffer::Float(v) => ins.f32const(*v.get(index)?),
            PortBuffer::Double(v) => ins.f64const(*v.get(index)?),
        })
    }

    /// Opens a counted loop over `0..len`; the body is emitted until `end_loop`.
    pub fn begin_loop(&mut self, len: usize) -> LoopFrame {
        let header = self.builder.create_block();
        let body = self.builder.create_block();
        let exit = self.builder.create_block();
        self.builder.append_block_param(header, self.pointer_type);

        let zero = self.builder.ins().iconst(self.pointer_type, 0);
        self.builder.ins().jump(header, &[zero]);

        self.builder.switch_to_block(header);
        let index = self.builder.block_params(header)[0];
        let more = self
            .builder
            .ins()
            .icmp_imm(IntCC::UnsignedLessThan, index, len as i64);
        self.builder.ins().brif(more, body, &[], exit, &[]);

        self.builder.switch_to_block(body);
        LoopFrame {
            header,
            exit,
            index,
        }
    }

    pub fn end_loop(&mut self, frame: LoopFrame) {
        let next = self.builder.ins().iadd_imm(frame.index, 1);
        self.builder.ins().jump(frame.header, &[next]);
        self.builder.switch_to_block(frame.exit);
    }

    /// Copies `src` into `dst`, which must have the same length and element type.
    pub fn copy(
        &mut self,
        registry: &VariableRegistry,
        dst: VariableView,
        src: VariableView,
        unroll: bool,
    ) -> Result<(), CompileError> {
        if dst.port_type != src.port_type {
            return Err(CompileError::unsupported(
                None,
                format!("cannot copy {} into {}", src.port_type, dst.port_type),
            ));
        }
        if dst == src {
            return Ok(());
        }

        let len = dst.len();
        if unroll || len <= 1 {
            for i in 0..len {
                let value = self.load(registry, src, ElementIndex::Constant(i))?;
                self.store(registry, dst, ElementIndex::Constant(i), value)?;
            }
        } else {
            let frame = self.begin_loop(len);
            let index = ElementIndex::Dynamic(frame.index);
            let value = self.load(registry, src, index)?;
            self.store(registry, dst, index, value)?;
            self.end_loop(frame);
        }
        Ok(())
    }

    /// Calls an imported or previously declared function.
    pub fn call(&mut self, module: &mut JITModule, id: FuncId, args: &[Value]) -> Inst {
        let func = &mut *self.builder.func;
        let callee = *self
            .imports
            .entry(id)
            .or_insert_with(|| module.declare_func_in_func(id, func));
        self.builder.ins().call(callee, args)
    }

    pub fn call_results(&self, call: Inst) -> &[Value] {
        self.builder.inst_results(call)
    }

    /// Terminates the current block and finishes the function.
    pub fn finalize(mut self) {
        if !is_filled(&self.builder) {
            self.builder.ins().return_(&[]);
        }
        self.builder.seal_all_blocks();
        self.builder.finalize();
    }
}
