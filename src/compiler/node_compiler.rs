use cranelift::prelude::*;
use cranelift_codegen::ir::{Function, UserFuncName};
use cranelift_module::{Linkage, Module};
use log::trace;

use super::backend::Backend;
use super::emitter::{is_filled, ElementIndex, FunctionEmitter, VariableView};
use super::regions::RegionManager;
use super::variables::{VariableId, VariableKind, VariableRegistry};
use super::{CompileStats, MapCompilerOptions};
use crate::error::{CompileError, GraphError};
use crate::model::{CompilableNode, Model, NodeKey, PortElements, PortId, PortKey, PortType};
use crate::runtime::PortBuffer;

/// Everything a node may touch while emitting its code.
///
/// One `NodeCompiler` is created per node. When the node is compiled into its own
/// function, region management is unavailable and the node's ports resolve to the
/// function's arguments.
pub struct NodeCompiler<'c, 'f> {
    node: NodeKey,
    model: &'c Model,
    options: &'c MapCompilerOptions,
    registry: &'c mut VariableRegistry,
    regions: Option<&'c mut RegionManager>,
    emitter: &'c mut FunctionEmitter<'f>,
    backend: &'c mut Backend,
    stats: &'c mut CompileStats,
}

impl<'c, 'f> NodeCompiler<'c, 'f> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node: NodeKey,
        model: &'c Model,
        options: &'c MapCompilerOptions,
        registry: &'c mut VariableRegistry,
        regions: Option<&'c mut RegionManager>,
        emitter: &'c mut FunctionEmitter<'f>,
        backend: &'c mut Backend,
        stats: &'c mut CompileStats,
    ) -> Self {
        Self {
            node,
            model,
            options,
            registry,
            regions,
            emitter,
            backend,
            stats,
        }
    }

    pub fn node(&self) -> NodeKey {
        self.node
    }

    pub fn options(&self) -> &MapCompilerOptions {
        self.options
    }

    pub fn model(&self) -> &Model {
        self.model
    }

    /// True while emitting a separate node function.
    pub fn is_out_of_line(&self) -> bool {
        self.regions.is_none()
    }

    // Variables

    pub fn variable_for_port(&self, port: PortKey) -> Option<VariableId> {
        self.registry.lookup(PortId::Output(port))
    }

    /// Binds output `port` to `variable`.
    ///
    /// Aliases only survive in the map function, so node functions must write into
    /// the variables they are handed instead.
    pub fn set_variable_for_port(
        &mut self,
        port: PortKey,
        variable: VariableId,
    ) -> Result<(), CompileError> {
        self.check_aliasing()?;
        self.registry.bind(PortId::Output(port), variable)
    }

    /// The variable and element offset backing element `index` of `elements`.
    pub fn variable_for_element(
        &self,
        elements: &PortElements,
        index: usize,
    ) -> Result<(VariableId, usize), CompileError> {
        let (port, element) = elements.locate(index).ok_or(GraphError::RangeOutOfBounds {
            port: PortKey::default(),
            start: index,
            end: index + 1,
            size: elements.len(),
        })?;
        self.registry
            .lookup_element(port, element)
            .ok_or(CompileError::UnboundPort {
                node: self.node,
                port,
            })
    }

    /// Binds element `element` of output `port` to element `offset` of `variable`.
    pub fn set_variable_for_element(
        &mut self,
        port: PortKey,
        element: usize,
        variable: VariableId,
        offset: usize,
    ) -> Result<(), CompileError> {
        self.check_aliasing()?;
        let size = self.model.port(port)?.port_type.size;
        if element >= size {
            return Err(GraphError::RangeOutOfBounds {
                port,
                start: element,
                end: element + 1,
                size,
            }
            .into());
        }
        let info = self.registry.info(variable);
        if offset >= info.port_type.size {
            return Err(CompileError::unsupported(
                Some(self.node),
                format!("{variable:?} has no element {offset}"),
            ));
        }
        self.registry.bind_element(port, element, variable, offset)
    }

    fn check_aliasing(&self) -> Result<(), CompileError> {
        if self.is_out_of_line() {
            return Err(CompileError::unsupported(
                Some(self.node),
                "port aliases need the node to be compiled inline",
            ));
        }
        Ok(())
    }

    pub fn output_port(&self, index: usize) -> Result<PortKey, CompileError> {
        Ok(self.model.output_port(self.node, index)?)
    }

    pub fn input_type(&self, index: usize) -> Result<PortType, CompileError> {
        let node = self.node;
        self.model
            .node(node)?
            .input_types
            .get(index)
            .copied()
            .ok_or(CompileError::Graph(GraphError::NoSuchInput { node, index }))
    }

    /// Variable for output `index`, allocated as a local in the current scope on first use.
    pub fn output_variable(&mut self, index: usize) -> Result<VariableView, CompileError> {
        let port = self.output_port(index)?;
        let port_type = self.model.port(port)?.port_type;
        let variable = self.registry.get_or_allocate(PortId::Output(port), port_type)?;
        Ok(VariableView::new(variable, 0, port_type))
    }

    /// Elements read by input `index`.
    ///
    /// Inputs backed by one contiguous run of a variable alias it. Anything else is
    /// gathered into a local, which is bound to the input so later calls reuse it.
    pub fn input_view(&mut self, index: usize) -> Result<VariableView, CompileError> {
        let port_type = self.input_type(index)?;
        let id = PortId::Input(self.node, index);
        if let Some(variable) = self.registry.lookup(id) {
            return Ok(VariableView::new(variable, 0, port_type));
        }

        let node = self.node;
        let model = self.model;
        let elements = &model.node(node)?.inputs[index];
        let runs = self
            .registry
            .element_runs(elements)
            .map_err(|port| CompileError::UnboundPort { node, port })?;
        if let [run] = runs.as_slice() {
            return Ok(VariableView::new(run.variable, run.offset, port_type));
        }

        let gathered = self.registry.allocate(port_type, VariableKind::Local);
        let mut offset = 0;
        for run in runs {
            let run_type = PortType::new(port_type.element, run.len);
            self.copy(
                VariableView::new(gathered, offset, run_type),
                VariableView::new(run.variable, run.offset, run_type),
            )?;
            offset += run.len;
        }
        trace!("gathered input {index} of {node:?} into {gathered:?}");
        self.registry.bind(id, gathered)?;
        Ok(VariableView::new(gathered, 0, port_type))
    }

    pub fn allocate_local(&mut self, port_type: PortType) -> VariableView {
        let variable = self.registry.allocate(port_type, VariableKind::Local);
        VariableView::new(variable, 0, port_type)
    }

    /// Allocates persistent state, zeroed when the compiled map is created or reset.
    pub fn allocate_global(&mut self, port_type: PortType) -> VariableView {
        let variable = self.registry.allocate(port_type, VariableKind::Global);
        VariableView::new(variable, 0, port_type)
    }

    /// Runs `f` inside a nested variable scope, popping it on every exit path.
    pub fn with_scope<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, CompileError>,
    ) -> Result<R, CompileError> {
        self.registry.push_scope();
        let result = f(self);
        let popped = self.registry.pop_scope();
        let value = result?;
        popped?;
        Ok(value)
    }

    // Regions

    pub fn new_node_region(&mut self) -> Result<(), CompileError> {
        let node = self.node;
        let regions = self
            .regions
            .as_deref_mut()
            .ok_or(CompileError::RegionUnavailable { node })?;
        regions.new_node_region(node, self.emitter.builder());
        Ok(())
    }

    pub fn try_merge_node_region(&mut self) -> bool {
        let parents = self.model.parent_nodes(self.node);
        match self.regions.as_deref_mut() {
            Some(regions) => {
                regions.try_merge_node_region(self.node, &parents, self.emitter.builder())
            }
            None => false,
        }
    }

    pub fn try_merge_node_regions(&mut self, dest: NodeKey, src: NodeKey) -> bool {
        match self.regions.as_deref_mut() {
            Some(regions) => regions.try_merge_node_regions(dest, src, self.emitter.builder()),
            None => false,
        }
    }

    // Emission

    pub fn builder(&mut self) -> &mut FunctionBuilder<'f> {
        self.emitter.builder()
    }

    pub fn timestamp(&self) -> Value {
        self.emitter.timestamp()
    }

    pub fn address(&mut self, view: VariableView) -> Result<Value, CompileError> {
        let node = self.node;
        self.emitter
            .view_address(self.registry, view)
            .map_err(|err| attribute(err, node))
    }

    pub fn load(&mut self, view: VariableView, index: ElementIndex) -> Result<Value, CompileError> {
        let node = self.node;
        self.emitter
            .load(self.registry, view, index)
            .map_err(|err| attribute(err, node))
    }

    pub fn store(
        &mut self,
        view: VariableView,
        index: ElementIndex,
        value: Value,
    ) -> Result<(), CompileError> {
        let node = self.node;
        self.emitter
            .store(self.registry, view, index, value)
            .map_err(|err| attribute(err, node))
    }

    pub fn constant(&mut self, buffer: &PortBuffer, index: usize) -> Result<Value, CompileError> {
        let node = self.node;
        self.emitter.constant(buffer, index).ok_or_else(|| {
            CompileError::unsupported(Some(node), format!("constant has no element {index}"))
        })
    }

    pub fn copy(&mut self, dst: VariableView, src: VariableView) -> Result<(), CompileError> {
        let node = self.node;
        self.emitter
            .copy(self.registry, dst, src, self.options.inline_loops)
            .map_err(|err| attribute(err, node))
    }

    /// Emits `body` once per element in `0..len`.
    ///
    /// The body is unrolled when loop inlining is enabled or there is at most one
    /// element; otherwise it becomes a counted loop whose body runs in a nested scope.
    /// Resolve output variables before calling this, since bindings made inside a loop
    /// body do not outlive it.
    pub fn for_each_element(
        &mut self,
        len: usize,
        mut body: impl FnMut(&mut Self, ElementIndex) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        if self.options.inline_loops || len <= 1 {
            for i in 0..len {
                body(self, ElementIndex::Constant(i))?;
            }
            return Ok(());
        }

        let frame = self.emitter.begin_loop(len);
        let index = ElementIndex::Dynamic(frame.index);
        self.with_scope(|ctx| body(ctx, index))?;
        self.emitter.end_loop(frame);
        Ok(())
    }

    /// Emits `then` behind a branch on the boolean `condition`.
    pub fn if_then(
        &mut self,
        condition: Value,
        then: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let builder = self.emitter.builder();
        let then_block = builder.create_block();
        let merge_block = builder.create_block();
        builder.ins().brif(condition, then_block, &[], merge_block, &[]);
        builder.switch_to_block(then_block);

        self.with_scope(then)?;

        let builder = self.emitter.builder();
        if !is_filled(builder) {
            builder.ins().jump(merge_block, &[]);
        }
        builder.switch_to_block(merge_block);
        Ok(())
    }

    /// Asks the source callback for `view`'s element type to fill `view`.
    /// Returns a boolean that is set when new data arrived.
    pub fn invoke_input(&mut self, view: VariableView) -> Result<Value, CompileError> {
        let id = self.backend.imports.invoke_input[view.element().index()];
        let call = self.call_runtime(id, view)?;
        Ok(self.emitter.call_results(call)[0])
    }

    /// Hands `view` to the sink callback for its element type.
    pub fn invoke_output(&mut self, view: VariableView) -> Result<(), CompileError> {
        let id = self.backend.imports.invoke_output[view.element().index()];
        self.call_runtime(id, view)?;
        Ok(())
    }

    pub fn notify_lag(&mut self, lag: Value) {
        let id = self.backend.imports.lag_notification;
        let callbacks = self.emitter.callbacks();
        self.emitter.call(&mut self.backend.module, id, &[callbacks, lag]);
    }

    fn call_runtime(
        &mut self,
        id: cranelift_module::FuncId,
        view: VariableView,
    ) -> Result<codegen::ir::Inst, CompileError> {
        let address = self.address(view)?;
        let pointer_type = self.emitter.pointer_type();
        let len = self
            .emitter
            .builder()
            .ins()
            .iconst(pointer_type, view.len() as i64);
        let callbacks = self.emitter.callbacks();
        Ok(self
            .emitter
            .call(&mut self.backend.module, id, &[callbacks, address, len]))
    }

    /// Emits `node` as its own function and calls it from the current position.
    ///
    /// The caller passes one pointer per input and output port. Inside the function a
    /// nested scope binds those ports to the arguments, shadowing the caller's bindings.
    pub(crate) fn compile_out_of_line(
        &mut self,
        node: &dyn CompilableNode,
    ) -> Result<(), CompileError> {
        let model = self.model;
        let data = model.node(self.node)?;

        let mut ports = Vec::with_capacity(data.input_types.len() + data.outputs.len());
        let mut addresses = Vec::with_capacity(ports.capacity());
        for index in 0..data.input_types.len() {
            let view = self.input_view(index)?;
            addresses.push(self.address(view)?);
            ports.push((PortId::Input(self.node, index), view.port_type));
        }
        for index in 0..data.outputs.len() {
            let view = self.output_variable(index)?;
            addresses.push(self.address(view)?);
            ports.push((PortId::Output(data.outputs[index]), view.port_type));
        }

        let name = format!(
            "{}_{}_{}",
            self.options.module_name,
            node.type_name(),
            self.stats.node_functions
        );
        self.stats.node_functions += 1;

        let pointer_type = self.emitter.pointer_type();
        let signature =
            FunctionEmitter::node_signature(&self.backend.module, pointer_type, ports.len());
        let func_id = self
            .backend
            .module
            .declare_function(&name, Linkage::Local, &signature)
            .map_err(|e| CompileError::backend(Some(self.node), e))?;
        trace!("compiling {:?} out of line as {name}", self.node);

        let mut func =
            Function::with_name_signature(UserFuncName::user(0, func_id.as_u32()), signature);
        let mut context = FunctionBuilderContext::new();
        {
            let function = self.registry.enter_function();
            let (mut emitter, arguments) =
                FunctionEmitter::for_node(&mut func, &mut context, pointer_type, function);

            self.registry.push_scope();
            let result = self.emit_node_function(node, &mut emitter, &ports, &arguments);
            let popped = self.registry.pop_scope();
            self.registry.leave_function();
            result?;
            popped?;

            emitter.finalize();
        }

        let mut context = self.backend.module.make_context();
        context.func = func;
        self.backend
            .module
            .define_function(func_id, &mut context)
            .map_err(|e| CompileError::backend(Some(self.node), e))?;
        self.backend.module.clear_context(&mut context);

        let mut args = vec![
            self.emitter.callbacks(),
            self.emitter.state(),
            self.emitter.timestamp(),
        ];
        args.extend(addresses);
        self.emitter.call(&mut self.backend.module, func_id, &args);
        Ok(())
    }

    fn emit_node_function(
        &mut self,
        node: &dyn CompilableNode,
        emitter: &mut FunctionEmitter<'_>,
        ports: &[(PortId, PortType)],
        arguments: &[Value],
    ) -> Result<(), CompileError> {
        for ((port, port_type), value) in ports.iter().zip(arguments) {
            let variable = self.registry.allocate(*port_type, VariableKind::Argument);
            emitter.bind_argument(variable, *value);
            self.registry.bind(*port, variable)?;
        }

        let mut nested = NodeCompiler::new(
            self.node,
            self.model,
            self.options,
            self.registry,
            None,
            emitter,
            self.backend,
            self.stats,
        );
        node.compile(&mut nested)
    }
}

/// Names `node` in emitter errors that were raised without one.
fn attribute(err: CompileError, node: NodeKey) -> CompileError {
    match err {
        CompileError::Unsupported { node: None, reason } => {
            CompileError::unsupported(Some(node), reason)
        }
        other => other,
    }
}
