use std::collections::HashSet;

use cranelift::prelude::FunctionBuilderContext;
use cranelift_codegen::ir::{Function, UserFuncName};
use cranelift_module::{Linkage, Module};
use log::{debug, trace};

use super::backend::{Backend, BackendSettings};
use super::emitter::{FunctionEmitter, VariableView};
use super::node_compiler::NodeCompiler;
use super::regions::RegionManager;
use super::variables::{VariableKind, VariableRegistry};
use crate::error::CompileError;
use crate::model::{Map, Model, NodeKey, PortId, PortType};
use crate::runtime::{CompiledMap, MapFunction};

/// Compiler configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapCompilerOptions {
    /// Prefix of every generated symbol.
    pub module_name: String,
    /// Name of the generated entry point.
    pub map_function_name: String,
    /// Emit every node body straight into the map function.
    pub inline_nodes: bool,
    /// Unroll element-wise loops.
    pub inline_loops: bool,
    pub backend: BackendSettings,
}

impl Default for MapCompilerOptions {
    fn default() -> Self {
        Self {
            module_name: "mapjit".to_string(),
            map_function_name: "predict".to_string(),
            inline_nodes: false,
            inline_loops: false,
            backend: BackendSettings::default(),
        }
    }
}

impl MapCompilerOptions {
    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    pub fn with_map_function_name(mut self, name: impl Into<String>) -> Self {
        self.map_function_name = name.into();
        self
    }

    pub fn with_inline_nodes(mut self, inline: bool) -> Self {
        self.inline_nodes = inline;
        self
    }

    pub fn with_inline_loops(mut self, inline: bool) -> Self {
        self.inline_loops = inline;
        self
    }

    pub fn with_backend(mut self, backend: BackendSettings) -> Self {
        self.backend = backend;
        self
    }
}

/// Bookkeeping counters of one compilation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CompileStats {
    pub nodes_compiled: usize,
    pub nodes_pruned: usize,
    pub regions_created: usize,
    pub regions_merged: usize,
    pub variables_allocated: usize,
    pub node_functions: usize,
}

/// Compiles maps into native functions.
#[derive(Debug, Default)]
pub struct MapCompiler {
    options: MapCompilerOptions,
}

impl MapCompiler {
    pub fn new(options: MapCompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MapCompilerOptions {
        &self.options
    }

    pub fn compile(&mut self, map: &Map) -> Result<CompiledMap, CompileError> {
        let function_name = self.options.map_function_name.clone();
        self.compile_as(map, &function_name)
    }

    /// Compiles `map` into an exported function called `function_name`.
    pub fn compile_as(
        &mut self,
        map: &Map,
        function_name: &str,
    ) -> Result<CompiledMap, CompileError> {
        let model = map.model();
        let order = model.topological_order()?;
        let live = live_nodes(map)?;
        debug!(
            "compiling map '{}' as {function_name}: {} nodes, {} live",
            map.name(),
            order.len(),
            live.len()
        );

        let mut backend =
            Backend::new(&self.options.backend).map_err(|e| CompileError::backend(None, e))?;
        let (function, state_size, stats) =
            match self.emit_map(map, function_name, &order, &live, &mut backend) {
                Ok(emitted) => emitted,
                Err(err) => {
                    // SAFETY: no pointer into the module's code has been handed out.
                    unsafe { backend.into_module().free_memory() };
                    return Err(err);
                }
            };

        debug!("compiled map '{}': {stats:?}", map.name());
        Ok(CompiledMap::new(
            map,
            function_name,
            backend.into_module(),
            function,
            state_size,
            stats,
        ))
    }

    /// Emits and finalizes the map function, returning it with the state size it needs.
    fn emit_map(
        &self,
        map: &Map,
        function_name: &str,
        order: &[NodeKey],
        live: &HashSet<NodeKey>,
        backend: &mut Backend,
    ) -> Result<(MapFunction, usize, CompileStats), CompileError> {
        let model = map.model();
        let pointer_type = backend.pointer_type;
        let signature = FunctionEmitter::map_signature(&backend.module, pointer_type);
        let func_id = backend
            .module
            .declare_function(function_name, Linkage::Export, &signature)
            .map_err(|e| CompileError::backend(None, e))?;

        let mut func =
            Function::with_name_signature(UserFuncName::user(0, func_id.as_u32()), signature);
        let mut builder_context = FunctionBuilderContext::new();
        let mut registry = VariableRegistry::new();
        let mut regions = RegionManager::new();
        let mut stats = CompileStats::default();
        {
            let mut emitter = FunctionEmitter::for_map(
                &mut func,
                &mut builder_context,
                pointer_type,
                map.inputs().len(),
                map.outputs().len(),
            );
            let mut scope = registry.scope();

            for (index, input) in map.inputs().iter().enumerate() {
                let variable = scope.allocate(input.port_type, VariableKind::MapInput(index));
                scope.bind(PortId::Output(input.port), variable)?;
            }

            for &node in order {
                if !live.contains(&node) {
                    stats.nodes_pruned += 1;
                    trace!("pruned {node:?}");
                    continue;
                }
                self.compile_node(
                    model,
                    node,
                    &mut scope,
                    &mut regions,
                    &mut emitter,
                    backend,
                    &mut stats,
                )?;
            }

            for (index, output) in map.outputs().iter().enumerate() {
                let target = scope.allocate(output.port_type, VariableKind::MapOutput(index));
                let runs = scope.element_runs(&output.elements).map_err(|port| {
                    CompileError::UnboundPort {
                        node: model.port(port).map(|p| p.node).unwrap_or_default(),
                        port,
                    }
                })?;
                let mut offset = 0;
                for run in runs {
                    let run_type = PortType::new(output.port_type.element, run.len);
                    emitter.copy(
                        &scope,
                        VariableView::new(target, offset, run_type),
                        VariableView::new(run.variable, run.offset, run_type),
                        self.options.inline_loops,
                    )?;
                    offset += run.len;
                }
            }

            stats.variables_allocated = scope.len();
            drop(scope);
            emitter.finalize();
        }
        stats.regions_created = regions.regions_created();
        stats.regions_merged = regions.regions_merged();

        let mut context = backend.module.make_context();
        context.func = func;
        backend
            .module
            .define_function(func_id, &mut context)
            .map_err(|e| CompileError::backend(None, e))?;
        backend.module.clear_context(&mut context);
        backend
            .module
            .finalize_definitions()
            .map_err(|e| CompileError::backend(None, e))?;

        let code = backend.module.get_finalized_function(func_id);
        // SAFETY: the function was declared with the map signature built above.
        let function = unsafe { std::mem::transmute::<*const u8, MapFunction>(code) };
        Ok((function, registry.global_size(), stats))
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_node(
        &self,
        model: &Model,
        node: NodeKey,
        registry: &mut VariableRegistry,
        regions: &mut RegionManager,
        emitter: &mut FunctionEmitter<'_>,
        backend: &mut Backend,
        stats: &mut CompileStats,
    ) -> Result<(), CompileError> {
        let data = model.node(node)?;
        self.on_begin_compile_node(model, node, registry)?;

        let parents = model.parent_nodes(node);
        let merged = data.node.allows_region_merge()
            && regions.try_merge_node_region(node, &parents, emitter.builder());
        if !merged {
            regions.new_node_region(node, emitter.builder());
        }

        let inline = self.options.inline_nodes || data.node.should_compile_inline();
        {
            let mut compiler = NodeCompiler::new(
                node,
                model,
                &self.options,
                registry,
                Some(&mut *regions),
                emitter,
                backend,
                stats,
            );
            if inline {
                data.node.compile(&mut compiler)?;
            } else {
                compiler.compile_out_of_line(data.node.as_ref())?;
            }
        }

        self.on_end_compile_node(node, regions, emitter);
        stats.nodes_compiled += 1;
        Ok(())
    }

    /// Checks that every element the node reads is already bound.
    fn on_begin_compile_node(
        &self,
        model: &Model,
        node: NodeKey,
        registry: &VariableRegistry,
    ) -> Result<(), CompileError> {
        let data = model.node(node)?;
        debug!("compiling {} node {node:?}", data.node.type_name());
        for elements in &data.inputs {
            registry
                .element_runs(elements)
                .map_err(|port| CompileError::UnboundPort { node, port })?;
        }
        Ok(())
    }

    /// Records where the node's code ended.
    fn on_end_compile_node(
        &self,
        node: NodeKey,
        regions: &mut RegionManager,
        emitter: &mut FunctionEmitter<'_>,
    ) {
        regions.close_node(node, emitter.builder());
        trace!("{node:?} placed in region {:?}", regions.region_of(node));
    }
}

/// Nodes whose results reach a map output or a side-effecting node, plus map inputs.
fn live_nodes(map: &Map) -> Result<HashSet<NodeKey>, CompileError> {
    let model = map.model();
    let mut pending = Vec::new();
    for output in map.outputs() {
        for range in output.elements.ranges() {
            pending.push(model.port(range.port)?.node);
        }
    }
    pending.extend(
        model
            .nodes()
            .filter(|(_, data)| data.node.is_side_effecting())
            .map(|(key, _)| key),
    );
    pending.extend(map.inputs().iter().map(|input| input.node));

    let mut live = HashSet::new();
    while let Some(node) = pending.pop() {
        if live.insert(node) {
            pending.extend(model.parent_nodes(node));
        }
    }
    Ok(live)
}
