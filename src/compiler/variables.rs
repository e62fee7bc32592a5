use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use log::{trace, warn};

use crate::error::CompileError;
use crate::model::{PortElements, PortId, PortKey, PortType};

/// Handle to a compiler-level storage location.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(u32);

impl VariableId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a variable lives once code is emitted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VariableScope {
    /// Stack slot of one generated function. Function 0 is the map entry point; node
    /// functions are numbered from 1 in the order they are entered.
    Local { function: usize },
    /// Byte offset into the compiled map's persistent state block.
    Global { offset: usize },
    /// Buffer of the n-th declared map input.
    MapInput(usize),
    /// Buffer of the n-th declared map output.
    MapOutput(usize),
    /// Pointer parameter of a node function.
    Argument,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VariableInfo {
    pub port_type: PortType,
    pub scope: VariableScope,
}

/// Contiguous elements of one variable backing part of a port or input.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElementRun {
    pub variable: VariableId,
    pub offset: usize,
    pub len: usize,
}

const GLOBAL_ALIGN: usize = 8;

#[derive(Debug, Default)]
struct Scope {
    ports: HashMap<PortId, VariableId>,
    /// Single output elements aliased to an element of another variable.
    elements: HashMap<(PortKey, usize), (VariableId, usize)>,
}

/// Port-to-variable bindings over a stack of lexical scopes.
///
/// Lookups search from the innermost scope outwards. Pushing a scope never hides
/// existing bindings; popping discards only the popped scope's bindings. Variables
/// themselves are never freed during a compilation, only their bindings.
#[derive(Debug, Default)]
pub struct VariableRegistry {
    variables: Vec<VariableInfo>,
    scopes: Vec<Scope>,
    global_size: usize,
    functions: Vec<usize>,
    functions_entered: usize,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a variable without binding it to any port.
    pub fn allocate(&mut self, port_type: PortType, kind: VariableKind) -> VariableId {
        let scope = match kind {
            VariableKind::Local => VariableScope::Local {
                function: self.current_function(),
            },
            VariableKind::Global => {
                let offset = self.global_size;
                let size = port_type.byte_size().max(1);
                self.global_size += size.div_ceil(GLOBAL_ALIGN) * GLOBAL_ALIGN;
                VariableScope::Global { offset }
            }
            VariableKind::MapInput(index) => VariableScope::MapInput(index),
            VariableKind::MapOutput(index) => VariableScope::MapOutput(index),
            VariableKind::Argument => VariableScope::Argument,
        };

        let id = VariableId(self.variables.len() as u32);
        self.variables.push(VariableInfo { port_type, scope });
        trace!("allocated variable {id:?}: {port_type} {scope:?}");
        id
    }

    /// Returns the variable bound to `port` in any open scope, or allocates a local
    /// and binds it in the innermost scope.
    pub fn get_or_allocate(
        &mut self,
        port: PortId,
        port_type: PortType,
    ) -> Result<VariableId, CompileError> {
        if let Some(existing) = self.lookup(port) {
            return Ok(existing);
        }
        if self.scopes.is_empty() {
            return Err(CompileError::ScopeUnderflow);
        }
        let id = self.allocate(port_type, VariableKind::Local);
        self.bind(port, id)?;
        Ok(id)
    }

    pub fn lookup(&self, port: PortId) -> Option<VariableId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.ports.get(&port).copied())
    }

    /// Binds `port` to `variable` in the innermost scope, shadowing outer bindings.
    pub fn bind(&mut self, port: PortId, variable: VariableId) -> Result<(), CompileError> {
        trace!("bind {port:?} -> {variable:?} at depth {}", self.scopes.len());
        let scope = self.scopes.last_mut().ok_or(CompileError::ScopeUnderflow)?;
        scope.ports.insert(port, variable);
        Ok(())
    }

    /// Binds element `element` of output `port` to element `offset` of `variable`.
    ///
    /// The binding wins over a whole-port binding made in the same or an outer scope.
    pub fn bind_element(
        &mut self,
        port: PortKey,
        element: usize,
        variable: VariableId,
        offset: usize,
    ) -> Result<(), CompileError> {
        trace!(
            "bind {port:?}[{element}] -> {variable:?}[{offset}] at depth {}",
            self.scopes.len()
        );
        let scope = self.scopes.last_mut().ok_or(CompileError::ScopeUnderflow)?;
        scope.elements.insert((port, element), (variable, offset));
        Ok(())
    }

    /// The variable and element offset backing element `element` of output `port`.
    pub fn lookup_element(&self, port: PortKey, element: usize) -> Option<(VariableId, usize)> {
        self.scopes.iter().rev().find_map(|scope| {
            scope.elements.get(&(port, element)).copied().or_else(|| {
                scope
                    .ports
                    .get(&PortId::Output(port))
                    .map(|variable| (*variable, element))
            })
        })
    }

    /// Storage backing `elements`, in order, with adjacent elements of one variable
    /// merged into a single run. Fails with the first port that has an unbound element.
    pub fn element_runs(&self, elements: &PortElements) -> Result<Vec<ElementRun>, PortKey> {
        let mut runs: Vec<ElementRun> = Vec::new();
        for range in elements.ranges() {
            for element in range.start..range.end() {
                let (variable, offset) =
                    self.lookup_element(range.port, element).ok_or(range.port)?;
                match runs.last_mut() {
                    Some(run) if run.variable == variable && run.offset + run.len == offset => {
                        run.len += 1;
                    }
                    _ => runs.push(ElementRun {
                        variable,
                        offset,
                        len: 1,
                    }),
                }
            }
        }
        Ok(runs)
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) -> Result<(), CompileError> {
        self.scopes
            .pop()
            .map(|_| ())
            .ok_or(CompileError::ScopeUnderflow)
    }

    /// Pushes a scope that is popped again when the guard goes out of scope.
    pub fn scope(&mut self) -> ScopeGuard<'_> {
        self.push_scope();
        ScopeGuard { registry: self }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// The function locals are currently allocated in.
    pub fn current_function(&self) -> usize {
        self.functions.last().copied().unwrap_or(0)
    }

    /// Starts allocating locals for a new node function and returns its number.
    pub fn enter_function(&mut self) -> usize {
        self.functions_entered += 1;
        self.functions.push(self.functions_entered);
        self.functions_entered
    }

    pub fn leave_function(&mut self) {
        self.functions.pop();
    }

    pub fn info(&self, variable: VariableId) -> VariableInfo {
        self.variables[variable.index()]
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Bytes of persistent state needed by all global variables.
    pub fn global_size(&self) -> usize {
        self.global_size
    }
}

/// Storage class requested from [`VariableRegistry::allocate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VariableKind {
    Local,
    Global,
    MapInput(usize),
    MapOutput(usize),
    Argument,
}

pub struct ScopeGuard<'a> {
    registry: &'a mut VariableRegistry,
}

impl Deref for ScopeGuard<'_> {
    type Target = VariableRegistry;

    fn deref(&self) -> &VariableRegistry {
        self.registry
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut VariableRegistry {
        self.registry
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.registry.pop_scope() {
            warn!("scope guard found no scope to pop: {err}");
        }
    }
}
