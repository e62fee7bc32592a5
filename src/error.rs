//! Error types for graph construction, compilation and execution.

use thiserror::Error;

use crate::model::{ElementType, NodeKey, PortKey, PortType};

/// Errors raised while building or validating a model or map.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeKey),

    #[error("unknown output port {0:?}")]
    UnknownPort(PortKey),

    #[error("node {node:?} has no output port {index}")]
    NoSuchOutput { node: NodeKey, index: usize },

    #[error("node {node:?} has no input port {index}")]
    NoSuchInput { node: NodeKey, index: usize },

    #[error("port type mismatch: expected {expected}, found {found}")]
    PortTypeMismatch { expected: PortType, found: PortType },

    #[error("elements {start}..{end} exceed port {port:?} of size {size}")]
    RangeOutOfBounds {
        port: PortKey,
        start: usize,
        end: usize,
        size: usize,
    },

    #[error("{node_type} expects {expected} inputs, got {found}")]
    InputCountMismatch {
        node_type: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("port elements are empty")]
    EmptyElements,

    #[error("node {node:?} is not an input node")]
    NotAMapInput { node: NodeKey },

    #[error("node {node:?} is declared as a map input more than once")]
    DuplicateMapInput { node: NodeKey },

    #[error("cycle detected at node {node:?}")]
    CycleDetected { node: NodeKey },
}

/// Failures reported by the Cranelift code generation backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("invalid backend setting: {0}")]
    Settings(String),

    #[error("target ISA unavailable: {0}")]
    Isa(String),

    #[error("target {0} cannot be executed in-process")]
    UnsupportedTarget(String),

    #[error(transparent)]
    Module(#[from] cranelift_module::ModuleError),
}

/// Errors that abort a `MapCompiler::compile` call.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("node {node:?} reads port {port:?}, which has no bound variable")]
    UnboundPort { node: NodeKey, port: PortKey },

    #[error("input node {node:?} is not declared as a map input")]
    UnboundMapInput { node: NodeKey },

    #[error("scope stack underflow: no scope to pop")]
    ScopeUnderflow,

    #[error("cannot create a code region for node {node:?}")]
    RegionUnavailable { node: NodeKey },

    #[error("unsupported{}: {reason}", node_suffix(.node))]
    Unsupported {
        node: Option<NodeKey>,
        reason: String,
    },

    #[error("backend error{}: {source}", node_suffix(.node))]
    Backend {
        node: Option<NodeKey>,
        source: BackendError,
    },
}

impl CompileError {
    pub(crate) fn unsupported(node: Option<NodeKey>, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            node,
            reason: reason.into(),
        }
    }

    pub(crate) fn backend(node: Option<NodeKey>, source: impl Into<BackendError>) -> Self {
        Self::Backend {
            node,
            source: source.into(),
        }
    }
}

fn node_suffix(node: &Option<NodeKey>) -> String {
    match node {
        Some(node) => format!(" in node {node:?}"),
        None => String::new(),
    }
}

/// Misuse of the callback registration surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("callbacks for {element} are already registered")]
    AlreadyInitialized { element: ElementType },

    #[error("map has no source or sink of element type {element}")]
    NoStreamingNode { element: ElementType },
}

/// Errors raised when invoking a compiled map.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("map expects {expected} inputs, got {found}")]
    InputCount { expected: usize, found: usize },

    #[error("input {index} expects {expected}, got {found}")]
    InputMismatch {
        index: usize,
        expected: PortType,
        found: PortType,
    },

    #[error("map has {inputs} inputs and {outputs} outputs, expected exactly one of each")]
    NotSingleInputOutput { inputs: usize, outputs: usize },

    #[error("output {index} holds {found} elements, requested {requested}")]
    ElementMismatch {
        index: usize,
        requested: ElementType,
        found: ElementType,
    },
}
