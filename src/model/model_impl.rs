use std::fmt;

use arrayvec::ArrayVec;
use slotmap::SlotMap;

use super::topology::{topological_sort, TopologyError};
use super::traits::CompilableNode;
use super::types::{NodeKey, PortElements, PortKey, PortRange, PortType, MAX_NODE_PORTS};
use crate::error::GraphError;

pub struct NodeData {
    pub node: Box<dyn CompilableNode>,
    pub inputs: ArrayVec<PortElements, MAX_NODE_PORTS>,
    pub input_types: ArrayVec<PortType, MAX_NODE_PORTS>,
    pub outputs: ArrayVec<PortKey, MAX_NODE_PORTS>,
}

impl fmt::Debug for NodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeData")
            .field("node", &self.node.type_name())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutputPortData {
    pub node: NodeKey,
    pub index: usize,
    pub port_type: PortType,
}

/// A dataflow graph of compilable nodes connected through typed ports.
///
/// Input ports can only reference output ports that already exist, so a model built with
/// `add_node` alone is acyclic. `reconnect` rewires an input afterwards and may close a
/// cycle; `topological_order` rejects such graphs.
#[derive(Debug, Default)]
pub struct Model {
    nodes: SlotMap<NodeKey, NodeData>,
    ports: SlotMap<PortKey, OutputPortData>,
    insertion_order: Vec<NodeKey>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node wired to `inputs`, allocating one output port per declared output type.
    pub fn add_node<N: CompilableNode + 'static>(
        &mut self,
        node: N,
        inputs: Vec<PortElements>,
    ) -> Result<NodeKey, GraphError> {
        let input_types = node.input_types();
        let output_types = node.output_types();

        if inputs.len() != input_types.len() {
            return Err(GraphError::InputCountMismatch {
                node_type: node.type_name(),
                expected: input_types.len(),
                found: inputs.len(),
            });
        }

        for (elements, expected) in inputs.iter().zip(input_types.iter()) {
            self.validate_elements(elements, *expected)?;
        }

        let node_key = self.nodes.insert(NodeData {
            node: Box::new(node),
            inputs: inputs.into_iter().collect(),
            input_types,
            outputs: ArrayVec::new(),
        });

        for (index, port_type) in output_types.iter().enumerate() {
            let port = self.ports.insert(OutputPortData {
                node: node_key,
                index,
                port_type: *port_type,
            });
            self.nodes[node_key].outputs.push(port);
        }

        self.insertion_order.push(node_key);
        Ok(node_key)
    }

    /// Rewires input `index` of `node` to read `elements` instead.
    pub fn reconnect(
        &mut self,
        node: NodeKey,
        index: usize,
        elements: PortElements,
    ) -> Result<(), GraphError> {
        let expected = *self
            .nodes
            .get(node)
            .ok_or(GraphError::UnknownNode(node))?
            .input_types
            .get(index)
            .ok_or(GraphError::NoSuchInput { node, index })?;

        self.validate_elements(&elements, expected)?;
        self.nodes[node].inputs[index] = elements;
        Ok(())
    }

    /// Checks that `elements` reference existing ports and form a value of type `expected`.
    pub fn validate_elements(
        &self,
        elements: &PortElements,
        expected: PortType,
    ) -> Result<(), GraphError> {
        for range in elements.ranges() {
            let port = self.port(range.port)?;
            if port.port_type.element != expected.element {
                return Err(GraphError::PortTypeMismatch {
                    expected,
                    found: PortType::new(port.port_type.element, elements.len()),
                });
            }
            if range.end() > port.port_type.size {
                return Err(GraphError::RangeOutOfBounds {
                    port: range.port,
                    start: range.start,
                    end: range.end(),
                    size: port.port_type.size,
                });
            }
        }

        if elements.len() != expected.size {
            return Err(GraphError::PortTypeMismatch {
                expected,
                found: PortType::new(expected.element, elements.len()),
            });
        }

        Ok(())
    }

    /// Derives the type of a run of elements (used for map outputs).
    pub fn elements_type(&self, elements: &PortElements) -> Result<PortType, GraphError> {
        let first = elements.ranges().first().ok_or(GraphError::EmptyElements)?;
        let element = self.port(first.port)?.port_type.element;
        let port_type = PortType::new(element, elements.len());
        self.validate_elements(elements, port_type)?;
        Ok(port_type)
    }

    pub fn node(&self, key: NodeKey) -> Result<&NodeData, GraphError> {
        self.nodes.get(key).ok_or(GraphError::UnknownNode(key))
    }

    pub fn port(&self, key: PortKey) -> Result<&OutputPortData, GraphError> {
        self.ports.get(key).ok_or(GraphError::UnknownPort(key))
    }

    pub fn output_port(&self, node: NodeKey, index: usize) -> Result<PortKey, GraphError> {
        self.node(node)?
            .outputs
            .get(index)
            .copied()
            .ok_or(GraphError::NoSuchOutput { node, index })
    }

    /// All elements of output `index` of `node`.
    pub fn output(&self, node: NodeKey, index: usize) -> Result<PortElements, GraphError> {
        let port = self.output_port(node, index)?;
        let size = self.port(port)?.port_type.size;
        Ok(PortRange::new(port, 0, size).into())
    }

    /// Elements `start..start + len` of output `index` of `node`.
    pub fn output_range(
        &self,
        node: NodeKey,
        index: usize,
        start: usize,
        len: usize,
    ) -> Result<PortElements, GraphError> {
        let port = self.output_port(node, index)?;
        let size = self.port(port)?.port_type.size;
        if start + len > size {
            return Err(GraphError::RangeOutOfBounds {
                port,
                start,
                end: start + len,
                size,
            });
        }
        Ok(PortRange::new(port, start, len).into())
    }

    /// Distinct nodes feeding `node`'s inputs, in order of first use.
    pub fn parent_nodes(&self, node: NodeKey) -> Vec<NodeKey> {
        let mut parents = Vec::new();
        if let Some(data) = self.nodes.get(node) {
            for range in data.inputs.iter().flat_map(|e| e.ranges()) {
                if let Some(port) = self.ports.get(range.port) {
                    if !parents.contains(&port.node) {
                        parents.push(port.node);
                    }
                }
            }
        }
        parents
    }

    /// Nodes in dependency order: every node comes after the producers of its inputs.
    pub fn topological_order(&self) -> Result<Vec<NodeKey>, GraphError> {
        topological_sort(self.insertion_order.iter().copied(), |node| {
            self.parent_nodes(*node)
        })
        .map_err(|TopologyError::CycleDetected { node }| GraphError::CycleDetected { node })
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeKey, &NodeData)> + '_ {
        self.insertion_order
            .iter()
            .map(move |&key| (key, &self.nodes[key]))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
