use super::model_impl::Model;
use super::traits::StreamEndpoint;
use super::types::{NodeKey, PortElements, PortKey, PortType};
use crate::error::GraphError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapInput {
    pub name: String,
    pub node: NodeKey,
    pub port: PortKey,
    pub port_type: PortType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapOutput {
    pub name: String,
    pub elements: PortElements,
    pub port_type: PortType,
}

/// A model together with the ordered inputs and outputs of the function compiled from it.
#[derive(Debug)]
pub struct Map {
    name: String,
    model: Model,
    inputs: Vec<MapInput>,
    outputs: Vec<MapOutput>,
}

impl Map {
    /// Declares a map over `model`.
    ///
    /// Each input names an input node; each output names the elements that are copied
    /// into the corresponding output buffer.
    pub fn new<I, O, S, T>(
        name: impl Into<String>,
        model: Model,
        inputs: I,
        outputs: O,
    ) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = (S, NodeKey)>,
        O: IntoIterator<Item = (T, PortElements)>,
        S: Into<String>,
        T: Into<String>,
    {
        let mut map_inputs: Vec<MapInput> = Vec::new();
        for (input_name, node) in inputs {
            let data = model.node(node)?;
            let port_type = data
                .node
                .as_map_input()
                .ok_or(GraphError::NotAMapInput { node })?;
            if map_inputs.iter().any(|input| input.node == node) {
                return Err(GraphError::DuplicateMapInput { node });
            }
            map_inputs.push(MapInput {
                name: input_name.into(),
                node,
                port: model.output_port(node, 0)?,
                port_type,
            });
        }

        let mut map_outputs = Vec::new();
        for (output_name, elements) in outputs {
            let port_type = model.elements_type(&elements)?;
            map_outputs.push(MapOutput {
                name: output_name.into(),
                elements,
                port_type,
            });
        }

        Ok(Self {
            name: name.into(),
            model,
            inputs: map_inputs,
            outputs: map_outputs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn inputs(&self) -> &[MapInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[MapOutput] {
        &self.outputs
    }

    pub fn input_types(&self) -> Vec<PortType> {
        self.inputs.iter().map(|input| input.port_type).collect()
    }

    pub fn output_types(&self) -> Vec<PortType> {
        self.outputs.iter().map(|output| output.port_type).collect()
    }

    /// Streaming sources and sinks contained in the model.
    pub fn stream_endpoints(&self) -> Vec<(NodeKey, StreamEndpoint)> {
        self.model
            .nodes()
            .filter_map(|(key, data)| data.node.stream_endpoint().map(|e| (key, e)))
            .collect()
    }
}
