use cranelift_jit::JITModule;
use log::debug;

use super::buffer::{Element, PortBuffer};
use super::callbacks::CallbackRegistry;
use crate::compiler::CompileStats;
use crate::error::{CallbackError, ExecutionError};
use crate::model::{ElementType, Map, PortType, StreamEndpoint};

/// Native signature of a compiled map:
/// `(callbacks, state, inputs, outputs, timestamp)`.
pub type MapFunction = unsafe extern "C" fn(
    *mut CallbackRegistry,
    *mut u8,
    *const *const u8,
    *const *mut u8,
    f64,
);

/// A map compiled to native code, together with its persistent state and callbacks.
///
/// Every entry point takes `&mut self`, so one instance can never step on two threads
/// at once and callbacks cannot be swapped while a step is running.
pub struct CompiledMap {
    name: String,
    function_name: String,
    module: Option<JITModule>,
    function: MapFunction,
    input_types: Vec<PortType>,
    output_types: Vec<PortType>,
    streams: Vec<StreamEndpoint>,
    state: Vec<u64>,
    callbacks: CallbackRegistry,
    stats: CompileStats,
}

impl CompiledMap {
    pub(crate) fn new(
        map: &Map,
        function_name: &str,
        module: JITModule,
        function: MapFunction,
        state_size: usize,
        stats: CompileStats,
    ) -> Self {
        Self {
            name: map.name().to_string(),
            function_name: function_name.to_string(),
            module: Some(module),
            function,
            input_types: map.input_types(),
            output_types: map.output_types(),
            streams: map
                .stream_endpoints()
                .into_iter()
                .map(|(_, endpoint)| endpoint)
                .collect(),
            state: vec![0; state_size.div_ceil(8)],
            callbacks: CallbackRegistry::new(),
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn input_types(&self) -> &[PortType] {
        &self.input_types
    }

    pub fn output_types(&self) -> &[PortType] {
        &self.output_types
    }

    pub fn stats(&self) -> &CompileStats {
        &self.stats
    }

    /// Runs the map once on `inputs` at `timestamp`.
    pub fn execute(
        &mut self,
        inputs: &[PortBuffer],
        timestamp: f64,
    ) -> Result<Vec<PortBuffer>, ExecutionError> {
        if inputs.len() != self.input_types.len() {
            return Err(ExecutionError::InputCount {
                expected: self.input_types.len(),
                found: inputs.len(),
            });
        }
        for (index, (input, expected)) in inputs.iter().zip(&self.input_types).enumerate() {
            if input.port_type() != *expected {
                return Err(ExecutionError::InputMismatch {
                    index,
                    expected: *expected,
                    found: input.port_type(),
                });
            }
        }

        let mut outputs: Vec<PortBuffer> = self
            .output_types
            .iter()
            .map(|port_type| PortBuffer::zeroed(*port_type))
            .collect();
        let input_ptrs: Vec<*const u8> = inputs.iter().map(PortBuffer::as_ptr).collect();
        let output_ptrs: Vec<*mut u8> = outputs.iter_mut().map(PortBuffer::as_mut_ptr).collect();

        // SAFETY: buffers were checked against the signature the function was compiled
        // for, and the state block is as large as every global it addresses.
        unsafe {
            (self.function)(
                &mut self.callbacks,
                self.state.as_mut_ptr().cast(),
                input_ptrs.as_ptr(),
                output_ptrs.as_ptr(),
                timestamp,
            );
        }
        Ok(outputs)
    }

    /// Runs a single-input, single-output map at timestamp 0.
    pub fn compute<I: Element, O: Element>(
        &mut self,
        input: &[I],
    ) -> Result<Vec<O>, ExecutionError> {
        if self.input_types.len() != 1 || self.output_types.len() != 1 {
            return Err(ExecutionError::NotSingleInputOutput {
                inputs: self.input_types.len(),
                outputs: self.output_types.len(),
            });
        }

        let outputs = self.execute(&[I::into_buffer(input.to_vec())], 0.0)?;
        let output = outputs
            .into_iter()
            .next()
            .ok_or(ExecutionError::NotSingleInputOutput {
                inputs: 1,
                outputs: 0,
            })?;
        O::from_buffer(output).map_err(|found| ExecutionError::ElementMismatch {
            index: 0,
            requested: O::TYPE,
            found: found.element(),
        })
    }

    /// Advances a map without declared inputs by one tick.
    pub fn step(&mut self, timestamp: f64) -> Result<Vec<PortBuffer>, ExecutionError> {
        self.execute(&[], timestamp)
    }

    pub fn step_with(
        &mut self,
        timestamp: f64,
        inputs: &[PortBuffer],
    ) -> Result<Vec<PortBuffer>, ExecutionError> {
        self.execute(inputs, timestamp)
    }

    /// Zeroes all persistent node state.
    pub fn reset(&mut self) {
        self.state.fill(0);
    }

    /// Binds the source and sink callbacks for element type `T`.
    pub fn register_callbacks<T: Element>(
        &mut self,
        source: impl FnMut(&mut [T]) -> bool + 'static,
        sink: impl FnMut(&[T]) + 'static,
    ) -> Result<(), CallbackError> {
        self.bind_callbacks(source, sink, None)
    }

    /// Like [`register_callbacks`](Self::register_callbacks), also receiving lag
    /// notifications from time-aware nodes.
    pub fn register_callbacks_with_lag<T: Element>(
        &mut self,
        source: impl FnMut(&mut [T]) -> bool + 'static,
        sink: impl FnMut(&[T]) + 'static,
        lag: impl FnMut(f64) + 'static,
    ) -> Result<(), CallbackError> {
        self.bind_callbacks(source, sink, Some(Box::new(lag)))
    }

    pub fn unregister_callbacks<T: Element>(&mut self) {
        self.callbacks.forwarder::<T>().uninitialize();
    }

    fn bind_callbacks<T: Element>(
        &mut self,
        source: impl FnMut(&mut [T]) -> bool + 'static,
        sink: impl FnMut(&[T]) + 'static,
        lag: Option<Box<dyn FnMut(f64)>>,
    ) -> Result<(), CallbackError> {
        let (input_size, output_size) = self.stream_sizes(T::TYPE);
        if input_size.is_none() && output_size.is_none() {
            return Err(CallbackError::NoStreamingNode { element: T::TYPE });
        }
        debug!(
            "registering {} callbacks on '{}': input {input_size:?}, output {output_size:?}",
            T::TYPE,
            self.name
        );
        self.callbacks.forwarder::<T>().initialize_once(
            Some(Box::new(source)),
            input_size.unwrap_or(0),
            Some(Box::new(sink)),
            output_size.unwrap_or(0),
            lag,
        )
    }

    /// Largest source and sink sizes among streams of one element type.
    fn stream_sizes(&self, element: ElementType) -> (Option<usize>, Option<usize>) {
        let mut input = None;
        let mut output = None;
        for stream in &self.streams {
            match stream {
                StreamEndpoint::Source(port_type) if port_type.element == element => {
                    input = input.max(Some(port_type.size));
                }
                StreamEndpoint::Sink(port_type) if port_type.element == element => {
                    output = output.max(Some(port_type.size));
                }
                _ => {}
            }
        }
        (input, output)
    }
}

impl Drop for CompiledMap {
    fn drop(&mut self) {
        self.callbacks.uninitialize_all();
        if let Some(module) = self.module.take() {
            // SAFETY: `function` is never called after this point.
            unsafe { module.free_memory() };
        }
    }
}
