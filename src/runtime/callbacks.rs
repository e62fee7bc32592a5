use std::fmt;

use log::trace;

use super::buffer::Element;
use crate::error::CallbackError;

pub type SourceCallback<T> = Box<dyn FnMut(&mut [T]) -> bool>;
pub type SinkCallback<T> = Box<dyn FnMut(&[T])>;
pub type LagCallback = Box<dyn FnMut(f64)>;

struct Binding<T> {
    source: Option<SourceCallback<T>>,
    input_size: usize,
    sink: Option<SinkCallback<T>>,
    output_size: usize,
    lag: Option<LagCallback>,
}

/// Pass-through from generated code to the host callbacks of one element type.
///
/// Nothing is buffered or reordered: each call is forwarded immediately.
pub struct CallbackForwarder<T> {
    binding: Option<Binding<T>>,
}

impl<T> Default for CallbackForwarder<T> {
    fn default() -> Self {
        Self { binding: None }
    }
}

impl<T> fmt::Debug for CallbackForwarder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackForwarder")
            .field("initialized", &self.binding.is_some())
            .finish()
    }
}

impl<T: Element> CallbackForwarder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the binding. Fails if one is already installed.
    pub fn initialize_once(
        &mut self,
        source: Option<SourceCallback<T>>,
        input_size: usize,
        sink: Option<SinkCallback<T>>,
        output_size: usize,
        lag: Option<LagCallback>,
    ) -> Result<(), CallbackError> {
        if self.binding.is_some() {
            return Err(CallbackError::AlreadyInitialized { element: T::TYPE });
        }
        trace!(
            "{} callbacks bound: input {input_size}, output {output_size}",
            T::TYPE
        );
        self.binding = Some(Binding {
            source,
            input_size,
            sink,
            output_size,
            lag,
        });
        Ok(())
    }

    /// Clears the binding, if any.
    pub fn uninitialize(&mut self) {
        self.binding = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.binding.is_some()
    }

    /// Lets the source callback fill up to `input_size` elements of `buffer`.
    /// Returns `false` when no new data is available.
    pub fn invoke_input(&mut self, buffer: &mut [T]) -> bool {
        match &mut self.binding {
            Some(Binding {
                source: Some(source),
                input_size,
                ..
            }) => {
                let len = buffer.len().min(*input_size);
                source(&mut buffer[..len])
            }
            _ => false,
        }
    }

    /// Hands up to `output_size` elements of `buffer` to the sink callback.
    pub fn invoke_output(&mut self, buffer: &[T]) {
        if let Some(Binding {
            sink: Some(sink),
            output_size,
            ..
        }) = &mut self.binding
        {
            let len = buffer.len().min(*output_size);
            sink(&buffer[..len]);
        }
    }

    pub fn invoke_lag_notification(&mut self, lag: f64) {
        if let Some(Binding { lag: Some(notify), .. }) = &mut self.binding {
            notify(lag);
        }
    }
}

/// One forwarder per element type, owned by a compiled map.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    pub(crate) boolean: CallbackForwarder<bool>,
    pub(crate) int32: CallbackForwarder<i32>,
    pub(crate) int64: CallbackForwarder<i64>,
    pub(crate) float: CallbackForwarder<f32>,
    pub(crate) double: CallbackForwarder<f64>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarder<T: Element>(&mut self) -> &mut CallbackForwarder<T> {
        T::forwarder(self)
    }

    /// Forwards a lag notification to every bound lag callback.
    pub fn notify_lag(&mut self, lag: f64) {
        self.boolean.invoke_lag_notification(lag);
        self.int32.invoke_lag_notification(lag);
        self.int64.invoke_lag_notification(lag);
        self.float.invoke_lag_notification(lag);
        self.double.invoke_lag_notification(lag);
    }

    pub fn uninitialize_all(&mut self) {
        self.boolean.uninitialize();
        self.int32.uninitialize();
        self.int64.uninitialize();
        self.float.uninitialize();
        self.double.uninitialize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ElementType;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_uninitialize_is_idempotent() {
        let mut forwarder = CallbackForwarder::<f32>::new();
        forwarder.uninitialize();
        forwarder.uninitialize();
        assert!(!forwarder.is_initialized());
    }

    #[test]
    fn test_initialize_twice_is_an_error() {
        let mut forwarder = CallbackForwarder::<i32>::new();
        forwarder.initialize_once(None, 0, None, 0, None).unwrap();
        assert_eq!(
            forwarder.initialize_once(None, 0, None, 0, None),
            Err(CallbackError::AlreadyInitialized {
                element: ElementType::Int32
            })
        );

        forwarder.uninitialize();
        assert!(forwarder.initialize_once(None, 0, None, 0, None).is_ok());
    }

    #[test]
    fn test_unbound_input_reports_no_data() {
        let mut forwarder = CallbackForwarder::<f64>::new();
        let mut buffer = [1.0; 3];
        assert!(!forwarder.invoke_input(&mut buffer));
        assert_eq!(buffer, [1.0; 3]);

        // Output without a sink is dropped.
        forwarder.invoke_output(&buffer);
    }

    #[test]
    fn test_input_is_truncated_to_input_size() {
        let mut forwarder = CallbackForwarder::<i64>::new();
        forwarder
            .initialize_once(
                Some(Box::new(|buf: &mut [i64]| {
                    buf.fill(7);
                    true
                })),
                2,
                None,
                0,
                None,
            )
            .unwrap();

        let mut buffer = [0; 4];
        assert!(forwarder.invoke_input(&mut buffer));
        assert_eq!(buffer, [7, 7, 0, 0]);
    }

    #[test]
    fn test_output_and_lag_forwarding() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let lags = Rc::new(RefCell::new(Vec::new()));

        let mut registry = CallbackRegistry::new();
        let sink_seen = seen.clone();
        let lag_seen = lags.clone();
        registry
            .forwarder::<f32>()
            .initialize_once(
                None,
                0,
                Some(Box::new(move |buf: &[f32]| {
                    sink_seen.borrow_mut().push(buf.to_vec())
                })),
                3,
                Some(Box::new(move |lag: f64| lag_seen.borrow_mut().push(lag))),
            )
            .unwrap();

        registry.forwarder::<f32>().invoke_output(&[1.0, 2.0, 3.0, 4.0]);
        registry.notify_lag(0.5);
        registry.uninitialize_all();
        registry.notify_lag(1.0);

        assert_eq!(*seen.borrow(), vec![vec![1.0, 2.0, 3.0]]);
        assert_eq!(*lags.borrow(), vec![0.5]);
    }
}
