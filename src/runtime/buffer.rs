use std::fmt::Debug;

use super::callbacks::{CallbackForwarder, CallbackRegistry};
use crate::model::{ElementType, PortType};

/// Rust types that can flow through map ports.
pub trait Element: Copy + Default + Debug + PartialEq + 'static {
    const TYPE: ElementType;

    fn forwarder(registry: &mut CallbackRegistry) -> &mut CallbackForwarder<Self>;

    fn into_buffer(values: Vec<Self>) -> PortBuffer;

    fn from_buffer(buffer: PortBuffer) -> Result<Vec<Self>, PortBuffer>;

    fn slice(buffer: &PortBuffer) -> Option<&[Self]>;
}

/// Owned values of one port.
#[derive(Clone, Debug, PartialEq)]
pub enum PortBuffer {
    Boolean(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, $field:ident) => {
        impl Element for $ty {
            const TYPE: ElementType = ElementType::$variant;

            fn forwarder(registry: &mut CallbackRegistry) -> &mut CallbackForwarder<Self> {
                &mut registry.$field
            }

            fn into_buffer(values: Vec<Self>) -> PortBuffer {
                PortBuffer::$variant(values)
            }

            fn from_buffer(buffer: PortBuffer) -> Result<Vec<Self>, PortBuffer> {
                match buffer {
                    PortBuffer::$variant(values) => Ok(values),
                    other => Err(other),
                }
            }

            fn slice(buffer: &PortBuffer) -> Option<&[Self]> {
                match buffer {
                    PortBuffer::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }

        impl From<Vec<$ty>> for PortBuffer {
            fn from(values: Vec<$ty>) -> Self {
                PortBuffer::$variant(values)
            }
        }
    };
}

impl_element!(bool, Boolean, boolean);
impl_element!(i32, Int32, int32);
impl_element!(i64, Int64, int64);
impl_element!(f32, Float, float);
impl_element!(f64, Double, double);

impl PortBuffer {
    pub fn zeroed(port_type: PortType) -> Self {
        let size = port_type.size;
        match port_type.element {
            ElementType::Boolean => Self::Boolean(vec![false; size]),
            ElementType::Int32 => Self::Int32(vec![0; size]),
            ElementType::Int64 => Self::Int64(vec![0; size]),
            ElementType::Float => Self::Float(vec![0.0; size]),
            ElementType::Double => Self::Double(vec![0.0; size]),
        }
    }

    pub fn element(&self) -> ElementType {
        match self {
            Self::Boolean(_) => ElementType::Boolean,
            Self::Int32(_) => ElementType::Int32,
            Self::Int64(_) => ElementType::Int64,
            Self::Float(_) => ElementType::Float,
            Self::Double(_) => ElementType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn port_type(&self) -> PortType {
        PortType::new(self.element(), self.len())
    }

    pub fn get<T: Element>(&self) -> Option<&[T]> {
        T::slice(self)
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        match self {
            Self::Boolean(v) => v.as_ptr().cast(),
            Self::Int32(v) => v.as_ptr().cast(),
            Self::Int64(v) => v.as_ptr().cast(),
            Self::Float(v) => v.as_ptr().cast(),
            Self::Double(v) => v.as_ptr().cast(),
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            Self::Boolean(v) => v.as_mut_ptr().cast(),
            Self::Int32(v) => v.as_mut_ptr().cast(),
            Self::Int64(v) => v.as_mut_ptr().cast(),
            Self::Float(v) => v.as_mut_ptr().cast(),
            Self::Double(v) => v.as_mut_ptr().cast(),
        }
    }
}
