//! `extern "C"` entry points that generated code calls to reach the callback registry.

use super::buffer::Element;
use super::callbacks::CallbackRegistry;
use crate::model::ElementType;

/// # Safety
/// `registry` must point at a live registry, and `buffer` at `len` initialized elements.
unsafe extern "C" fn invoke_input<T: Element>(
    registry: *mut CallbackRegistry,
    buffer: *mut T,
    len: usize,
) -> u8 {
    let registry = unsafe { &mut *registry };
    let buffer = unsafe { std::slice::from_raw_parts_mut(buffer, len) };
    u8::from(T::forwarder(registry).invoke_input(buffer))
}

/// # Safety
/// Same as [`invoke_input`].
unsafe extern "C" fn invoke_output<T: Element>(
    registry: *mut CallbackRegistry,
    buffer: *const T,
    len: usize,
) {
    let registry = unsafe { &mut *registry };
    let buffer = unsafe { std::slice::from_raw_parts(buffer, len) };
    T::forwarder(registry).invoke_output(buffer);
}

/// # Safety
/// `registry` must point at a live registry.
unsafe extern "C" fn lag_notification(registry: *mut CallbackRegistry, lag: f64) {
    let registry = unsafe { &mut *registry };
    registry.notify_lag(lag);
}

pub(crate) fn invoke_input_ptr(element: ElementType) -> *const u8 {
    match element {
        ElementType::Boolean => invoke_input::<bool> as *const u8,
        ElementType::Int32 => invoke_input::<i32> as *const u8,
        ElementType::Int64 => invoke_input::<i64> as *const u8,
        ElementType::Float => invoke_input::<f32> as *const u8,
        ElementType::Double => invoke_input::<f64> as *const u8,
    }
}

pub(crate) fn invoke_output_ptr(element: ElementType) -> *const u8 {
    match element {
        ElementType::Boolean => invoke_output::<bool> as *const u8,
        ElementType::Int32 => invoke_output::<i32> as *const u8,
        ElementType::Int64 => invoke_output::<i64> as *const u8,
        ElementType::Float => invoke_output::<f32> as *const u8,
        ElementType::Double => invoke_output::<f64> as *const u8,
    }
}

pub(crate) fn lag_notification_ptr() -> *const u8 {
    lag_notification as *const u8
}
