//! Execution of compiled maps and the callback bridge used by streaming nodes.

mod buffer;
mod callbacks;
mod compiled_map;
pub(crate) mod trampolines;

pub use buffer::{Element, PortBuffer};
pub use callbacks::{CallbackForwarder, CallbackRegistry, LagCallback, SinkCallback, SourceCallback};
pub use compiled_map::{CompiledMap, MapFunction};
