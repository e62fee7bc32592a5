use std::fmt;

use slotmap::new_key_type;

pub const MAX_NODE_PORTS: usize = 16;

new_key_type! { pub struct NodeKey; }
new_key_type! { pub struct PortKey; }

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    Boolean,
    Int32,
    Int64,
    Float,
    Double,
}

impl ElementType {
    pub const ALL: [ElementType; 5] = [
        ElementType::Boolean,
        ElementType::Int32,
        ElementType::Int64,
        ElementType::Float,
        ElementType::Double,
    ];

    /// Size of one element in bytes. Booleans occupy one byte holding 0 or 1.
    pub const fn size(self) -> usize {
        match self {
            Self::Boolean => 1,
            Self::Int32 | Self::Float => 4,
            Self::Int64 | Self::Double => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "bool",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
            Self::Float => "f32",
            Self::Double => "f64",
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element type and fixed length of a port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortType {
    pub element: ElementType,
    pub size: usize,
}

impl PortType {
    pub const fn new(element: ElementType, size: usize) -> Self {
        Self { element, size }
    }

    pub const fn scalar(element: ElementType) -> Self {
        Self::new(element, 1)
    }

    pub const fn byte_size(&self) -> usize {
        self.element.size() * self.size
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.element, self.size)
    }
}

/// A contiguous run of elements of one output port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub port: PortKey,
    pub start: usize,
    pub len: usize,
}

impl PortRange {
    pub const fn new(port: PortKey, start: usize, len: usize) -> Self {
        Self { port, start, len }
    }

    pub const fn end(&self) -> usize {
        self.start + self.len
    }
}

/// The upstream elements an input port (or a map output) reads, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortElements {
    ranges: Vec<PortRange>,
}

impl PortElements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ranges(ranges: impl IntoIterator<Item = PortRange>) -> Self {
        let mut elements = Self::new();
        for range in ranges {
            elements.push(range);
        }
        elements
    }

    /// Appends a range, coalescing it with the previous one when they are adjacent.
    pub fn push(&mut self, range: PortRange) {
        if range.len == 0 {
            return;
        }
        if let Some(last) = self.ranges.last_mut() {
            if last.port == range.port && last.end() == range.start {
                last.len += range.len;
                return;
            }
        }
        self.ranges.push(range);
    }

    pub fn append(&mut self, other: &PortElements) {
        for range in &other.ranges {
            self.push(*range);
        }
    }

    pub fn ranges(&self) -> &[PortRange] {
        &self.ranges
    }

    /// Total number of elements across all ranges.
    pub fn len(&self) -> usize {
        self.ranges.iter().map(|r| r.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn single_range(&self) -> Option<&PortRange> {
        match self.ranges.as_slice() {
            [range] => Some(range),
            _ => None,
        }
    }

    /// Finds the port element backing the element at `index`.
    pub fn locate(&self, mut index: usize) -> Option<(PortKey, usize)> {
        for range in &self.ranges {
            if index < range.len {
                return Some((range.port, range.start + index));
            }
            index -= range.len;
        }
        None
    }
}

impl From<PortRange> for PortElements {
    fn from(range: PortRange) -> Self {
        Self::from_ranges([range])
    }
}

/// Key of the port-to-variable bindings kept by the compiler.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PortId {
    Input(NodeKey, usize),
    Output(PortKey),
}

impl From<PortKey> for PortId {
    fn from(port: PortKey) -> Self {
        Self::Output(port)
    }
}
