//! The compiled-kernel contract and its runtime arguments.
//!
//! Buffers, timers and distributed-routing tables are shared handles: the
//! kernel holds on to the same storage the caller does, so cloning an
//! [`ArgValue`] never copies data. Copies are explicit
//! ([`Buffer::deep_copy`]).

use crate::ir::Direction;
use crate::symbolics::{Dimension, Expr};
use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// The "no process" rank; messages to or from it are dropped.
pub const PROC_NULL: i32 = -2;

/// A shared array of values.
#[derive(Clone, Default)]
pub struct Buffer(Arc<RwLock<Vec<f64>>>);

impl Buffer {
    /// Wrap `data` in a new buffer
    pub fn new(data: Vec<f64>) -> Self {
        Self(Arc::new(RwLock::new(data)))
    }

    /// A new buffer with the same contents and its own storage.
    pub fn deep_copy(&self) -> Self {
        Self::new(self.snapshot())
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<f64> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Mutate the contents in place
    pub fn write<F: FnOnce(&mut Vec<f64>)>(&self, f: F) {
        let mut data = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut data);
    }

    /// Whether both handles point at the same storage.
    pub fn same_storage(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.0.read().unwrap_or_else(PoisonError::into_inner).len();
        write!(f, "Buffer({} values)", len)
    }
}

/// Named profiling counters, in seconds.
#[derive(Clone, Default)]
pub struct Timer(Arc<Mutex<IndexMap<String, f64>>>);

impl Timer {
    /// A timer with one zeroed counter per section
    pub fn new<S: Into<String>>(sections: impl IntoIterator<Item = S>) -> Self {
        let counters = sections.into_iter().map(|s| (s.into(), 0.0)).collect();
        Self(Arc::new(Mutex::new(counters)))
    }

    /// Zero every counter; returns a handle to the same timer.
    pub fn reset(&self) -> Timer {
        let mut counters = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        for v in counters.values_mut() {
            *v = 0.0;
        }
        self.clone()
    }

    /// Add `seconds` to a counter, creating it if needed.
    pub fn record(&self, section: &str, seconds: f64) {
        let mut counters = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.entry(section.to_string()).or_insert(0.0) += seconds;
    }

    /// Sum of all counters.
    pub fn total(&self) -> f64 {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).values().sum()
    }

    /// Whether both handles share their counters
    pub fn same_storage(&self, other: &Timer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counters = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_map().entries(counters.iter()).finish()
    }
}

/// Ranks of the neighbouring processes, one named field per direction.
#[derive(Clone, Default)]
pub struct Neighborhood(Arc<Mutex<IndexMap<String, i32>>>);

impl Neighborhood {
    /// A table from `(field, rank)` pairs
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = (S, i32)>) -> Self {
        Self(Arc::new(Mutex::new(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())))
    }

    /// Copy of all fields
    pub fn fields(&self) -> IndexMap<String, i32> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Rank stored in `field`
    pub fn get(&self, field: &str) -> Option<i32> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).get(field).copied()
    }

    /// Overwrite the rank stored in `field`
    pub fn set(&self, field: &str, rank: i32) {
        let mut fields = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(v) = fields.get_mut(field) {
            *v = rank;
        }
    }

    /// Whether both handles share their table
    pub fn same_storage(&self, other: &Neighborhood) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Neighborhood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.fields().iter()).finish()
    }
}

/// Source and destination ranks of one halo message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ranks {
    /// Sending rank
    pub from: i32,
    /// Receiving rank
    pub to: i32,
}

/// A halo message descriptor.
#[derive(Clone)]
pub struct Message(Arc<Mutex<Ranks>>);

impl Message {
    /// A message from rank `from` to rank `to`
    pub fn new(from: i32, to: i32) -> Self {
        Self(Arc::new(Mutex::new(Ranks { from, to })))
    }

    /// Current ranks
    pub fn ranks(&self) -> Ranks {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite both ranks
    pub fn set_ranks(&self, ranks: Ranks) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = ranks;
    }

    /// Whether both handles share their ranks
    pub fn same_storage(&self, other: &Message) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.ranks())
    }
}

/// A runtime argument.
///
/// Equality of handle variants is identity: two buffers are equal when
/// they share storage.
#[derive(Debug, Clone)]
pub enum ArgValue {
    /// Integer scalar, e.g. a loop bound or a block size
    Int(i64),
    /// Floating-point scalar
    Float(f64),
    /// Array data
    Buffer(Buffer),
    /// Profiling counters
    Timer(Timer),
    /// MPI neighbourhood table
    Neighborhood(Neighborhood),
    /// MPI messages
    Messages(Vec<Message>),
}

impl ArgValue {
    /// The integer value, if any
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value of a scalar argument.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Int(v) => Some(*v as f64),
            ArgValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// The buffer handle, if any
    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            ArgValue::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// The timer handle, if any
    pub fn as_timer(&self) -> Option<&Timer> {
        match self {
            ArgValue::Timer(t) => Some(t),
            _ => None,
        }
    }
}

impl PartialEq for ArgValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ArgValue::Int(a), ArgValue::Int(b)) => a == b,
            (ArgValue::Float(a), ArgValue::Float(b)) => a == b,
            (ArgValue::Buffer(a), ArgValue::Buffer(b)) => a.same_storage(b),
            (ArgValue::Timer(a), ArgValue::Timer(b)) => a.same_storage(b),
            (ArgValue::Neighborhood(a), ArgValue::Neighborhood(b)) => a.same_storage(b),
            (ArgValue::Messages(a), ArgValue::Messages(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_storage(y))
            }
            _ => false,
        }
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

/// Runtime arguments by parameter name, in insertion order.
pub type Arguments = IndexMap<String, ArgValue>;

/// Numeric view of the scalar arguments, for evaluating symbolic sizes.
pub fn scalar_bindings(args: &Arguments) -> IndexMap<String, f64> {
    args.iter().filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f))).collect()
}

/// What a kernel parameter stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Scalar, e.g. a loop bound or a block size
    Scalar,
    /// Array read by the kernel
    InputBuffer,
    /// Array written by the kernel
    OutputBuffer,
    /// Number of worker threads
    NThreads,
    /// Profiling counters
    Timer,
    /// Neighbouring ranks for halo exchange
    Neighborhood,
    /// Halo message descriptors
    MessageTable,
}

/// A declared kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    /// Name, also the argument key
    pub name: String,
    /// What the parameter carries
    pub kind: ParamKind,
}

impl Parameter {
    /// Create a parameter
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// A dimension the kernel iterates over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KernelDimension {
    /// The time dimension
    Time(Dimension),
    /// A plain space dimension
    Space(Dimension),
    /// A loop-blocking dimension over `root`, whose block size is the
    /// runtime parameter `step`
    Block {
        /// Block loop dimension
        dim: Dimension,
        /// Name of the block-size parameter
        step: String,
        /// Blocked dimension
        root: Dimension,
    },
}

impl KernelDimension {
    /// The dimension itself
    pub fn dimension(&self) -> &Dimension {
        match self {
            KernelDimension::Time(d) | KernelDimension::Space(d) => d,
            KernelDimension::Block { dim, .. } => dim,
        }
    }

    /// Whether the block size is tunable
    pub fn is_blockable(&self) -> bool {
        matches!(self, KernelDimension::Block { .. })
    }
}

/// One loop of an iteration tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Iteration {
    /// Identity of the loop; the same loop may appear in several trees
    pub id: usize,
    /// Iterated dimension
    pub dim: Dimension,
    /// Traversal direction
    pub direction: Direction,
    /// Number of loops, this one included, collapsed into one parallel loop
    pub ncollapsed: usize,
}

impl Iteration {
    /// A loop collapsed with no other
    pub fn new(id: usize, dim: Dimension, direction: Direction) -> Self {
        Self { id, dim, direction, ncollapsed: 1 }
    }

    /// Set the number of loops collapsed into this one
    pub fn ncollapsed(mut self, n: usize) -> Self {
        self.ncollapsed = n;
        self
    }
}

/// A loop nest, outermost loop first.
pub type IterationTree = Vec<Iteration>;

/// A compiled, parameterized kernel.
pub trait Kernel {
    /// Name used in log messages
    fn name(&self) -> &str;

    /// Declared parameters, in calling order.
    fn parameters(&self) -> Vec<Parameter>;

    /// Dimensions the kernel iterates over
    fn dimensions(&self) -> Vec<KernelDimension>;

    /// Loop nests of the kernel body.
    fn body(&self) -> Vec<IterationTree>;

    /// Loop nests of the callables the body invokes.
    fn callables(&self) -> IndexMap<String, Vec<IterationTree>> {
        IndexMap::new()
    }

    /// Loop nests of the body and every callable.
    fn iteration_trees(&self) -> Vec<IterationTree> {
        let mut trees = self.body();
        trees.extend(self.callables().into_values().flatten());
        trees
    }

    /// Symbolic stack usage in bytes, if the kernel allocates on the stack.
    fn stack_footprint(&self) -> Option<Expr> {
        None
    }

    /// Name of the timer parameter.
    fn profiler(&self) -> &str;

    /// Run the kernel with positional arguments matching [`Kernel::parameters`].
    fn call(&mut self, args: &[ArgValue]) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_deep_copy_is_independent() {
        let original = Buffer::new(vec![1.0, 2.0]);
        let copy = original.deep_copy();
        copy.write(|d| d[0] = 9.0);
        assert_eq!(original.snapshot(), vec![1.0, 2.0]);
        assert!(!copy.same_storage(&original));
        assert_eq!(ArgValue::Buffer(original.clone()), ArgValue::Buffer(original));
    }

    #[test]
    fn test_timer_reset_and_total() {
        let timer = Timer::new(["section0", "section1"]);
        timer.record("section0", 0.5);
        timer.record("section1", 0.25);
        assert!((timer.total() - 0.75).abs() < 1e-12);
        let handle = timer.reset();
        assert!(handle.same_storage(&timer));
        assert_eq!(timer.total(), 0.0);
    }
}
