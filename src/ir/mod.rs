//! Intermediate representation the rewrite passes operate on.
//!
//! - [`space`]: intervals, iteration spaces and data spaces
//! - [`cluster`]: groups of assignments sharing one space
//! - [`interpret`]: a reference interpreter for cluster lists

pub mod cluster;
pub mod interpret;
pub mod space;

pub use cluster::{Cluster, DType};
pub use interpret::{interpret, Grid};
pub use space::{
    build_intervals, detect_accesses, Accesses, DataSpace, Direction, Interval, IntervalGroup, IterationSpace,
};
