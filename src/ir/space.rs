//! Iteration and data spaces.
//!
//! An [`Interval`] is relative: `Interval { dim: x, lower: -1, upper: 2 }`
//! means "from `x_m - 1` to `x_M + 2`", where `x_m`/`x_M` are the runtime
//! bounds of `x`. This keeps spaces independent of the problem size.

use crate::symbolics::{Assignment, Dimension, Expr};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Traversal order along a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Increasing index
    Forward,
    /// Decreasing index
    Backward,
    /// No carried dependence, any order will do
    Any,
}

/// Relative bounds along one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    /// Dimension
    pub dim: Dimension,
    /// Lowest offset
    pub lower: i64,
    /// Highest offset
    pub upper: i64,
}

impl Interval {
    /// Create an interval
    pub fn new(dim: Dimension, lower: i64, upper: i64) -> Self {
        Self { dim, lower, upper }
    }

    /// The interval spanning exactly the dimension's own bounds.
    pub fn null(dim: Dimension) -> Self {
        Self::new(dim, 0, 0)
    }

    /// Whether the interval reaches beyond the dimension's bounds.
    pub fn has_offsets(&self) -> bool {
        self.lower != 0 || self.upper != 0
    }

    /// Elementwise sum of the offsets.
    pub fn add(&self, other: &Interval) -> Interval {
        Interval::new(self.dim.clone(), self.lower + other.lower, self.upper + other.upper)
    }

    /// Smallest interval covering both.
    pub fn union(&self, other: &Interval) -> Interval {
        Interval::new(self.dim.clone(), self.lower.min(other.lower), self.upper.max(other.upper))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}, {}]", self.dim, self.lower, self.upper)
    }
}

/// An ordered set of intervals, at most one per dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalGroup {
    intervals: Vec<Interval>,
}

impl IntervalGroup {
    /// Group `intervals`, joining those over the same dimension
    pub fn new(intervals: Vec<Interval>) -> Self {
        let mut group = Self::default();
        for i in intervals {
            group.insert_union(i);
        }
        group
    }

    fn insert_union(&mut self, interval: Interval) {
        match self.intervals.iter_mut().find(|i| i.dim == interval.dim) {
            Some(existing) => *existing = existing.union(&interval),
            None => self.intervals.push(interval),
        }
    }

    /// Number of intervals
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Whether the group is empty
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Iterate over the intervals
    pub fn iter(&self) -> std::slice::Iter<'_, Interval> {
        self.intervals.iter()
    }

    /// Interval over `dim`
    pub fn get(&self, dim: &Dimension) -> Option<&Interval> {
        self.intervals.iter().find(|i| &i.dim == dim)
    }

    /// Dimensions, in order
    pub fn dimensions(&self) -> Vec<&Dimension> {
        self.intervals.iter().map(|i| &i.dim).collect()
    }

    /// Drop every interval before position `index`.
    pub fn split_off(&self, index: usize) -> IntervalGroup {
        Self { intervals: self.intervals.get(index..).map(<[Interval]>::to_vec).unwrap_or_default() }
    }

    /// Per-dimension sum of offsets. Dimensions missing on one side count
    /// as null intervals; the order is this group's, then `other`'s extras.
    pub fn add(&self, other: &IntervalGroup) -> IntervalGroup {
        let mut intervals: Vec<Interval> = self
            .intervals
            .iter()
            .map(|i| match other.get(&i.dim) {
                Some(o) => i.add(o),
                None => i.clone(),
            })
            .collect();
        intervals.extend(other.intervals.iter().filter(|o| self.get(&o.dim).is_none()).cloned());
        Self { intervals }
    }

    /// Per-dimension union.
    pub fn union(&self, other: &IntervalGroup) -> IntervalGroup {
        let mut group = self.clone();
        for i in &other.intervals {
            group.insert_union(i.clone());
        }
        group
    }
}

impl<'a> IntoIterator for &'a IntervalGroup {
    type Item = &'a Interval;
    type IntoIter = std::slice::Iter<'a, Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.iter()
    }
}

impl fmt::Display for IntervalGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.intervals.iter().map(|i| i.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Iteration bounds plus traversal direction of each dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationSpace {
    /// Bounds of each dimension
    pub intervals: IntervalGroup,
    /// Traversal direction of each dimension
    pub directions: IndexMap<Dimension, Direction>,
}

impl IterationSpace {
    /// Create an iteration space
    pub fn new(intervals: IntervalGroup, directions: IndexMap<Dimension, Direction>) -> Self {
        Self { intervals, directions }
    }

    /// Null intervals over `dims`, forward in time and unordered in space.
    pub fn from_dimensions(dims: &[Dimension]) -> Self {
        let intervals = IntervalGroup::new(dims.iter().cloned().map(Interval::null).collect());
        let directions = dims
            .iter()
            .map(|d| (d.clone(), if d.is_time() { Direction::Forward } else { Direction::Any }))
            .collect();
        Self { intervals, directions }
    }

    /// Direction of `dim`; [`Direction::Any`] if unknown
    pub fn direction(&self, dim: &Dimension) -> Direction {
        self.directions.get(dim).copied().unwrap_or(Direction::Any)
    }

    /// Same directions, different intervals.
    pub fn with_intervals(&self, intervals: IntervalGroup) -> Self {
        Self { intervals, directions: self.directions.clone() }
    }
}

/// Per-array access footprints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSpace {
    /// Union of every array footprint
    pub intervals: IntervalGroup,
    /// Footprint of each array
    pub parts: IndexMap<String, IntervalGroup>,
}

impl DataSpace {
    /// Create a data space
    pub fn new(intervals: IntervalGroup, parts: IndexMap<String, IntervalGroup>) -> Self {
        Self { intervals, parts }
    }

    /// Footprints of every array accessed by `exprs`, with `ispace` folded
    /// in so the footprint covers the whole iteration.
    pub fn from_accesses(exprs: &[Assignment], ispace: &IterationSpace) -> Self {
        let parts: IndexMap<String, IntervalGroup> = detect_accesses(exprs)
            .iter()
            .map(|(name, offsets)| (name.clone(), build_intervals(offsets).add(&ispace.intervals)))
            .collect();
        let intervals = parts.values().fold(IntervalGroup::default(), |acc, g| acc.union(g));
        Self { intervals, parts }
    }
}

/// Offsets at which each array is accessed, per dimension.
pub type Accesses = IndexMap<String, IndexMap<Dimension, Vec<i64>>>;

/// Collect the offsets of every array access (reads and writes) in `exprs`.
pub fn detect_accesses(exprs: &[Assignment]) -> Accesses {
    let mut accesses = Accesses::new();
    let mut record = |e: &Expr| {
        for indexed in e.indexeds() {
            let per_dim = accesses.entry(indexed.function.name.clone()).or_default();
            for index in &indexed.indices {
                if let Some(dim) = index.dim() {
                    per_dim.entry(dim.clone()).or_default().push(index.offset());
                }
            }
        }
    };
    for e in exprs {
        record(&e.lhs);
        record(&e.rhs);
    }
    accesses
}

/// Bounding intervals of a set of per-dimension offsets.
pub fn build_intervals(offsets: &IndexMap<Dimension, Vec<i64>>) -> IntervalGroup {
    IntervalGroup::new(
        offsets
            .iter()
            .filter_map(|(dim, values)| {
                let lower = values.iter().copied().min()?;
                let upper = values.iter().copied().max()?;
                Some(Interval::new(dim.clone(), lower, upper))
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolics::{Function, Index};

    #[test]
    fn test_interval_group_add() {
        let x = Dimension::space("x");
        let y = Dimension::space("y");
        let a = IntervalGroup::new(vec![Interval::null(x.clone()), Interval::new(y.clone(), -1, 1)]);
        let b = IntervalGroup::new(vec![Interval::new(y.clone(), 0, 2)]);
        let sum = a.add(&b);
        assert_eq!(sum.get(&x), Some(&Interval::null(x)));
        assert_eq!(sum.get(&y), Some(&Interval::new(y, -1, 3)));
    }

    #[test]
    fn test_detect_accesses() {
        let x = Dimension::space("x");
        let u = Function::input("u");
        let e = Assignment::new(
            u.at(vec![Index::at(&x, 0)]),
            u.at(vec![Index::at(&x, -2)]) + u.at(vec![Index::at(&x, 1)]),
        );
        let accesses = detect_accesses(&[e]);
        let bounds = build_intervals(&accesses["u"]);
        assert_eq!(bounds.get(&x), Some(&Interval::new(x, -2, 1)));
    }
}
