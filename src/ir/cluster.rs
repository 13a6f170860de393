//! Clusters: groups of assignments sharing one iteration and data space.

use super::space::{DataSpace, IterationSpace};
use crate::symbolics::{estimate_cost_all, Assignment, Dimension};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of the values a cluster computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DType {
    /// Single precision
    F32,
    /// Double precision
    #[default]
    F64,
}

/// An ordered group of assignments executed over one iteration space.
///
/// Clusters are immutable values; passes produce new ones through
/// [`Cluster::rebuild`] and [`Cluster::rebuild_with`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Assignments, in execution order
    pub exprs: Vec<Assignment>,
    /// Iteration space
    pub ispace: IterationSpace,
    /// Data space
    pub dspace: DataSpace,
    /// Element type
    pub dtype: DType,
    /// Whether operation counts of this cluster are accounted for
    pub dense: bool,
}

impl Cluster {
    /// Create a cluster over explicit spaces
    pub fn new(exprs: Vec<Assignment>, ispace: IterationSpace, dspace: DataSpace) -> Self {
        Self { exprs, ispace, dspace, dtype: DType::default(), dense: true }
    }

    /// Build a cluster iterating over `dims` (outermost first), with the
    /// data space derived from the accesses in `exprs`.
    pub fn from_exprs(exprs: Vec<Assignment>, dims: &[Dimension]) -> Self {
        let ispace = IterationSpace::from_dimensions(dims);
        let dspace = DataSpace::from_accesses(&exprs, &ispace);
        Self::new(exprs, ispace, dspace)
    }

    /// Set the element type
    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Set whether operations are accounted for
    pub fn dense(mut self, dense: bool) -> Self {
        self.dense = dense;
        self
    }

    /// Same spaces, new expressions.
    pub fn rebuild(&self, exprs: Vec<Assignment>) -> Cluster {
        Cluster { exprs, ..self.clone_spaces() }
    }

    /// New expressions and new spaces; type and flags are kept.
    pub fn rebuild_with(&self, exprs: Vec<Assignment>, ispace: IterationSpace, dspace: DataSpace) -> Cluster {
        Cluster { exprs, ispace, dspace, dtype: self.dtype, dense: self.dense }
    }

    fn clone_spaces(&self) -> Cluster {
        Cluster {
            exprs: Vec::new(),
            ispace: self.ispace.clone(),
            dspace: self.dspace.clone(),
            dtype: self.dtype,
            dense: self.dense,
        }
    }

    /// Estimated operation count of the cluster's right-hand sides.
    pub fn ops(&self) -> usize {
        estimate_cost_all(&self.exprs, false)
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cluster {}", self.ispace.intervals)?;
        for e in &self.exprs {
            writeln!(f, "  {}", e)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolics::{Expr, Function, Index};

    #[test]
    fn test_rebuild_keeps_spaces() {
        let t = Dimension::time("t");
        let x = Dimension::space("x");
        let u = Function::input("u");
        let e = Assignment::new(
            u.at(vec![Index::at(&t, 1), Index::at(&x, 0)]),
            u.at(vec![Index::at(&t, 0), Index::at(&x, -1)]) * Expr::num(0.5),
        );
        let cluster = Cluster::from_exprs(vec![e.clone()], &[t.clone(), x.clone()]);
        assert_eq!(cluster.ispace.intervals.len(), 2);
        assert_eq!(cluster.dspace.parts["u"].get(&x).map(|i| (i.lower, i.upper)), Some((-1, 0)));

        let rebuilt = cluster.rebuild(vec![e.with_rhs(Expr::zero())]);
        assert_eq!(rebuilt.ispace, cluster.ispace);
        assert_eq!(rebuilt.dspace, cluster.dspace);
        assert_eq!(rebuilt.ops(), 0);
    }
}
