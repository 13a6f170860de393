//! # StencilOpt - Stencil Kernel Optimization Framework
//!
//! Symbolic rewriting and runtime autotuning for finite-difference stencil
//! kernels:
//! - Operation-count reduction of clustered stencil expressions
//!   (sub-expression elimination, time-invariant code motion, redundancy
//!   elimination across stencil offsets, factorization)
//! - Block-size and thread-count autotuning of compiled kernels
//!
//! ## Architecture
//!
//! ```text
//! Expressions → Clusters → Rewriter passes → Clusters → (compiled kernel) → AutoTuner
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use stencilopt::prelude::*;
//!
//! let x = Dimension::space("x");
//! let u = Function::input("u");
//! let expr = Assignment::new(
//!     Function::array("v", vec![(0, 0)]).at(vec![Index::at(&x, 0)]),
//!     (u.at(vec![Index::at(&x, -1)]) + u.at(vec![Index::at(&x, 1)])).sin(),
//! );
//! let cluster = Cluster::from_exprs(vec![expr], &[x]);
//! let state = stencilopt::rewrite(cluster, "advanced")?;
//! println!("{} operations left", state.dense_ops());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod autotuning;
pub mod dse;
pub mod ir;
pub mod symbolics;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::autotuning::{
        autotune, ArgValue, Arguments, AutoTuner, AutotuneOptions, Kernel, KernelDimension, ParamKind, Parameter,
        TuningSummary,
    };
    pub use crate::dse::{Pass, Rewriter, RewriterConfig, RewriterMode, State};
    pub use crate::ir::{interpret, Cluster, Direction, Grid, Interval, IterationSpace};
    pub use crate::symbolics::{Assignment, Dimension, Expr, Func, Function, Index};
    pub use crate::utils::errors::*;
}

use utils::StencilResult;

/// Rewrite `cluster` with the pipeline named by `mode`.
pub fn rewrite(cluster: ir::Cluster, mode: &str) -> StencilResult<dse::State> {
    Ok(dse::rewrite(cluster, mode)?)
}

/// Autotune `kernel` with default options.
pub fn autotune(
    kernel: &mut dyn autotuning::Kernel,
    args: &autotuning::Arguments,
    level: &str,
    mode: &str,
) -> StencilResult<(autotuning::Arguments, autotuning::TuningSummary)> {
    Ok(autotuning::autotune(kernel, args, level, mode)?)
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_unknown_mode_is_reported() {
        let cluster = ir::Cluster::from_exprs(Vec::new(), &[]);
        assert!(matches!(rewrite(cluster, "fastest"), Err(utils::StencilOptError::Rewrite(_))));
    }
}
