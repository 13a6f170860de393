//! Expression rewriting over clusters.
//!
//! Passes reduce the operation count of a cluster while computing the same
//! values: sub-expression elimination, time-invariant code motion,
//! redundancy elimination across stencil offsets, factorization and
//! trigonometric approximation. A [`Rewriter`] runs them as a pipeline.
//!
//! # Example
//!
//! ```ignore
//! use stencilopt::dse::{Rewriter, RewriterConfig};
//!
//! let state = Rewriter::aggressive(RewriterConfig::default()).run(cluster);
//! for cluster in &state.clusters {
//!     println!("{}", cluster);
//! }
//! ```

pub mod aliases;
pub mod passes;
pub mod rewriter;

pub use aliases::{collect, Alias, Aliases};
pub use rewriter::{
    apply_pass, Pass, PassFn, RewriteError, RewriteResult, Rewriter, RewriterConfig, RewriterMode, State, TempNameGen,
};

use crate::ir::Cluster;

/// Rewrite `cluster` with the pipeline named by `mode` (see
/// [`Rewriter::from_mode`]) under default thresholds.
pub fn rewrite(cluster: Cluster, mode: &str) -> RewriteResult<State> {
    Ok(Rewriter::from_mode(mode, RewriterConfig::default())?.run(cluster))
}
