//! Symbolic expressions and the tree utilities the rewrite passes build on.
//!
//! - [`expr`]: expression trees, array accesses and assignments
//! - [`cost`]: operation-count estimation
//! - [`queries`]: structural predicates
//! - [`manipulation`]: substitution, extraction, CSE, collection, finalization helpers
//! - [`eval`]: numeric evaluation

pub mod cost;
pub mod eval;
pub mod expr;
pub mod manipulation;
pub mod queries;

pub use cost::{estimate_cost, estimate_cost_all};
pub use eval::{evaluate, Env, EvalError};
pub use expr::{Assignment, Dimension, DimensionKind, Expr, Float, Func, Function, FunctionKind, Index, Indexed};
pub use manipulation::{
    bhaskara_cos, bhaskara_sin, collect_nested, common_subexprs_elimination, freeze, make_is_time_invariant,
    pow_to_mul, replace_trigonometry, xreplace, xreplace_assignment, yreplace, Substitutions, TimeInvariance,
};
pub use queries::{q_leaf, q_monomial, q_op, q_sum_of_product, q_terminalop};
