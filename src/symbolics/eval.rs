//! Numeric evaluation of expressions.

use super::expr::{Dimension, Expr, Float, Function, Index};
use indexmap::IndexMap;
use std::collections::HashMap;
use thiserror::Error;

/// Failure to evaluate an expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// A scalar symbol has no value in the environment
    #[error("unbound symbol `{0}`")]
    Unbound(String),

    /// An array element has no value in the environment
    #[error("unbound access {0}{1:?}")]
    UnboundAccess(String, Vec<i64>),
}

/// Values for the leaves of an expression.
pub trait Env {
    /// Value of a scalar symbol.
    fn symbol(&self, name: &str) -> Option<f64>;

    /// Current position along `dim`.
    fn dimension(&self, dim: &Dimension) -> Option<i64> {
        self.symbol(&dim.name).map(|v| v as i64)
    }

    /// Element of an array.
    fn read(&self, _function: &Function, _indices: &[i64]) -> Option<f64> {
        None
    }
}

impl Env for HashMap<String, f64> {
    fn symbol(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Env for IndexMap<String, f64> {
    fn symbol(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// Resolve the subscripts of an access to concrete positions.
pub fn resolve_indices(indices: &[Index], env: &dyn Env) -> Result<Vec<i64>, EvalError> {
    indices
        .iter()
        .map(|i| match i {
            Index::Const(c) => Ok(*c),
            Index::Affine { dim, offset } => env
                .dimension(dim)
                .map(|v| v + offset)
                .ok_or_else(|| EvalError::Unbound(dim.name.clone())),
        })
        .collect()
}

/// Evaluate `expr` under `env`.
pub fn evaluate(expr: &Expr, env: &dyn Env) -> Result<f64, EvalError> {
    match expr {
        Expr::Number(Float(v)) => Ok(*v),
        Expr::Symbol(s) => env.symbol(s).ok_or_else(|| EvalError::Unbound(s.clone())),
        Expr::Indexed(i) => {
            let position = resolve_indices(&i.indices, env)?;
            env.read(&i.function, &position)
                .ok_or_else(|| EvalError::UnboundAccess(i.function.name.clone(), position))
        }
        Expr::Add(args) => args.iter().try_fold(0.0, |acc, a| Ok(acc + evaluate(a, env)?)),
        Expr::Mul(args) => args.iter().try_fold(1.0, |acc, a| Ok(acc * evaluate(a, env)?)),
        Expr::Pow(base, exp) => {
            let b = evaluate(base, env)?;
            match exp.as_integer() {
                Some(n) if n.abs() <= i32::MAX as i64 => Ok(b.powi(n as i32)),
                _ => Ok(b.powf(evaluate(exp, env)?)),
            }
        }
        Expr::Call(func, args) => {
            let x = match args.first() {
                Some(a) => evaluate(a, env)?,
                None => 0.0,
            };
            Ok(func.apply(x))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_scalars() {
        let mut env = HashMap::new();
        env.insert("a".to_string(), 3.0);
        env.insert("b".to_string(), 4.0);
        let e = Expr::symbol("a") * Expr::symbol("a") + Expr::symbol("b").powi(2);
        assert_eq!(evaluate(&e, &env), Ok(25.0));
    }

    #[test]
    fn test_missing_binding_is_distinguishable() {
        let env: HashMap<String, f64> = HashMap::new();
        let e = Expr::symbol("nthreads") * Expr::num(8.0);
        assert_eq!(evaluate(&e, &env), Err(EvalError::Unbound("nthreads".to_string())));
    }
}
