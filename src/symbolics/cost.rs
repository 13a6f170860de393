//! Operation-count estimation.
//!
//! Every rewrite pass decides whether a transformation pays off by comparing
//! estimated floating-point operation counts. Index arithmetic is free;
//! negation (a product with `-1`) is free; with `weighted` set, intrinsic
//! calls are charged what they roughly cost relative to an add.

use super::expr::{Assignment, Expr, Func};

/// Weight of an intrinsic call when functions are accounted for.
pub fn function_weight(func: Func) -> usize {
    match func {
        Func::Sin | Func::Cos | Func::Exp | Func::Log => 50,
        Func::Sqrt => 10,
    }
}

/// Estimated operation count of `expr`.
pub fn estimate_cost(expr: &Expr, weighted: bool) -> usize {
    match expr {
        Expr::Number(_) | Expr::Symbol(_) | Expr::Indexed(_) => 0,
        Expr::Add(args) => {
            args.len().saturating_sub(1) + args.iter().map(|a| estimate_cost(a, weighted)).sum::<usize>()
        }
        Expr::Mul(args) => {
            let counted = args.iter().filter(|a| a.as_number() != Some(-1.0)).count();
            counted.saturating_sub(1) + args.iter().map(|a| estimate_cost(a, weighted)).sum::<usize>()
        }
        Expr::Pow(base, exp) => {
            let own = match exp.as_integer() {
                Some(n) if n >= 2 => (n - 1) as usize,
                _ => 1,
            };
            own + estimate_cost(base, weighted) + estimate_cost(exp, weighted)
        }
        Expr::Call(func, args) => {
            let own = if weighted { function_weight(*func) } else { 0 };
            own + args.iter().map(|a| estimate_cost(a, weighted)).sum::<usize>()
        }
    }
}

/// Total estimated cost of the right-hand sides of `exprs`.
pub fn estimate_cost_all<'a, I>(exprs: I, weighted: bool) -> usize
where
    I: IntoIterator<Item = &'a Assignment>,
{
    exprs.into_iter().map(|e| estimate_cost(&e.rhs, weighted)).sum()
}
