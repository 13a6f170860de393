//! Structural predicates over expressions.

use super::expr::Expr;

/// Numbers, symbols and array accesses.
pub fn q_leaf(expr: &Expr) -> bool {
    matches!(expr, Expr::Number(_) | Expr::Symbol(_) | Expr::Indexed(_))
}

/// Any node that performs arithmetic.
pub fn q_op(expr: &Expr) -> bool {
    !q_leaf(expr)
}

/// A leaf, a product of leaves, or a leaf raised to a numeric power.
pub fn q_monomial(expr: &Expr) -> bool {
    match expr {
        Expr::Mul(args) => args.iter().all(|a| q_leaf(a) || q_leaf_power(a)),
        other => q_leaf(other) || q_leaf_power(other),
    }
}

fn q_leaf_power(expr: &Expr) -> bool {
    matches!(expr, Expr::Pow(base, exp) if q_leaf(base) && exp.is_number())
}

/// A leaf, a monomial, or a sum of monomials.
pub fn q_sum_of_product(expr: &Expr) -> bool {
    match expr {
        Expr::Add(args) => args.iter().all(q_monomial),
        other => q_monomial(other),
    }
}

/// An operation whose operands are all leaves (nothing left to extract
/// from inside it).
pub fn q_terminalop(expr: &Expr) -> bool {
    match expr {
        Expr::Add(args) | Expr::Mul(args) => args.iter().all(q_leaf),
        Expr::Pow(..) => q_leaf_power(expr),
        other => q_leaf(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_of_products() {
        let (a, b, c, d) = (Expr::symbol("a"), Expr::symbol("b"), Expr::symbol("c"), Expr::symbol("d"));
        let sop = a.clone() * b.clone() + c.clone() * d.clone();
        assert!(q_sum_of_product(&sop));
        assert!(!q_terminalop(&sop));

        let nested = (a.clone() + b.clone()) * c.clone();
        assert!(!q_sum_of_product(&nested));

        assert!(q_terminalop(&(a.clone() + b)));
        assert!(q_terminalop(&a.clone().powi(2)));
        assert!(q_leaf(&a));
        assert!(!q_op(&a));
    }
}
