//! Tree rewriting utilities used by the rewrite passes.

use super::cost::estimate_cost;
use super::expr::{Assignment, Expr, Func};
use super::queries::q_op;
use indexmap::IndexMap;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;

/// Substitution table for [`xreplace`].
pub type Substitutions = HashMap<Expr, Expr>;

/// Simultaneous structural substitution. Matching is top-down and replaced
/// nodes are not visited again. Rebuilt nodes are canonicalized.
pub fn xreplace(expr: &Expr, map: &Substitutions) -> Expr {
    if let Some(replacement) = map.get(expr) {
        return replacement.clone();
    }
    if expr.args().is_empty() {
        return expr.clone();
    }
    expr.map_args(|a| xreplace(a, map), false)
}

/// Like [`xreplace`], but rebuilt nodes keep their operand order verbatim.
pub fn xreplace_raw(expr: &Expr, map: &Substitutions) -> Expr {
    if let Some(replacement) = map.get(expr) {
        return replacement.clone();
    }
    if expr.args().is_empty() {
        return expr.clone();
    }
    expr.map_args(|a| xreplace_raw(a, map), true)
}

/// Substitute in both sides of an assignment. Frozen assignments are
/// rebuilt verbatim.
pub fn xreplace_assignment(assignment: &Assignment, map: &Substitutions) -> Assignment {
    if map.is_empty() {
        return assignment.clone();
    }
    let apply: fn(&Expr, &Substitutions) -> Expr = if assignment.frozen { xreplace_raw } else { xreplace };
    Assignment {
        lhs: apply(&assignment.lhs, map),
        rhs: apply(&assignment.rhs, map),
        ..assignment.clone()
    }
}

/// Order new scalar definitions so that each one lands right before the
/// first assignment reading it, after the definitions it reads itself.
pub fn schedule_definitions(defs: Vec<Assignment>, exprs: Vec<Assignment>) -> Vec<Assignment> {
    let mut pending: IndexMap<String, Assignment> = defs
        .into_iter()
        .filter_map(|d| d.scalar_target().map(str::to_string).map(|name| (name, d)))
        .collect();
    let mut out = Vec::with_capacity(pending.len() + exprs.len());
    for e in exprs {
        emit_dependencies(&e.rhs, &mut pending, &mut out);
        out.push(e);
    }
    out.extend(pending.into_iter().map(|(_, d)| d));
    out
}

fn emit_dependencies(expr: &Expr, pending: &mut IndexMap<String, Assignment>, out: &mut Vec<Assignment>) {
    if pending.is_empty() {
        return;
    }
    let used: HashSet<&str> = expr.free_symbols().into_iter().collect();
    let ready: Vec<String> = pending.keys().filter(|k| used.contains(k.as_str())).cloned().collect();
    for name in ready {
        if let Some(def) = pending.shift_remove(&name) {
            emit_dependencies(&def.rhs, pending, out);
            out.push(def);
        }
    }
}

struct Extraction<'a> {
    found: IndexMap<Expr, Expr>,
    make: &'a mut dyn FnMut() -> Expr,
    rule: &'a dyn Fn(&Expr) -> bool,
    costmodel: &'a dyn Fn(&Expr) -> bool,
    eager: bool,
}

impl Extraction<'_> {
    fn replace(&mut self, expr: Expr) -> Expr {
        if let Some(temp) = self.found.get(&expr) {
            return temp.clone();
        }
        let temp = (self.make)();
        self.found.insert(expr, temp.clone());
        temp
    }

    /// Fully matching nodes are either extracted on the spot (eager mode)
    /// or reported upwards so the parent can try to grow the match.
    fn matched(&mut self, rebuilt: Expr, root: bool) -> (Expr, bool) {
        if self.eager && !root && (self.costmodel)(&rebuilt) {
            (self.replace(rebuilt), false)
        } else {
            (rebuilt, true)
        }
    }

    fn run(&mut self, expr: &Expr, root: bool) -> (Expr, bool) {
        if expr.args().is_empty() {
            return (expr.clone(), (self.rule)(expr));
        }
        let children: Vec<(Expr, bool)> = expr.args().into_iter().map(|a| self.run(a, false)).collect();
        let all_match = children.iter().all(|(_, flag)| *flag);

        if all_match {
            let rebuilt = expr.with_args(children.iter().map(|(e, _)| e.clone()).collect());
            if (self.rule)(&rebuilt) {
                return self.matched(rebuilt, root);
            }
        }

        match expr {
            Expr::Add(_) | Expr::Mul(_) => {
                let (matching, mut other): (Vec<_>, Vec<_>) = children.into_iter().partition(|(_, f)| *f);
                let matching: Vec<Expr> = matching.into_iter().map(|(e, _)| e).collect();
                if matching.is_empty() {
                    let other = other.into_iter().map(|(e, _)| e).collect();
                    return (expr.with_args(other), false);
                }
                let grouped = expr.with_args(matching.clone());
                let mut operands: Vec<Expr> = other.drain(..).map(|(e, _)| e).collect();
                if matching.len() > 1 && (self.rule)(&grouped) && (self.costmodel)(&grouped) {
                    operands.push(self.replace(grouped));
                } else {
                    for m in matching {
                        let m = if (self.costmodel)(&m) { self.replace(m) } else { m };
                        operands.push(m);
                    }
                }
                (expr.with_args(operands), false)
            }
            _ => {
                let operands = children
                    .into_iter()
                    .map(|(e, flag)| if flag && (self.costmodel)(&e) { self.replace(e) } else { e })
                    .collect();
                (expr.with_args(operands), false)
            }
        }
    }
}

/// Cost-gated greedy extraction.
///
/// Sub-expressions satisfying `rule` are grown as far up the tree as the
/// rule allows, then assigned to a fresh temporary from `make` if
/// `costmodel` accepts them. With `eager` set, a matching node is extracted
/// as soon as the cost model accepts it instead of waiting for a larger
/// match. Identical candidates share one temporary; a right-hand side that
/// matches as a whole is left in place.
///
/// Returns the rewritten assignments, with the new definitions scheduled
/// before their first use, and the new definitions alone.
pub fn yreplace(
    exprs: &[Assignment],
    make: &mut dyn FnMut() -> Expr,
    rule: &dyn Fn(&Expr) -> bool,
    costmodel: &dyn Fn(&Expr) -> bool,
    eager: bool,
) -> (Vec<Assignment>, Vec<Assignment>) {
    let mut extraction = Extraction { found: IndexMap::new(), make, rule, costmodel, eager };
    let rebuilt: Vec<Assignment> = exprs
        .iter()
        .map(|e| {
            let (rhs, _) = extraction.run(&e.rhs, true);
            e.with_rhs(rhs)
        })
        .collect();
    let found: Vec<Assignment> = extraction
        .found
        .into_iter()
        .map(|(value, temp)| Assignment::new(temp, value))
        .collect();
    (schedule_definitions(found.clone(), rebuilt), found)
}

fn count_ops(expr: &Expr, skip_root: bool, counts: &mut IndexMap<Expr, usize>) {
    let root: *const Expr = expr;
    expr.walk(&mut |e| {
        if q_op(e) && !(skip_root && std::ptr::eq(e, root)) {
            *counts.entry(e.clone()).or_insert(0) += 1;
        }
    });
}

/// Common sub-expression elimination over a sequence of assignments.
///
/// Existing scalar temporaries are reused first. Then, round after round,
/// the most expensive operations appearing more than once are assigned to
/// new temporaries. The right-hand side of a scalar definition as a whole
/// is never a candidate, so previously extracted temporaries stay intact.
pub fn common_subexprs_elimination(exprs: &[Assignment], make: &mut dyn FnMut() -> Expr) -> Vec<Assignment> {
    let mut processed: Vec<Assignment> = Vec::with_capacity(exprs.len());
    let mut reuse = Substitutions::new();
    for e in exprs {
        let rewritten = if reuse.is_empty() { e.clone() } else { e.with_rhs(xreplace(&e.rhs, &reuse)) };
        if rewritten.lhs.is_symbol() && q_op(&rewritten.rhs) {
            reuse.entry(rewritten.rhs.clone()).or_insert_with(|| rewritten.lhs.clone());
        }
        processed.push(rewritten);
    }

    let mut defs: Vec<Assignment> = Vec::new();
    loop {
        let mut counts: IndexMap<Expr, usize> = IndexMap::new();
        for e in defs.iter().chain(processed.iter()) {
            count_ops(&e.rhs, e.lhs.is_symbol(), &mut counts);
        }
        let targets: Vec<(Expr, usize)> = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(k, _)| {
                let cost = estimate_cost(&k, true);
                (k, cost)
            })
            .filter(|(_, cost)| *cost > 0)
            .collect();
        let Some(hi) = targets.iter().map(|(_, c)| *c).max() else {
            break;
        };
        let chosen: Vec<(Expr, Expr)> = targets
            .into_iter()
            .filter(|(_, c)| *c == hi)
            .map(|(k, _)| (k, make()))
            .collect();
        let map: Substitutions = chosen.iter().cloned().collect();
        processed = processed.iter().map(|e| e.with_rhs(xreplace(&e.rhs, &map))).collect();
        defs = defs.iter().map(|e| e.with_rhs(xreplace(&e.rhs, &map))).collect();
        let fresh = chosen.into_iter().map(|(value, temp)| Assignment::new(temp, value));
        defs.extend(fresh);
    }

    schedule_definitions(defs, processed)
}

fn collect_terms(terms: Vec<Expr>) -> Vec<Expr> {
    // numeric coefficients: 2a - 2b -> 2(a - b)
    let mut by_coeff: IndexMap<u64, Vec<usize>> = IndexMap::new();
    for (n, term) in terms.iter().enumerate() {
        let (coeff, rest) = term.as_coeff_factors();
        if !rest.is_empty() && coeff.abs() != 1.0 {
            by_coeff.entry(coeff.abs().to_bits()).or_default().push(n);
        }
    }
    let mut grouped: Vec<Expr> = Vec::new();
    let mut consumed = vec![false; terms.len()];
    for (bits, members) in by_coeff {
        if members.len() < 2 {
            continue;
        }
        let coeff = f64::from_bits(bits);
        let inner = members
            .iter()
            .map(|&n| {
                consumed[n] = true;
                let (c, rest) = terms[n].as_coeff_factors();
                let sign = if c < 0.0 { -1.0 } else { 1.0 };
                Expr::mul(std::iter::once(Expr::num(sign)).chain(rest).collect())
            })
            .collect();
        grouped.push(Expr::mul(vec![Expr::num(coeff), Expr::add(inner)]));
    }
    let mut terms: Vec<Expr> = terms
        .into_iter()
        .zip(consumed)
        .filter_map(|(t, used)| (!used).then_some(t))
        .chain(grouped)
        .collect();

    // common factors: ab + ac -> a(b + c)
    let factors_of = |t: &Expr| -> Vec<Expr> {
        match t {
            Expr::Mul(args) => args.iter().filter(|a| !a.is_number()).cloned().collect(),
            _ => Vec::new(),
        }
    };
    let mut occurrences: IndexMap<Expr, usize> = IndexMap::new();
    for t in &terms {
        let factors = factors_of(t);
        if factors.len() < 2 {
            continue;
        }
        for f in factors.into_iter().unique() {
            *occurrences.entry(f).or_insert(0) += 1;
        }
    }
    let best = occurrences
        .into_iter()
        .filter(|(_, n)| *n >= 2)
        .max_by(|(fa, na), (fb, nb)| na.cmp(nb).then_with(|| fb.cmp(fa)));
    if let Some((factor, _)) = best {
        let mut inner = Vec::new();
        let mut kept = Vec::new();
        for t in terms.drain(..) {
            let factors = factors_of(&t);
            match (&t, factors.len() >= 2 && factors.contains(&factor)) {
                (Expr::Mul(args), true) => {
                    let mut removed = false;
                    let rest: Vec<Expr> = args
                        .iter()
                        .filter(|a| {
                            if !removed && **a == factor {
                                removed = true;
                                false
                            } else {
                                true
                            }
                        })
                        .cloned()
                        .collect();
                    inner.push(Expr::mul(rest));
                }
                _ => kept.push(t),
            }
        }
        kept.push(Expr::mul(vec![factor, Expr::add(inner)]));
        terms = kept;
    }
    terms
}

/// One round of term collection at every level of the tree: numeric
/// coefficients shared by several terms and then the most common factor of
/// each sum are pulled out.
pub fn collect_nested(expr: &Expr) -> Expr {
    if expr.args().is_empty() {
        return expr.clone();
    }
    let rebuilt = expr.map_args(collect_nested, false);
    match rebuilt {
        Expr::Add(terms) => Expr::add(collect_terms(terms)),
        other => other,
    }
}

/// Decides whether expressions vary across time steps, given the
/// assignments they live among.
///
/// An expression is time-invariant if it reads no array through a time
/// subscript, and every scalar or temporary array it reads that is defined
/// in the context is itself time-invariant.
#[derive(Debug, Clone, Default)]
pub struct TimeInvariance {
    scalars: HashMap<String, Expr>,
    arrays: HashMap<String, Expr>,
    time_dims: HashSet<String>,
}

impl TimeInvariance {
    /// Analyse the definitions in `context`
    pub fn new(context: &[Assignment]) -> Self {
        let mut this = Self::default();
        for e in context {
            match &e.lhs {
                Expr::Symbol(s) => {
                    this.scalars.insert(s.clone(), e.rhs.clone());
                }
                Expr::Indexed(i) if !i.function.is_input() => {
                    this.arrays.insert(i.function.name.clone(), e.rhs.clone());
                }
                _ => {}
            }
            for side in [&e.lhs, &e.rhs] {
                for d in side.dimensions() {
                    if d.is_time() {
                        this.time_dims.insert(d.name);
                    }
                }
            }
        }
        this
    }

    /// Whether `expr` is time-invariant
    pub fn check(&self, expr: &Expr) -> bool {
        self.invariant(expr, &mut HashSet::new())
    }

    /// Whether the right-hand side of `assignment` is time-invariant
    pub fn check_assignment(&self, assignment: &Assignment) -> bool {
        self.check(&assignment.rhs)
    }

    fn invariant(&self, expr: &Expr, seen: &mut HashSet<String>) -> bool {
        match expr {
            Expr::Number(_) => true,
            Expr::Symbol(s) => {
                if self.time_dims.contains(s) {
                    return false;
                }
                match self.scalars.get(s) {
                    Some(def) if seen.insert(s.clone()) => self.invariant(def, seen),
                    _ => true,
                }
            }
            Expr::Indexed(i) => {
                if i.is_time_dependent() {
                    return false;
                }
                match self.arrays.get(&i.function.name) {
                    Some(def) if seen.insert(i.function.name.clone()) => self.invariant(def, seen),
                    _ => true,
                }
            }
            other => other.args().into_iter().all(|a| self.invariant(a, seen)),
        }
    }
}

/// Build the time-invariance predicate for `context`.
pub fn make_is_time_invariant(context: &[Assignment]) -> impl Fn(&Expr) -> bool {
    let invariance = TimeInvariance::new(context);
    move |e: &Expr| invariance.check(e)
}

/// Expand integer powers into products, `a**3 -> a*a*a` and
/// `a**-2 -> 1/(a*a)`. The result is built verbatim.
pub fn pow_to_mul(expr: &Expr) -> Expr {
    match expr {
        Expr::Pow(base, exp) => {
            let base = pow_to_mul(base);
            match exp.as_integer() {
                Some(n) if n >= 2 => Expr::mul_raw(vec![base; n as usize]),
                Some(n) if n <= -2 => {
                    Expr::pow_raw(Expr::mul_raw(vec![base; n.unsigned_abs() as usize]), Expr::num(-1.0))
                }
                _ => Expr::pow_raw(base, pow_to_mul(exp)),
            }
        }
        leaf if leaf.args().is_empty() => leaf.clone(),
        other => other.map_args(pow_to_mul, true),
    }
}

/// Mark an assignment so that later substitutions never re-canonicalize it.
pub fn freeze(assignment: &Assignment) -> Assignment {
    Assignment { frozen: true, ..assignment.clone() }
}

/// Bhaskara's rational approximation of `sin(x)` over `[0, pi]`:
/// `16x(pi - x) / (5pi^2 - 4x(pi - x))`.
pub fn bhaskara_sin(x: Expr) -> Expr {
    let arc = x.clone() * (Expr::num(PI) - x);
    let numerator = Expr::num(16.0) * arc.clone();
    let denominator = Expr::num(5.0 * PI * PI) - Expr::num(4.0) * arc;
    numerator / denominator
}

/// `cos(x) = sin(x + pi/2)`, through [`bhaskara_sin`].
pub fn bhaskara_cos(x: Expr) -> Expr {
    bhaskara_sin(x + Expr::num(PI / 2.0))
}

/// Replace every `sin`/`cos` call with its Bhaskara polynomial.
pub fn replace_trigonometry(expr: &Expr) -> Expr {
    if expr.args().is_empty() {
        return expr.clone();
    }
    let rebuilt = expr.map_args(replace_trigonometry, false);
    match rebuilt {
        Expr::Call(Func::Sin, mut args) if args.len() == 1 => bhaskara_sin(args.remove(0)),
        Expr::Call(Func::Cos, mut args) if args.len() == 1 => bhaskara_cos(args.remove(0)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolics::eval::evaluate;
    use crate::symbolics::expr::{Dimension, Function, Index};
    use crate::symbolics::queries::{q_leaf, q_sum_of_product, q_terminalop};

    fn temps() -> impl FnMut() -> Expr {
        let mut n = 0;
        move || {
            let t = Expr::symbol(format!("r{}", n));
            n += 1;
            t
        }
    }

    fn sym(name: &str) -> Expr {
        Expr::symbol(name)
    }

    #[test]
    fn test_xreplace_is_simultaneous() {
        let mut map = Substitutions::new();
        map.insert(sym("a"), sym("b"));
        map.insert(sym("b"), sym("a"));
        let e = sym("a") * Expr::num(2.0) + sym("b");
        assert_eq!(xreplace(&e, &map), sym("b") * Expr::num(2.0) + sym("a"));
    }

    #[test]
    fn test_yreplace_sum_of_products() {
        let x = Dimension::space("x");
        let u = Function::input("u");
        let ux = |o| u.at(vec![Index::at(&x, o)]);
        // out = (a*u[x] + b*u[x+1]) * sin(c)
        let rhs = (sym("a") * ux(0) + sym("b") * ux(1)) * sym("c").sin();
        let exprs = vec![Assignment::new(sym("out"), rhs)];
        let mut make = temps();
        let costmodel = |e: &Expr| !(q_leaf(e) || q_terminalop(e));
        let (processed, found) = yreplace(&exprs, &mut make, &q_sum_of_product, &costmodel, false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rhs, sym("a") * ux(0) + sym("b") * ux(1));
        assert_eq!(processed.len(), 2);
        assert_eq!(processed[0].lhs, sym("r0"));
        assert_eq!(processed[1].rhs, sym("r0") * sym("c").sin());
    }

    #[test]
    fn test_yreplace_shares_identical_candidates() {
        let rhs1 = (sym("a") * sym("b") + sym("c") * sym("d")) * sym("e").sin();
        let rhs2 = (sym("a") * sym("b") + sym("c") * sym("d")) * sym("f").cos();
        let exprs = vec![Assignment::new(sym("p"), rhs1), Assignment::new(sym("q"), rhs2)];
        let mut make = temps();
        let costmodel = |e: &Expr| !(q_leaf(e) || q_terminalop(e));
        let (processed, found) = yreplace(&exprs, &mut make, &q_sum_of_product, &costmodel, false);
        assert_eq!(found.len(), 1);
        assert_eq!(processed.len(), 3);
    }

    #[test]
    fn test_cse_extracts_repeated_subexpression() {
        let shared = (sym("a") + sym("b")) * sym("c");
        let exprs = vec![
            Assignment::new(sym("p"), shared.clone() + sym("d")),
            Assignment::new(sym("q"), shared.clone().sin()),
        ];
        let mut make = temps();
        let out = common_subexprs_elimination(&exprs, &mut make);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Assignment::new(sym("r0"), shared));
        assert_eq!(out[1].rhs, sym("r0") + sym("d"));
        assert_eq!(out[2].rhs, sym("r0").sin());
    }

    #[test]
    fn test_cse_reuses_existing_temporaries() {
        let shared = sym("a") * sym("b");
        let exprs = vec![
            Assignment::new(sym("r9"), shared.clone()),
            Assignment::new(sym("q"), shared.sin()),
        ];
        let mut make = temps();
        let out = common_subexprs_elimination(&exprs, &mut make);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].rhs, sym("r9").sin());
    }

    #[test]
    fn test_collect_nested_reduces_cost() {
        // 2ab + 2ac + d
        let e = Expr::num(2.0) * sym("a") * sym("b") + Expr::num(2.0) * sym("a") * sym("c") + sym("d");
        let collected = collect_nested(&e);
        assert!(estimate_cost(&collected, false) < estimate_cost(&e, false));

        let mut env = HashMap::new();
        for (k, v) in [("a", 1.5), ("b", -2.0), ("c", 0.25), ("d", 3.0)] {
            env.insert(k.to_string(), v);
        }
        let before = evaluate(&e, &env).unwrap();
        let after = evaluate(&collected, &env).unwrap();
        assert!((before - after).abs() < 1e-12);
    }

    #[test]
    fn test_common_factor() {
        let e = sym("a") * sym("b") + sym("a") * sym("c");
        assert_eq!(collect_nested(&e), sym("a") * (sym("b") + sym("c")));
    }

    #[test]
    fn test_time_invariance_is_transitive() {
        let t = Dimension::time("t");
        let x = Dimension::space("x");
        let m = Function::input("m").at(vec![Index::at(&x, 0)]);
        let u = Function::input("u").at(vec![Index::at(&t, 0), Index::at(&x, 0)]);
        let context = vec![
            Assignment::new(sym("s0"), m.clone() * Expr::num(2.0)),
            Assignment::new(sym("s1"), u.clone() + sym("s0")),
        ];
        let inv = TimeInvariance::new(&context);
        assert!(inv.check(&sym("s0")));
        assert!(!inv.check(&sym("s1")));
        assert!(inv.check(&(m * sym("dt"))));
        assert!(!inv.check(&u));
    }

    #[test]
    fn test_pow_to_mul() {
        let e = sym("a").powi(3) + sym("b").powi(-2);
        let expanded = pow_to_mul(&e);
        let mut found_pow = false;
        expanded.walk(&mut |n| {
            if let Expr::Pow(_, exp) = n {
                assert_eq!(exp.as_number(), Some(-1.0));
                found_pow = true;
            }
        });
        assert!(found_pow);
        assert_eq!(pow_to_mul(&expanded), expanded);
    }

    #[test]
    fn test_bhaskara_accuracy() {
        let env: HashMap<String, f64> = HashMap::new();
        for k in 1..10 {
            let v = PI * k as f64 / 10.0;
            let approx = evaluate(&bhaskara_sin(Expr::num(v)), &env).unwrap();
            assert!((approx - v.sin()).abs() < 2e-3, "sin({}) = {}", v, approx);
        }
        let c = replace_trigonometry(&Expr::num(0.3).cos());
        assert!((evaluate(&c, &env).unwrap() - 0.3f64.cos()).abs() < 2e-3);
    }
}
