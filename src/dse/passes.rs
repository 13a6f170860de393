//! The rewrite passes.
//!
//! Every pass maps one cluster to one or more clusters computing the same
//! values. Passes never mutate their input; fresh temporaries are named by
//! the [`TempNameGen`] shared across a pipeline run.

use super::aliases::collect;
use super::rewriter::{RewriterConfig, TempNameGen};
use crate::ir::{Cluster, DataSpace, Interval, IntervalGroup};
use crate::symbolics::{
    collect_nested, common_subexprs_elimination, estimate_cost, freeze, pow_to_mul, q_leaf, q_sum_of_product,
    q_terminalop, replace_trigonometry, xreplace, xreplace_assignment, yreplace, Assignment, Expr, Function, Index,
    Substitutions, TimeInvariance,
};
use indexmap::IndexMap;
use log::{debug, warn};

/// Pull the accumulated term of every increment into a non-local array out
/// into a scalar temporary:
///
/// ```text
/// u[x] += a*b          r0 = a*b
///                 =>   u[x] += r0
/// ```
pub fn extract_increments(cluster: &Cluster, template: &mut TempNameGen, _config: &RewriterConfig) -> Vec<Cluster> {
    let mut processed = Vec::with_capacity(cluster.exprs.len());
    for e in &cluster.exprs {
        if e.increment && e.writes_input() {
            let handle = template.symbol();
            processed.push(Assignment::new(handle.clone(), e.increment_term()));
            processed.push(Assignment::increment(e.lhs.clone(), handle));
        } else {
            processed.push(e.clone());
        }
    }
    vec![cluster.rebuild(processed)]
}

/// Common sub-expression elimination within the cluster.
pub fn eliminate_intra_stencil_redundancies(
    cluster: &Cluster,
    template: &mut TempNameGen,
    _config: &RewriterConfig,
) -> Vec<Cluster> {
    let mut make = || template.symbol();
    let processed = common_subexprs_elimination(&cluster.exprs, &mut make);
    vec![cluster.rebuild(processed)]
}

/// Replace `sin` and `cos` with Bhaskara polynomials.
pub fn optimize_trigonometry(cluster: &Cluster, _template: &mut TempNameGen, _config: &RewriterConfig) -> Vec<Cluster> {
    let processed = cluster.exprs.iter().map(|e| e.with_rhs(replace_trigonometry(&e.rhs))).collect();
    vec![cluster.rebuild(processed)]
}

/// Lift expensive time-invariant sub-expressions into scalar temporaries.
pub fn extract_time_invariants(cluster: &Cluster, template: &mut TempNameGen, config: &RewriterConfig) -> Vec<Cluster> {
    let invariance = TimeInvariance::new(&cluster.exprs);
    let rule = |e: &Expr| invariance.check(e);
    let threshold = config.min_cost_alias_inv;
    let costmodel = |e: &Expr| estimate_cost(e, true) >= threshold;
    let mut make = || template.symbol();
    let (processed, found) = yreplace(&cluster.exprs, &mut make, &rule, &costmodel, true);
    debug!("extract_invariants: {} time-invariant temporaries", found.len());
    vec![cluster.rebuild(processed)]
}

/// Factorize right-hand sides. Expensive expressions are collected
/// repeatedly for as long as their cost keeps dropping.
pub fn factorize(cluster: &Cluster, _template: &mut TempNameGen, config: &RewriterConfig) -> Vec<Cluster> {
    let processed = cluster
        .exprs
        .iter()
        .map(|e| {
            let original = estimate_cost(&e.rhs, false);
            let mut best = collect_nested(&e.rhs);
            let mut best_cost = estimate_cost(&best, false);
            if best_cost >= config.min_cost_factorize {
                loop {
                    let next = collect_nested(&best);
                    let cost = estimate_cost(&next, false);
                    if cost >= best_cost {
                        break;
                    }
                    best = next;
                    best_cost = cost;
                }
            }
            if best_cost >= original {
                e.clone()
            } else {
                e.with_rhs(best)
            }
        })
        .collect();
    vec![cluster.rebuild(processed)]
}

/// Capture redundancies across stencil offsets into array temporaries.
///
/// ```text
/// r0 = a[x] + b[x]               T[x] = a[x] + b[x]      (x in [x_m, x_M + 1])
/// r1 = a[x+1] + b[x+1]     =>
/// u[x] = r0*r1                   u[x] = T[x]*T[x + 1]
/// ```
///
/// Returns one cluster per lifted alias group, followed by the rewritten
/// input cluster.
pub fn eliminate_inter_stencil_redundancies(
    cluster: &Cluster,
    template: &mut TempNameGen,
    config: &RewriterConfig,
) -> Vec<Cluster> {
    let aliases = collect(&cluster.exprs);
    let invariance = TimeInvariance::new(&cluster.exprs);

    let mut processed = Vec::new();
    let mut candidates: IndexMap<Expr, Vec<Expr>> = IndexMap::new();
    for e in &cluster.exprs {
        let naliases = aliases.get(&e.rhs).map_or(0, |a| a.len());
        let cost = estimate_cost(&e.rhs, true) * naliases;
        let redundant = cost >= config.min_cost_alias && naliases > 1;
        let invariant = cost >= config.min_cost_alias_inv && invariance.check(&e.rhs);
        if e.lhs.is_symbol() && (redundant || invariant) {
            candidates.entry(e.rhs.clone()).or_default().push(e.lhs.clone());
        } else {
            processed.push(e.clone());
        }
    }

    let mut clusters = Vec::new();
    let mut subs = Substitutions::new();
    for alias in aliases.iter() {
        if alias.aliased.iter().all(|a| !candidates.contains_key(a)) {
            continue;
        }

        let diameter = alias.relaxed_diameter();
        let writeto = IntervalGroup::new(
            cluster
                .ispace
                .intervals
                .iter()
                .filter(|i| !i.dim.is_time())
                .map(|i| {
                    let (lower, upper) = diameter.get(&i.dim).copied().unwrap_or((0, 0));
                    Interval::new(i.dim.clone(), lower, upper)
                })
                .collect(),
        );
        // leading dimensions that induce no dependence need no storage
        let writeto = match writeto.iter().position(Interval::has_offsets) {
            Some(index) => writeto.split_off(index),
            None => {
                warn!("Couldn't optimize some of the detected redundancies");
                writeto
            }
        };

        let halo = writeto.iter().map(|i| (i.lower.unsigned_abs(), i.upper.unsigned_abs())).collect();
        let array = Function::array(template.next_name(), halo);
        let access = writeto.iter().map(|i| Index::at(&i.dim, -i.lower)).collect();
        let expression = Assignment::new(array.at(access), xreplace(&alias.origin, &subs));

        for (aliased, distance) in alias.with_distance() {
            let access = writeto
                .iter()
                .map(|i| Index::at(&i.dim, -i.lower + distance.get(&i.dim).copied().unwrap_or(0)))
                .collect();
            let target = array.at(access);
            if let Some(handles) = candidates.get(aliased) {
                for handle in handles {
                    subs.insert(handle.clone(), target.clone());
                }
            }
            subs.insert(aliased.clone(), target);
        }

        let ispace = cluster.ispace.with_intervals(cluster.ispace.intervals.add(&writeto));
        let footprint = DataSpace::from_accesses(std::slice::from_ref(&expression), &ispace);
        let dspace = DataSpace::new(cluster.dspace.intervals.clone(), footprint.parts);
        debug!("gcse: lifted {} aliases into {} over {}", alias.len(), array.name, writeto);
        clusters.push(cluster.rebuild_with(vec![expression], ispace, dspace));
    }

    let processed = processed.iter().map(|e| xreplace_assignment(e, &subs)).collect();
    clusters.push(cluster.rebuild(processed));
    clusters
}

/// Lift sub-expressions in sum-of-products form into scalar temporaries.
pub fn extract_sum_of_products(
    cluster: &Cluster,
    template: &mut TempNameGen,
    _config: &RewriterConfig,
) -> Vec<Cluster> {
    let costmodel = |e: &Expr| !(q_leaf(e) || q_terminalop(e));
    let mut make = || template.symbol();
    let (processed, _) = yreplace(&cluster.exprs, &mut make, &q_sum_of_product, &costmodel, false);
    vec![cluster.rebuild(processed)]
}

/// Expand integer powers into products and freeze every assignment.
pub fn finalize(cluster: &Cluster, _template: &mut TempNameGen, _config: &RewriterConfig) -> Vec<Cluster> {
    let processed = cluster
        .exprs
        .iter()
        .map(|e| {
            let expanded = Assignment { lhs: e.lhs.clone(), rhs: pow_to_mul(&e.rhs), ..e.clone() };
            freeze(&expanded)
        })
        .collect();
    vec![cluster.rebuild(processed)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolics::{Dimension, FunctionKind};

    fn field(name: &str, x: &Dimension, offset: i64) -> Expr {
        Function::input(name).at(vec![Index::at(x, offset)])
    }

    #[test]
    fn test_extract_increments() {
        let x = Dimension::space("x");
        let u = field("u", &x, 0);
        let e = Assignment::increment(u.clone(), u.clone() + Expr::symbol("a") * Expr::symbol("b"));
        let cluster = Cluster::from_exprs(vec![e], &[x]);
        let mut template = TempNameGen::new();
        let out = extract_increments(&cluster, &mut template, &RewriterConfig::default());
        assert_eq!(out.len(), 1);
        let exprs = &out[0].exprs;
        assert_eq!(exprs[0], Assignment::new(Expr::symbol("r0"), Expr::symbol("a") * Expr::symbol("b")));
        assert_eq!(exprs[1], Assignment::increment(u, Expr::symbol("r0")));
    }

    #[test]
    fn test_gcse_lifts_aliases() {
        let x = Dimension::space("x");
        let exprs = vec![
            Assignment::new(Expr::symbol("e1"), field("a", &x, 0) + field("b", &x, 0)),
            Assignment::new(Expr::symbol("e2"), field("a", &x, 1) + field("b", &x, 1)),
            Assignment::new(field("u", &x, 0), Expr::symbol("e1") * Expr::symbol("e2")),
        ];
        let cluster = Cluster::from_exprs(exprs, &[x.clone()]);
        let config = RewriterConfig::default().min_cost_alias(1);
        let mut template = TempNameGen::new();
        let out = eliminate_inter_stencil_redundancies(&cluster, &mut template, &config);
        assert_eq!(out.len(), 2);

        let alias = &out[0];
        assert_eq!(alias.exprs.len(), 1);
        let Expr::Indexed(lhs) = &alias.exprs[0].lhs else { panic!("array temporary expected") };
        assert_eq!(lhs.function.kind, FunctionKind::Array { halo: vec![(0, 1)] });
        assert_eq!(alias.ispace.intervals.get(&x), Some(&Interval::new(x.clone(), 0, 1)));

        let main = &out[1];
        assert_eq!(main.exprs.len(), 1);
        let temp = Function::array(lhs.function.name.clone(), vec![(0, 1)]);
        let expected = temp.at(vec![Index::at(&x, 0)]) * temp.at(vec![Index::at(&x, 1)]);
        assert_eq!(main.exprs[0].rhs, expected);
    }

    #[test]
    fn test_factorize_never_increases_cost() {
        let (a, b, c) = (Expr::symbol("a"), Expr::symbol("b"), Expr::symbol("c"));
        let rhs = a.clone() * b.clone() + a.clone() * c.clone() + b * c;
        let cluster = Cluster::from_exprs(vec![Assignment::new(Expr::symbol("s"), rhs.clone())], &[]);
        let mut template = TempNameGen::new();
        let out = factorize(&cluster, &mut template, &RewriterConfig::default());
        assert!(estimate_cost(&out[0].exprs[0].rhs, false) <= estimate_cost(&rhs, false));
    }

    #[test]
    fn test_factorize_keeps_expressions_it_cannot_improve() {
        let (a, b, c, d) = (Expr::symbol("a"), Expr::symbol("b"), Expr::symbol("c"), Expr::symbol("d"));
        let exprs = vec![
            Assignment::new(Expr::symbol("s"), a.clone() * (b.clone() + c.clone())),
            Assignment::new(Expr::symbol("t"), a * b + c * d),
        ];
        let cluster = Cluster::from_exprs(exprs.clone(), &[]);
        let out = factorize(&cluster, &mut TempNameGen::new(), &RewriterConfig::default().min_cost_factorize(1));
        assert_eq!(out[0].exprs, exprs);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let rhs = Expr::symbol("a").powi(2) * Expr::symbol("b");
        let cluster = Cluster::from_exprs(vec![Assignment::new(Expr::symbol("s"), rhs)], &[]);
        let mut template = TempNameGen::new();
        let config = RewriterConfig::default();
        let once = finalize(&cluster, &mut template, &config);
        let twice = finalize(&once[0], &mut template, &config);
        assert_eq!(once, twice);
        assert!(once[0].exprs.iter().all(|e| e.frozen));
    }
}
