//! A reference interpreter for cluster lists.
//!
//! Executes clusters the way generated code would: consecutive clusters
//! whose intervals agree along the outer dimensions share those loops,
//! and split into separate loops at the first dimension where they differ.
//! Scalars are local to one point of one cluster. Reading an element that
//! was never written is an error, which makes the interpreter a strict
//! checker for rewritten clusters.

use super::cluster::Cluster;
use super::space::Direction;
use crate::symbolics::eval::{evaluate, resolve_indices, Env, EvalError};
use crate::symbolics::{Dimension, Expr, Function};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Runtime bounds, parameters and array contents.
#[derive(Debug, Clone, Default)]
pub struct Grid {
    bounds: IndexMap<Dimension, (i64, i64)>,
    params: HashMap<String, f64>,
    fields: HashMap<String, HashMap<Vec<i64>, f64>>,
}

impl Grid {
    /// An empty grid
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate `dim` from `min` to `max`, both inclusive.
    pub fn bounds(mut self, dim: &Dimension, min: i64, max: i64) -> Self {
        self.bounds.insert(dim.clone(), (min, max));
        self
    }

    /// Bind a scalar parameter
    pub fn param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Populate `function` over `dims`, padded by `halo` points on each side
    /// of every dimension's bounds.
    pub fn fill<F>(&mut self, function: &Function, dims: &[Dimension], halo: i64, mut value: F)
    where
        F: FnMut(&[i64]) -> f64,
    {
        let ranges: Vec<(i64, i64)> = dims
            .iter()
            .map(|d| {
                let (lo, hi) = self.bounds.get(d).copied().unwrap_or((0, 0));
                (lo - halo, hi + halo)
            })
            .collect();
        let field = self.fields.entry(function.name.clone()).or_default();
        let mut point: Vec<i64> = ranges.iter().map(|(lo, _)| *lo).collect();
        if ranges.iter().any(|(lo, hi)| lo > hi) {
            return;
        }
        loop {
            field.insert(point.clone(), value(&point));
            // odometer increment, last dimension fastest
            let mut k = point.len();
            loop {
                if k == 0 {
                    return;
                }
                k -= 1;
                if point[k] < ranges[k].1 {
                    point[k] += 1;
                    break;
                }
                point[k] = ranges[k].0;
            }
        }
    }

    /// Value of `name` at `indices`
    pub fn get(&self, name: &str, indices: &[i64]) -> Option<f64> {
        self.fields.get(name).and_then(|f| f.get(indices)).copied()
    }

    /// Store a value of `name` at `indices`
    pub fn set(&mut self, name: &str, indices: Vec<i64>, value: f64) {
        self.fields.entry(name.to_string()).or_default().insert(indices, value);
    }

    /// All elements of a field.
    pub fn field(&self, name: &str) -> Option<&HashMap<Vec<i64>, f64>> {
        self.fields.get(name)
    }
}

struct Point<'a> {
    grid: &'a Grid,
    position: &'a HashMap<String, i64>,
    locals: &'a HashMap<String, f64>,
}

impl Env for Point<'_> {
    fn symbol(&self, name: &str) -> Option<f64> {
        self.locals
            .get(name)
            .or_else(|| self.grid.params.get(name))
            .copied()
            .or_else(|| self.position.get(name).map(|v| *v as f64))
    }

    fn dimension(&self, dim: &Dimension) -> Option<i64> {
        self.position.get(&dim.name).copied()
    }

    fn read(&self, function: &Function, indices: &[i64]) -> Option<f64> {
        self.grid.get(&function.name, indices)
    }
}

fn execute_point(cluster: &Cluster, grid: &mut Grid, position: &HashMap<String, i64>) -> Result<(), EvalError> {
    let mut locals: HashMap<String, f64> = HashMap::new();
    for e in &cluster.exprs {
        let env = Point { grid, position, locals: &locals };
        let value = if e.increment {
            let old = evaluate(&e.lhs, &env)?;
            old + evaluate(&e.increment_term(), &env)?
        } else {
            evaluate(&e.rhs, &env)?
        };
        match &e.lhs {
            Expr::Symbol(s) => {
                locals.insert(s.clone(), value);
            }
            Expr::Indexed(i) => {
                let indices = resolve_indices(&i.indices, &env)?;
                grid.set(&i.function.name, indices, value);
            }
            other => return Err(EvalError::Unbound(other.to_string())),
        }
    }
    Ok(())
}

fn execute_nest(
    clusters: &[&Cluster],
    depth: usize,
    grid: &mut Grid,
    position: &mut HashMap<String, i64>,
) -> Result<(), EvalError> {
    let mut start = 0;
    while start < clusters.len() {
        let level = clusters[start].ispace.intervals.iter().nth(depth).cloned();
        let mut end = start + 1;
        while end < clusters.len() && clusters[end].ispace.intervals.iter().nth(depth) == level.as_ref() {
            end += 1;
        }
        let group = &clusters[start..end];
        match level {
            None => {
                for cluster in group {
                    execute_point(cluster, grid, position)?;
                }
            }
            Some(interval) => {
                let (min, max) = grid
                    .bounds
                    .get(&interval.dim)
                    .copied()
                    .ok_or_else(|| EvalError::Unbound(interval.dim.max_name()))?;
                let (lo, hi) = (min + interval.lower, max + interval.upper);
                let backward = group[0].ispace.direction(&interval.dim) == Direction::Backward;
                let values: Box<dyn Iterator<Item = i64>> =
                    if backward { Box::new((lo..=hi).rev()) } else { Box::new(lo..=hi) };
                for v in values {
                    position.insert(interval.dim.name.clone(), v);
                    execute_nest(group, depth + 1, grid, position)?;
                }
                position.remove(&interval.dim.name);
            }
        }
        start = end;
    }
    Ok(())
}

/// Execute `clusters` in order over `grid`.
pub fn interpret(clusters: &[Cluster], grid: &mut Grid) -> Result<(), EvalError> {
    let refs: Vec<&Cluster> = clusters.iter().collect();
    execute_nest(&refs, 0, grid, &mut HashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolics::{Assignment, Index};

    #[test]
    fn test_time_marching() {
        let t = Dimension::time("t");
        let x = Dimension::space("x");
        let u = Function::input("u");
        // u[t+1, x] = u[t, x] + 1
        let e = Assignment::new(
            u.at(vec![Index::at(&t, 1), Index::at(&x, 0)]),
            u.at(vec![Index::at(&t, 0), Index::at(&x, 0)]) + Expr::one(),
        );
        let cluster = Cluster::from_exprs(vec![e], &[t.clone(), x.clone()]);
        let mut grid = Grid::new().bounds(&t, 0, 2).bounds(&x, 0, 3);
        grid.fill(&u, &[t.clone(), x.clone()], 0, |_| 0.0);
        interpret(&[cluster], &mut grid).unwrap();
        assert_eq!(grid.get("u", &[3, 2]), Some(3.0));
    }

    #[test]
    fn test_missing_read_is_an_error() {
        let x = Dimension::space("x");
        let u = Function::input("u");
        let v = Function::input("v");
        let e = Assignment::new(v.at(vec![Index::at(&x, 0)]), u.at(vec![Index::at(&x, 1)]));
        let cluster = Cluster::from_exprs(vec![e], &[x.clone()]);
        let mut grid = Grid::new().bounds(&x, 0, 3);
        grid.fill(&u, &[x.clone()], 0, |p| p[0] as f64);
        assert!(interpret(&[cluster], &mut grid).is_err());
    }
}
