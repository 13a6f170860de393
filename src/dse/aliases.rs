//! Alias detection.
//!
//! Two expressions are aliases if one is the other translated by a
//! constant offset along each space dimension, e.g. `a[x] + b[x]` and
//! `a[x + 1] + b[x + 1]`. A group of aliases can be computed once into a
//! temporary array and read back at the right offsets.

use crate::symbolics::{Assignment, Dimension, Expr, Index, Indexed};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Offset of an aliased expression from the group's origin.
pub type Distance = IndexMap<Dimension, i64>;

/// A group of expressions equal up to a translation.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    /// Representative expression, placed at the group's centre of mass
    pub origin: Expr,
    /// The aliasing expressions, in order of appearance
    pub aliased: Vec<Expr>,
    /// `distances[i]` translates `origin` into `aliased[i]`
    pub distances: Vec<Distance>,
}

impl Alias {
    /// Number of aliased expressions
    pub fn len(&self) -> usize {
        self.aliased.len()
    }

    /// Whether the group has no expression
    pub fn is_empty(&self) -> bool {
        self.aliased.is_empty()
    }

    /// Aliased expressions with their distance from the origin
    pub fn with_distance(&self) -> impl Iterator<Item = (&Expr, &Distance)> {
        self.aliased.iter().zip(self.distances.iter())
    }

    /// Smallest and largest distance along each dimension, always
    /// including zero.
    pub fn relaxed_diameter(&self) -> IndexMap<Dimension, (i64, i64)> {
        let mut diameter: IndexMap<Dimension, (i64, i64)> = IndexMap::new();
        for distance in &self.distances {
            for (dim, d) in distance {
                let entry = diameter.entry(dim.clone()).or_insert((0, 0));
                entry.0 = entry.0.min(*d);
                entry.1 = entry.1.max(*d);
            }
        }
        diameter
    }
}

/// Alias groups of a sequence of assignments, keyed by origin.
#[derive(Debug, Clone, Default)]
pub struct Aliases {
    groups: IndexMap<Expr, Alias>,
    lookup: IndexMap<Expr, Expr>,
}

impl Aliases {
    /// The group `expr` belongs to.
    pub fn get(&self, expr: &Expr) -> Option<&Alias> {
        self.lookup.get(expr).and_then(|origin| self.groups.get(origin))
    }

    /// Number of alias groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no alias was found
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Iterate over the alias groups
    pub fn iter(&self) -> impl Iterator<Item = &Alias> {
        self.groups.values()
    }
}

/// Translate every space subscript of `expr` by `shift`.
pub fn translate(expr: &Expr, shift: &Distance) -> Expr {
    match expr {
        Expr::Indexed(i) => Expr::Indexed(Indexed {
            function: i.function.clone(),
            indices: i
                .indices
                .iter()
                .map(|index| match index {
                    Index::Affine { dim, offset } => {
                        Index::Affine { dim: dim.clone(), offset: offset + shift.get(dim).copied().unwrap_or(0) }
                    }
                    constant => constant.clone(),
                })
                .collect(),
        }),
        leaf if leaf.args().is_empty() => leaf.clone(),
        other => other.map_args(|a| translate(a, shift), false),
    }
}

/// Smallest offset per space dimension among the accesses of `expr`.
fn anchor(expr: &Expr) -> Distance {
    let mut anchor = Distance::new();
    for indexed in expr.indexeds() {
        for index in &indexed.indices {
            if let Index::Affine { dim, offset } = index {
                if dim.is_time() {
                    continue;
                }
                let entry = anchor.entry(dim.clone()).or_insert(*offset);
                *entry = (*entry).min(*offset);
            }
        }
    }
    anchor.sort_keys();
    anchor
}

fn negate(d: &Distance) -> Distance {
    d.iter().map(|(k, v)| (k.clone(), -v)).collect()
}

/// Collect the alias groups among `exprs`.
///
/// Only scalar definitions whose right-hand side reads at least one array
/// and no scalar defined among `exprs` take part; anything else cannot be
/// translated safely. A group may have a single member.
pub fn collect(exprs: &[Assignment]) -> Aliases {
    let defined: HashSet<&str> = exprs.iter().filter_map(Assignment::scalar_target).collect();

    let mut buckets: IndexMap<Expr, Vec<(Expr, Distance)>> = IndexMap::new();
    for e in exprs {
        if !e.lhs.is_symbol() || e.rhs.indexeds().is_empty() {
            continue;
        }
        if e.rhs.free_symbols().iter().any(|s| defined.contains(s)) {
            continue;
        }
        let position = anchor(&e.rhs);
        let key = translate(&e.rhs, &negate(&position));
        let bucket = buckets.entry(key).or_default();
        if !bucket.iter().any(|(rhs, _)| rhs == &e.rhs) {
            bucket.push((e.rhs.clone(), position));
        }
    }

    let mut aliases = Aliases::default();
    for (key, members) in buckets {
        let n = members.len() as i64;
        let mut centre = Distance::new();
        for (_, position) in &members {
            for (dim, offset) in position {
                *centre.entry(dim.clone()).or_insert(0) += offset;
            }
        }
        for total in centre.values_mut() {
            *total /= n;
        }
        let origin = translate(&key, &centre);
        let (aliased, distances): (Vec<Expr>, Vec<Distance>) = members
            .into_iter()
            .map(|(rhs, position)| {
                let distance = position.iter().map(|(dim, o)| (dim.clone(), o - centre[dim])).collect();
                (rhs, distance)
            })
            .unzip();
        for a in &aliased {
            aliases.lookup.insert(a.clone(), origin.clone());
        }
        aliases.groups.insert(origin.clone(), Alias { origin, aliased, distances });
    }
    aliases
}
