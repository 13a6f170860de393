//! Candidate generation and search strategies for auto-tuning

use super::config::{AutotuneOptions, Level, Platform};
use super::kernel::{Arguments, IterationTree, KernelDimension, Parameter};
use crate::symbolics::Dimension;
use itertools::Itertools;
use log::debug;

/// Values for a set of tunable parameters, by name.
pub type Binding = Vec<(String, i64)>;

/// Number of points of `root` bound by `args`.
pub fn extent(args: &Arguments, root: &Dimension) -> Option<i64> {
    let min = args.get(&root.min_name())?.as_int()?;
    let max = args.get(&root.max_name())?.as_int()?;
    Some(max - min + 1)
}

/// Candidate block shapes, one value per blockable dimension's step.
///
/// Every default block size is tried on all dimensions at once, followed
/// by the whole domain. At [`Level::Aggressive`] the search also ramps the
/// largest default up, mixes the innermost size of every shape into the
/// first few, and doubles every non-empty subset of dimensions. Shapes
/// larger than the domain are dropped, as are duplicates.
pub fn generate_block_shapes(
    blockable: &[KernelDimension],
    args: &Arguments,
    level: Level,
    options: &AutotuneOptions,
) -> Vec<Binding> {
    let max_bs: Binding = blockable
        .iter()
        .filter_map(|d| match d {
            KernelDimension::Block { step, root, .. } => {
                Some((step.clone(), extent(args, root).unwrap_or(i64::MAX)))
            }
            _ => None,
        })
        .collect();
    if max_bs.is_empty() {
        return Vec::new();
    }

    let mut sizes = options.blocksizes.clone();
    sizes.sort_unstable();
    let mut ret: Vec<Binding> =
        sizes.iter().map(|&v| max_bs.iter().map(|(step, _)| (step.clone(), v)).collect()).collect();
    ret.push(max_bs.clone());

    if level == Level::Aggressive {
        if let Some(&largest) = sizes.last() {
            let mut handle: Binding = max_bs.iter().map(|(step, _)| (step.clone(), largest)).collect();
            for _ in 0..3 {
                let doubled: Binding = handle.iter().map(|(step, v)| (step.clone(), v.saturating_mul(2))).collect();
                match ret.iter().position(|bs| *bs == handle) {
                    Some(at) => ret.insert(at + 1, doubled.clone()),
                    None => ret.push(doubled.clone()),
                }
                handle = doubled;
            }
        }

        let mut extra = Vec::new();
        let ndims = max_bs.len();
        for bs in ret.iter().take(4) {
            for other in &ret {
                let mut shuffled = bs[..ndims - 1].to_vec();
                shuffled.push(other[ndims - 1].clone());
                extra.push(shuffled);
            }
        }
        for bs in &ret {
            for k in 1..=ndims {
                for subset in (0..ndims).combinations(k) {
                    let doubled = bs
                        .iter()
                        .enumerate()
                        .map(|(i, (step, v))| {
                            (step.clone(), if subset.contains(&i) { v.saturating_mul(2) } else { *v })
                        })
                        .collect();
                    extra.push(doubled);
                }
            }
        }
        ret.extend(extra);
    }

    let shapes: Vec<Binding> = ret
        .into_iter()
        .filter(|bs| bs.iter().zip(&max_bs).all(|((_, v), (_, max))| v <= max))
        .unique()
        .collect();
    debug!("AutoTuner: {} candidate block shapes", shapes.len());
    shapes
}

/// Candidate thread counts, one binding per thread-count parameter.
///
/// The caller's value comes first; at [`Level::Aggressive`] on
/// [`Platform::Knl`] all, half and a quarter of the cores are tried too.
pub fn generate_nthreads(
    nthreads: &[Parameter],
    args: &Arguments,
    level: Level,
    options: &AutotuneOptions,
) -> Vec<Binding> {
    let mut ret: Vec<Binding> = nthreads
        .iter()
        .filter_map(|p| args.get(&p.name).and_then(|v| v.as_int()).map(|v| vec![(p.name.clone(), v)]))
        .collect();
    if level == Level::Aggressive && options.platform == Platform::Knl {
        let ncores = num_cpus::get() as i64;
        for p in nthreads {
            for n in [ncores, ncores / 2, ncores / 4] {
                ret.push(vec![(p.name.clone(), n)]);
            }
        }
    }
    ret.into_iter().unique().collect()
}

/// Blocks each thread gets per parallel loop nest, for a candidate run.
///
/// Built once per kernel from the loop nests that iterate over a blocked
/// dimension; evaluated against the arguments of each run.
#[derive(Debug, Clone, Default)]
pub struct ParallelBlocks {
    /// `(step, root)` of the blocked loops among the collapsed loops of a
    /// nest's outermost parallel loop, paired with a thread-count parameter
    nests: Vec<(Vec<(String, Dimension)>, String)>,
}

impl ParallelBlocks {
    /// Collect the blocked nests of `trees`
    pub fn new(trees: &[IterationTree], blockable: &[KernelDimension], nthreads: &[Parameter]) -> Self {
        let blocked = |dim: &Dimension| {
            blockable.iter().find_map(|d| match d {
                KernelDimension::Block { dim: b, step, root } if b == dim => Some((step.clone(), root.clone())),
                _ => None,
            })
        };
        let mut nests = Vec::new();
        for tree in trees {
            if !tree.iter().any(|i| blocked(&i.dim).is_some()) {
                continue;
            }
            // the parallel nest starts below the sequential time loops
            let start = tree.iter().position(|i| !i.dim.is_time()).unwrap_or(tree.len());
            let nest = &tree[start..];
            let ncollapsed = nest.first().map_or(0, |i| i.ncollapsed).min(nest.len());
            let collapsed: Vec<(String, Dimension)> =
                nest[..ncollapsed].iter().filter_map(|i| blocked(&i.dim)).collect();
            for p in nthreads {
                nests.push((collapsed.clone(), p.name.clone()));
            }
        }
        Self { nests }
    }

    /// Blocks per thread for every nest; `None` if some size is unbound.
    pub fn evaluate(&self, args: &Arguments) -> Option<Vec<f64>> {
        self.nests
            .iter()
            .map(|(loops, nthreads)| {
                let nt = args.get(nthreads)?.as_int()?;
                let mut nblocks = 1i64;
                for (step, root) in loops {
                    let step = args.get(step)?.as_int()?;
                    if step <= 0 {
                        return None;
                    }
                    nblocks *= extent(args, root)? / step;
                }
                Some(nblocks as f64 / nt as f64)
            })
            .collect()
    }

    /// Whether every thread would get less than one block of work.
    pub fn too_small(&self, args: &Arguments) -> bool {
        match self.evaluate(args) {
            Some(values) => !values.is_empty() && values.iter().all(|&v| v < 1.0),
            None => false,
        }
    }
}

/// The candidate runs: every combination of one binding per generator.
#[derive(Clone, Debug, Default)]
pub struct TuningSpace {
    generators: Vec<Vec<Binding>>,
}

impl TuningSpace {
    /// Create a new empty search space
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a generator; empty generators are ignored.
    pub fn add_generator(&mut self, candidates: Vec<Binding>) {
        if !candidates.is_empty() {
            self.generators.push(candidates);
        }
    }

    /// Total number of runs
    pub fn size(&self) -> usize {
        if self.generators.is_empty() {
            return 0;
        }
        self.generators.iter().map(Vec::len).product()
    }

    /// All runs, in generation order
    pub fn all_configurations(&self) -> Vec<Binding> {
        if self.generators.is_empty() {
            return Vec::new();
        }
        self.generators
            .iter()
            .map(|g| g.iter())
            .multi_cartesian_product()
            .map(|parts| parts.into_iter().flatten().cloned().collect())
            .collect()
    }
}

/// Trait for search strategies
pub trait SearchStrategy {
    /// Get the next run to try
    fn next(&mut self, space: &TuningSpace) -> Option<Binding>;

    /// Reset the search
    fn reset(&mut self);

    /// Get name of the strategy
    fn name(&self) -> &str;
}

/// Grid search - exhaustively try all runs
#[derive(Default)]
pub struct GridSearch {
    index: usize,
    configs: Option<Vec<Binding>>,
}

impl GridSearch {
    /// Create a grid search
    pub fn new() -> Self {
        Self::default()
    }
}

impl SearchStrategy for GridSearch {
    fn next(&mut self, space: &TuningSpace) -> Option<Binding> {
        let configs = self.configs.get_or_insert_with(|| space.all_configurations());
        let config = configs.get(self.index).cloned();
        if config.is_some() {
            self.index += 1;
        }
        config
    }

    fn reset(&mut self) {
        self.index = 0;
        self.configs = None;
    }

    fn name(&self) -> &str {
        "grid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autotuning::kernel::{ArgValue, Iteration, ParamKind};
    use crate::ir::Direction;

    fn block(name: &str, step: &str, root: &str) -> KernelDimension {
        KernelDimension::Block { dim: Dimension::space(name), step: step.to_string(), root: Dimension::space(root) }
    }

    fn bounds(pairs: &[(&str, i64)]) -> Arguments {
        pairs.iter().map(|(k, v)| (k.to_string(), ArgValue::Int(*v))).collect()
    }

    #[test]
    fn test_basic_block_shapes() {
        let blockable = vec![block("x0_blk0", "x0_blk0_size", "x"), block("y0_blk0", "y0_blk0_size", "y")];
        let args = bounds(&[("x_m", 0), ("x_M", 49), ("y_m", 0), ("y_M", 29)]);
        let shapes = generate_block_shapes(&blockable, &args, Level::Basic, &AutotuneOptions::default());

        let expected: Vec<Binding> = [8, 16, 24]
            .iter()
            .map(|&v| vec![("x0_blk0_size".to_string(), v), ("y0_blk0_size".to_string(), v)])
            .chain(std::iter::once(vec![("x0_blk0_size".to_string(), 50), ("y0_blk0_size".to_string(), 30)]))
            .collect();
        assert_eq!(shapes, expected);
    }

    #[test]
    fn test_aggressive_block_shapes_stay_in_bounds() {
        let blockable = vec![block("x0_blk0", "x0_blk0_size", "x"), block("y0_blk0", "y0_blk0_size", "y")];
        let args = bounds(&[("x_m", 0), ("x_M", 511), ("y_m", 0), ("y_M", 63)]);
        let options = AutotuneOptions::default();
        let basic = generate_block_shapes(&blockable, &args, Level::Basic, &options);
        let aggressive = generate_block_shapes(&blockable, &args, Level::Aggressive, &options);

        assert!(aggressive.len() > basic.len());
        assert!(aggressive.iter().all(|bs| bs[0].1 <= 512 && bs[1].1 <= 64));
        assert!(aggressive.iter().all_unique());
        assert!(aggressive.contains(&vec![("x0_blk0_size".to_string(), 16), ("y0_blk0_size".to_string(), 8)]));
    }

    #[test]
    fn test_aggressive_block_shapes_without_bounds() {
        let blockable = vec![block("x0_blk0", "x0_blk0_size", "x")];
        let args = bounds(&[("nthreads", 1)]);
        let shapes = generate_block_shapes(&blockable, &args, Level::Aggressive, &AutotuneOptions::default());

        assert!(shapes.iter().all(|bs| bs[0].1 > 0));
        assert!(shapes.iter().all_unique());
        assert!(shapes.contains(&vec![("x0_blk0_size".to_string(), 1024)]));
        assert!(shapes.contains(&vec![("x0_blk0_size".to_string(), i64::MAX)]));
    }

    #[test]
    fn test_nthreads_candidates() {
        let nthreads = vec![Parameter::new("nthreads", ParamKind::NThreads)];
        let args = bounds(&[("nthreads", 4)]);
        let options = AutotuneOptions::default();
        assert_eq!(
            generate_nthreads(&nthreads, &args, Level::Aggressive, &options),
            vec![vec![("nthreads".to_string(), 4)]]
        );
        let knl = AutotuneOptions::default().platform(Platform::Knl);
        assert!(!generate_nthreads(&nthreads, &args, Level::Aggressive, &knl).is_empty());
    }

    #[test]
    fn test_parallel_blocks() {
        let x = Dimension::space("x");
        let xb = Dimension::space("x0_blk0");
        let blockable = vec![block("x0_blk0", "x0_blk0_size", "x")];
        let nthreads = vec![Parameter::new("nthreads", ParamKind::NThreads)];
        let trees = vec![vec![
            Iteration::new(0, xb, Direction::Forward).ncollapsed(1),
            Iteration::new(1, x, Direction::Forward),
        ]];
        let blocks = ParallelBlocks::new(&trees, &blockable, &nthreads);

        let mut args = bounds(&[("x_m", 0), ("x_M", 63), ("x0_blk0_size", 16), ("nthreads", 8)]);
        assert_eq!(blocks.evaluate(&args), Some(vec![0.5]));
        assert!(blocks.too_small(&args));

        args.insert("nthreads".to_string(), ArgValue::Int(2));
        assert!(!blocks.too_small(&args));
    }

    #[test]
    fn test_grid_search() {
        let mut space = TuningSpace::new();
        space.add_generator(vec![vec![("a".to_string(), 1)], vec![("a".to_string(), 2)]]);
        space.add_generator(vec![vec![("n".to_string(), 1)], vec![("n".to_string(), 4)], vec![("n".to_string(), 8)]]);
        space.add_generator(Vec::new());
        assert_eq!(space.size(), 6);

        let mut search = GridSearch::new();
        let mut count = 0;
        while let Some(run) = search.next(&space) {
            assert_eq!(run.len(), 2);
            count += 1;
        }
        assert_eq!(count, 6);
    }
}
