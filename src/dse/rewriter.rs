//! Rewriter pipelines, the pass registry and pipeline state.

use super::passes;
use crate::ir::Cluster;
use crate::symbolics::{Assignment, Expr};
use indexmap::IndexMap;
use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;

/// Errors raised while configuring a rewriter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    /// Names that are not registered passes
    #[error("Unknown passes `{0}`")]
    UnknownPass(String),

    /// A mode that is neither a pipeline nor a pass list
    #[error("Unknown rewriter mode `{0}`")]
    UnknownMode(String),
}

/// Result type for rewriter configuration.
pub type RewriteResult<T> = Result<T, RewriteError>;

/// Monotonic generator of temporary names: `r0`, `r1`, ...
#[derive(Debug, Clone)]
pub struct TempNameGen {
    prefix: String,
    counter: usize,
}

impl TempNameGen {
    /// Generator of `r0`, `r1`, ...
    pub fn new() -> Self {
        Self::with_prefix("r")
    }

    /// Generator of `<prefix>0`, `<prefix>1`, ...
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), counter: 0 }
    }

    /// Next unused name
    pub fn next_name(&mut self) -> String {
        let name = format!("{}{}", self.prefix, self.counter);
        self.counter += 1;
        name
    }

    /// A fresh scalar.
    pub fn symbol(&mut self) -> Expr {
        Expr::symbol(self.next_name())
    }
}

impl Default for TempNameGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Thresholds and switches shared by the passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriterConfig {
    /// Minimum cost (times number of occurrences) of an alias group to be
    /// lifted into an array temporary
    pub min_cost_alias: usize,
    /// Same, for time-invariant expressions, which are lifted even when
    /// they occur once
    pub min_cost_alias_inv: usize,
    /// Minimum cost of an expression to be factorized repeatedly
    pub min_cost_factorize: usize,
    /// Record operation counts after each pass
    pub profile: bool,
    /// Prefix of temporary names
    pub temp_prefix: String,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            min_cost_alias: 10,
            min_cost_alias_inv: 50,
            min_cost_factorize: 100,
            profile: true,
            temp_prefix: "r".to_string(),
        }
    }
}

impl RewriterConfig {
    /// Set the minimum cost of an alias group to be lifted
    pub fn min_cost_alias(mut self, cost: usize) -> Self {
        self.min_cost_alias = cost;
        self
    }

    /// Set the minimum cost of a time-invariant expression to be lifted
    pub fn min_cost_alias_inv(mut self, cost: usize) -> Self {
        self.min_cost_alias_inv = cost;
        self
    }

    /// Set the minimum cost of an expression to be factorized
    pub fn min_cost_factorize(mut self, cost: usize) -> Self {
        self.min_cost_factorize = cost;
        self
    }

    /// Record operation counts after every pass
    pub fn profile(mut self, enabled: bool) -> Self {
        self.profile = enabled;
        self
    }

    /// Set the prefix of temporary names
    pub fn temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_prefix = prefix.into();
        self
    }
}

/// Signature shared by every pass.
pub type PassFn = fn(&Cluster, &mut TempNameGen, &RewriterConfig) -> Vec<Cluster>;

/// The rewrite passes, by registered name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pass {
    /// Sum-of-products extraction
    ExtractSop,
    /// Factorization
    Factorize,
    /// Redundancy elimination across stencil offsets
    Gcse,
    /// Common sub-expression elimination
    Cse,
    /// Time-invariant extraction
    ExtractInvariants,
    /// Increment extraction
    ExtractIncrements,
    /// Polynomial approximation of `sin` and `cos`
    OptTranscendentals,
}

static REGISTRY: Lazy<IndexMap<&'static str, (Pass, PassFn)>> =
    Lazy::new(|| Pass::ALL.iter().map(|p| (p.name(), (*p, p.function()))).collect());

impl Pass {
    /// Every pass, in registry order
    pub const ALL: [Pass; 7] = [
        Pass::ExtractSop,
        Pass::Factorize,
        Pass::Gcse,
        Pass::Cse,
        Pass::ExtractInvariants,
        Pass::ExtractIncrements,
        Pass::OptTranscendentals,
    ];

    /// Every registered pass name.
    pub fn names() -> Vec<&'static str> {
        REGISTRY.keys().copied().collect()
    }

    /// Registry name
    pub fn name(&self) -> &'static str {
        match self {
            Pass::ExtractSop => "extract_sop",
            Pass::Factorize => "factorize",
            Pass::Gcse => "gcse",
            Pass::Cse => "cse",
            Pass::ExtractInvariants => "extract_invariants",
            Pass::ExtractIncrements => "extract_increments",
            Pass::OptTranscendentals => "opt_transcedentals",
        }
    }

    /// Function implementing the pass
    pub fn function(&self) -> PassFn {
        match self {
            Pass::ExtractSop => passes::extract_sum_of_products,
            Pass::Factorize => passes::factorize,
            Pass::Gcse => passes::eliminate_inter_stencil_redundancies,
            Pass::Cse => passes::eliminate_intra_stencil_redundancies,
            Pass::ExtractInvariants => passes::extract_time_invariants,
            Pass::ExtractIncrements => passes::extract_increments,
            Pass::OptTranscendentals => passes::optimize_trigonometry,
        }
    }
}

impl FromStr for Pass {
    type Err = RewriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        REGISTRY
            .get(s.trim())
            .map(|(pass, _)| *pass)
            .ok_or_else(|| RewriteError::UnknownPass(s.to_string()))
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Evolving state of one pipeline run.
#[derive(Debug, Clone)]
pub struct State {
    /// Current clusters
    pub clusters: Vec<Cluster>,
    /// Temporary names shared by all passes
    pub template: TempNameGen,
    /// Operation count after each pass, keyed `<pass><n>`
    pub ops: IndexMap<String, usize>,
    /// Seconds spent in each pass, keyed `<pass><n>`
    pub timings: IndexMap<String, f64>,
}

impl State {
    /// Initial state holding `cluster`
    pub fn new(cluster: Cluster, template: TempNameGen) -> Self {
        Self { clusters: vec![cluster], template, ops: IndexMap::new(), timings: IndexMap::new() }
    }

    /// Replace the clusters, unless a pass produced none.
    pub fn update(&mut self, clusters: Vec<Cluster>) {
        if !clusters.is_empty() {
            self.clusters = clusters;
        }
    }

    /// Operation count over the dense clusters.
    pub fn dense_ops(&self) -> usize {
        self.clusters.iter().filter(|c| c.dense).map(Cluster::ops).sum()
    }
}

/// Run `pass` over every cluster of `state`, recording its timing and, when
/// profiling, the resulting operation count.
pub fn apply_pass(state: &mut State, name: &str, pass: PassFn, config: &RewriterConfig) {
    let tic = Instant::now();
    let mut produced = Vec::with_capacity(state.clusters.len());
    for cluster in &state.clusters {
        produced.extend(pass(cluster, &mut state.template, config));
    }
    state.update(produced);
    let elapsed = tic.elapsed().as_secs_f64();

    let key = format!("{}{}", name, state.timings.len());
    state.timings.insert(key.clone(), elapsed);
    if config.profile {
        let ops = state.dense_ops();
        debug!("{}: {} clusters, {} ops, {:.6} s", key, state.clusters.len(), ops, elapsed);
        state.ops.insert(key, ops);
    }
}

/// Which pipeline a [`Rewriter`] runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewriterMode {
    /// No rewriting, finalization only
    Noop,
    /// Increment extraction
    Basic,
    /// Invariant extraction, redundancy elimination, CSE and factorization
    Advanced,
    /// The advanced pipeline with sums of products extracted between stages
    Aggressive,
    /// User-chosen passes
    Custom(Vec<Pass>),
}

impl RewriterMode {
    /// Passes in application order, finalization excluded
    pub fn passes(&self) -> Vec<Pass> {
        use Pass::*;
        match self {
            RewriterMode::Noop => vec![],
            RewriterMode::Basic => vec![ExtractIncrements],
            RewriterMode::Advanced => vec![ExtractInvariants, Gcse, Cse, Factorize],
            RewriterMode::Aggressive => {
                vec![ExtractSop, ExtractInvariants, Gcse, ExtractSop, Gcse, ExtractSop, Factorize, Cse]
            }
            RewriterMode::Custom(passes) => passes.clone(),
        }
    }
}

/// Applies a pipeline of passes to a cluster, then finalizes the result.
///
/// # Example
///
/// ```ignore
/// let rewriter = Rewriter::custom(&["extract_sop", "gcse", "cse"], RewriterConfig::default())?;
/// let state = rewriter.run(cluster);
/// println!("{:?}", state.ops);
/// ```
#[derive(Debug, Clone)]
pub struct Rewriter {
    mode: RewriterMode,
    config: RewriterConfig,
}

impl Rewriter {
    /// Create a rewriter
    pub fn new(mode: RewriterMode, config: RewriterConfig) -> Self {
        Self { mode, config }
    }

    /// Rewriter running [`RewriterMode::Basic`]
    pub fn basic(config: RewriterConfig) -> Self {
        Self::new(RewriterMode::Basic, config)
    }

    /// Rewriter running [`RewriterMode::Advanced`]
    pub fn advanced(config: RewriterConfig) -> Self {
        Self::new(RewriterMode::Advanced, config)
    }

    /// Rewriter running [`RewriterMode::Aggressive`]
    pub fn aggressive(config: RewriterConfig) -> Self {
        Self::new(RewriterMode::Aggressive, config)
    }

    /// A user-ordered pipeline. Every name must be registered.
    pub fn custom<S: AsRef<str>>(names: &[S], config: RewriterConfig) -> RewriteResult<Self> {
        let unknown: Vec<&str> = names.iter().map(|n| n.as_ref()).filter(|n| n.parse::<Pass>().is_err()).collect();
        if !unknown.is_empty() {
            return Err(RewriteError::UnknownPass(unknown.join(",")));
        }
        let passes = names.iter().filter_map(|n| n.as_ref().parse::<Pass>().ok()).collect();
        Ok(Self::new(RewriterMode::Custom(passes), config))
    }

    /// `noop`, `basic`, `advanced`, `aggressive`, or a comma-separated list
    /// of pass names.
    pub fn from_mode(mode: &str, config: RewriterConfig) -> RewriteResult<Self> {
        match mode.trim() {
            "noop" => Ok(Self::new(RewriterMode::Noop, config)),
            "basic" => Ok(Self::basic(config)),
            "advanced" => Ok(Self::advanced(config)),
            "aggressive" => Ok(Self::aggressive(config)),
            "" => Err(RewriteError::UnknownMode(mode.to_string())),
            custom => {
                let names: Vec<&str> = custom.split(',').collect();
                Self::custom(&names, config)
            }
        }
    }

    /// Pipeline in use
    pub fn mode(&self) -> &RewriterMode {
        &self.mode
    }

    /// Thresholds in use
    pub fn config(&self) -> &RewriterConfig {
        &self.config
    }

    /// Rewrite `cluster`. Increments are first brought to their compact
    /// form (`u += s` rather than `u += u + s`) so passes never see the
    /// target among the accumulated terms.
    pub fn run(&self, cluster: Cluster) -> State {
        let exprs: Vec<Assignment> = cluster
            .exprs
            .iter()
            .map(|e| if e.increment { e.with_rhs(e.increment_term()) } else { e.clone() })
            .collect();
        let cluster = cluster.rebuild(exprs);
        let mut state = State::new(cluster, TempNameGen::with_prefix(self.config.temp_prefix.clone()));
        let initial = state.dense_ops();

        for pass in self.mode.passes() {
            apply_pass(&mut state, pass.name(), pass.function(), &self.config);
        }
        apply_pass(&mut state, "finalize", passes::finalize, &self.config);

        info!(
            "Rewriter: {} passes, {} -> {} ops, {} clusters",
            self.mode.passes().len(),
            initial,
            state.dense_ops(),
            state.clusters.len()
        );
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_names_are_monotonic() {
        let mut template = TempNameGen::new();
        assert_eq!(template.next_name(), "r0");
        assert_eq!(template.next_name(), "r1");
        assert_eq!(template.symbol(), Expr::symbol("r2"));
    }

    #[test]
    fn test_registry_roundtrips_names() {
        for name in Pass::names() {
            let pass: Pass = name.parse().unwrap();
            assert_eq!(pass.name(), name);
        }
        assert_eq!(Pass::names().len(), 7);
    }

    #[test]
    fn test_custom_rejects_unknown_pass() {
        let err = Rewriter::custom(&["cse", "bogus"], RewriterConfig::default()).unwrap_err();
        assert_eq!(err, RewriteError::UnknownPass("bogus".to_string()));
        assert!(Rewriter::from_mode("cse,nope", RewriterConfig::default()).is_err());
        let ok = Rewriter::from_mode("extract_sop,gcse", RewriterConfig::default()).unwrap();
        assert_eq!(ok.mode(), &RewriterMode::Custom(vec![Pass::ExtractSop, Pass::Gcse]));
    }

    #[test]
    fn test_timings_keys_count_occurrences() {
        let cluster = Cluster::from_exprs(vec![Assignment::new(Expr::symbol("s"), Expr::symbol("a"))], &[]);
        let state = Rewriter::aggressive(RewriterConfig::default()).run(cluster);
        let keys: Vec<&String> = state.timings.keys().collect();
        assert_eq!(keys[0], "extract_sop0");
        assert_eq!(keys[3], "extract_sop3");
        assert_eq!(keys[8], "finalize8");
        assert_eq!(state.ops.len(), state.timings.len());
    }
}
