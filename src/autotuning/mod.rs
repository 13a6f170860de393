//! Auto-Tuning Framework
//!
//! Picks the block sizes and thread counts a compiled kernel runs fastest
//! with, by timing short runs of the kernel itself over a candidate grid.
//!
//! # Features
//!
//! - **Block shape tuning**: Cubic defaults, the whole domain and, at the
//!   aggressive level, ramped, shuffled and per-dimension doubled shapes
//! - **Thread count tuning**: Fractions of the core count on many-core parts
//! - **Preemptive mode**: Runs work on copies of the outputs with halo
//!   exchange disabled, so the caller's data is untouched
//! - **Runtime mode**: Runs advance the real computation a few timesteps
//!   at a time, and the caller resumes where tuning stopped
//!
//! # Example
//!
//! ```ignore
//! use stencilopt::autotuning::{autotune, ArgValue, Arguments};
//!
//! let (tuned, summary) = autotune(&mut kernel, &args, "aggressive", "runtime")?;
//! println!("{} runs, best: {:?}", summary.runs, summary.tuned);
//! ```

mod config;
mod halo;
mod kernel;
mod results;
mod search;
mod stepper;

pub use config::{process_stack_limit, AutotuneOptions, Level, Mode, Platform};
pub use halo::HaloGuard;
pub use kernel::{
    scalar_bindings, ArgValue, Arguments, Buffer, Iteration, IterationTree, Kernel, KernelDimension, Message,
    Neighborhood, ParamKind, Parameter, Ranks, Timer, PROC_NULL,
};
pub use results::{RunRecord, TuningResults, TuningSummary};
pub use search::{
    extent, generate_block_shapes, generate_nthreads, Binding, GridSearch, ParallelBlocks, SearchStrategy, TuningSpace,
};
pub use stepper::Stepper;

use crate::symbolics::evaluate;
use itertools::Itertools;
use log::{debug, info, warn};
use thiserror::Error;

/// Errors raised by the autotuner.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutotuneError {
    /// `(level, mode)` is not an accepted combination
    #[error("The accepted `(level, mode)` combinations are `{accepted}`; provided `{provided}` instead")]
    InvalidCombination {
        /// Accepted `(level, mode)` pairs
        accepted: String,
        /// The rejected pair
        provided: String,
    },

    /// A declared kernel parameter has no argument
    #[error("No argument for kernel parameter `{0}`")]
    MissingArgument(String),
}

/// Result type for autotuning operations.
pub type AutotuneResult<T> = Result<T, AutotuneError>;

/// Tune `kernel` under default options.
///
/// Returns the arguments to run the kernel with and a summary of the
/// session. When there is nothing to tune, or tuning has to be abandoned,
/// the arguments come back unchanged with an empty summary.
pub fn autotune(
    kernel: &mut dyn Kernel,
    args: &Arguments,
    level: &str,
    mode: &str,
) -> AutotuneResult<(Arguments, TuningSummary)> {
    AutoTuner::new(AutotuneOptions::default()).tune(kernel, args, level, mode)
}

/// The main auto-tuner
pub struct AutoTuner {
    /// Tuning configuration
    options: AutotuneOptions,
    /// Search strategy
    strategy: Box<dyn SearchStrategy>,
    /// Runs timed by the last session
    results: TuningResults,
}

impl AutoTuner {
    /// Create a new auto-tuner with a grid search
    pub fn new(options: AutotuneOptions) -> Self {
        Self::with_strategy(options, Box::new(GridSearch::new()))
    }

    /// Create a tuner walking the search space with `strategy`
    pub fn with_strategy(options: AutotuneOptions, strategy: Box<dyn SearchStrategy>) -> Self {
        Self { options, strategy, results: TuningResults::new() }
    }

    /// Options in use
    pub fn options(&self) -> &AutotuneOptions {
        &self.options
    }

    /// Get all results of the last session
    pub fn results(&self) -> &TuningResults {
        &self.results
    }

    /// Run an auto-tuning session on `kernel`.
    pub fn tune(
        &mut self,
        kernel: &mut dyn Kernel,
        args: &Arguments,
        level: &str,
        mode: &str,
    ) -> AutotuneResult<(Arguments, TuningSummary)> {
        let (level, mode) = self.options.validate(level, mode)?;
        self.results = TuningResults::new();
        self.strategy.reset();

        let parameters = kernel.parameters();
        let blockable: Vec<KernelDimension> =
            kernel.dimensions().into_iter().filter(KernelDimension::is_blockable).collect();
        let nthreads: Vec<Parameter> =
            parameters.iter().filter(|p| p.kind == ParamKind::NThreads).cloned().collect();
        if blockable.is_empty() && nthreads.is_empty() {
            return Ok((args.clone(), TuningSummary::default()));
        }

        let mut at_args = Arguments::new();
        for p in &parameters {
            let value = args.get(&p.name).ok_or_else(|| AutotuneError::MissingArgument(p.name.clone()))?;
            at_args.insert(p.name.clone(), value.clone());
        }

        if mode == Mode::Preemptive {
            for p in parameters.iter().filter(|p| p.kind == ParamKind::OutputBuffer) {
                let copy = match at_args.get(&p.name) {
                    Some(ArgValue::Buffer(b)) => b.deep_copy(),
                    _ => continue,
                };
                at_args.insert(p.name.clone(), ArgValue::Buffer(copy));
            }
        }

        // Restores the routing tables on every exit path
        let _halo = (mode != Mode::Runtime).then(|| HaloGuard::disable(&parameters, args));

        let trees = kernel.iteration_trees();
        let steppers: Vec<&Iteration> =
            trees.iter().flatten().filter(|i| i.dim.is_time()).unique_by(|i| i.id).collect();
        let (stepper, timesteps) = match steppers.as_slice() {
            [] => (None, 1),
            [only] => {
                let stepper = Stepper::new(only);
                match stepper.init(&mut at_args, self.options.squeezer) {
                    Some(n) => (Some(stepper), n),
                    None => return Ok((args.clone(), TuningSummary::default())),
                }
            }
            _ => {
                warn!("AutoTuner: cannot perform autotuning unless there is one time loop; skipping");
                return Ok((args.clone(), TuningSummary::default()));
            }
        };

        let mut space = TuningSpace::new();
        space.add_generator(generate_block_shapes(&blockable, args, level, &self.options));
        space.add_generator(generate_nthreads(&nthreads, args, level, &self.options));
        let parblocks = ParallelBlocks::new(&trees, &blockable, &nthreads);
        let footprint = kernel.stack_footprint();
        let profiler = kernel.profiler().to_string();
        info!("AutoTuner: tuning `{}` over {} candidate runs ({}, {})", kernel.name(), space.size(), level, mode);

        while let Some(run) = self.strategy.next(&space) {
            if let Some(stepper) = &stepper {
                if !stepper.check(&at_args, args, mode) {
                    break;
                }
            }
            for (name, value) in &run {
                at_args.insert(name.clone(), ArgValue::Int(*value));
            }
            let record = RunRecord { binding: run, elapsed: 0.0 };

            if !self.options.permit_small_workloads && parblocks.too_small(&at_args) {
                debug!(
                    "AutoTuner: run <{}> leaves threads without a full block; discarded",
                    record.to_string_compact()
                );
                continue;
            }

            if let Some(footprint) = &footprint {
                match evaluate(footprint, &scalar_bindings(&at_args)) {
                    Ok(bytes) if bytes > self.options.stack_limit as f64 => {
                        debug!(
                            "AutoTuner: run <{}> needs {} bytes of stack; discarded",
                            record.to_string_compact(),
                            bytes
                        );
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("AutoTuner: couldn't determine stack size ({}); skipping run", e);
                        continue;
                    }
                }
            }

            let timer = match at_args.get(&profiler) {
                Some(ArgValue::Timer(t)) => t.reset(),
                _ => Timer::default(),
            };
            at_args.insert(profiler.clone(), ArgValue::Timer(timer.clone()));

            let call_args: Vec<ArgValue> = parameters.iter().filter_map(|p| at_args.get(&p.name).cloned()).collect();
            if let Err(e) = kernel.call(&call_args) {
                warn!("AutoTuner: run <{}> failed ({}); skipping", record.to_string_compact(), e);
                continue;
            }

            let elapsed = timer.total();
            info!("AutoTuner: run <{}> took {} (s) in {} timesteps", record.to_string_compact(), elapsed, timesteps);
            self.results.add(record.binding, elapsed);

            if let Some(stepper) = &stepper {
                stepper.advance(&mut at_args, timesteps, mode);
            }
        }

        let Some(best) = self.results.best().cloned() else {
            warn!("AutoTuner: couldn't perform any runs");
            return Ok((args.clone(), TuningSummary::default()));
        };
        info!("AutoTuner: selected best: <{}>", best.to_string_compact());

        let mut tuned = args.clone();
        for (name, value) in &best.binding {
            tuned.insert(name.clone(), ArgValue::Int(*value));
        }
        if let Some(stepper) = &stepper {
            stepper.finalize(&at_args, &mut tuned, mode);
        }
        let timer = match tuned.get(&profiler) {
            Some(ArgValue::Timer(t)) => t.reset(),
            _ => Timer::default(),
        };
        tuned.insert(profiler, ArgValue::Timer(timer));

        let summary = TuningSummary {
            runs: self.results.len(),
            timesteps_per_run: timesteps,
            tuned: best.binding.into_iter().collect(),
        };
        Ok((tuned, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolics::Dimension;
    use indexmap::IndexMap;

    struct Untunable;

    impl Kernel for Untunable {
        fn name(&self) -> &str {
            "untunable"
        }
        fn parameters(&self) -> Vec<Parameter> {
            vec![Parameter::new("x_m", ParamKind::Scalar)]
        }
        fn dimensions(&self) -> Vec<KernelDimension> {
            vec![KernelDimension::Space(Dimension::space("x"))]
        }
        fn body(&self) -> Vec<IterationTree> {
            Vec::new()
        }
        fn profiler(&self) -> &str {
            "timers"
        }
        fn call(&mut self, _args: &[ArgValue]) -> anyhow::Result<()> {
            anyhow::bail!("must not run")
        }
    }

    #[test]
    fn test_nothing_to_tune() {
        let args: Arguments = IndexMap::from([("x_m".to_string(), ArgValue::Int(0))]);
        let (tuned, summary) = autotune(&mut Untunable, &args, "basic", "preemptive").unwrap();
        assert_eq!(tuned, args);
        assert!(summary.is_empty());
    }

    #[test]
    fn test_invalid_combination_is_an_error() {
        let args = Arguments::new();
        let err = autotune(&mut Untunable, &args, "basic", "bogus").unwrap_err();
        assert!(matches!(err, AutotuneError::InvalidCombination { .. }));
    }
}
